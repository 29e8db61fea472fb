//! Support code for the `pydbg-attach` diagnostic tool
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use eyre::WrapErr;
use transport::{ConnectionConfig, Session};

/// How the debugging session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The debuggee closed the connection
    Exited,
    /// The connection broke
    CommunicationError,
}

/// Session that writes every inbound line to `out`
pub struct PrintingSession<W> {
    out: Mutex<W>,
    tx: Sender<Outcome>,
}

impl<W> PrintingSession<W>
where
    W: Write + Send + 'static,
{
    /// Returns the session and a channel receiving how the session ended
    pub fn new(out: W) -> (Self, Receiver<Outcome>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                out: Mutex::new(out),
                tx,
            },
            rx,
        )
    }

    fn finish(&self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}

impl<W> Session for PrintingSession<W>
where
    W: Write + Send + 'static,
{
    fn process_response(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "writing line");
        }
    }

    fn fire_communication_error(&self) {
        self.finish(Outcome::CommunicationError);
    }

    fn fire_exit_event(&self) {
        self.finish(Outcome::Exited);
    }

    fn disconnect(&self) {
        tracing::debug!("session disconnected");
    }
}

/// Load connection settings from a JSON file
///
/// Missing keys keep their defaults.
pub fn load_config(path: impl AsRef<Path>) -> eyre::Result<ConnectionConfig> {
    let path = path.as_ref();
    let f = File::open(path).wrap_err_with(|| format!("opening {}", path.display()))?;
    let config = serde_json::from_reader(BufReader::new(f))
        .wrap_err_with(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn lines_are_written_verbatim() {
        let (session, _rx) = PrintingSession::new(Vec::new());
        session.process_response("502\t1\tok\n");
        session.process_response("\n");
        let out = session.out.into_inner().unwrap();
        assert_eq!(out, b"502\t1\tok\n\n");
    }

    #[test]
    fn outcomes_are_signalled() {
        let (session, rx) = PrintingSession::new(Vec::new());
        session.fire_exit_event();
        session.fire_communication_error();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![
            Outcome::Exited,
            Outcome::CommunicationError
        ]);
    }

    #[test]
    fn config_file_overrides() -> eyre::Result<()> {
        let path = std::env::temp_dir().join(format!("pydbg-attach-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"settleDelay": 0, "retryDelay": 20}"#)?;
        let config = load_config(&path);
        std::fs::remove_file(&path)?;

        let config = config?;
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.retry_delay, Duration::from_millis(20));
        assert_eq!(config.max_attempts, 10);
        Ok(())
    }

    #[test]
    fn missing_config_file() {
        assert!(load_config("/definitely/not/here.json").is_err());
    }
}
