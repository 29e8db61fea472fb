use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::io::ReadHalf;

/// A [`ReadHalf`] that hands out fixed chunks and then fails
///
/// Every read after the chunks run out returns an error of the configured
/// kind. The reader signals when it is dropped, which for a
/// [`LineReader`](crate::reader::LineReader) happens only after its final
/// callback has returned.
pub struct FailingReader {
    chunks: VecDeque<Vec<u8>>,
    error: io::ErrorKind,
    dropped: Sender<()>,
}

/// Observes a [`FailingReader`] being dropped
#[derive(Clone)]
pub struct ReaderDone(Receiver<()>);

impl ReaderDone {
    /// Wait until one reader has been dropped
    pub fn wait(&self, timeout: Duration) -> bool {
        self.0.recv_timeout(timeout).is_ok()
    }
}

impl FailingReader {
    pub fn new(
        chunks: impl IntoIterator<Item = Vec<u8>>,
        error: io::ErrorKind,
    ) -> (Self, ReaderDone) {
        let (dropped, done) = Self::signal();
        (Self::with_signal(chunks, error, dropped), done)
    }

    /// A reader reporting its drop on an existing channel
    pub fn with_signal(
        chunks: impl IntoIterator<Item = Vec<u8>>,
        error: io::ErrorKind,
        dropped: Sender<()>,
    ) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            error,
            dropped,
        }
    }

    /// Channel pair for [`FailingReader::with_signal`]
    pub fn signal() -> (Sender<()>, ReaderDone) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, ReaderDone(rx))
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Err(self.error.into());
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

impl ReadHalf for FailingReader {
    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FailingReader {
    fn drop(&mut self) {
        let _ = self.dropped.send(());
    }
}
