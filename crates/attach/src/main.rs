use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use attach::{Outcome, PrintingSession};
use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;
use transport::{
    ClientModeTransport, ConnectionConfig, DebuggerTransport, ServerModeTransport,
    WatchdogScheduler,
};

/// Attach to a debuggee and print every line it sends
#[derive(Debug, Parser)]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    #[clap(short, long, default_value_t = transport::DEFAULT_DEBUG_PORT)]
    port: u16,

    /// Wait for the debuggee to connect instead of dialling it
    #[clap(short, long)]
    listen: bool,

    /// JSON file overriding connection timings
    #[clap(short, long)]
    config: Option<PathBuf>,
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let config = match &args.config {
        Some(path) => attach::load_config(path)?,
        None => ConnectionConfig::default(),
    };
    let addr = format!("{}:{}", args.host, args.port);
    let (session, outcomes) = PrintingSession::new(std::io::stdout());
    let session = Arc::new(session);

    let outcome = if args.listen {
        let transport = ServerModeTransport::bind(addr.as_str(), session, config)
            .wrap_err_with(|| format!("listening on {addr}"))?;
        tracing::info!(addr = %transport.local_addr()?, "waiting for debuggee");
        transport
            .wait_for_connect()
            .wrap_err("waiting for debuggee")?;
        outcomes.recv()
    } else {
        let scheduler =
            Arc::new(WatchdogScheduler::start().wrap_err("starting watchdog scheduler")?);
        let transport = ClientModeTransport::tcp(addr.clone(), session, scheduler.clone(), config);
        transport
            .wait_for_connect()
            .wrap_err_with(|| format!("attaching to {addr}"))?;
        tracing::info!(%addr, "attached to debuggee");

        let outcome = outcomes.recv();
        transport.close();
        scheduler.shutdown();
        outcome
    };

    match outcome {
        Ok(Outcome::Exited) => {
            tracing::info!("debuggee exited");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Outcome::CommunicationError) | Err(_) => {
            tracing::warn!("lost connection to debuggee");
            Ok(ExitCode::FAILURE)
        }
    }
}
