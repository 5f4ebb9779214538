//! astraea-server binary.

use anyhow::Context;
use clap::Parser;

use astraea::logging::init_tracing;
use astraea::signals::{EXIT_GRACE, TerminationSignals};
use astraea_server::{Server, ServerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing();
    let config = args.validate()?;

    let mut signals = TerminationSignals::install().context("failed to install signal handlers")?;
    let server = Server::bind(config).await.context("failed to start server")?;
    let perf_sink = server.perf_sink();

    tokio::select! {
        signal = signals.recv() => {
            tracing::info!(%signal, "Received signal, shutting down");
            if let Some(sink) = perf_sink {
                sink.close();
            }
            tokio::time::sleep(EXIT_GRACE).await;
            std::process::exit(1);
        }
        result = server.run() => {
            result.context("server failed")?;
            tracing::info!("Server finished");
            Ok(())
        }
    }
}
