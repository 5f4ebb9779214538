//! astraea-client: bulk TCP sender steered by a decision process.

use anyhow::Context;
use clap::Parser;

use astraea::client::run_session;
use astraea::logging::init_tracing;
use astraea::signals::{EXIT_GRACE, TerminationSignals};
use astraea::{ClientArgs, ClientConfig, Shutdown};

fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    init_tracing();
    let config = args.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let code = runtime.block_on(run(config))?;

    // The session thread may still be blocked in a syscall; do not wait for it.
    std::process::exit(code)
}

async fn run(config: ClientConfig) -> anyhow::Result<i32> {
    let mut signals = TerminationSignals::install().context("failed to install signal handlers")?;
    let shutdown = Shutdown::new();

    let session = tokio::task::spawn_blocking({
        let shutdown = shutdown.clone();
        move || run_session(&config, shutdown)
    });

    tokio::select! {
        signal = signals.recv() => {
            tracing::info!(%signal, "Received signal, shutting down");
            shutdown.request_stop();
            shutdown.teardown();
            tokio::time::sleep(EXIT_GRACE).await;
            Ok(1)
        }
        result = session => {
            shutdown.teardown();
            let report = result.context("session task panicked")??;
            tracing::info!(
                bytes_sent = report.traffic.bytes_sent,
                elapsed_ms = report.traffic.elapsed.as_millis() as u64,
                "Client finished"
            );
            Ok(report.exit_code())
        }
    }
}
