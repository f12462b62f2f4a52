//! Main entry point for the page-harvester CLI

use clap::Parser;
use page_harvester::cli::{Cli, Commands};
use page_harvester::downloader::RunOutcome;
use page_harvester::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Exit code when the run was terminated rather than completed
const EXIT_TERMINATED: i32 = 2;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("page_harvester=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing in-flight requests...");
                shutdown.request_shutdown();
            }
        }
    });

    let result: anyhow::Result<i32> = match cli.command {
        Commands::Fetch(ref args) => args
            .execute(shutdown.clone())
            .await
            .map(|summary| match summary.outcome {
                RunOutcome::Complete => 0,
                RunOutcome::Stopped(_) => EXIT_TERMINATED,
            })
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::InspectResume(ref args) => args
            .execute()
            .map(|text| {
                println!("{text}");
                0
            })
            .map_err(|e| anyhow::anyhow!(e)),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}
