//! CLI command implementations

pub mod error;
pub mod fetch;
pub mod inspect;

pub use error::CliError;
pub use fetch::FetchArgs;
pub use inspect::InspectResumeArgs;

use clap::{Parser, Subcommand};

/// Page Harvester CLI
#[derive(Parser, Debug)]
#[command(name = "page-harvester")]
#[command(about = "Harvest paginated App Store search results with retries and a circuit breaker", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch pages for one category and write them as JSON lines
    Fetch(FetchArgs),

    /// Print a saved resume state
    InspectResume(InspectResumeArgs),
}
