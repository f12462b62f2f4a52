//! CLI error types and conversions

use crate::downloader::{ConfigError, EngineError};
use crate::fetcher::TransportError;
use crate::output::OutputError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Engine error
    #[error("engine error: {0}")]
    EngineError(#[from] EngineError),

    /// Transport construction error
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
