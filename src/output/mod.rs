//! Batch sinks
//!
//! The driving loop hands every [`BatchResult`] to a [`BatchSink`] before the
//! bookmark is saved, so a sink that returns `Ok` has made the batch durable
//! as far as it is concerned.

use crate::fetcher::BatchResult;

pub mod jsonl;

pub use jsonl::JsonLinesWriter;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Consumer of finished batches
pub trait BatchSink: Send {
    /// Take ownership of whatever the sink needs from `result`.
    fn accept(&mut self, result: &BatchResult) -> OutputResult<()>;

    /// Flush buffered output. Called once when the run ends.
    fn finish(&mut self) -> OutputResult<()> {
        Ok(())
    }
}

/// Sink that discards every batch
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BatchSink for NullSink {
    fn accept(&mut self, _result: &BatchResult) -> OutputResult<()> {
        Ok(())
    }
}
