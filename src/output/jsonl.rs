//! JSON-lines page writer

use super::{BatchSink, OutputError, OutputResult};
use crate::fetcher::BatchResult;
use crate::Payload;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Default buffer size for the underlying writer (64 KiB)
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Serialize)]
struct PageRecord<'a> {
    page: u64,
    attempts: u32,
    payload: &'a Payload,
}

/// Appends one JSON object per successful page.
///
/// The file is opened in append mode so a resumed run continues the same
/// output. Failed pages are not written; they are tracked in resume state.
pub struct JsonLinesWriter {
    writer: BufWriter<File>,
    pages_written: u64,
}

impl JsonLinesWriter {
    /// Open (or create) `path` for appending.
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open {}: {e}", path.display())))?;

        Ok(Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file),
            pages_written: 0,
        })
    }

    /// Pages written by this writer
    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }
}

impl BatchSink for JsonLinesWriter {
    fn accept(&mut self, result: &BatchResult) -> OutputResult<()> {
        for (request, outcome) in result.iter() {
            let Some(payload) = outcome.payload() else {
                continue;
            };
            let record = PageRecord {
                page: request.page(),
                attempts: outcome.attempts(),
                payload,
            };
            serde_json::to_writer(&mut self.writer, &record)
                .map_err(|e| OutputError::SerializationError(e.to_string()))?;
            self.writer
                .write_all(b"\n")
                .map_err(|e| OutputError::IoError(e.to_string()))?;
            self.pages_written += 1;
        }

        // Flush per batch so output never lags the saved bookmark
        self.flush()?;
        debug!(
            batch_id = result.batch_id(),
            pages_written = self.pages_written,
            "Batch written"
        );
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        self.flush()
    }
}
