//! `inspect-resume` command implementation

use crate::resume::ResumeState;
use clap::Parser;
use std::path::PathBuf;

use super::CliError;

/// Pages listed before the failed-page list is truncated
const MAX_LISTED_PAGES: usize = 50;

/// Arguments for the `inspect-resume` command
#[derive(Parser, Debug, Clone)]
pub struct InspectResumeArgs {
    /// Resume state file to read
    pub file: PathBuf,

    /// Print the raw state as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl InspectResumeArgs {
    /// Load the state file and render it.
    pub fn execute(&self) -> Result<String, CliError> {
        let state = ResumeState::load(&self.file)?;
        if self.json {
            return serde_json::to_string_pretty(&state)
                .map_err(|e| CliError::InvalidArgument(format!("cannot render state: {e}")));
        }
        Ok(render(&state))
    }
}

fn render(state: &ResumeState) -> String {
    let metadata = state.metadata();
    let failed: Vec<String> = state
        .failed_pages()
        .take(MAX_LISTED_PAGES)
        .map(|page| page.to_string())
        .collect();
    let more = state.failed_page_count().saturating_sub(MAX_LISTED_PAGES as u64);

    let mut lines = vec![
        format!("query:        {}", state.query_key()),
        format!("bookmark:     {}", state.bookmark()),
        format!(
            "batches:      {} ({} requests, {} ok, {} failed)",
            metadata.total_batches(),
            metadata.total_requests(),
            metadata.total_successes(),
            metadata.total_failures()
        ),
    ];

    if failed.is_empty() {
        lines.push("failed pages: none".to_string());
    } else if more > 0 {
        lines.push(format!("failed pages: {} (+{more} more)", failed.join(", ")));
    } else {
        lines.push(format!("failed pages: {}", failed.join(", ")));
    }

    if let Some(updated) = chrono::DateTime::from_timestamp_millis(state.updated_at()) {
        lines.push(format!("updated:      {}", updated.to_rfc3339()));
    }

    lines.join("\n")
}
