//! Resume state persistence
//!
//! The state file records the latest bookmark, every page whose outcome was a
//! failure, and cumulative counters. Writes are atomic (temp file + rename)
//! and guarded by an advisory lock on a sibling `.lock` file.

use super::checkpoint::Bookmark;
use super::ranges::PageRanges;
use crate::fetcher::BatchResult;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current resume state schema version
const SCHEMA_VERSION: &str = "1.1.0";

/// Maximum allowed state file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Resume state for one harvest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    schema_version: String,
    query_key: String,
    bookmark: Bookmark,
    failed_pages: PageRanges,
    metadata: StateMetadata,
    created_at: i64,
    updated_at: i64,
}

impl ResumeState {
    /// Create a fresh state for the query identified by `query_key`.
    pub fn new(query_key: impl Into<String>, bookmark: Bookmark) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            query_key: query_key.into(),
            bookmark,
            failed_pages: PageRanges::new(),
            metadata: StateMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Conventional state file location for `query_key` under `dir`.
    pub fn path_for(dir: &Path, query_key: &str) -> PathBuf {
        dir.join(format!("{query_key}.resume.json"))
    }

    /// Query this state belongs to
    pub fn query_key(&self) -> &str {
        &self.query_key
    }

    /// Latest saved bookmark
    pub fn bookmark(&self) -> Bookmark {
        self.bookmark
    }

    /// Pages whose latest outcome was a failure, ascending
    pub fn failed_pages(&self) -> impl Iterator<Item = u64> + '_ {
        self.failed_pages.iter()
    }

    /// Number of pages currently recorded as failed
    pub fn failed_page_count(&self) -> u64 {
        self.failed_pages.len()
    }

    /// Cumulative counters
    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// Last update timestamp in Unix milliseconds
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Fold a finished batch into the state and move the bookmark.
    ///
    /// Failed pages are remembered; a page that later succeeds is forgotten.
    pub fn record_batch(&mut self, result: &BatchResult, bookmark: Bookmark) {
        for (request, outcome) in result.iter() {
            if outcome.is_success() {
                self.failed_pages.remove(request.page());
            } else {
                self.failed_pages.insert(request.page());
            }
        }

        self.metadata.total_batches += 1;
        self.metadata.total_requests += result.len() as u64;
        self.metadata.total_successes += result.successes() as u64;
        self.metadata.total_failures += result.failures() as u64;
        self.bookmark = bookmark;
        self.updated_at = chrono::Utc::now().timestamp_millis();

        debug!(
            batch_id = result.batch_id(),
            next_page = bookmark.next_page,
            issued = bookmark.issued,
            failed_pages = self.failed_pages.len(),
            "Recorded batch in resume state"
        );
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Check that this state was written for `query_key`.
    pub fn ensure_query(&self, query_key: &str) -> Result<(), ResumeError> {
        if self.query_key != query_key {
            return Err(ResumeError::QueryMismatch {
                expected: query_key.to_string(),
                found: self.query_key.clone(),
            });
        }
        Ok(())
    }

    /// Save state to file with an atomic write under an exclusive lock.
    ///
    /// A state that would serialize beyond [`MAX_STATE_FILE_SIZE`] is refused
    /// and the previous file is left in place, since [`load`](Self::load)
    /// could not read it back.
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        self.save_within(path, MAX_STATE_FILE_SIZE)
    }

    fn save_within(&self, path: &Path, max_size: u64) -> Result<(), ResumeError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        let size = json.len() as u64;
        if size > max_size {
            warn!(
                path = %path.display(),
                size,
                max = max_size,
                failed_spans = self.failed_pages.span_count(),
                "Resume state too large to save"
            );
            return Err(ResumeError::StateTooLarge { size, max: max_size });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let mut lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Fsync parent directory so the rename is durable
        if let Ok(dir) = File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        debug!(
            path = %path.display(),
            next_page = self.bookmark.next_page,
            failed_pages = self.failed_pages.len(),
            "Resume state saved"
        );
        Ok(())
    }

    /// Load state from file under a shared lock.
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let state: ResumeState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize resume state");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if let Err(err) = state.validate_schema_version() {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "Resume state schema version mismatch"
            );
            return Err(err);
        }

        info!(
            path = %path.display(),
            next_page = state.bookmark.next_page,
            issued = state.bookmark.issued,
            failed_pages = state.failed_pages.len(),
            "Resume state loaded"
        );
        Ok(state)
    }

    /// Load the state at `path` if the file exists.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, ResumeError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

fn open_lock_file(path: &Path) -> Result<File, ResumeError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))
}

/// Cumulative counters across all recorded batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StateMetadata {
    total_batches: u64,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
}

impl StateMetadata {
    /// Batches recorded
    pub fn total_batches(&self) -> u64 {
        self.total_batches
    }

    /// Requests recorded
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Successful outcomes recorded
    pub fn total_successes(&self) -> u64 {
        self.total_successes
    }

    /// Failed outcomes recorded
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }
}

/// Errors related to resume state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file belongs to a different query
    #[error("resume state belongs to query {found}, expected {expected}")]
    QueryMismatch {
        /// Query of the current run
        expected: String,
        /// Query recorded in the file
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
