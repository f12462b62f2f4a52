//! Resume capability for harvest runs
//!
//! Provides the bookmark type and persistent state management with atomic
//! writes and file locking.

pub mod checkpoint;
pub mod ranges;
pub mod state;

pub use checkpoint::Bookmark;
pub use ranges::PageRanges;
pub use state::{ResumeError, ResumeState, StateMetadata};
