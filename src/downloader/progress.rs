//! Periodic progress reporting for long harvests.
//!
//! Calculates percentages against the request budget, estimates remaining
//! time from the observed page rate, and formats the progress line the
//! driving loop logs.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);

/// Progress tracking state for a harvest.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Pages resolved so far.
    pub pages_done: u64,
    /// Pages fetched successfully so far.
    pub pages_ok: u64,
    /// Total expected pages (if the budget is finite).
    pub total_expected: Option<u64>,
    /// Timestamp when the run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between progress updates.
    pub update_interval: Duration,
    /// Current rate (pages per second).
    pub current_rate: f64,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a new progress tracker with default intervals.
    pub fn new(total_expected: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            pages_done: 0,
            pages_ok: 0,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Override the emission cadence.
    pub fn with_cadence(mut self, update_interval: Duration, min_percentage_step: f64) -> Self {
        self.update_interval = update_interval;
        self.min_percentage_step = min_percentage_step;
        self
    }

    /// Update counters after a batch.
    pub fn update(&mut self, resolved: u64, succeeded: u64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        self.pages_done = self.pages_done.saturating_add(resolved);
        self.pages_ok = self.pages_ok.saturating_add(succeeded);
        if elapsed > 0.0 {
            self.current_rate = self.pages_done as f64 / elapsed;
        }
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.pages_done == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100) against the budget.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.pages_done as f64 / total as f64) * 100.0)
    }

    /// Estimate remaining time from the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.pages_done);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Fetched {} pages ({} ok)",
            self.pages_done, self.pages_ok
        )];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% of budget"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} pages/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
