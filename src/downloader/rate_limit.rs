//! Throttle contract and a window-based implementation
//!
//! The fetch session calls a [`Throttle`] around every attempt in the order
//! `acquire → network call → release → delay`. Each retry is a fresh unit.
//! How the throttle decides to admit units is its own business.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::downloader::config::FetchConfig;

/// Rate-limiting collaborator consulted around every network call
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Suspend until one more unit may be issued.
    async fn acquire(&self) -> Result<(), ThrottleError>;

    /// Mark the unit obtained by the matching `acquire` as finished.
    fn release(&self);

    /// Optional pacing sleep after a successful response.
    async fn delay(&self);

    /// Maximum units per rate window, used to size the admission gate.
    fn max_rate(&self) -> usize;
}

/// Rate limiter with a sliding request window
///
/// Each acquired permit is held for the full window before returning to the
/// pool, so at most `max_rate` units start per window.
#[derive(Clone)]
pub struct WindowThrottle {
    semaphore: Arc<Semaphore>,
    max_rate: usize,
    window: Duration,
    pacing: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl WindowThrottle {
    /// Create a throttle admitting `max_rate` units per `window`.
    ///
    /// # Arguments
    /// * `max_rate` - Maximum units per window (clamped to at least 1)
    /// * `window` - Time window for rate limit
    pub fn new(max_rate: usize, window: Duration) -> Self {
        let max_rate = max_rate.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_rate)),
            max_rate,
            window,
            pacing: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Throttle built from the throttle section of `config`.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            config.throttle_max_rate,
            Duration::from_millis(config.throttle_window_ms),
        )
        .with_pacing(Duration::from_millis(config.throttle_delay_ms))
    }

    /// Sleep this long in [`Throttle::delay`].
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Units acquired and not yet released
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Permits currently available in the window
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Throttle for WindowThrottle {
    async fn acquire(&self) -> Result<(), ThrottleError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ThrottleError::Closed(e.to_string()))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        // Hold permit for window duration, then drop (auto-releases)
        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });

        Ok(())
    }

    fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    async fn delay(&self) {
        if !self.pacing.is_zero() {
            sleep(self.pacing).await;
        }
    }

    fn max_rate(&self) -> usize {
        self.max_rate
    }
}

/// Throttle errors
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    /// The underlying permit pool was closed
    #[error("throttle closed: {0}")]
    Closed(String),
}
