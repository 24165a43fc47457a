//! Position acquisition behind a subscribe/cancel contract.
//!
//! A [`LocationSource`] hands out one-shot fixes and continuous watches. A
//! watch is a [`LocationWatch`] handle with exactly one owner; releasing it
//! (explicitly through [`LocationWatch::cancel`] or by dropping it) closes the
//! event stream, so nothing the platform delivers afterwards can be observed.

mod channel;

pub use channel::*;

use std::time::Duration;

use activity_tracker_lib::location_sample::LocationSample;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached position the platform may answer with.
    pub maximum_age: Duration,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

pub type WatchEvent = Result<LocationSample, LocationError>;

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// A single fix. Implementations may ignore `options.timeout`; callers
    /// enforce it themselves.
    async fn get_fix(&self, options: FixOptions) -> Result<LocationSample, LocationError>;

    /// Starts continuous delivery. Events may arrive at any rate, in bursts or
    /// not at all for long stretches.
    fn watch(&self, options: FixOptions) -> Result<LocationWatch, LocationError>;
}

/// Subscription handle for a running watch.
pub struct LocationWatch {
    events: mpsc::UnboundedReceiver<WatchEvent>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl LocationWatch {
    pub fn new(events: mpsc::UnboundedReceiver<WatchEvent>, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Next event in delivery order. `None` once the source has gone away.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Events already delivered but not yet consumed, in delivery order.
    pub fn drain_pending(&mut self) -> Vec<WatchEvent> {
        let mut pending = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            pending.push(event);
        }
        pending
    }

    /// Releases the subscription. Once this returns no further event is
    /// observable through this handle.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.events.close();
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LocationWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationWatch")
            .field("released", &self.on_release.is_none())
            .finish()
    }
}
