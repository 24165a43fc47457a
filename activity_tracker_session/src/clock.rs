use std::time::Duration;

use chrono::{DateTime, Utc};

/// Elapsed time since a wall-clock anchor.
///
/// Nothing is accumulated between ticks: every reading is `now - anchor`, so
/// missed ticks, suspension and process restarts cannot make it drift.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElapsedClock {
    anchor: Option<DateTime<Utc>>,
    displayed: Duration,
}

impl ElapsedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor
    }

    pub fn set_anchor(&mut self, anchor: DateTime<Utc>) {
        self.anchor = Some(anchor);
        self.displayed = Duration::ZERO;
    }

    pub fn clear(&mut self) {
        self.anchor = None;
        self.displayed = Duration::ZERO;
    }

    /// `now - anchor`, or zero without an anchor. An anchor in the future
    /// (clock skew between client and server) also reads as zero.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        self.anchor
            .and_then(|anchor| (now - anchor).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Recomputes the displayed value.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        self.displayed = self.elapsed_at(now);
        self.displayed
    }

    /// Value as of the last tick.
    pub fn displayed(&self) -> Duration {
        self.displayed
    }
}

/// `HH:MM:SS`, hours unbounded.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
