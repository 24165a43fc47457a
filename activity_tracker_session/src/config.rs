use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{buffer::FailedBatchPolicy, location::FixOptions, TrackerError};

pub const API_URL_ENV: &str = "ACTIVITY_TRACKER_API_URL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub api_base_url: String,
    pub min_flush_interval_ms: u64,
    pub fix_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub watch_maximum_age_ms: u64,
    pub high_accuracy: bool,
    /// Upper bound on a single backend request, body included.
    pub request_timeout_ms: u64,
    pub failed_batch_policy: FailedBatchPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".to_string(),
            min_flush_interval_ms: 5_000,
            fix_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
            watch_maximum_age_ms: 3_000,
            high_accuracy: true,
            request_timeout_ms: 15_000,
            failed_batch_policy: FailedBatchPolicy::Drop,
        }
    }
}

impl TrackerConfig {
    /// Reads a TOML file (defaults when `path` is `None`), then applies the
    /// environment override for the API URL.
    pub fn load(path: Option<&Path>) -> Result<Self, TrackerError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| TrackerError::Config(format!("failed to read {}: {err}", path.display())))?;
                Self::parse(&text)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api_base_url = url;
        }

        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, TrackerError> {
        let config: Self = toml::from_str(text).map_err(|err| TrackerError::Config(err.to_string()))?;
        if config.tick_interval_ms == 0 {
            return Err(TrackerError::Config("tick_interval_ms must be positive".into()));
        }
        if config.request_timeout_ms == 0 {
            return Err(TrackerError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(config)
    }

    pub fn min_flush_interval(&self) -> Duration {
        Duration::from_millis(self.min_flush_interval_ms)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Options for the one-shot fixes taken at start and stop.
    pub fn fix_options(&self) -> FixOptions {
        FixOptions {
            high_accuracy: self.high_accuracy,
            timeout: self.fix_timeout(),
            maximum_age: Duration::ZERO,
        }
    }

    pub fn watch_options(&self) -> FixOptions {
        FixOptions {
            high_accuracy: self.high_accuracy,
            timeout: self.fix_timeout(),
            maximum_age: Duration::from_millis(self.watch_maximum_age_ms),
        }
    }
}
