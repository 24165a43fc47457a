use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::GpsPoint;

/// A single position fix. Never mutated after capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, as reported by the platform.
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at,
        }
    }

    pub fn to_wire(&self) -> GpsPoint {
        GpsPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            timestamp: self.captured_at,
        }
    }
}
