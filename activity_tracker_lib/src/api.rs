//! Request and response bodies of the activity endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::ActivityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRunningRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishRunningRequest {
    pub activity_id: ActivityId,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPointsRequest {
    pub activity_id: ActivityId,
    pub points: Vec<GpsPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPointsResponse {
    pub saved_count: u32,
    pub current_distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GymCheckinRequest {
    pub gym_location_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GymCheckoutRequest {
    pub activity_id: ActivityId,
    pub latitude: f64,
    pub longitude: f64,
}

/// Structured failure body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
