use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{ActivityId, ExerciseMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityStatus {
    InProgress,
    Completed,
    Other(String),
}

impl From<String> for ActivityStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "in_progress" => ActivityStatus::InProgress,
            "completed" => ActivityStatus::Completed,
            _ => ActivityStatus::Other(value),
        }
    }
}

impl From<ActivityStatus> for String {
    fn from(value: ActivityStatus) -> Self {
        match value {
            ActivityStatus::InProgress => "in_progress".to_string(),
            ActivityStatus::Completed => "completed".to_string(),
            ActivityStatus::Other(other) => other,
        }
    }
}

/// An activity as the backend reports it. Start, finish, checkin and checkout
/// all answer with (a subset of) this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: ActivityId,
    #[serde(default)]
    pub exercise_type: Option<String>,
    #[serde(default)]
    pub status: Option<ActivityStatus>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_min: Option<f64>,
    #[serde(default)]
    pub gym_location_id: Option<String>,
    #[serde(default)]
    pub gym_location_name: Option<String>,
}

impl ActivityRecord {
    pub fn is_in_progress(&self) -> bool {
        self.status == Some(ActivityStatus::InProgress)
    }

    pub fn mode(&self) -> Option<ExerciseMode> {
        self.exercise_type.as_deref().and_then(ExerciseMode::from_exercise_type)
    }
}

/// Gym check-in boundary. The backend owns the geofence; the client only needs
/// the id to check in and to validate restored sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GymLocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub radius_meters: Option<f64>,
}
