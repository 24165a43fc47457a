use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque activity handle. Only the backend mints these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseMode {
    Running,
    Gym,
}

impl ExerciseMode {
    /// Parses the backend's `exercise_type` field. Unknown kinds yield `None`.
    pub fn from_exercise_type(kind: &str) -> Option<Self> {
        match kind {
            "running" => Some(ExerciseMode::Running),
            "gym" => Some(ExerciseMode::Gym),
            _ => None,
        }
    }
}

impl fmt::Display for ExerciseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExerciseMode::Running => f.write_str("running"),
            ExerciseMode::Gym => f.write_str("gym"),
        }
    }
}

/// One continuous tracked exercise period. Exists only between a confirmed
/// start (or restoration) and a confirmed finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: ActivityId,
    pub mode: ExerciseMode,
    pub gym_location_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: ActivityId, mode: ExerciseMode, gym_location_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            mode,
            gym_location_id,
            started_at,
        }
    }
}
