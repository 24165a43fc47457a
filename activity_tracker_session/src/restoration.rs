use std::sync::Arc;

use activity_tracker_lib::{activity::ActivityRecord, session::ExerciseMode};

use crate::{store::SessionStore, RestorationSnapshot, SessionController, TrackerError};

#[derive(Debug, Clone, PartialEq)]
pub enum RestorationOutcome {
    NothingToRestore,
    Restored(RestorationSnapshot),
}

/// Boot-time recovery of a session the backend still considers in progress.
pub struct RestorationService {
    store: Arc<dyn SessionStore>,
}

impl RestorationService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Looks up the in-progress activity, if any, and checks it can be
    /// resumed.
    pub async fn find_in_progress(&self) -> Result<Option<RestorationSnapshot>, TrackerError> {
        let activities = self.store.my_activities().await?;
        let mut in_progress = activities.into_iter().filter(ActivityRecord::is_in_progress);

        let Some(record) = in_progress.next() else {
            return Ok(None);
        };
        let others = in_progress.count();
        if others > 0 {
            tracing::warn!(activity_id = %record.id, others, "several activities in progress, resuming the first");
        }

        self.snapshot(record).await.map(Some)
    }

    /// Runs once at boot. On a mismatch the controller is left Idle.
    pub async fn run(&self, controller: &mut SessionController) -> Result<RestorationOutcome, TrackerError> {
        let snapshot = match self.find_in_progress().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::info!("no activity in progress");
                return Ok(RestorationOutcome::NothingToRestore);
            }
            Err(err) => {
                tracing::warn!(%err, "restoration skipped");
                return Err(err);
            }
        };

        controller.restore(snapshot.clone())?;
        Ok(RestorationOutcome::Restored(snapshot))
    }

    async fn snapshot(&self, record: ActivityRecord) -> Result<RestorationSnapshot, TrackerError> {
        let mode = record.mode().ok_or_else(|| {
            TrackerError::RestorationMismatch(format!(
                "activity {} has unknown exercise type {:?}",
                record.id, record.exercise_type
            ))
        })?;
        let started_at = record.started_at.ok_or_else(|| {
            TrackerError::RestorationMismatch(format!("activity {} has no start time", record.id))
        })?;

        let gym_location_id = match mode {
            ExerciseMode::Running => None,
            ExerciseMode::Gym => {
                let Some(gym_id) = record.gym_location_id.clone() else {
                    return Err(TrackerError::RestorationMismatch(format!(
                        "gym activity {} has no gym location",
                        record.id
                    )));
                };
                let gyms = self.store.gym_locations().await?;
                if !gyms.iter().any(|gym| gym.id == gym_id) {
                    return Err(TrackerError::RestorationMismatch(format!(
                        "gym location {gym_id} of activity {} no longer exists",
                        record.id
                    )));
                }
                Some(gym_id)
            }
        };

        Ok(RestorationSnapshot {
            activity_id: record.id,
            mode,
            gym_location_id,
            started_at,
            distance_km: record.distance_km.unwrap_or(0.0),
        })
    }
}
