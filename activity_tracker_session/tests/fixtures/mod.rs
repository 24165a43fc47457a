#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use activity_tracker_lib::{
    activity::{ActivityRecord, ActivityStatus, GymLocation},
    api::{FinishRunningRequest, GymCheckinRequest, GymCheckoutRequest, StartRunningRequest, UploadPointsRequest, UploadPointsResponse},
    location_sample::LocationSample,
    session::ActivityId,
};
use activity_tracker_session::{
    config::TrackerConfig,
    location::ChannelLocationSource,
    store::SessionStore,
    SessionController, TrackerError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartRunning(StartRunningRequest),
    FinishRunning { request: FinishRunningRequest, open_watches: usize },
    UploadPoints { request: UploadPointsRequest, at: Instant },
    MyActivities,
    GymCheckin(GymCheckinRequest),
    GymCheckout { request: GymCheckoutRequest, open_watches: usize },
    GymLocations,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    activities: Vec<ActivityRecord>,
    gyms: Vec<GymLocation>,
    distances: VecDeque<f64>,
    upload_failures: usize,
    start_failure: Option<TrackerError>,
    finish_failure: Option<TrackerError>,
}

/// In-memory backend. Records every call in order.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    location: Option<ChannelLocationSource>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets finish/checkout calls record how many watches were still open.
    pub fn observing(location: &ChannelLocationSource) -> Self {
        Self {
            state: Mutex::default(),
            location: Some(location.clone()),
        }
    }

    pub fn with_activities(self, activities: Vec<ActivityRecord>) -> Self {
        self.state.lock().unwrap().activities = activities;
        self
    }

    pub fn with_gyms(self, gyms: Vec<GymLocation>) -> Self {
        self.state.lock().unwrap().gyms = gyms;
        self
    }

    /// Distances reported by successive uploads. The last one repeats.
    pub fn with_distances(self, distances: &[f64]) -> Self {
        self.state.lock().unwrap().distances = distances.iter().copied().collect();
        self
    }

    pub fn fail_next_uploads(&self, count: usize) {
        self.state.lock().unwrap().upload_failures = count;
    }

    pub fn fail_start(&self, error: TrackerError) {
        self.state.lock().unwrap().start_failure = Some(error);
    }

    pub fn fail_finish(&self, error: TrackerError) {
        self.state.lock().unwrap().finish_failure = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn uploads(&self) -> Vec<(UploadPointsRequest, Instant)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPoints { request, at } => Some((request, at)),
                _ => None,
            })
            .collect()
    }

    fn open_watches(&self) -> usize {
        self.location.as_ref().map(ChannelLocationSource::active_watches).unwrap_or(0)
    }
}

#[async_trait]
impl SessionStore for FakeStore {
    async fn start_running(&self, request: StartRunningRequest) -> Result<ActivityRecord, TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::StartRunning(request));
        if let Some(err) = state.start_failure.take() {
            return Err(err);
        }
        Ok(record("run-1", "running", ActivityStatus::InProgress, Utc::now()))
    }

    async fn finish_running(&self, request: FinishRunningRequest) -> Result<ActivityRecord, TrackerError> {
        let open_watches = self.open_watches();
        let mut state = self.state.lock().unwrap();
        let id = request.activity_id.clone();
        state.calls.push(Call::FinishRunning { request, open_watches });
        if let Some(err) = state.finish_failure.take() {
            return Err(err);
        }
        Ok(ActivityRecord {
            ended_at: Some(Utc::now()),
            ..record(id.as_str(), "running", ActivityStatus::Completed, Utc::now())
        })
    }

    async fn upload_points(&self, request: UploadPointsRequest) -> Result<UploadPointsResponse, TrackerError> {
        let mut state = self.state.lock().unwrap();
        let saved_count = request.points.len() as u32;
        state.calls.push(Call::UploadPoints { request, at: Instant::now() });
        if state.upload_failures > 0 {
            state.upload_failures -= 1;
            return Err(TrackerError::NetworkError("connection reset".into()));
        }
        let distance = if state.distances.len() > 1 {
            state.distances.pop_front().unwrap_or(0.0)
        } else {
            state.distances.front().copied().unwrap_or(0.0)
        };
        Ok(UploadPointsResponse {
            saved_count,
            current_distance_km: distance,
        })
    }

    async fn my_activities(&self) -> Result<Vec<ActivityRecord>, TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::MyActivities);
        Ok(state.activities.clone())
    }

    async fn gym_checkin(&self, request: GymCheckinRequest) -> Result<ActivityRecord, TrackerError> {
        let mut state = self.state.lock().unwrap();
        let gym = request.gym_location_id.clone();
        state.calls.push(Call::GymCheckin(request));
        if let Some(err) = state.start_failure.take() {
            return Err(err);
        }
        Ok(ActivityRecord {
            gym_location_id: Some(gym),
            ..record("gym-1", "gym", ActivityStatus::InProgress, Utc::now())
        })
    }

    async fn gym_checkout(&self, request: GymCheckoutRequest) -> Result<ActivityRecord, TrackerError> {
        let open_watches = self.open_watches();
        let mut state = self.state.lock().unwrap();
        let id = request.activity_id.clone();
        state.calls.push(Call::GymCheckout { request, open_watches });
        if let Some(err) = state.finish_failure.take() {
            return Err(err);
        }
        Ok(record(id.as_str(), "gym", ActivityStatus::Completed, Utc::now()))
    }

    async fn gym_locations(&self) -> Result<Vec<GymLocation>, TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GymLocations);
        Ok(state.gyms.clone())
    }
}

pub fn record(id: &str, exercise_type: &str, status: ActivityStatus, started_at: DateTime<Utc>) -> ActivityRecord {
    ActivityRecord {
        id: ActivityId::new(id),
        exercise_type: Some(exercise_type.to_string()),
        status: Some(status),
        started_at: Some(started_at),
        ended_at: None,
        distance_km: None,
        duration_min: None,
        gym_location_id: None,
        gym_location_name: None,
    }
}

pub fn gym(id: &str) -> GymLocation {
    GymLocation {
        id: id.to_string(),
        name: format!("Gym {id}"),
        latitude: Some(35.68),
        longitude: Some(139.76),
        radius_meters: Some(100.0),
    }
}

pub fn sample(i: u32) -> LocationSample {
    LocationSample::new(35.6812 + f64::from(i) * 0.0001, 139.7671, 4.0, Utc::now())
}

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub location: ChannelLocationSource,
    pub controller: SessionController,
}

impl Harness {
    pub fn new(store: FakeStore, location: ChannelLocationSource) -> Self {
        Self::with_config(store, location, TrackerConfig::default())
    }

    pub fn with_config(store: FakeStore, location: ChannelLocationSource, config: TrackerConfig) -> Self {
        let store = Arc::new(store);
        let controller = SessionController::new(store.clone(), Arc::new(location.clone()), &config);
        Self {
            store,
            location,
            controller,
        }
    }

    /// A controller whose location source already has a position.
    pub fn ready() -> Self {
        let location = ChannelLocationSource::new();
        location.set_position(Some(sample(0)));
        Self::new(FakeStore::observing(&location), location)
    }

    /// Drives the controller until `done` holds. Panics after `limit` wakeups.
    pub async fn pump_until(&mut self, limit: usize, done: impl Fn(&SessionController) -> bool) {
        for _ in 0..limit {
            if done(&self.controller) {
                return;
            }
            self.controller.run_once().await;
        }
        assert!(done(&self.controller), "condition not reached after {limit} wakeups");
    }
}
