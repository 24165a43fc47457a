//! Client side of the remote activity endpoints.
//!
//! All durable session state lives behind these calls; the client only keeps
//! what it can rebuild from `my_activities`.

mod http;

pub use http::*;

use activity_tracker_lib::{
    activity::{ActivityRecord, GymLocation},
    api::{FinishRunningRequest, GymCheckinRequest, GymCheckoutRequest, StartRunningRequest, UploadPointsRequest, UploadPointsResponse},
};
use async_trait::async_trait;

use crate::TrackerError;

/// Supplies the bearer credential for each request. Obtaining and refreshing
/// it is the provider's business.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, TrackerError>;
}

/// A fixed token, e.g. from the environment.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, TrackerError> {
        Ok(self.token.clone())
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn start_running(&self, request: StartRunningRequest) -> Result<ActivityRecord, TrackerError>;

    async fn finish_running(&self, request: FinishRunningRequest) -> Result<ActivityRecord, TrackerError>;

    /// Uploads one batch. The response carries the server's running distance,
    /// which is the only distance the client ever shows.
    async fn upload_points(&self, request: UploadPointsRequest) -> Result<UploadPointsResponse, TrackerError>;

    async fn my_activities(&self) -> Result<Vec<ActivityRecord>, TrackerError>;

    async fn gym_checkin(&self, request: GymCheckinRequest) -> Result<ActivityRecord, TrackerError>;

    async fn gym_checkout(&self, request: GymCheckoutRequest) -> Result<ActivityRecord, TrackerError>;

    async fn gym_locations(&self) -> Result<Vec<GymLocation>, TrackerError>;
}
