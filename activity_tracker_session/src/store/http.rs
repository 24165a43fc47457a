use std::{sync::Arc, time::Duration};

use activity_tracker_lib::{
    activity::{ActivityRecord, GymLocation},
    api::{ErrorResponse, FinishRunningRequest, GymCheckinRequest, GymCheckoutRequest, StartRunningRequest, UploadPointsRequest, UploadPointsResponse},
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};

use crate::TrackerError;

use super::{SessionStore, TokenProvider};

/// [`SessionStore`] over the backend's JSON API.
pub struct HttpSessionStore {
    base_url: String,
    client: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpSessionStore {
    /// Every request, including reading its body, is abandoned after
    /// `request_timeout` and reported as a network error.
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>, request_timeout: Duration) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| TrackerError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TrackerError> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, TrackerError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TrackerError> {
        let token = self.tokens.bearer_token().await?;

        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| TrackerError::NetworkError(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TrackerError::NetworkError(err.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|err| err.error)
                .unwrap_or(body);
            tracing::debug!(status = status.as_u16(), %message, "request rejected");
            return Err(TrackerError::ServerRejected {
                status: status.as_u16(),
                message,
            });
        }

        // Empty bodies are treated as `{}` so unit-like responses still parse.
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|err| TrackerError::ServerRejected {
            status: status.as_u16(),
            message: format!("unexpected response body: {err}"),
        })
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    #[tracing::instrument(skip_all)]
    async fn start_running(&self, request: StartRunningRequest) -> Result<ActivityRecord, TrackerError> {
        self.post("/api/activities/running/start", &request).await
    }

    #[tracing::instrument(skip_all, fields(activity_id = %request.activity_id))]
    async fn finish_running(&self, request: FinishRunningRequest) -> Result<ActivityRecord, TrackerError> {
        let path = format!("/api/activities/running/{}/finish", request.activity_id);
        self.post(&path, &request).await
    }

    #[tracing::instrument(skip_all, fields(activity_id = %request.activity_id, points = request.points.len()))]
    async fn upload_points(&self, request: UploadPointsRequest) -> Result<UploadPointsResponse, TrackerError> {
        let path = format!("/api/activities/running/{}/gps", request.activity_id);
        self.post(&path, &request).await
    }

    #[tracing::instrument(skip_all)]
    async fn my_activities(&self) -> Result<Vec<ActivityRecord>, TrackerError> {
        self.get("/api/activities").await
    }

    #[tracing::instrument(skip_all, fields(gym_location_id = %request.gym_location_id))]
    async fn gym_checkin(&self, request: GymCheckinRequest) -> Result<ActivityRecord, TrackerError> {
        self.post("/api/activities/gym/checkin", &request).await
    }

    #[tracing::instrument(skip_all, fields(activity_id = %request.activity_id))]
    async fn gym_checkout(&self, request: GymCheckoutRequest) -> Result<ActivityRecord, TrackerError> {
        let path = format!("/api/activities/gym/{}/checkout", request.activity_id);
        self.post(&path, &request).await
    }

    #[tracing::instrument(skip_all)]
    async fn gym_locations(&self) -> Result<Vec<GymLocation>, TrackerError> {
        self.get("/api/gym-locations").await
    }
}
