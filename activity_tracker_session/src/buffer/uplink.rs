use std::time::Duration;

use activity_tracker_lib::{api::UploadPointsRequest, session::ActivityId};
use serde::Deserialize;
use tokio::time::Instant;

use crate::{store::SessionStore, TrackerError};

use super::SampleBuffer;

/// What happens to a batch whose upload failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedBatchPolicy {
    /// The batch is discarded. Tracking carries on with the next one.
    #[default]
    Drop,
    /// The batch goes back in front of the buffer and rides along with the
    /// next flush. A sample is discarded after `max_attempts` failed flushes.
    Requeue { max_attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Not due, or nothing buffered.
    Skipped,
    Sent { saved_count: u32, distance_km: f64 },
    Dropped { count: usize, error: TrackerError },
    Requeued { count: usize, dropped: usize, error: TrackerError },
}

/// Drains the [`SampleBuffer`] into point uploads, at most once per
/// `min_interval`, and keeps the server-reported distance.
#[derive(Debug)]
pub struct UplinkScheduler {
    min_interval: Duration,
    policy: FailedBatchPolicy,
    last_attempt: Option<Instant>,
    distance_km: f64,
    sent_samples: usize,
    dropped_samples: usize,
}

impl UplinkScheduler {
    pub fn new(min_interval: Duration, policy: FailedBatchPolicy) -> Self {
        Self {
            min_interval,
            policy,
            last_attempt: None,
            distance_km: 0.0,
            sent_samples: 0,
            dropped_samples: 0,
        }
    }

    /// Starts a new session at `now`. The first flush is due one interval
    /// later.
    pub fn reset(&mut self, now: Instant, distance_km: f64) {
        self.last_attempt = Some(now);
        self.distance_km = distance_km;
        self.sent_samples = 0;
        self.dropped_samples = 0;
    }

    pub fn is_due(&self, buffer: &SampleBuffer, now: Instant) -> bool {
        if buffer.is_empty() {
            return false;
        }
        match self.last_attempt {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        }
    }

    /// Last distance the server reported, in kilometers.
    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn sent_samples(&self) -> usize {
        self.sent_samples
    }

    pub fn dropped_samples(&self) -> usize {
        self.dropped_samples
    }

    pub async fn flush_if_due(
        &mut self,
        buffer: &mut SampleBuffer,
        store: &dyn SessionStore,
        activity_id: &ActivityId,
        now: Instant,
    ) -> FlushOutcome {
        if !self.is_due(buffer, now) {
            return FlushOutcome::Skipped;
        }
        self.flush(buffer, store, activity_id, now).await
    }

    /// Sends everything buffered right now, ignoring the interval.
    pub async fn flush(
        &mut self,
        buffer: &mut SampleBuffer,
        store: &dyn SessionStore,
        activity_id: &ActivityId,
        now: Instant,
    ) -> FlushOutcome {
        if buffer.is_empty() {
            return FlushOutcome::Skipped;
        }

        let mut batch = buffer.take_batch();
        self.last_attempt = Some(now);

        let request = UploadPointsRequest {
            activity_id: activity_id.clone(),
            points: batch.to_wire(),
        };

        match store.upload_points(request).await {
            Ok(response) => {
                self.distance_km = response.current_distance_km;
                self.sent_samples += batch.len();
                tracing::debug!(
                    points = batch.len(),
                    saved = response.saved_count,
                    distance_km = response.current_distance_km,
                    "flushed batch"
                );
                FlushOutcome::Sent {
                    saved_count: response.saved_count,
                    distance_km: response.current_distance_km,
                }
            }
            Err(error) => match self.policy {
                FailedBatchPolicy::Drop => {
                    let count = batch.len();
                    self.dropped_samples += count;
                    tracing::warn!(points = count, %error, "flush failed, batch dropped");
                    FlushOutcome::Dropped { count, error }
                }
                FailedBatchPolicy::Requeue { max_attempts } => {
                    let dropped = batch.record_failure(max_attempts.max(1));
                    let count = batch.len();
                    self.dropped_samples += dropped;
                    tracing::warn!(requeued = count, dropped, %error, "flush failed");
                    buffer.requeue_front(batch);
                    FlushOutcome::Requeued { count, dropped, error }
                }
            },
        }
    }

    /// Final flush at stop. A batch the policy requeues is retried right away
    /// until it is sent or every sample in it has used up its attempts.
    pub async fn flush_remaining(
        &mut self,
        buffer: &mut SampleBuffer,
        store: &dyn SessionStore,
        activity_id: &ActivityId,
    ) -> FlushOutcome {
        loop {
            match self.flush(buffer, store, activity_id, Instant::now()).await {
                FlushOutcome::Requeued { .. } if !buffer.is_empty() => continue,
                outcome => return outcome,
            }
        }
    }

    /// Empties the buffer without sending it. Discarded samples count as
    /// dropped.
    pub fn discard(&mut self, buffer: &mut SampleBuffer) -> usize {
        let count = buffer.len();
        if count > 0 {
            self.dropped_samples += count;
            tracing::warn!(points = count, "unsent samples discarded");
        }
        buffer.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use activity_tracker_lib::location_sample::LocationSample;
    use chrono::Utc;

    use super::*;

    fn buffer_with(n: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new();
        for _ in 0..n {
            buffer.push(LocationSample::new(35.0, 139.0, 5.0, Utc::now()));
        }
        buffer
    }

    #[tokio::test(start_paused = true)]
    async fn empty_buffer_is_never_due() {
        let mut uplink = UplinkScheduler::new(Duration::from_secs(5), FailedBatchPolicy::Drop);
        let start = Instant::now();
        uplink.reset(start, 0.0);

        assert!(!uplink.is_due(&SampleBuffer::new(), start + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn due_only_after_the_interval() {
        let mut uplink = UplinkScheduler::new(Duration::from_secs(5), FailedBatchPolicy::Drop);
        let start = Instant::now();
        uplink.reset(start, 0.0);
        let buffer = buffer_with(3);

        assert!(!uplink.is_due(&buffer, start + Duration::from_millis(4_999)));
        assert!(uplink.is_due(&buffer, start + Duration::from_secs(5)));
    }

    #[test]
    fn discard_counts_as_dropped() {
        let mut uplink = UplinkScheduler::new(Duration::from_secs(5), FailedBatchPolicy::Drop);
        let mut buffer = buffer_with(4);

        assert_eq!(uplink.discard(&mut buffer), 4);
        assert!(buffer.is_empty());
        assert_eq!(uplink.dropped_samples(), 4);
        assert_eq!(uplink.discard(&mut buffer), 0);
    }

    #[test]
    fn policy_parses_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            policy: FailedBatchPolicy,
        }

        let drop: Holder = toml::from_str(r#"policy = "drop""#).unwrap();
        assert_eq!(drop.policy, FailedBatchPolicy::Drop);

        let requeue: Holder = toml::from_str("policy = { requeue = { max_attempts = 3 } }").unwrap();
        assert_eq!(requeue.policy, FailedBatchPolicy::Requeue { max_attempts: 3 });
    }
}
