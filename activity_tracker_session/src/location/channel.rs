use std::{collections::HashMap, sync::{atomic::{AtomicBool, Ordering}, Arc, Mutex, MutexGuard}};

use activity_tracker_lib::location_sample::LocationSample;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{FixOptions, LocationError, LocationSource, LocationWatch, WatchEvent};

/// Location source fed from the outside.
///
/// Platform glue (or a replay file, or a test) pushes fixes in with
/// [`ChannelLocationSource::push`]; every open watch receives them in push
/// order, and one-shot fixes answer with the most recent one.
#[derive(Clone)]
pub struct ChannelLocationSource {
    latest: Arc<watch::Sender<Option<LocationSample>>>,
    watchers: Arc<Mutex<Watchers>>,
    denied: Arc<AtomicBool>,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<WatchEvent>>,
}

impl Default for ChannelLocationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelLocationSource {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest: Arc::new(latest),
            watchers: Arc::new(Mutex::new(Watchers::default())),
            denied: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers a fix to every open watch and makes it the current position.
    pub fn push(&self, sample: LocationSample) {
        self.latest.send_replace(Some(sample));
        self.broadcast(Ok(sample));
    }

    /// Delivers an error to every open watch.
    pub fn push_error(&self, error: LocationError) {
        self.broadcast(Err(error));
    }

    /// Sets the position one-shot fixes answer with, without notifying watches.
    pub fn set_position(&self, sample: Option<LocationSample>) {
        self.latest.send_replace(sample);
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::Relaxed);
    }

    pub fn active_watches(&self) -> usize {
        self.lock_watchers().senders.len()
    }

    fn broadcast(&self, event: WatchEvent) {
        // Receivers that went away without releasing are pruned here.
        self.lock_watchers().senders.retain(|_, sender| sender.send(event).is_ok());
    }

    fn lock_watchers(&self) -> MutexGuard<'_, Watchers> {
        self.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LocationSource for ChannelLocationSource {
    async fn get_fix(&self, _options: FixOptions) -> Result<LocationSample, LocationError> {
        if self.denied.load(Ordering::Relaxed) {
            return Err(LocationError::PermissionDenied);
        }

        let mut latest = self.latest.subscribe();
        let fix = latest
            .wait_for(|fix| fix.is_some())
            .await
            .map_err(|_| LocationError::PositionUnavailable)?;

        (*fix).ok_or(LocationError::PositionUnavailable)
    }

    fn watch(&self, _options: FixOptions) -> Result<LocationWatch, LocationError> {
        if self.denied.load(Ordering::Relaxed) {
            return Err(LocationError::PermissionDenied);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut watchers = self.lock_watchers();
            let id = watchers.next_id;
            watchers.next_id += 1;
            watchers.senders.insert(id, tx);
            id
        };

        let watchers = self.watchers.clone();
        Ok(LocationWatch::new(rx, move || {
            watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).senders.remove(&id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    fn sample(lat: f64) -> LocationSample {
        LocationSample::new(lat, 139.0, 5.0, Utc::now())
    }

    #[tokio::test]
    async fn watch_sees_pushes_in_order() {
        let source = ChannelLocationSource::new();
        let mut watch = source.watch(FixOptions::default()).unwrap();

        source.push(sample(1.0));
        source.push(sample(2.0));

        assert_eq!(watch.next().await.unwrap().unwrap().latitude, 1.0);
        assert_eq!(watch.next().await.unwrap().unwrap().latitude, 2.0);
    }

    #[tokio::test]
    async fn nothing_observed_after_cancel() {
        let source = ChannelLocationSource::new();
        let mut watch = source.watch(FixOptions::default()).unwrap();
        source.push(sample(1.0));

        assert_eq!(watch.drain_pending().len(), 1);
        watch.cancel();

        assert_eq!(source.active_watches(), 0);
        source.push(sample(2.0));
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_it() {
        let source = ChannelLocationSource::new();
        {
            let _watch = source.watch(FixOptions::default()).unwrap();
            assert_eq!(source.active_watches(), 1);
        }
        assert_eq!(source.active_watches(), 0);
    }

    #[tokio::test]
    async fn denied_permission_fails_both_operations() {
        let source = ChannelLocationSource::new();
        source.set_permission_denied(true);

        assert_eq!(source.get_fix(FixOptions::default()).await.unwrap_err(), LocationError::PermissionDenied);
        assert_eq!(source.watch(FixOptions::default()).unwrap_err(), LocationError::PermissionDenied);
    }

    #[tokio::test(start_paused = true)]
    async fn get_fix_waits_for_a_position() {
        let source = ChannelLocationSource::new();

        let pending = tokio::time::timeout(Duration::from_secs(1), source.get_fix(FixOptions::default())).await;
        assert!(pending.is_err());

        source.set_position(Some(sample(35.0)));
        assert_eq!(source.get_fix(FixOptions::default()).await.unwrap().latitude, 35.0);
    }
}
