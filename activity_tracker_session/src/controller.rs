use std::{sync::Arc, time::Duration};

use activity_tracker_lib::{
    activity::ActivityRecord,
    api::{FinishRunningRequest, GymCheckinRequest, GymCheckoutRequest, StartRunningRequest},
    location_sample::LocationSample,
    session::{ActivityId, ExerciseMode, Session},
};
use chrono::{DateTime, Utc};
use tokio::{
    sync::watch,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{
    buffer::{SampleBuffer, UplinkScheduler},
    clock::ElapsedClock,
    config::TrackerConfig,
    location::{FixOptions, LocationSource, LocationWatch, WatchEvent},
    store::SessionStore,
    TrackerError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Starting,
    Active,
    Stopping,
    Restoring,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartRequest {
    Running,
    Gym { gym_location_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Nothing was running; no call was made.
    AlreadyIdle,
    Finished(ActivityRecord),
}

/// An in-progress activity as the backend knows it, used once to seed a
/// controller after a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorationSnapshot {
    pub activity_id: ActivityId,
    pub mode: ExerciseMode,
    pub gym_location_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub distance_km: f64,
}

/// Display view of the controller. Published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub phase: SessionPhase,
    pub activity_id: Option<ActivityId>,
    pub mode: Option<ExerciseMode>,
    pub elapsed: Duration,
    pub distance_km: f64,
    pub buffered: usize,
    pub watching: bool,
    /// The most recent failure, cleared by the next successful transition.
    pub last_error: Option<TrackerError>,
}

impl TrackerStatus {
    /// Minutes per kilometer from the server-reported distance.
    pub fn pace_min_per_km(&self) -> Option<f64> {
        if self.distance_km <= 0.0 || self.elapsed.is_zero() {
            return None;
        }
        Some(self.elapsed.as_secs_f64() / 60.0 / self.distance_km)
    }
}

/// Owns at most one [`Session`] and drives it through
/// `Idle -> Starting -> Active -> Stopping -> Idle` (or `Restoring -> Active`).
///
/// A failed transition leaves the controller where it was, so any failed
/// start or stop can simply be retried. All work happens through `&mut self`
/// on the caller's task; [`SessionController::run_once`] must be polled while
/// a session is active to consume location events and clock ticks.
pub struct SessionController {
    store: Arc<dyn SessionStore>,
    location: Arc<dyn LocationSource>,
    fix_options: FixOptions,
    watch_options: FixOptions,
    tick_interval: Duration,

    phase: SessionPhase,
    session: Option<Session>,
    watch: Option<LocationWatch>,
    buffer: SampleBuffer,
    uplink: UplinkScheduler,
    clock: ElapsedClock,
    ticker: Option<Interval>,
    restore_allowed: bool,
    last_error: Option<TrackerError>,
    status_tx: watch::Sender<TrackerStatus>,
}

enum Wake {
    Location(Option<WatchEvent>),
    Tick,
}

impl SessionController {
    pub fn new(store: Arc<dyn SessionStore>, location: Arc<dyn LocationSource>, config: &TrackerConfig) -> Self {
        let (status_tx, _) = watch::channel(TrackerStatus {
            phase: SessionPhase::Idle,
            activity_id: None,
            mode: None,
            elapsed: Duration::ZERO,
            distance_km: 0.0,
            buffered: 0,
            watching: false,
            last_error: None,
        });

        Self {
            store,
            location,
            fix_options: config.fix_options(),
            watch_options: config.watch_options(),
            tick_interval: config.tick_interval(),
            phase: SessionPhase::Idle,
            session: None,
            watch: None,
            buffer: SampleBuffer::new(),
            uplink: UplinkScheduler::new(config.min_flush_interval(), config.failed_batch_policy),
            clock: ElapsedClock::new(),
            ticker: None,
            restore_allowed: true,
            last_error: None,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerStatus> {
        self.status_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn clock(&self) -> &ElapsedClock {
        &self.clock
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn uplink(&self) -> &UplinkScheduler {
        &self.uplink
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            phase: self.phase,
            activity_id: self.session.as_ref().map(|session| session.id.clone()),
            mode: self.session.as_ref().map(|session| session.mode),
            elapsed: self.clock.elapsed_at(Utc::now()),
            distance_km: self.uplink.distance_km(),
            buffered: self.buffer.len(),
            watching: self.watch.is_some(),
            last_error: self.last_error.clone(),
        }
    }

    /// Starts a session. Takes a one-shot fix, asks the backend for a new
    /// activity and only then goes Active. Any failure before the backend
    /// confirms leaves the controller Idle, and so does dropping the returned
    /// future before it completes.
    pub async fn start(&mut self, request: StartRequest) -> Result<TrackerStatus, TrackerError> {
        if self.phase != SessionPhase::Idle {
            return Err(TrackerError::InvalidTransition(format!("cannot start while {:?}", self.phase)));
        }
        self.restore_allowed = false;

        let mut transition = Transition::begin(self, SessionPhase::Starting, SessionPhase::Idle);
        let opened = transition.controller().open_session(request).await;
        drop(transition);
        opened
    }

    async fn open_session(&mut self, request: StartRequest) -> Result<TrackerStatus, TrackerError> {
        let session = match self.open_remote(&request).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(%err, "start failed");
                self.last_error = Some(err.clone());
                self.set_phase(SessionPhase::Idle);
                return Err(err);
            }
        };

        tracing::info!(activity_id = %session.id, mode = %session.mode, "session started");
        let mode = session.mode;
        self.activate(session, 0.0);
        if mode == ExerciseMode::Running {
            self.attach_watch();
        }

        Ok(self.publish())
    }

    /// Ends the active session.
    ///
    /// The location watch is released before anything else and stays released
    /// even if a later step fails. Remaining samples are flushed, a final fix
    /// is taken and the backend is told to finish. If that last part fails, or
    /// the returned future is dropped before it completes, the session stays
    /// Active (without a watch) and `stop` can be retried.
    /// Stopping an Idle controller does nothing.
    pub async fn stop(&mut self) -> Result<StopOutcome, TrackerError> {
        match self.phase {
            SessionPhase::Idle => return Ok(StopOutcome::AlreadyIdle),
            SessionPhase::Active => {}
            phase => return Err(TrackerError::InvalidTransition(format!("cannot stop while {phase:?}"))),
        }
        let Some(session) = self.session.clone() else {
            self.set_phase(SessionPhase::Idle);
            return Ok(StopOutcome::AlreadyIdle);
        };

        let mut transition = Transition::begin(self, SessionPhase::Stopping, SessionPhase::Active);
        let closed = transition.controller().close_session(session).await;
        drop(transition);
        closed
    }

    async fn close_session(&mut self, session: Session) -> Result<StopOutcome, TrackerError> {
        self.release_watch();

        if session.mode == ExerciseMode::Running {
            self.uplink
                .flush_remaining(&mut self.buffer, self.store.as_ref(), &session.id)
                .await;
        }

        match self.close_remote(&session).await {
            Ok(record) => {
                tracing::info!(activity_id = %session.id, status = ?record.status, "session finished");
                self.uplink.discard(&mut self.buffer);
                self.session = None;
                self.clock.clear();
                self.last_error = None;
                self.set_phase(SessionPhase::Idle);
                Ok(StopOutcome::Finished(record))
            }
            Err(err) => {
                tracing::error!(activity_id = %session.id, %err, "finish failed, session kept");
                self.last_error = Some(err.clone());
                self.set_phase(SessionPhase::Active);
                Err(err)
            }
        }
    }

    /// Resumes a session the backend already has in progress. Allowed once,
    /// before any `start`. The start endpoint is not called.
    pub fn restore(&mut self, snapshot: RestorationSnapshot) -> Result<TrackerStatus, TrackerError> {
        if !self.restore_allowed || self.phase != SessionPhase::Idle {
            return Err(TrackerError::InvalidTransition(
                "restore is only possible once, before any start".into(),
            ));
        }
        self.restore_allowed = false;
        self.set_phase(SessionPhase::Restoring);

        let session = Session::new(snapshot.activity_id, snapshot.mode, snapshot.gym_location_id, snapshot.started_at);
        tracing::info!(activity_id = %session.id, mode = %session.mode, started_at = %session.started_at, "session restored");
        self.activate(session, snapshot.distance_km);
        if snapshot.mode == ExerciseMode::Running {
            self.attach_watch();
        }

        Ok(self.publish())
    }

    /// Waits for the next location event or clock tick and handles it.
    pub async fn run_once(&mut self) {
        let wake = {
            let tick_interval = self.tick_interval;
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = tokio::time::interval(tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });

            tokio::select! {
                event = next_event(&mut self.watch) => Wake::Location(event),
                _ = ticker.tick() => Wake::Tick,
            }
        };

        match wake {
            Wake::Location(Some(Ok(sample))) => {
                self.accept(sample);
                self.flush_if_due().await;
                self.publish();
            }
            Wake::Location(Some(Err(err))) => {
                tracing::warn!(%err, "location watch error");
                self.last_error = Some(err.into());
                self.publish();
            }
            Wake::Location(None) => {
                tracing::warn!("location source closed the watch");
                self.watch = None;
                self.publish();
            }
            Wake::Tick => {
                self.clock.tick(Utc::now());
                self.flush_if_due().await;
                self.publish();
            }
        }
    }

    async fn open_remote(&self, request: &StartRequest) -> Result<Session, TrackerError> {
        let fix = self.acquire_fix().await?;

        let (record, mode, gym_location_id) = match request {
            StartRequest::Running => {
                let record = self
                    .store
                    .start_running(StartRunningRequest {
                        latitude: fix.latitude,
                        longitude: fix.longitude,
                    })
                    .await?;
                (record, ExerciseMode::Running, None)
            }
            StartRequest::Gym { gym_location_id } => {
                let record = self
                    .store
                    .gym_checkin(GymCheckinRequest {
                        gym_location_id: gym_location_id.clone(),
                        latitude: fix.latitude,
                        longitude: fix.longitude,
                    })
                    .await?;
                (record, ExerciseMode::Gym, Some(gym_location_id.clone()))
            }
        };

        let started_at = record.started_at.unwrap_or_else(Utc::now);
        Ok(Session::new(record.id, mode, gym_location_id, started_at))
    }

    async fn close_remote(&self, session: &Session) -> Result<ActivityRecord, TrackerError> {
        let fix = self.acquire_fix().await?;

        match session.mode {
            ExerciseMode::Running => {
                self.store
                    .finish_running(FinishRunningRequest {
                        activity_id: session.id.clone(),
                        latitude: fix.latitude,
                        longitude: fix.longitude,
                    })
                    .await
            }
            ExerciseMode::Gym => {
                self.store
                    .gym_checkout(GymCheckoutRequest {
                        activity_id: session.id.clone(),
                        latitude: fix.latitude,
                        longitude: fix.longitude,
                    })
                    .await
            }
        }
    }

    async fn acquire_fix(&self) -> Result<LocationSample, TrackerError> {
        tokio::time::timeout(self.fix_options.timeout, self.location.get_fix(self.fix_options))
            .await
            .map_err(|_| TrackerError::FixTimeout)?
            .map_err(TrackerError::from)
    }

    fn activate(&mut self, session: Session, distance_km: f64) {
        self.clock.set_anchor(session.started_at);
        self.clock.tick(Utc::now());
        self.uplink.reset(Instant::now(), distance_km);
        self.buffer.clear();
        self.session = Some(session);
        self.last_error = None;
        self.phase = SessionPhase::Active;
    }

    /// The session exists remotely by the time this runs, so a refused watch
    /// does not undo the transition. It is reported through `last_error`.
    fn attach_watch(&mut self) {
        match self.location.watch(self.watch_options) {
            Ok(watch) => self.watch = Some(watch),
            Err(err) => {
                tracing::error!(%err, "could not watch location, session continues without samples");
                self.last_error = Some(err.into());
            }
        }
    }

    /// Events delivered before the release still count; nothing after it does.
    fn release_watch(&mut self) {
        let Some(mut watch) = self.watch.take() else {
            return;
        };
        for sample in watch.drain_pending().into_iter().flatten() {
            self.accept(sample);
        }
        watch.cancel();
        tracing::debug!(buffered = self.buffer.len(), "location watch released");
    }

    fn accept(&mut self, sample: LocationSample) {
        match &self.session {
            Some(session) if session.mode == ExerciseMode::Running => self.buffer.push(sample),
            _ => tracing::debug!("sample outside a running session ignored"),
        }
    }

    async fn flush_if_due(&mut self) {
        if self.phase != SessionPhase::Active {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        self.uplink
            .flush_if_due(&mut self.buffer, self.store.as_ref(), &session.id, Instant::now())
            .await;
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) -> TrackerStatus {
        let status = self.status();
        self.status_tx.send_replace(status.clone());
        status
    }
}

/// A transient phase held across await points. If the owning future is
/// dropped while the controller is still in `transient`, the controller goes
/// back to `fallback`.
struct Transition<'a> {
    controller: &'a mut SessionController,
    transient: SessionPhase,
    fallback: SessionPhase,
}

impl<'a> Transition<'a> {
    fn begin(controller: &'a mut SessionController, transient: SessionPhase, fallback: SessionPhase) -> Self {
        controller.set_phase(transient);
        Self {
            controller,
            transient,
            fallback,
        }
    }

    fn controller(&mut self) -> &mut SessionController {
        self.controller
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.controller.phase == self.transient {
            tracing::warn!(phase = ?self.transient, fallback = ?self.fallback, "transition abandoned");
            self.controller.set_phase(self.fallback);
        }
    }
}

async fn next_event(watch: &mut Option<LocationWatch>) -> Option<WatchEvent> {
    match watch {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(elapsed_secs: u64, distance_km: f64) -> TrackerStatus {
        TrackerStatus {
            phase: SessionPhase::Active,
            activity_id: None,
            mode: Some(ExerciseMode::Running),
            elapsed: Duration::from_secs(elapsed_secs),
            distance_km,
            buffered: 0,
            watching: true,
            last_error: None,
        }
    }

    #[test]
    fn pace_needs_distance_and_time() {
        assert_eq!(status(600, 0.0).pace_min_per_km(), None);
        assert_eq!(status(0, 1.0).pace_min_per_km(), None);
        assert_eq!(status(600, 2.0).pace_min_per_km(), Some(5.0));
    }
}
