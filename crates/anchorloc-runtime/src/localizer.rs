//! [`Localizer`] – runs localization attempts and applies their results.
//!
//! One attempt walks `Idle → InFlight → Idle`:
//!
//! 1. acquire the provider's latest frame (raw for the local backend, encoded
//!    for the remote ones) and check it;
//! 2. run the backend's solver;
//! 3. look the matched map up in the shared [`MapSpaceRegistry`];
//! 4. apply the coordinate convention and fuse the candidate into the map's
//!    space;
//! 5. emit events and return a [`LocalizeOutcome`].
//!
//! Attempts are serialized per localizer: a second call while one is in
//! flight fails with [`LocalizeError::AttemptInFlight`] without touching the
//! provider.  Counters only move forward; an attempt is counted once a valid
//! frame reached the solver, a success once its map was found.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anchorloc_capture::CameraDataProvider;
use anchorloc_geometry::{Transform3D, solver_to_world};
use anchorloc_types::{
    BackendKind, EventPayload, FailureReason, LocalizeError, LocalizeOutcome, LocalizedPose,
    MapId, SolveResult, Solved, StatsSnapshot,
};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Span, debug, field, info, instrument, trace, warn};
use uuid::Uuid;

use crate::config::LocalizerConfig;
use crate::events::EventHub;
use crate::fusion::PoseFusion;
use crate::registry::MapSpaceRegistry;
use crate::solver::{Backend, SolveInput};

type ProviderCell = Arc<Mutex<Box<dyn CameraDataProvider>>>;

/// Phase of the attempt state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Idle,
    InFlight,
}

/// Which flavor an attempt should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptRequest {
    Local,
    Server(Vec<MapId>),
    GeoPose(Vec<MapId>),
}

#[derive(Debug)]
struct OrchestratorState {
    phase: AttemptPhase,
    last_map_id: Option<MapId>,
}

/// Returns the phase to `Idle` on every exit path.
struct AttemptGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().phase = AttemptPhase::Idle;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct LocalizerBuilder {
    name: String,
    provider: Box<dyn CameraDataProvider>,
    registry: Arc<MapSpaceRegistry>,
    backends: Vec<Backend>,
    use_filtering: bool,
    reset_on_map_change: bool,
}

impl LocalizerBuilder {
    /// Name used as the event source and in log spans.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a backend.  A later backend of the same kind replaces an earlier
    /// one.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backends.retain(|b| b.kind() != backend.kind());
        self.backends.push(backend);
        self
    }

    pub fn use_filtering(mut self, enabled: bool) -> Self {
        self.use_filtering = enabled;
        self
    }

    pub fn reset_on_map_change(mut self, enabled: bool) -> Self {
        self.reset_on_map_change = enabled;
        self
    }

    /// Take the flags from a loaded config.
    pub fn config(self, cfg: &LocalizerConfig) -> Self {
        self.use_filtering(cfg.use_filtering)
            .reset_on_map_change(cfg.reset_on_map_change)
    }

    pub fn build(self) -> Localizer {
        let events = EventHub::new(format!("anchorloc::{}", self.name));
        Localizer {
            name: self.name,
            provider: Arc::new(Mutex::new(self.provider)),
            registry: self.registry,
            fusion: PoseFusion,
            backends: self.backends,
            state: Mutex::new(OrchestratorState {
                phase: AttemptPhase::Idle,
                last_map_id: None,
            }),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            use_filtering: AtomicBool::new(self.use_filtering),
            reset_on_map_change: AtomicBool::new(self.reset_on_map_change),
            tracking: AtomicBool::new(true),
            events,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Localizer
// ─────────────────────────────────────────────────────────────────────────────

pub struct Localizer {
    name: String,
    provider: ProviderCell,
    registry: Arc<MapSpaceRegistry>,
    fusion: PoseFusion,
    backends: Vec<Backend>,
    state: Mutex<OrchestratorState>,
    attempts: AtomicU64,
    successes: AtomicU64,
    use_filtering: AtomicBool,
    reset_on_map_change: AtomicBool,
    tracking: AtomicBool,
    events: EventHub,
}

impl Localizer {
    /// Start building a localizer over `provider`, sharing `registry` with
    /// any other localizer in the scene.
    pub fn builder(
        provider: impl CameraDataProvider + 'static,
        registry: Arc<MapSpaceRegistry>,
    ) -> LocalizerBuilder {
        LocalizerBuilder {
            name: "localizer".to_string(),
            provider: Box::new(provider),
            registry,
            backends: Vec::new(),
            use_filtering: true,
            reset_on_map_change: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<MapSpaceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::SeqCst),
            successes: self.successes.load(Ordering::SeqCst),
        }
    }

    pub fn last_localized_map(&self) -> Option<MapId> {
        self.state.lock().last_map_id
    }

    pub fn phase(&self) -> AttemptPhase {
        self.state.lock().phase
    }

    pub fn is_attempt_in_flight(&self) -> bool {
        self.phase() == AttemptPhase::InFlight
    }

    pub fn use_filtering(&self) -> bool {
        self.use_filtering.load(Ordering::SeqCst)
    }

    pub fn set_use_filtering(&self, enabled: bool) {
        self.use_filtering.store(enabled, Ordering::SeqCst);
    }

    pub fn reset_on_map_change(&self) -> bool {
        self.reset_on_map_change.load(Ordering::SeqCst)
    }

    pub fn set_reset_on_map_change(&self, enabled: bool) {
        self.reset_on_map_change.store(enabled, Ordering::SeqCst);
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    /// Report the device tracker's state.  Losing tracking resets the
    /// localizer immediately, even with an attempt in flight.
    pub fn set_tracking_state(&self, tracking: bool) {
        let was_tracking = self.tracking.swap(tracking, Ordering::SeqCst);
        if !tracking {
            if was_tracking {
                info!(localizer = %self.name, "device tracking lost");
            }
            self.reset();
        }
    }

    /// Forget the last localized map and drop every space's filter history.
    pub fn reset(&self) {
        self.state.lock().last_map_id = None;
        self.registry.invalidate_all_history();
        debug!(localizer = %self.name, "localizer reset");
        self.events.emit(EventPayload::Reset);
    }

    // ── Attempts ────────────────────────────────────────────────────────────

    /// Localize the latest raw frame with the local backend.
    #[instrument(skip(self), fields(localizer = %self.name))]
    pub async fn localize(&self) -> Result<LocalizeOutcome, LocalizeError> {
        let backend = self.backend(BackendKind::Local)?;
        let _attempt = self.begin_attempt()?;

        let snapshot = self.provider.lock().try_acquire_latest_frame();
        let Some(snapshot) = snapshot else {
            return Ok(self.no_attempt(FailureReason::NoFrameAvailable));
        };
        if let Err(reason) = snapshot.validate() {
            self.provider.lock().release(snapshot.pixels);
            return Ok(self.no_attempt(reason));
        }
        let device_pose = snapshot.info.device_pose;
        self.run_attempt(&backend, SolveInput::Raw(snapshot), device_pose)
            .await
    }

    /// Localize the latest encoded frame against `map_ids` on the server.
    #[instrument(skip_all, fields(localizer = %self.name, maps = map_ids.len()))]
    pub async fn localize_server(
        &self,
        map_ids: &[MapId],
    ) -> Result<LocalizeOutcome, LocalizeError> {
        self.localize_remote(BackendKind::RemoteServer, map_ids)
            .await
    }

    /// Like [`localize_server`](Self::localize_server), asking for a
    /// geodetic pose.
    #[instrument(skip_all, fields(localizer = %self.name, maps = map_ids.len()))]
    pub async fn localize_geo_pose(
        &self,
        map_ids: &[MapId],
    ) -> Result<LocalizeOutcome, LocalizeError> {
        self.localize_remote(BackendKind::RemoteGeo, map_ids).await
    }

    pub async fn attempt(
        &self,
        request: &AttemptRequest,
    ) -> Result<LocalizeOutcome, LocalizeError> {
        match request {
            AttemptRequest::Local => self.localize().await,
            AttemptRequest::Server(ids) => self.localize_server(ids).await,
            AttemptRequest::GeoPose(ids) => self.localize_geo_pose(ids).await,
        }
    }

    /// Run an attempt on a background task.  The handle may be dropped.
    pub fn spawn_attempt(
        self: &Arc<Self>,
        request: AttemptRequest,
    ) -> JoinHandle<Result<LocalizeOutcome, LocalizeError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.attempt(&request).await })
    }

    pub fn spawn_localize(
        self: &Arc<Self>,
    ) -> JoinHandle<Result<LocalizeOutcome, LocalizeError>> {
        self.spawn_attempt(AttemptRequest::Local)
    }

    pub fn spawn_localize_server(
        self: &Arc<Self>,
        map_ids: Vec<MapId>,
    ) -> JoinHandle<Result<LocalizeOutcome, LocalizeError>> {
        self.spawn_attempt(AttemptRequest::Server(map_ids))
    }

    pub fn spawn_localize_geo_pose(
        self: &Arc<Self>,
        map_ids: Vec<MapId>,
    ) -> JoinHandle<Result<LocalizeOutcome, LocalizeError>> {
        self.spawn_attempt(AttemptRequest::GeoPose(map_ids))
    }

    /// Attempt every `period` until `stop` turns `true` or its sender is
    /// dropped.  Ticks are skipped while tracking is lost.
    pub async fn run_periodic(
        self: Arc<Self>,
        request: AttemptRequest,
        period: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(localizer = %self.name, period_ms = period.as_millis() as u64, "periodic localization started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *stop.borrow() {
                break;
            }
            if !self.is_tracking() {
                trace!(localizer = %self.name, "tracking lost, skipping tick");
                continue;
            }
            match self.attempt(&request).await {
                Ok(outcome) => trace!(localized = outcome.is_localized(), "tick done"),
                Err(LocalizeError::AttemptInFlight) => {
                    debug!(localizer = %self.name, "previous attempt still in flight")
                }
                Err(e) => warn!(localizer = %self.name, error = %e, "periodic attempt failed"),
            }
        }
        info!(localizer = %self.name, "periodic localization stopped");
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn backend(&self, kind: BackendKind) -> Result<Backend, LocalizeError> {
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .cloned()
            .ok_or(LocalizeError::BackendUnavailable(kind))
    }

    fn begin_attempt(&self) -> Result<AttemptGuard<'_>, LocalizeError> {
        let mut state = self.state.lock();
        if state.phase == AttemptPhase::InFlight {
            return Err(LocalizeError::AttemptInFlight);
        }
        state.phase = AttemptPhase::InFlight;
        Ok(AttemptGuard { state: &self.state })
    }

    fn no_attempt(&self, reason: FailureReason) -> LocalizeOutcome {
        trace!(localizer = %self.name, %reason, "no attempt");
        LocalizeOutcome::Failed(reason)
    }

    async fn localize_remote(
        &self,
        kind: BackendKind,
        map_ids: &[MapId],
    ) -> Result<LocalizeOutcome, LocalizeError> {
        let backend = self.backend(kind)?;
        let _attempt = self.begin_attempt()?;

        // Encoding may be slow; keep it off the async workers.
        let provider = Arc::clone(&self.provider);
        let frame = tokio::task::spawn_blocking(move || provider.lock().try_acquire_compressed_frame())
            .await
            .map_err(|e| LocalizeError::WorkerFailed(e.to_string()))?;
        let Some(frame) = frame else {
            return Ok(self.no_attempt(FailureReason::NoFrameAvailable));
        };
        if let Err(reason) = frame.validate() {
            return Ok(self.no_attempt(reason));
        }
        let device_pose = frame.info.device_pose;
        let input = SolveInput::Encoded {
            frame,
            map_ids: map_ids.to_vec(),
        };
        self.run_attempt(&backend, input, device_pose).await
    }

    #[instrument(skip_all, fields(backend = %backend.kind(), attempt_id = field::Empty))]
    async fn run_attempt(
        &self,
        backend: &Backend,
        input: SolveInput,
        device_pose: Transform3D,
    ) -> Result<LocalizeOutcome, LocalizeError> {
        let attempt_id = Uuid::new_v4();
        Span::current().record("attempt_id", field::display(attempt_id));
        self.attempts.fetch_add(1, Ordering::SeqCst);
        debug!(%attempt_id, backend = %backend.kind(), "localization attempt started");

        let reply = backend.solve(input).await;
        if let Some(pixels) = reply.recycled {
            self.provider.lock().release(pixels);
        }
        let solved = reply.result.inspect_err(|e| {
            warn!(%attempt_id, error = %e, "localization attempt errored");
        })?;

        match solved {
            Solved::NoMatch { elapsed } => {
                info!(
                    %attempt_id,
                    "localization attempt failed after {:.3} seconds",
                    elapsed.as_secs_f64()
                );
                Ok(LocalizeOutcome::Failed(FailureReason::SolverNoMatch))
            }
            Solved::Match(result) => Ok(self.apply_result(attempt_id, backend, result, device_pose)),
        }
    }

    fn apply_result(
        &self,
        attempt_id: Uuid,
        backend: &Backend,
        result: SolveResult,
        device_pose: Transform3D,
    ) -> LocalizeOutcome {
        let map_id = result.map_id;
        let Some(space) = self.registry.resolve(map_id) else {
            info!(
                %attempt_id,
                %map_id,
                "matched map is not registered, discarding after {:.3} seconds",
                result.elapsed.as_secs_f64()
            );
            return LocalizeOutcome::Failed(FailureReason::UnknownMapId(map_id));
        };
        let map = space.map();
        let map_to_ecef = map.map_to_ecef();
        let Some(raw_pose) = backend.to_map_space(&result.raw, map_to_ecef.as_ref()) else {
            warn!(
                %attempt_id,
                %map_id,
                "geodetic result for a map without ECEF reference after {:.3} seconds",
                result.elapsed.as_secs_f64()
            );
            return LocalizeOutcome::Failed(FailureReason::MissingGeoReference(map_id));
        };
        let candidate = solver_to_world(raw_pose);

        self.successes.fetch_add(1, Ordering::SeqCst);
        info!(
            %attempt_id,
            %map_id,
            "relocalized in {:.3} seconds",
            result.elapsed.as_secs_f64()
        );
        self.note_localized_map(map_id);

        let fused = self
            .fusion
            .fuse(&space, candidate, device_pose, self.use_filtering());
        map.notify_successful_localization(map_id);

        let kind = backend.kind();
        let pose = LocalizedPose {
            attempt_id,
            timestamp: Utc::now(),
            backend: kind,
            map_id,
            pose: match kind {
                BackendKind::RemoteGeo => fused.cloud_space,
                _ => candidate,
            },
            correction: fused.correction.inverse(),
            map_to_ecef: match kind {
                BackendKind::Local => None,
                _ => map_to_ecef,
            },
            elapsed: result.elapsed,
        };
        self.events.emit(EventPayload::PoseFound(pose.clone()));
        LocalizeOutcome::Localized(pose)
    }

    /// Remember `map_id`, resetting first when it differs from the last map
    /// and `reset_on_map_change` is set.
    fn note_localized_map(&self, map_id: MapId) {
        if self.state.lock().last_map_id == Some(map_id) {
            return;
        }
        if self.reset_on_map_change() {
            self.reset();
        }
        self.state.lock().last_map_id = Some(map_id);
        info!(localizer = %self.name, %map_id, "localized map changed");
        self.events.emit(EventPayload::MapChanged(map_id));
    }
}
