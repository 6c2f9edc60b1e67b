//! Trigger coordination.
//!
//! The [`TriggerCoordinator`] is the host-facing entry point. It admits at
//! most one controller request at a time, debounces on-save triggers into a
//! single deferred cycle, and spaces background cycles by the configured
//! interval. A request that cannot be admitted returns
//! [`TriggerResponse::Busy`] immediately; nothing is queued.
//!
//! Controller work runs on the blocking pool because the adapter performs
//! blocking disk and network I/O.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::conflict::ResolutionStrategy;
use crate::errors::SyncError;
use crate::git::adapter::RepositoryAdapter;
use crate::models::{SyncInfo, SyncOutcome, TriggerSource, ValidationReport};
use crate::sync_engine::SyncController;

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// What happened to a request.
#[derive(Debug)]
pub enum TriggerResponse {
    /// The request ran to completion.
    Completed(SyncOutcome),
    /// The request ran and failed.
    Failed(SyncError),
    Status(SyncInfo),
    Validation(ValidationReport),
    /// Another request was in flight; this one was dropped.
    Busy,
    /// An on-save cycle was scheduled after the debounce window.
    Debounced,
    /// A background cycle was skipped because the interval has not elapsed.
    NotDue,
    /// The trigger is switched off in configuration (or the coordinator is
    /// shut down).
    Disabled,
    /// Automatic triggers are paused after a failure that needs user
    /// correction. A successful manual request or a new configuration
    /// resumes them.
    Suspended,
}

impl TriggerResponse {
    /// Whether the host should present this as success.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Completed(outcome) => outcome.success,
            Self::Failed(_) | Self::Busy | Self::Suspended => false,
            Self::Validation(report) => report.valid,
            Self::Status(_) | Self::Debounced | Self::NotDue | Self::Disabled => true,
        }
    }

    /// Human-readable summary for the host to display.
    pub fn message(&self) -> String {
        match self {
            Self::Completed(outcome) => outcome.message.clone(),
            Self::Failed(e) => format!("Sync failed: {e}"),
            Self::Status(info) => info.summary(),
            Self::Validation(report) if report.valid => "Configuration is valid".into(),
            Self::Validation(report) => format!(
                "Configuration has {} problem(s): {}",
                report.errors.len(),
                report.errors.join("; ")
            ),
            Self::Busy => "A sync is already in progress".into(),
            Self::Debounced => "Sync scheduled once edits settle".into(),
            Self::NotDue => "Background sync not due yet".into(),
            Self::Disabled => "Trigger disabled".into(),
            Self::Suspended => {
                "Automatic sync paused until the last error is corrected".into()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Trigger settings read without touching the controller.
#[derive(Debug, Clone, Copy)]
struct Timing {
    debounce: Duration,
    background_interval: Duration,
    auto_sync_on_open: bool,
    auto_sync_on_save: bool,
}

impl Timing {
    fn from_config(config: &SyncConfig) -> Self {
        Self {
            debounce: Duration::from_secs(config.sync.debounce_secs.max(1)),
            background_interval: Duration::from_secs(
                config.sync.background_interval_minutes.saturating_mul(60),
            ),
            auto_sync_on_open: config.sync.auto_sync_on_open,
            auto_sync_on_save: config.sync.auto_sync_on_save,
        }
    }
}

/// Whether a background cycle may run at `now`.
///
/// Due when no cycle has completed yet, or when at least `interval` has
/// elapsed since the last completed one.
pub fn is_background_due(last_completed: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last_completed {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct PendingSave {
    generation: u64,
    files: Vec<String>,
    handle: JoinHandle<()>,
}

struct Shared<A: RepositoryAdapter> {
    controller: Mutex<SyncController<A>>,
    in_flight: AtomicBool,
    shut_down: AtomicBool,
    suspended: AtomicBool,
    timing: Mutex<Timing>,
    pending_save: Mutex<Option<PendingSave>>,
    save_generation: AtomicU64,
    background: Mutex<Option<JoinHandle<()>>>,
    last_completed: Mutex<Option<Instant>>,
    completed: AtomicU64,
    /// Last status snapshot; its phase tracks the running request.
    snapshot: Arc<Mutex<SyncInfo>>,
}

/// Serializes and debounces sync requests for one controller.
///
/// Cloning is cheap; clones share the same in-flight token and timers.
pub struct TriggerCoordinator<A: RepositoryAdapter + 'static> {
    shared: Arc<Shared<A>>,
}

impl<A: RepositoryAdapter + 'static> Clone for TriggerCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Clears the in-flight flag on drop, even if the request panics.
struct InFlightGuard<A: RepositoryAdapter>(Arc<Shared<A>>);

impl<A: RepositoryAdapter> Drop for InFlightGuard<A> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<A: RepositoryAdapter + 'static> TriggerCoordinator<A> {
    pub fn new(mut controller: SyncController<A>) -> Self {
        let timing = Timing::from_config(controller.config());
        let snapshot = Arc::new(Mutex::new(SyncInfo {
            phase: controller.phase(),
            ..controller.cached_info()
        }));
        let live = snapshot.clone();
        controller.observe_phase(move |phase| lock(&live).phase = phase);
        Self {
            shared: Arc::new(Shared {
                controller: Mutex::new(controller),
                in_flight: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                suspended: AtomicBool::new(false),
                timing: Mutex::new(timing),
                pending_save: Mutex::new(None),
                save_generation: AtomicU64::new(0),
                background: Mutex::new(None),
                last_completed: Mutex::new(None),
                completed: AtomicU64::new(0),
                snapshot,
            }),
        }
    }

    /// Whether a request currently holds the in-flight token.
    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Whether an on-save cycle is waiting for its debounce window.
    pub fn has_pending_save(&self) -> bool {
        lock(&self.shared.pending_save).is_some()
    }

    /// Sync cycles (full, pull or push) that ran to completion, successfully
    /// or not.
    pub fn completed_cycles(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Whether automatic triggers are paused by an error that retrying
    /// cannot fix.
    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::SeqCst)
    }

    /// When the last sync cycle finished.
    pub fn last_completed(&self) -> Option<Instant> {
        *lock(&self.shared.last_completed)
    }

    fn timing(&self) -> Timing {
        *lock(&self.shared.timing)
    }

    fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> Option<InFlightGuard<A>> {
        self.shared
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(self.shared.clone()))
    }

    /// Run `op` against the controller on the blocking pool, holding the
    /// in-flight token. Returns `None` if another request holds it.
    ///
    /// `cycle` marks pull/push work, which resets the background spacing.
    async fn execute<T, F>(&self, cycle: bool, op: F) -> Option<Result<T, SyncError>>
    where
        T: Send + 'static,
        F: FnOnce(&mut SyncController<A>) -> Result<T, SyncError> + Send + 'static,
    {
        let guard = self.try_acquire()?;
        let shared = self.shared.clone();
        let joined = tokio::task::spawn_blocking(move || {
            // The token moves with the work so it stays held until the
            // controller returns, even if the awaiting caller goes away.
            let _guard = guard;
            let result = {
                let mut controller = lock(&shared.controller);
                let result = op(&mut *controller);
                *lock(&shared.snapshot) = controller.cached_info();
                result
            };
            if cycle {
                *lock(&shared.last_completed) = Some(Instant::now());
                shared.completed.fetch_add(1, Ordering::SeqCst);
            }
            result
        })
        .await;

        Some(joined.unwrap_or_else(|e| {
            error!(error = %e, "sync task failed");
            Err(SyncError::TaskFailed(e.to_string()))
        }))
    }

    // -----------------------------------------------------------------------
    // Host entry points
    // -----------------------------------------------------------------------

    /// Run a full sync cycle now. Bypasses debouncing.
    pub async fn request_sync(
        &self,
        source: TriggerSource,
        files: Option<Vec<String>>,
    ) -> TriggerResponse {
        let result = self
            .execute(true, move |c| c.run_cycle(source, files.as_deref()))
            .await;
        self.respond(source, result)
    }

    /// Record a file save. The cycle runs once no further save has arrived
    /// for the debounce window, using the files from the latest save.
    pub fn request_save(&self, files: Vec<String>) -> TriggerResponse {
        let timing = self.timing();
        if !timing.auto_sync_on_save || self.is_shut_down() {
            return TriggerResponse::Disabled;
        }
        if self.is_suspended() {
            debug!("save trigger ignored, automatic sync suspended");
            return TriggerResponse::Suspended;
        }

        let generation = self.shared.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = lock(&self.shared.pending_save);
        if let Some(previous) = pending.take() {
            debug!(generation = previous.generation, "superseding pending save trigger");
            previous.handle.abort();
        }

        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timing.debounce).await;
            let files = {
                let mut pending = lock(&coordinator.shared.pending_save);
                let latest = pending
                    .as_ref()
                    .is_some_and(|p| p.generation == generation);
                if latest {
                    pending.take().map(|p| p.files)
                } else {
                    None
                }
            };
            let Some(files) = files else {
                return;
            };
            if coordinator.is_suspended() {
                debug!("debounced save dropped, automatic sync suspended");
                return;
            }
            let response = coordinator
                .request_sync(TriggerSource::Save, Some(files))
                .await;
            if matches!(response, TriggerResponse::Busy) {
                warn!("sync busy, save-triggered cycle dropped");
            }
        });

        debug!(generation, count = files.len(), "save trigger debounced");
        *pending = Some(PendingSave {
            generation,
            files,
            handle,
        });
        TriggerResponse::Debounced
    }

    /// Periodic trigger. Runs a cycle only if the background interval has
    /// elapsed since the last completed request.
    pub async fn request_background(&self) -> TriggerResponse {
        let interval = self.timing().background_interval;
        if interval.is_zero() {
            return TriggerResponse::Disabled;
        }
        if self.is_suspended() {
            debug!("background sync skipped, automatic sync suspended");
            return TriggerResponse::Suspended;
        }
        if !is_background_due(self.last_completed(), Instant::now(), interval) {
            debug!("background sync not due");
            return TriggerResponse::NotDue;
        }
        self.request_sync(TriggerSource::Background, None).await
    }

    /// Host startup trigger.
    pub async fn request_startup(&self) -> TriggerResponse {
        if !self.timing().auto_sync_on_open {
            return TriggerResponse::Disabled;
        }
        self.request_sync(TriggerSource::Startup, None).await
    }

    pub async fn request_pull(&self) -> TriggerResponse {
        let result = self
            .execute(true, |c| c.pull(TriggerSource::Manual))
            .await;
        self.respond(TriggerSource::Manual, result)
    }

    pub async fn request_push(&self, files: Option<Vec<String>>) -> TriggerResponse {
        let result = self
            .execute(true, move |c| c.push(TriggerSource::Manual, files.as_deref()))
            .await;
        self.respond(TriggerSource::Manual, result)
    }

    pub async fn request_resolve_conflicts(&self, strategy: ResolutionStrategy) -> TriggerResponse {
        let result = self
            .execute(false, move |c| c.resolve_conflicts(strategy))
            .await;
        self.respond(TriggerSource::Manual, result)
    }

    pub async fn request_abort_merge(&self) -> TriggerResponse {
        let result = self.execute(false, |c| c.abort_merge()).await;
        self.respond(TriggerSource::Manual, result)
    }

    /// Live status, or the last snapshot marked `in_flight` while a request
    /// is running.
    pub async fn request_status(&self) -> TriggerResponse {
        match self.execute(false, |c| c.status()).await {
            Some(Ok(info)) => TriggerResponse::Status(info),
            Some(Err(e)) => TriggerResponse::Failed(e),
            None => {
                let mut info = self.cached_info();
                info.in_flight = true;
                TriggerResponse::Status(info)
            }
        }
    }

    pub async fn request_validate(&self) -> TriggerResponse {
        match self.execute(false, |c| Ok(c.validate())).await {
            Some(Ok(report)) => TriggerResponse::Validation(report),
            Some(Err(e)) => TriggerResponse::Failed(e),
            None => TriggerResponse::Busy,
        }
    }

    /// Apply a new configuration. Returns `false` (and changes nothing)
    /// while a request is in flight.
    pub async fn reconfigure(&self, config: SyncConfig) -> bool {
        let timing = Timing::from_config(&config);
        let applied = self
            .execute(false, move |c| {
                c.reconfigure(config);
                Ok(())
            })
            .await;
        if !matches!(applied, Some(Ok(()))) {
            return false;
        }

        if self.shared.suspended.swap(false, Ordering::SeqCst) {
            info!("automatic sync resumed after reconfiguration");
        }
        let previous = std::mem::replace(&mut *lock(&self.shared.timing), timing);
        if previous.background_interval != timing.background_interval
            && lock(&self.shared.background).is_some()
        {
            self.start_background();
        }
        info!("configuration applied");
        true
    }

    /// Snapshot taken when the last request finished.
    fn cached_info(&self) -> SyncInfo {
        lock(&self.shared.snapshot).clone()
    }

    fn respond(
        &self,
        source: TriggerSource,
        result: Option<Result<SyncOutcome, SyncError>>,
    ) -> TriggerResponse {
        match result {
            None => {
                info!(%source, "request dropped, another sync is in flight");
                TriggerResponse::Busy
            }
            Some(Err(e)) => {
                if e.needs_user_action() && !self.shared.suspended.swap(true, Ordering::SeqCst) {
                    warn!(%source, error = %e, "automatic sync suspended until corrected");
                }
                TriggerResponse::Failed(e)
            }
            Some(Ok(outcome)) => {
                if self.shared.suspended.swap(false, Ordering::SeqCst) {
                    info!(%source, "automatic sync resumed");
                }
                TriggerResponse::Completed(outcome)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Start (or restart) the periodic background timer. No-op when the
    /// interval is zero.
    pub fn start_background(&self) {
        let interval = self.timing().background_interval;
        let mut slot = lock(&self.shared.background);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        if interval.is_zero() || self.is_shut_down() {
            debug!("background sync disabled");
            return;
        }

        let coordinator = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let response = coordinator.request_background().await;
                debug!(message = %response.message(), "background tick");
            }
        }));
        info!(interval_secs = interval.as_secs(), "background sync started");
    }

    /// Cancel pending timers. Requests already in flight finish; no new
    /// timer-driven requests are scheduled.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        if let Some(pending) = lock(&self.shared.pending_save).take() {
            pending.handle.abort();
        }
        if let Some(background) = lock(&self.shared.background).take() {
            background.abort();
        }
        info!("trigger coordinator shut down");
    }
}
