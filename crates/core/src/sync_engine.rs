//! Vault <-> remote synchronization engine.
//!
//! The [`SyncController`] implements the state machine that drives one sync
//! cycle against a [`RepositoryAdapter`]:
//!
//! 1. Initialize the repository once (identity, credentials, `origin`, branch).
//! 2. Refuse to pull while a merge is in progress on another branch.
//! 3. Fetch (failures are warnings) and pull without rebasing.
//! 4. Stop with `conflict: true` if the pull left unmerged paths.
//! 5. Commit local changes with the configured template, then push.
//!
//! The controller does not guard against concurrent use; the
//! [`crate::coordinator::TriggerCoordinator`] admits one request at a time.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auth;
use crate::commit_format::CommitFormatter;
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, ResolutionStrategy};
use crate::errors::{ConfigError, GitError, PullFailure, SyncError};
use crate::git::adapter::{PullSummary, RepoStatus, RepositoryAdapter};
use crate::models::{
    ConflictSet, CyclePhase, OutcomeKind, SyncInfo, SyncOutcome, TriggerSource, ValidationReport,
};

// ---------------------------------------------------------------------------
// Repository handle
// ---------------------------------------------------------------------------

/// Owns the single adapter instance and whether it has been initialized.
pub struct RepositoryHandle<A> {
    adapter: A,
    ready: bool,
}

impl<A> RepositoryHandle<A> {
    fn new(adapter: A) -> Self {
        Self {
            adapter,
            ready: false,
        }
    }
}

/// Which phases a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleMode {
    /// Pull, check conflicts, commit, push.
    Full,
    /// Pull and check conflicts only.
    PullOnly,
    /// Check conflicts, commit, push; no pull.
    PushOnly,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// The sync state machine for one vault.
pub struct SyncController<A: RepositoryAdapter> {
    config: SyncConfig,
    handle: RepositoryHandle<A>,
    phase: CyclePhase,
    /// The remote branch has not been seen yet (empty remote on first sync).
    first_sync: bool,
    phase_observer: Option<Box<dyn Fn(CyclePhase) + Send>>,
    last_sync_at: Option<DateTime<Utc>>,
    last_outcome: Option<String>,
    info: SyncInfo,
}

impl<A: RepositoryAdapter> SyncController<A> {
    pub fn new(config: SyncConfig, adapter: A) -> Self {
        info!(
            path = %config.repository.path.display(),
            branch = %config.repository.branch,
            "creating sync controller"
        );
        Self {
            config,
            handle: RepositoryHandle::new(adapter),
            phase: CyclePhase::Idle,
            first_sync: true,
            phase_observer: None,
            last_sync_at: None,
            last_outcome: None,
            info: SyncInfo::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn adapter(&self) -> &A {
        &self.handle.adapter
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.ready
    }

    /// Call `observer` on every phase transition. Used to publish the live
    /// phase while the controller itself is busy.
    pub fn observe_phase(&mut self, observer: impl Fn(CyclePhase) + Send + 'static) {
        self.phase_observer = Some(Box::new(observer));
    }

    /// The last status snapshot, without touching the repository.
    pub fn cached_info(&self) -> SyncInfo {
        self.info.clone()
    }

    /// Replace the configuration. If anything that affects initialization
    /// changed, the next request re-initializes the repository.
    pub fn reconfigure(&mut self, config: SyncConfig) {
        if config.fingerprint() != self.config.fingerprint() {
            info!("configuration changed, repository will be re-initialized");
            self.reset();
        }
        self.config = config;
    }

    /// Forget initialization; the next request re-initializes.
    pub fn reset(&mut self) {
        self.handle.ready = false;
        self.first_sync = true;
    }

    fn set_phase(&mut self, new_phase: CyclePhase) {
        if self.phase != new_phase {
            info!(from = %self.phase, to = %new_phase, "phase transition");
            self.phase = new_phase;
            self.info.phase = new_phase;
            if let Some(observer) = &self.phase_observer {
                observer(new_phase);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Run a full sync cycle. `files` is the explicit file context used for
    /// the commit message; all changes are staged regardless.
    pub fn run_cycle(
        &mut self,
        source: TriggerSource,
        files: Option<&[String]>,
    ) -> Result<SyncOutcome, SyncError> {
        info!(%source, "sync cycle started");
        let result = self.cycle(source, files, CycleMode::Full);
        self.finish(result)
    }

    /// Pull remote changes without committing or pushing.
    pub fn pull(&mut self, source: TriggerSource) -> Result<SyncOutcome, SyncError> {
        info!(%source, "pull started");
        let result = self.cycle(source, None, CycleMode::PullOnly);
        self.finish(result)
    }

    /// Commit and push local changes without pulling.
    pub fn push(
        &mut self,
        source: TriggerSource,
        files: Option<&[String]>,
    ) -> Result<SyncOutcome, SyncError> {
        info!(%source, "push started");
        let result = self.cycle(source, files, CycleMode::PushOnly);
        self.finish(result)
    }

    /// Resolve every conflicted path with `strategy` and commit the merge.
    /// Nothing is pushed; the next cycle pushes the merge commit.
    pub fn resolve_conflicts(
        &mut self,
        strategy: ResolutionStrategy,
    ) -> Result<SyncOutcome, SyncError> {
        let result = self.resolve_inner(strategy);
        self.finish(result)
    }

    /// Discard an in-progress merge.
    pub fn abort_merge(&mut self) -> Result<SyncOutcome, SyncError> {
        let result = self.abort_inner();
        self.finish(result)
    }

    /// Query live repository status. Only opens the repository; credentials
    /// and remote are not needed.
    pub fn status(&mut self) -> Result<SyncInfo, SyncError> {
        let adapter = &mut self.handle.adapter;
        adapter
            .ensure_repository()
            .map_err(SyncError::InitError)?;
        let status = adapter.status().map_err(SyncError::RepositoryState)?;
        let latest = adapter
            .log(1)
            .map_err(SyncError::RepositoryState)?
            .into_iter()
            .next();

        self.info.apply_status(status);
        self.info.latest_commit = latest;
        self.info.last_sync_at = self.last_sync_at;
        self.info.last_outcome = self.last_outcome.clone();
        self.info.in_flight = false;
        Ok(self.info.clone())
    }

    /// Check configuration, credentials and remote reachability.
    pub fn validate(&mut self) -> ValidationReport {
        let config_errors = self.config.validation_errors();
        let url_ok = !config_errors
            .iter()
            .any(|e| invalid_field(e).is_some_and(|f| f == "remote.url"));

        // Credential problems come from the resolver, which also checks the
        // key file on disk.
        let mut report = ValidationReport::from_errors(
            config_errors
                .iter()
                .filter(|e| !invalid_field(e).is_some_and(|f| f.starts_with("auth.")))
                .map(|e| e.to_string()),
        );
        for problem in auth::credential_problems(&self.config) {
            report.push(problem);
        }

        if url_ok {
            match auth::resolve(&self.config) {
                Ok(resolved) => {
                    let adapter = &mut self.handle.adapter;
                    adapter.configure_credentials(resolved.credentials.clone());
                    match adapter.list_remote_refs(&resolved.url) {
                        Ok(refs) => {
                            debug!(count = refs.len(), "remote reachable");
                        }
                        Err(e) => report.push(format!(
                            "remote '{}' is not reachable: {e}",
                            resolved.display_url()
                        )),
                    }
                }
                Err(e) => debug!(error = %e, "skipping reachability check"),
            }
        }

        info!(valid = report.valid, errors = report.errors.len(), "validation finished");
        report
    }

    // -----------------------------------------------------------------------
    // Cycle internals
    // -----------------------------------------------------------------------

    fn cycle(
        &mut self,
        source: TriggerSource,
        files: Option<&[String]>,
        mode: CycleMode,
    ) -> Result<SyncOutcome, SyncError> {
        self.config.validate()?;
        self.set_phase(CyclePhase::Initializing);
        self.initialize()?;

        let branch = self.config.repository.branch.clone();
        let status = self.read_status()?;
        self.check_merge_branch(&status)?;

        let mut warnings = Vec::new();
        let mut incoming = false;
        if mode != CycleMode::PushOnly {
            if status.merging {
                info!("merge in progress on configured branch, skipping pull");
            } else {
                self.set_phase(CyclePhase::Pulling);
                incoming = self.pull_remote(&branch, &mut warnings)?;
            }
        }

        self.set_phase(CyclePhase::ConflictCheck);
        let status = self.read_status()?;
        let conflicts = ConflictSet::from_status(&status);
        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "conflicts detected, cycle paused");
            let mut outcome = SyncOutcome::new(OutcomeKind::Conflicted, source);
            outcome.message = format!(
                "Pulled remote changes, but {} file(s) have conflicts. \
                 Resolve them with keep-local or keep-remote before the next push.",
                conflicts.len()
            );
            outcome.conflicted_files = conflicts.into_paths();
            outcome.incoming = incoming;
            outcome.warnings = warnings;
            return Ok(outcome);
        }

        if mode == CycleMode::PullOnly {
            let mut outcome = SyncOutcome::new(OutcomeKind::Pulled, source);
            outcome.message = if incoming {
                "Pulled remote changes".into()
            } else {
                "Already up to date".into()
            };
            outcome.incoming = incoming;
            outcome.warnings = warnings;
            return Ok(outcome);
        }

        if status.changed_paths.is_empty() && !status.merging {
            if status.ahead == 0 {
                debug!("no changes, skipping commit and push");
                let mut outcome = SyncOutcome::new(OutcomeKind::NothingToSync, source);
                outcome.message = if incoming {
                    "Pulled remote changes; no local changes to push".into()
                } else {
                    "Everything up to date; nothing to sync".into()
                };
                outcome.incoming = incoming;
                outcome.warnings = warnings;
                return Ok(outcome);
            }

            info!(ahead = status.ahead, "pushing pending local commits");
            self.push_branch(&branch)?;
            let mut outcome = SyncOutcome::new(OutcomeKind::Pushed, source);
            outcome.message = format!("Pushed {} pending commit(s)", status.ahead);
            outcome.incoming = incoming;
            outcome.warnings = warnings;
            return Ok(outcome);
        }

        self.set_phase(CyclePhase::Committing);
        let changed = status.changed_paths.clone();
        let adapter = &mut self.handle.adapter;
        adapter.add(None).map_err(SyncError::CommitError)?;
        let sha = if status.merging {
            adapter.commit_merge().map_err(SyncError::CommitError)?
        } else {
            let listed = files.filter(|f| !f.is_empty()).unwrap_or(changed.as_slice());
            let message = CommitFormatter::new(&self.config.sync).format(listed);
            adapter.commit(&message).map_err(SyncError::CommitError)?
        };

        self.push_branch(&branch)?;

        let mut outcome = SyncOutcome::new(OutcomeKind::Synced, source);
        outcome.message = if status.merging && changed.is_empty() {
            "Completed merge and pushed".into()
        } else {
            format!("Synced {} file(s)", changed.len())
        };
        outcome.changed_files = changed;
        outcome.commit = Some(sha);
        outcome.incoming = incoming;
        outcome.warnings = warnings;
        Ok(outcome)
    }

    /// Bring the repository to a state where pull and push can run.
    fn initialize(&mut self) -> Result<(), SyncError> {
        if self.handle.ready {
            debug!("repository already initialized");
            return Ok(());
        }

        let config = &self.config;
        let adapter = &mut self.handle.adapter;
        adapter
            .ensure_repository()
            .map_err(SyncError::InitError)?;
        adapter
            .configure_identity(&config.identity.name, &config.identity.email)
            .map_err(SyncError::InitError)?;
        let resolved = auth::apply(adapter, config)?;

        // Switching branches mid-merge would lose the merge state; the
        // merge check after initialization reports it instead.
        let status = adapter.status().map_err(SyncError::InitError)?;
        if !status.merging {
            adapter
                .checkout_branch(&config.repository.branch)
                .map_err(SyncError::InitError)?;
        }

        info!(remote = %resolved.display_url(), "repository initialized");
        self.handle.ready = true;
        Ok(())
    }

    fn read_status(&self) -> Result<RepoStatus, SyncError> {
        self.handle
            .adapter
            .status()
            .map_err(SyncError::RepositoryState)
    }

    fn check_merge_branch(&self, status: &RepoStatus) -> Result<(), SyncError> {
        let expected = &self.config.repository.branch;
        if status.merging && &status.current_branch != expected {
            warn!(
                current = %status.current_branch,
                expected = %expected,
                "merge in progress on another branch"
            );
            return Err(SyncError::MergeInProgress {
                current_branch: status.current_branch.clone(),
                expected_branch: expected.clone(),
            });
        }
        Ok(())
    }

    /// Fetch then pull. Returns whether remote commits came in.
    fn pull_remote(
        &mut self,
        branch: &str,
        warnings: &mut Vec<String>,
    ) -> Result<bool, SyncError> {
        let adapter = &mut self.handle.adapter;
        match adapter.fetch(branch) {
            Ok(()) => {}
            Err(GitError::RefNotFound(_)) if self.first_sync => {
                let msg = format!(
                    "remote branch '{branch}' does not exist yet; it will be created on push"
                );
                warn!("{msg}");
                warnings.push(msg);
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "fetch failed, attempting pull anyway");
                warnings.push(format!("fetch failed: {e}"));
            }
        }

        match adapter.pull(branch) {
            Ok(summary) => {
                self.first_sync = false;
                debug!(?summary, "pull finished");
                Ok(summary != PullSummary::UpToDate)
            }
            Err(e) => {
                let kind = PullFailure::from_git_error(&e);
                warn!(%kind, error = %e, "pull failed");
                Err(SyncError::PullError { kind, source: e })
            }
        }
    }

    fn push_branch(&mut self, branch: &str) -> Result<(), SyncError> {
        self.set_phase(CyclePhase::Pushing);
        self.handle
            .adapter
            .push(branch)
            .map_err(SyncError::PushError)?;
        self.first_sync = false;
        Ok(())
    }

    /// Open the repository for a local-only request. Unlike `initialize`,
    /// no credentials or remote are touched, so a broken token cannot block
    /// resolving or aborting a merge.
    fn open_local(&mut self) -> Result<(), SyncError> {
        self.config.validate_local()?;
        self.set_phase(CyclePhase::Initializing);
        let config = &self.config;
        let adapter = &mut self.handle.adapter;
        adapter
            .ensure_repository()
            .map_err(SyncError::InitError)?;
        adapter
            .configure_identity(&config.identity.name, &config.identity.email)
            .map_err(SyncError::InitError)
    }

    fn resolve_inner(&mut self, strategy: ResolutionStrategy) -> Result<SyncOutcome, SyncError> {
        self.open_local()?;

        self.set_phase(CyclePhase::Resolving);
        let status = self.read_status()?;
        let conflicts = ConflictSet::from_status(&status);
        let report = ConflictResolver::resolve(&mut self.handle.adapter, &conflicts, strategy)?;

        if report.resolved.is_empty() {
            let mut outcome = SyncOutcome::new(OutcomeKind::NothingToSync, TriggerSource::Manual);
            outcome.message = "No conflicts to resolve".into();
            return Ok(outcome);
        }

        let mut outcome = SyncOutcome::new(OutcomeKind::Resolved, TriggerSource::Manual);
        outcome.message = format!(
            "Resolved {} conflict(s) using {strategy}; sync to push the merge",
            report.resolved.len()
        );
        outcome.changed_files = report.resolved;
        outcome.commit = report.commit;
        Ok(outcome)
    }

    fn abort_inner(&mut self) -> Result<SyncOutcome, SyncError> {
        self.open_local()?;

        self.handle
            .adapter
            .abort_merge()
            .map_err(SyncError::RepositoryState)?;
        let mut outcome = SyncOutcome::new(OutcomeKind::MergeAborted, TriggerSource::Manual);
        outcome.message = "Merge aborted; local branch restored".into();
        Ok(outcome)
    }

    /// Pass through the terminal phase for `result`, record it, and return
    /// to `Idle`.
    fn finish(
        &mut self,
        result: Result<SyncOutcome, SyncError>,
    ) -> Result<SyncOutcome, SyncError> {
        match &result {
            Ok(outcome) => {
                self.set_phase(CyclePhase::Done);
                info!(
                    kind = ?outcome.kind,
                    files = outcome.changed_files.len(),
                    conflicts = outcome.conflicted_files.len(),
                    "request completed"
                );
                self.last_sync_at = Some(outcome.timestamp);
                self.last_outcome = Some(outcome.message.clone());
            }
            Err(e) => {
                self.set_phase(CyclePhase::Failed);
                warn!(error = %e, "request failed");
                self.last_outcome = Some(format!("Failed: {e}"));
            }
        }
        self.set_phase(CyclePhase::Idle);
        self.refresh_info();
        result
    }

    /// Best-effort refresh of the cached status snapshot.
    fn refresh_info(&mut self) {
        if self.handle.ready {
            if let Ok(status) = self.handle.adapter.status() {
                self.info.apply_status(status);
            }
        }
        self.info.last_sync_at = self.last_sync_at;
        self.info.last_outcome = self.last_outcome.clone();
    }
}

fn invalid_field(err: &ConfigError) -> Option<&str> {
    match err {
        ConfigError::InvalidValue { field, .. } => Some(field),
        _ => None,
    }
}
