//! Domain model types used throughout vaultsync.
//!
//! These types carry results from the sync controller up through the
//! trigger coordinator to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::adapter::{CommitInfo, RepoStatus};

// ---------------------------------------------------------------------------
// Cycle phase
// ---------------------------------------------------------------------------

/// Phase of the sync state machine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Initializing,
    Pulling,
    ConflictCheck,
    Resolving,
    Committing,
    Pushing,
    Done,
    Failed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initializing => write!(f, "initializing"),
            Self::Pulling => write!(f, "pulling"),
            Self::ConflictCheck => write!(f, "conflict_check"),
            Self::Resolving => write!(f, "resolving"),
            Self::Committing => write!(f, "committing"),
            Self::Pushing => write!(f, "pushing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger source
// ---------------------------------------------------------------------------

/// What asked for a sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Explicit user command.
    Manual,
    /// A file was saved (debounced).
    Save,
    /// Periodic background timer.
    Background,
    /// Host startup.
    Startup,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Save => write!(f, "save"),
            Self::Background => write!(f, "background"),
            Self::Startup => write!(f, "startup"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync outcome
// ---------------------------------------------------------------------------

/// What a completed request did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Local changes committed and pushed.
    Synced,
    /// No local changes and nothing pending.
    NothingToSync,
    /// Remote changes pulled (explicit pull).
    Pulled,
    /// Previously committed local work pushed without a new commit.
    Pushed,
    /// Pull left unmerged paths; the cycle paused before committing.
    Conflicted,
    /// Conflicts resolved and the merge committed.
    Resolved,
    /// In-progress merge discarded.
    MergeAborted,
}

/// Result of one sync cycle or explicit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub kind: OutcomeKind,
    /// Failed requests surface as errors, so this is set for every outcome.
    /// A conflicted cycle still counts: the pull itself succeeded.
    pub success: bool,
    /// The cycle paused on conflicts; nothing was committed or pushed.
    pub conflict: bool,
    /// Paths committed (or, for pulls, left conflicted).
    pub changed_files: Vec<String>,
    pub conflicted_files: Vec<String>,
    /// Whether the pull brought in remote commits.
    pub incoming: bool,
    /// Id of the commit created, if any.
    pub commit: Option<String>,
    /// Non-fatal problems (fetch failures, empty remote).
    pub warnings: Vec<String>,
    pub source: TriggerSource,
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary for the host to display.
    pub message: String,
}

impl SyncOutcome {
    pub fn new(kind: OutcomeKind, source: TriggerSource) -> Self {
        Self {
            kind,
            success: true,
            conflict: kind == OutcomeKind::Conflicted,
            changed_files: Vec::new(),
            conflicted_files: Vec::new(),
            incoming: false,
            commit: None,
            warnings: Vec::new(),
            source,
            timestamp: Utc::now(),
            message: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict set
// ---------------------------------------------------------------------------

/// Paths currently unmerged, in sorted order.
///
/// Always built from a fresh status query; never stored across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet(Vec<String>);

impl ConflictSet {
    pub fn from_status(status: &RepoStatus) -> Self {
        let mut paths = status.conflicted_paths.clone();
        paths.sort();
        paths.dedup();
        Self(paths)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn into_paths(self) -> Vec<String> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Status & validation reports
// ---------------------------------------------------------------------------

/// Repository and sync status returned by a status request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncInfo {
    pub current_branch: String,
    pub ahead: usize,
    pub behind: usize,
    pub changed_paths: Vec<String>,
    pub conflicted_paths: Vec<String>,
    pub merging: bool,
    pub latest_commit: Option<CommitInfo>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    /// A cycle was running when this snapshot was taken; repository fields
    /// are from the last completed request.
    pub in_flight: bool,
    /// Controller phase when the snapshot was taken. Live while a cycle runs.
    pub phase: CyclePhase,
}

impl SyncInfo {
    /// Copy the repository fields from a status query.
    pub fn apply_status(&mut self, status: RepoStatus) {
        self.current_branch = status.current_branch;
        self.ahead = status.ahead;
        self.behind = status.behind;
        self.changed_paths = status.changed_paths;
        self.conflicted_paths = status.conflicted_paths;
        self.merging = status.merging;
    }

    /// One-line summary for display.
    pub fn summary(&self) -> String {
        if !self.conflicted_paths.is_empty() {
            return format!(
                "{} conflicted file(s) on '{}'",
                self.conflicted_paths.len(),
                self.current_branch
            );
        }
        format!(
            "'{}': {} changed, {} ahead, {} behind",
            self.current_branch,
            self.changed_paths.len(),
            self.ahead,
            self.behind
        )
    }
}

/// Result of a validation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Distinct problems, in the order found.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Record a problem, ignoring duplicates.
    pub fn push(&mut self, error: impl Into<String>) {
        let error = error.into();
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
        self.valid = false;
    }

    /// Build a report from a list of problems.
    pub fn from_errors<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = Self {
            valid: true,
            errors: Vec::new(),
        };
        for e in errors {
            report.push(e);
        }
        report
    }
}
