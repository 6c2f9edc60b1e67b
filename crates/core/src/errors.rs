//! Error types for the vaultsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// TOML serialization error when saving.
    #[error("configuration serialize error: {0}")]
    SerializeError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Repository adapter errors
// ---------------------------------------------------------------------------

/// Errors raised at the repository adapter boundary.
///
/// Raw `git2` failures are classified into these variants by error code and
/// class when they leave the adapter, so callers never inspect message text.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// An operation was attempted before `ensure_repository`.
    #[error("repository has not been opened yet")]
    NotInitialized,

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The remote (or the repository behind its URL) does not exist.
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// The remote rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Transport-level failure (DNS, TCP, TLS, SSH handshake, HTTP status).
    #[error("network error: {0}")]
    Network(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// `abort_merge` was called with no merge in progress.
    #[error("no merge in progress")]
    NoMergeInProgress,

    /// A `git2` library error that fits no narrower class.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Why a pull failed fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullFailure {
    Authentication,
    RemoteMissing,
    Network,
    Other,
}

impl std::fmt::Display for PullFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication failed"),
            Self::RemoteMissing => write!(f, "remote repository not found"),
            Self::Network => write!(f, "network failure"),
            Self::Other => write!(f, "pull failed"),
        }
    }
}

impl PullFailure {
    /// Classify an adapter error raised while pulling.
    pub fn from_git_error(err: &GitError) -> Self {
        match err {
            GitError::AuthenticationFailed(_) => Self::Authentication,
            GitError::RemoteNotFound(_) => Self::RemoteMissing,
            GitError::Network(_) => Self::Network,
            _ => Self::Other,
        }
    }
}

/// Errors that end a sync cycle or an explicit repository request.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration is incomplete or malformed. Checked before the
    /// repository is touched.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    /// The repository could not be created, opened or prepared.
    #[error("repository initialization failed: {0}")]
    InitError(#[source] GitError),

    /// No usable credential for the configured authentication mode.
    #[error("no usable credentials: {0}")]
    AuthUnavailable(String),

    /// The resolved remote could not be registered as `origin`.
    #[error("failed to configure remote 'origin': {0}")]
    RemoteConfigFailed(#[source] GitError),

    /// Fatal pull failure.
    #[error("pull failed ({kind}): {source}")]
    PullError {
        kind: PullFailure,
        #[source]
        source: GitError,
    },

    /// A merge is in progress on a branch other than the configured one.
    #[error(
        "a merge is in progress on '{current_branch}' (expected '{expected_branch}'); \
         resolve or abort it first"
    )]
    MergeInProgress {
        current_branch: String,
        expected_branch: String,
    },

    /// Reading repository state (status, log) failed.
    #[error("failed to read repository state: {0}")]
    RepositoryState(#[source] GitError),

    /// Staging or committing failed.
    #[error("commit failed: {0}")]
    CommitError(#[source] GitError),

    /// Pushing failed.
    #[error("push failed: {0}")]
    PushError(#[source] GitError),

    /// Conflict resolution stopped partway; some paths may already be staged.
    #[error(
        "conflict resolution stopped partway ({} resolved, {} remaining): {source}",
        resolved.len(),
        remaining.len()
    )]
    PartialResolution {
        resolved: Vec<String>,
        remaining: Vec<String>,
        #[source]
        source: GitError,
    },

    /// The blocking task running the request panicked or was cancelled.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Whether retrying without user intervention can help.
    ///
    /// Configuration and credential errors require user correction.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid(_)
                | Self::AuthUnavailable(_)
                | Self::RemoteConfigFailed(_)
                | Self::MergeInProgress { .. }
                | Self::PartialResolution { .. }
                | Self::PullError {
                    kind: PullFailure::Authentication | PullFailure::RemoteMissing,
                    ..
                }
        )
    }
}
