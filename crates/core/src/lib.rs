//! vaultsync core library.
//!
//! This crate keeps a local notes vault in sync with a remote git
//! repository: configuration, credential resolution, the repository adapter,
//! the sync state machine, conflict resolution, and the trigger coordinator
//! that decides when a cycle runs.

pub mod auth;
pub mod commit_format;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod errors;
pub mod git;
pub mod models;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::SyncConfig;
pub use conflict::ResolutionStrategy;
pub use coordinator::{TriggerCoordinator, TriggerResponse};
pub use errors::{CoreError, SyncError};
pub use git::{GitClient, RepositoryAdapter};
pub use models::{SyncInfo, SyncOutcome, TriggerSource, ValidationReport};
pub use sync_engine::SyncController;
