//! Git operations for vaultsync.

pub mod adapter;
pub mod client;
pub mod remote_url;

pub use adapter::{
    CommitInfo, ConflictSide, PullSummary, RemoteCredentials, RepoStatus, RepositoryAdapter,
    ORIGIN,
};
pub use client::GitClient;
