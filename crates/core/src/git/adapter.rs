//! The repository capability contract the sync controller drives.
//!
//! [`RepositoryAdapter`] wraps primitive version-control operations. It does
//! no orchestration and no retries; every failure is returned as a
//! [`GitError`] already classified at the boundary. [`super::GitClient`] is
//! the `git2` implementation; tests substitute a scripted fake.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Name under which the resolved remote is registered.
pub const ORIGIN: &str = "origin";

/// Transport credentials handed to the adapter by the authentication resolver.
///
/// `Debug` masks secrets.
#[derive(Clone, Default)]
pub enum RemoteCredentials {
    /// Let the transport use its defaults (credential helper, SSH agent).
    #[default]
    Default,
    /// Access token, offered as `x-access-token` user/password.
    Token(String),
    /// Private key file with optional passphrase.
    SshKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Token(_) => write!(f, "Token(***)"),
            Self::SshKey { path, passphrase } => f
                .debug_struct("SshKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// How a pull changed the local branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullSummary {
    /// Nothing new on the remote.
    UpToDate,
    /// Local branch moved forward (or was created from the remote).
    FastForward,
    /// Remote and local history were merged cleanly and committed.
    Merged,
    /// The merge stopped with these paths unmerged; a merge is in progress.
    Conflicted(Vec<String>),
}

/// Snapshot of the working tree and branch state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub current_branch: String,
    /// Commits on the local branch not on the remote-tracking branch.
    pub ahead: usize,
    /// Commits on the remote-tracking branch not on the local branch.
    pub behind: usize,
    /// Modified, added, deleted and untracked paths, excluding conflicts.
    pub changed_paths: Vec<String>,
    /// Unmerged paths, sorted.
    pub conflicted_paths: Vec<String>,
    /// A merge is in progress (`MERGE_HEAD` present).
    pub merging: bool,
}

impl RepoStatus {
    pub fn is_clean(&self) -> bool {
        self.changed_paths.is_empty() && self.conflicted_paths.is_empty()
    }
}

/// Which side of a conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    /// The local branch (`--ours`).
    Ours,
    /// The incoming remote branch (`--theirs`).
    Theirs,
}

/// Summary of a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub summary: String,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
}

/// Primitive version-control operations on one local repository.
pub trait RepositoryAdapter: Send {
    /// Open the repository, creating the directory and initializing it if
    /// needed.
    fn ensure_repository(&mut self) -> Result<(), GitError>;

    fn configure_identity(&mut self, name: &str, email: &str) -> Result<(), GitError>;

    /// Credentials used by every subsequent network operation.
    fn configure_credentials(&mut self, credentials: RemoteCredentials);

    fn has_remote(&self, name: &str) -> Result<bool, GitError>;
    fn remove_remote(&mut self, name: &str) -> Result<(), GitError>;
    fn add_remote(&mut self, name: &str, url: &str) -> Result<(), GitError>;

    /// Fetch `branch` from origin into its remote-tracking ref.
    ///
    /// Returns [`GitError::RefNotFound`] if the remote has no such branch.
    fn fetch(&mut self, branch: &str) -> Result<(), GitError>;

    /// Fetch and merge origin's `branch` into the current branch without
    /// rebasing.
    fn pull(&mut self, branch: &str) -> Result<PullSummary, GitError>;

    fn status(&self) -> Result<RepoStatus, GitError>;

    /// Stage `paths`, or every change when `None`. Deletions are staged too.
    fn add(&mut self, paths: Option<&[String]>) -> Result<(), GitError>;

    /// Commit the index. Completes an in-progress merge when `MERGE_HEAD`
    /// is present. Returns the new commit id.
    fn commit(&mut self, message: &str) -> Result<String, GitError>;

    /// Complete an in-progress merge with its prepared default message.
    fn commit_merge(&mut self) -> Result<String, GitError>;

    fn push(&mut self, branch: &str) -> Result<(), GitError>;

    /// Switch to `branch`, creating it from the current commit if absent.
    fn checkout_branch(&mut self, branch: &str) -> Result<(), GitError>;

    /// Replace the working copy of a conflicted `path` with one side's
    /// content. A side that deleted the file removes it.
    fn checkout_conflict_side(&mut self, path: &str, side: ConflictSide) -> Result<(), GitError>;

    /// Discard the in-progress merge and restore `HEAD`.
    fn abort_merge(&mut self) -> Result<(), GitError>;

    /// Most recent commits on the current branch, newest first.
    fn log(&self, limit: usize) -> Result<Vec<CommitInfo>, GitError>;

    /// Reference names advertised by the remote at `url`.
    fn list_remote_refs(&self, url: &str) -> Result<Vec<String>, GitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_masks_secrets() {
        let token = RemoteCredentials::Token("ghp_secret".into());
        assert_eq!(format!("{token:?}"), "Token(***)");

        let key = RemoteCredentials::SshKey {
            path: PathBuf::from("/home/u/.ssh/id_ed25519"),
            passphrase: Some("hunter2".into()),
        };
        let dbg = format!("{key:?}");
        assert!(dbg.contains("id_ed25519"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn test_repo_status_clean() {
        let mut status = RepoStatus::default();
        assert!(status.is_clean());
        status.changed_paths.push("a.md".into());
        assert!(!status.is_clean());
    }
}
