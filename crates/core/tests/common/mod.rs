//! Shared helpers for the integration tests: a sample configuration and a
//! scripted in-memory [`RepositoryAdapter`].
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use vaultsync_core::config::SyncConfig;
use vaultsync_core::errors::GitError;
use vaultsync_core::git::{
    CommitInfo, ConflictSide, PullSummary, RemoteCredentials, RepoStatus, RepositoryAdapter,
};

pub const TOKEN: &str = "ghp_testtoken";

pub fn sample_config() -> SyncConfig {
    let toml_str = format!(
        r#"
[repository]
path = "/tmp/vaultsync-test-vault"
branch = "main"

[remote]
url = "https://github.com/jdoe/notes.git"

[identity]
name = "Jane Doe"
email = "jane@example.com"

[auth]
mode = "token"
token = "{TOKEN}"

[sync]
debounce_secs = 2
"#
    );
    toml::from_str(&toml_str).unwrap()
}

/// Failure the fake returns from a scripted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Auth,
    Network,
    RemoteMissing,
    Rejected,
    Other,
}

impl Failure {
    fn to_error(self) -> GitError {
        match self {
            Self::Auth => GitError::AuthenticationFailed("bad credentials".into()),
            Self::Network => GitError::Network("connection refused".into()),
            Self::RemoteMissing => GitError::RemoteNotFound("origin".into()),
            Self::Rejected => GitError::PushRejected {
                branch: "main".into(),
                detail: "non-fast-forward".into(),
            },
            Self::Other => GitError::Git2Error(git2::Error::from_str("scripted failure")),
        }
    }
}

/// Scripted repository state and a record of what the controller did.
#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<String>,
    pub identity: Option<(String, String)>,
    pub credentials: Option<RemoteCredentials>,
    pub remotes: Vec<(String, String)>,

    pub branch: String,
    pub changed: Vec<String>,
    pub conflicted: Vec<String>,
    pub merging: bool,
    pub ahead: usize,
    pub behind: usize,

    /// Remote has the configured branch.
    pub remote_branch_exists: bool,
    /// Next pull brings in commits.
    pub incoming: bool,
    /// Next pull stops with these paths unmerged.
    pub incoming_conflicts: Vec<String>,
    pub reachable: bool,

    pub ensure_failures: usize,
    pub fetch_failure: Option<Failure>,
    pub pull_failure: Option<Failure>,
    pub push_failure: Option<Failure>,
    pub checkout_side_failure_for: Option<String>,

    pub commits: Vec<String>,
    pub merge_commits: usize,
    pub pushes: usize,
    pub resolutions: Vec<(String, ConflictSide)>,
    pub staged: Vec<String>,

    /// Time spent inside `fetch`, to hold a cycle in flight.
    pub fetch_delay: Option<Duration>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            identity: None,
            credentials: None,
            remotes: Vec::new(),
            branch: "main".into(),
            changed: Vec::new(),
            conflicted: Vec::new(),
            merging: false,
            ahead: 0,
            behind: 0,
            remote_branch_exists: true,
            incoming: false,
            incoming_conflicts: Vec::new(),
            reachable: true,
            ensure_failures: 0,
            fetch_failure: None,
            pull_failure: None,
            push_failure: None,
            checkout_side_failure_for: None,
            commits: Vec::new(),
            merge_commits: 0,
            pushes: 0,
            resolutions: Vec::new(),
            staged: Vec::new(),
            fetch_delay: None,
        }
    }
}

impl FakeState {
    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn called(&self, call: &str) -> bool {
        self.count(call) > 0
    }
}

/// In-memory adapter. Clones share state, so a test keeps one clone as a
/// handle for assertions after giving the other to the controller.
#[derive(Clone, Default)]
pub struct FakeAdapter {
    state: Arc<Mutex<FakeState>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(setup: impl FnOnce(&mut FakeState)) -> Self {
        let fake = Self::new();
        setup(&mut fake.state());
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Most cycles ever observed running `fetch` at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn record(&self, call: &str) {
        self.state().calls.push(call.to_string());
    }
}

impl RepositoryAdapter for FakeAdapter {
    fn ensure_repository(&mut self) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("ensure_repository".into());
        if state.ensure_failures > 0 {
            state.ensure_failures -= 1;
            return Err(GitError::RepositoryNotFound("/tmp/vaultsync-test-vault".into()));
        }
        Ok(())
    }

    fn configure_identity(&mut self, name: &str, email: &str) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("configure_identity".into());
        state.identity = Some((name.into(), email.into()));
        Ok(())
    }

    fn configure_credentials(&mut self, credentials: RemoteCredentials) {
        let mut state = self.state();
        state.calls.push("configure_credentials".into());
        state.credentials = Some(credentials);
    }

    fn has_remote(&self, name: &str) -> Result<bool, GitError> {
        Ok(self.state().remotes.iter().any(|(n, _)| n == name))
    }

    fn remove_remote(&mut self, name: &str) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("remove_remote".into());
        state.remotes.retain(|(n, _)| n != name);
        Ok(())
    }

    fn add_remote(&mut self, name: &str, url: &str) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("add_remote".into());
        if state.remotes.iter().any(|(n, _)| n == name) {
            return Err(GitError::Git2Error(git2::Error::from_str("remote already exists")));
        }
        state.remotes.push((name.into(), url.into()));
        Ok(())
    }

    fn fetch(&mut self, branch: &str) -> Result<(), GitError> {
        let delay = {
            let mut state = self.state();
            state.calls.push("fetch".into());
            state.fetch_delay
        };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let state = self.state();
        if let Some(failure) = state.fetch_failure {
            return Err(failure.to_error());
        }
        if !state.remote_branch_exists {
            return Err(GitError::RefNotFound(format!("origin/{branch}")));
        }
        Ok(())
    }

    fn pull(&mut self, _branch: &str) -> Result<PullSummary, GitError> {
        let mut state = self.state();
        state.calls.push("pull".into());
        if let Some(failure) = state.pull_failure {
            return Err(failure.to_error());
        }
        if !state.incoming_conflicts.is_empty() {
            let paths = std::mem::take(&mut state.incoming_conflicts);
            state.conflicted = paths.clone();
            state.merging = true;
            return Ok(PullSummary::Conflicted(paths));
        }
        if std::mem::take(&mut state.incoming) {
            state.behind = 0;
            return Ok(PullSummary::FastForward);
        }
        Ok(PullSummary::UpToDate)
    }

    fn status(&self) -> Result<RepoStatus, GitError> {
        let state = self.state();
        let mut conflicted = state.conflicted.clone();
        conflicted.sort();
        Ok(RepoStatus {
            current_branch: state.branch.clone(),
            ahead: state.ahead,
            behind: state.behind,
            changed_paths: state.changed.clone(),
            conflicted_paths: conflicted,
            merging: state.merging,
        })
    }

    fn add(&mut self, paths: Option<&[String]>) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("add".into());
        match paths {
            Some(paths) => {
                state.conflicted.retain(|c| !paths.contains(c));
                state.staged.extend(paths.iter().cloned());
            }
            None => {
                let changed = state.changed.clone();
                state.staged.extend(changed);
            }
        }
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<String, GitError> {
        let mut state = self.state();
        state.calls.push("commit".into());
        state.commits.push(message.to_string());
        state.changed.clear();
        state.staged.clear();
        state.merging = false;
        state.ahead += 1;
        Ok(format!("{:040x}", state.commits.len()))
    }

    fn commit_merge(&mut self) -> Result<String, GitError> {
        let mut state = self.state();
        state.calls.push("commit_merge".into());
        if !state.merging {
            return Err(GitError::NoMergeInProgress);
        }
        if !state.conflicted.is_empty() {
            return Err(GitError::Git2Error(git2::Error::from_str(
                "cannot commit with unresolved conflicts",
            )));
        }
        state.merge_commits += 1;
        state.commits.push("Merge remote-tracking branch 'origin/main'".into());
        state.changed.clear();
        state.staged.clear();
        state.merging = false;
        state.ahead += 1;
        Ok(format!("{:040x}", state.commits.len()))
    }

    fn push(&mut self, _branch: &str) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("push".into());
        if let Some(failure) = state.push_failure {
            return Err(failure.to_error());
        }
        state.pushes += 1;
        state.ahead = 0;
        state.remote_branch_exists = true;
        Ok(())
    }

    fn checkout_branch(&mut self, branch: &str) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("checkout_branch".into());
        state.branch = branch.to_string();
        Ok(())
    }

    fn checkout_conflict_side(&mut self, path: &str, side: ConflictSide) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("checkout_conflict_side".into());
        if state.checkout_side_failure_for.as_deref() == Some(path) {
            return Err(GitError::RefNotFound(format!("{path} has no stage for {side:?}")));
        }
        state.resolutions.push((path.to_string(), side));
        Ok(())
    }

    fn abort_merge(&mut self) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push("abort_merge".into());
        if !state.merging {
            return Err(GitError::NoMergeInProgress);
        }
        state.merging = false;
        state.conflicted.clear();
        state.changed.clear();
        Ok(())
    }

    fn log(&self, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        let state = self.state();
        Ok(state
            .commits
            .iter()
            .enumerate()
            .rev()
            .take(limit)
            .map(|(i, summary)| CommitInfo {
                sha: format!("{:040x}", i + 1),
                summary: summary.lines().next().unwrap_or_default().to_string(),
                author_name: "Jane Doe".into(),
                author_email: "jane@example.com".into(),
                time: 1_700_000_000 + i as i64,
            })
            .collect())
    }

    fn list_remote_refs(&self, _url: &str) -> Result<Vec<String>, GitError> {
        self.record("list_remote_refs");
        if self.state().reachable {
            Ok(vec!["refs/heads/main".into()])
        } else {
            Err(GitError::Network("could not resolve host".into()))
        }
    }
}
