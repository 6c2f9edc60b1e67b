//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, CredentialType, Direction, ErrorClass, ErrorCode, FetchOptions, Index,
    IndexAddOption, Oid, PushOptions, Remote, RemoteCallbacks, Repository, RepositoryState,
    ResetType, Sort, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;
use crate::git::adapter::{
    CommitInfo, ConflictSide, PullSummary, RemoteCredentials, RepoStatus, RepositoryAdapter,
    ORIGIN,
};
use crate::git::remote_url::mask_credentials;

/// Credential callback invocations allowed per network operation before the
/// transport is told authentication failed.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// [`RepositoryAdapter`] backed by a `git2::Repository`.
///
/// The repository is opened lazily by [`RepositoryAdapter::ensure_repository`].
pub struct GitClient {
    repo: Option<Repository>,
    repo_path: PathBuf,
    credentials: RemoteCredentials,
}

impl GitClient {
    /// Create a client for the working tree at `repo_path`. Nothing is
    /// opened until `ensure_repository` is called.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo: None,
            repo_path: repo_path.as_ref().to_path_buf(),
            credentials: RemoteCredentials::Default,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn repo(&self) -> Result<&Repository, GitError> {
        self.repo.as_ref().ok_or(GitError::NotInitialized)
    }

    fn remote_callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let credentials = self.credentials.clone();
        let mut attempts = 0u32;
        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Callback,
                    "credentials rejected by remote",
                ));
            }
            let username = username_from_url.unwrap_or("git");
            match &credentials {
                RemoteCredentials::Token(token)
                    if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) =>
                {
                    Cred::userpass_plaintext("x-access-token", token)
                }
                RemoteCredentials::SshKey { path, passphrase }
                    if allowed.contains(CredentialType::SSH_KEY) =>
                {
                    Cred::ssh_key(username, None, path, passphrase.as_deref())
                }
                _ if allowed.contains(CredentialType::SSH_KEY) => {
                    Cred::ssh_key_from_agent(username)
                }
                _ if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                    let config = git2::Config::open_default()?;
                    Cred::credential_helper(&config, url, username_from_url)
                }
                _ => Cred::default(),
            }
        });
        callbacks
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(self.remote_callbacks());
        opts
    }

    fn find_origin(&self) -> Result<Remote<'_>, GitError> {
        self.repo()?.find_remote(ORIGIN).map_err(|e| match e.code() {
            ErrorCode::NotFound => GitError::RemoteNotFound(ORIGIN.into()),
            _ => GitError::Git2Error(e),
        })
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Classify a failure from an operation that talked to the remote.
fn remote_error(err: git2::Error) -> GitError {
    let detail = mask_credentials(err.message());
    match (err.code(), err.class()) {
        (ErrorCode::Auth | ErrorCode::Certificate, _) => GitError::AuthenticationFailed(detail),
        (ErrorCode::NotFound, _) => GitError::RemoteNotFound(detail),
        (
            _,
            ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl | ErrorClass::Os,
        ) => GitError::Network(detail),
        _ => GitError::Git2Error(err),
    }
}

/// Classify a failure from a local ref lookup.
fn ref_error(err: git2::Error, name: &str) -> GitError {
    match err.code() {
        ErrorCode::NotFound => GitError::RefNotFound(name.to_string()),
        _ => GitError::Git2Error(err),
    }
}

fn remote_tracking_ref(branch: &str) -> String {
    format!("refs/remotes/{ORIGIN}/{branch}")
}

fn local_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

// ---------------------------------------------------------------------------
// Helpers over an open repository
// ---------------------------------------------------------------------------

fn current_branch(repo: &Repository) -> Result<String, GitError> {
    match repo.head() {
        Ok(head) => Ok(head.shorthand().unwrap_or("HEAD").to_string()),
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .map(|t| t.trim_start_matches("refs/heads/").to_string())
                .unwrap_or_default())
        }
        Err(e) => Err(e.into()),
    }
}

fn head_oid(repo: &Repository) -> Result<Option<Oid>, GitError> {
    match repo.head() {
        Ok(head) => Ok(head.target()),
        Err(e) if e.code() == ErrorCode::UnbornBranch => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn conflicted_paths(index: &Index) -> Result<Vec<String>, GitError> {
    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        if let Some(entry) = entry {
            paths.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Write the index as a commit on `HEAD`, adding `MERGE_HEAD` as a second
/// parent when a merge is in progress.
fn commit_index(repo: &Repository, message: &str) -> Result<Oid, GitError> {
    let mut index = repo.index()?;
    if index.has_conflicts() {
        return Err(GitError::Git2Error(git2::Error::new(
            ErrorCode::Unmerged,
            ErrorClass::Index,
            "cannot commit with unresolved conflicts",
        )));
    }
    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;
    let signature = repo.signature()?;

    let mut parents = Vec::new();
    if let Some(oid) = head_oid(repo)? {
        parents.push(repo.find_commit(oid)?);
    }
    let merging = repo.state() == RepositoryState::Merge;
    if merging {
        let merge_head = repo.refname_to_id("MERGE_HEAD")?;
        parents.push(repo.find_commit(merge_head)?);
    }
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parent_refs,
    )?;
    if merging {
        repo.cleanup_state()?;
    }
    info!(sha = %oid, parents = parent_refs.len(), "created commit");
    Ok(oid)
}

/// The prepared merge message with comment lines removed.
fn merge_message(repo: &Repository) -> Option<String> {
    let raw = repo.message().ok()?;
    let message: Vec<&str> = raw.lines().filter(|l| !l.starts_with('#')).collect();
    let message = message.join("\n").trim().to_string();
    (!message.is_empty()).then_some(message)
}

// ---------------------------------------------------------------------------
// RepositoryAdapter
// ---------------------------------------------------------------------------

impl RepositoryAdapter for GitClient {
    fn ensure_repository(&mut self) -> Result<(), GitError> {
        if self.repo.is_some() {
            return Ok(());
        }
        let path = &self.repo_path;
        std::fs::create_dir_all(path)?;
        let repo = match Repository::open(path) {
            Ok(repo) => {
                info!(path = %path.display(), "opened git repository");
                repo
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                info!(path = %path.display(), "initializing git repository");
                Repository::init(path)?
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open repository");
                return Err(GitError::RepositoryNotFound(path.display().to_string()));
            }
        };
        if repo.is_bare() {
            return Err(GitError::RepositoryNotFound(path.display().to_string()));
        }
        self.repo = Some(repo);
        Ok(())
    }

    fn configure_identity(&mut self, name: &str, email: &str) -> Result<(), GitError> {
        let mut config = self.repo()?.config()?;
        config.set_str("user.name", name)?;
        config.set_str("user.email", email)?;
        debug!(name, "configured committer identity");
        Ok(())
    }

    fn configure_credentials(&mut self, credentials: RemoteCredentials) {
        debug!(?credentials, "configured transport credentials");
        self.credentials = credentials;
    }

    fn has_remote(&self, name: &str) -> Result<bool, GitError> {
        match self.repo()?.find_remote(name) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_remote(&mut self, name: &str) -> Result<(), GitError> {
        self.repo()?.remote_delete(name)?;
        debug!(name, "removed remote");
        Ok(())
    }

    fn add_remote(&mut self, name: &str, url: &str) -> Result<(), GitError> {
        self.repo()?.remote(name, url)?;
        debug!(name, url = %mask_credentials(url), "added remote");
        Ok(())
    }

    #[instrument(skip(self))]
    fn fetch(&mut self, branch: &str) -> Result<(), GitError> {
        let tracking = remote_tracking_ref(branch);
        let refspec = format!("+{}:{}", local_ref(branch), tracking);
        let mut remote = self.find_origin()?;
        remote
            .fetch(&[refspec.as_str()], Some(&mut self.fetch_options()), None)
            .map_err(remote_error)?;

        // libgit2 ignores refspecs whose source is absent on the remote.
        self.repo()?
            .find_reference(&tracking)
            .map_err(|e| ref_error(e, &tracking))?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn pull(&mut self, branch: &str) -> Result<PullSummary, GitError> {
        self.fetch(branch)?;
        let repo = self.repo()?;
        let tracking = remote_tracking_ref(branch);
        let reference = repo
            .find_reference(&tracking)
            .map_err(|e| ref_error(e, &tracking))?;
        let incoming = repo.reference_to_annotated_commit(&reference)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;
        let branch_ref = local_ref(branch);

        if analysis.is_up_to_date() {
            debug!("already up to date");
            return Ok(PullSummary::UpToDate);
        }

        if analysis.is_unborn() {
            repo.reference(&branch_ref, incoming.id(), true, "pull: initial")?;
            repo.set_head(&branch_ref)?;
            repo.checkout_head(Some(CheckoutBuilder::new().safe()))?;
            info!(target_sha = %incoming.id(), "initialized branch from remote");
            return Ok(PullSummary::FastForward);
        }

        if analysis.is_fast_forward() {
            let target = repo.find_object(incoming.id(), None)?;
            repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
            repo.find_reference(&branch_ref)
                .map_err(|e| ref_error(e, &branch_ref))?
                .set_target(incoming.id(), "pull: fast-forward")?;
            repo.set_head(&branch_ref)?;
            info!(target_sha = %incoming.id(), "fast-forwarded");
            return Ok(PullSummary::FastForward);
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);
        repo.merge(&[&incoming], None, Some(&mut checkout))?;

        let index = repo.index()?;
        if index.has_conflicts() {
            let paths = conflicted_paths(&index)?;
            warn!(count = paths.len(), "merge stopped with conflicts");
            return Ok(PullSummary::Conflicted(paths));
        }

        let message = merge_message(repo)
            .unwrap_or_else(|| format!("Merge remote-tracking branch '{ORIGIN}/{branch}'"));
        commit_index(repo, &message)?;
        info!("merged remote changes");
        Ok(PullSummary::Merged)
    }

    fn status(&self) -> Result<RepoStatus, GitError> {
        let repo = self.repo()?;
        let current_branch = current_branch(repo)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let mut changed_paths = Vec::new();
        let mut conflicted = Vec::new();
        for entry in repo.statuses(Some(&mut opts))?.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let status = entry.status();
            if status.is_conflicted() {
                conflicted.push(path.to_string());
            } else if !status.is_ignored() && status != git2::Status::CURRENT {
                changed_paths.push(path.to_string());
            }
        }
        conflicted.sort();
        conflicted.dedup();

        let (ahead, behind) = match head_oid(repo)? {
            None => (0, 0),
            Some(local) => match repo.refname_to_id(&remote_tracking_ref(&current_branch)) {
                Ok(upstream) => repo.graph_ahead_behind(local, upstream)?,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    let mut walk = repo.revwalk()?;
                    walk.push(local)?;
                    (walk.count(), 0)
                }
                Err(e) => return Err(e.into()),
            },
        };

        Ok(RepoStatus {
            current_branch,
            ahead,
            behind,
            changed_paths,
            conflicted_paths: conflicted,
            merging: repo.state() == RepositoryState::Merge,
        })
    }

    fn add(&mut self, paths: Option<&[String]>) -> Result<(), GitError> {
        let specs: Vec<&str> = match paths {
            Some(paths) => paths.iter().map(String::as_str).collect(),
            None => vec!["*"],
        };
        let mut index = self.repo()?.index()?;
        index.add_all(specs.iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(specs.iter(), None)?;
        index.write()?;
        debug!(count = specs.len(), "staged changes");
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<String, GitError> {
        commit_index(self.repo()?, message).map(|oid| oid.to_string())
    }

    fn commit_merge(&mut self) -> Result<String, GitError> {
        let repo = self.repo()?;
        if repo.state() != RepositoryState::Merge {
            return Err(GitError::NoMergeInProgress);
        }
        let message = merge_message(repo)
            .unwrap_or_else(|| format!("Merge remote-tracking branch '{ORIGIN}'"));
        commit_index(repo, &message).map(|oid| oid.to_string())
    }

    #[instrument(skip(self))]
    fn push(&mut self, branch: &str) -> Result<(), GitError> {
        let mut callbacks = self.remote_callbacks();
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = push_error.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *push_error_clone.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);

        let refspec = format!("{0}:{0}", local_ref(branch));
        let mut remote = self.find_origin()?;
        remote
            .push(&[refspec.as_str()], Some(&mut push_opts))
            .map_err(|e| match e.code() {
                ErrorCode::NotFastForward => GitError::PushRejected {
                    branch: branch.to_string(),
                    detail: e.message().to_string(),
                },
                _ => remote_error(e),
            })?;

        if let Some(detail) = push_error.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }

        // Keep the remote-tracking ref in step so ahead/behind is accurate.
        let repo = self.repo()?;
        if let Ok(oid) = repo.refname_to_id(&local_ref(branch)) {
            repo.reference(&remote_tracking_ref(branch), oid, true, "push")?;
        }
        info!("push completed");
        Ok(())
    }

    fn checkout_branch(&mut self, branch: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let branch_ref = local_ref(branch);

        let Some(head) = head_oid(repo)? else {
            // Unborn: point HEAD at the branch; the first commit creates it.
            repo.set_head(&branch_ref)?;
            debug!(branch, "set unborn HEAD");
            return Ok(());
        };

        if current_branch(repo)? == branch {
            return Ok(());
        }
        if repo.find_branch(branch, BranchType::Local).is_err() {
            let commit = repo.find_commit(head)?;
            repo.branch(branch, &commit, false)?;
            info!(branch, "created branch");
        }
        repo.set_head(&branch_ref)?;
        repo.checkout_head(Some(CheckoutBuilder::new().safe()))?;
        info!(branch, "checked out branch");
        Ok(())
    }

    fn checkout_conflict_side(&mut self, path: &str, side: ConflictSide) -> Result<(), GitError> {
        let repo = self.repo()?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::RepositoryNotFound(self.repo_path.display().to_string()))?;
        let index = repo.index()?;

        let mut chosen = None;
        let mut found = false;
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let matches = [&conflict.ancestor, &conflict.our, &conflict.their]
                .into_iter()
                .flatten()
                .any(|e| e.path == path.as_bytes());
            if matches {
                found = true;
                chosen = match side {
                    ConflictSide::Ours => conflict.our,
                    ConflictSide::Theirs => conflict.their,
                };
                break;
            }
        }
        if !found {
            return Err(GitError::Git2Error(git2::Error::new(
                ErrorCode::NotFound,
                ErrorClass::Index,
                format!("'{path}' is not in conflict"),
            )));
        }

        let target = workdir.join(path);
        match chosen {
            Some(entry) => {
                let blob = repo.find_blob(entry.id)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, blob.content())?;
            }
            None => {
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
            }
        }
        debug!(path, ?side, "checked out conflict side");
        Ok(())
    }

    fn abort_merge(&mut self) -> Result<(), GitError> {
        let repo = self.repo()?;
        if repo.state() != RepositoryState::Merge {
            return Err(GitError::NoMergeInProgress);
        }
        let head = repo.head()?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;
        repo.cleanup_state()?;
        info!(sha = %head.id(), "merge aborted");
        Ok(())
    }

    fn log(&self, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        let repo = self.repo()?;
        let Some(head) = head_oid(repo)? else {
            return Ok(Vec::new());
        };
        let mut revwalk = repo.revwalk()?;
        revwalk.push(head)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk.take(limit) {
            let commit = repo.find_commit(oid?)?;
            commits.push(CommitInfo {
                sha: commit.id().to_string(),
                summary: commit.summary().unwrap_or("").to_string(),
                author_name: commit.author().name().unwrap_or("").to_string(),
                author_email: commit.author().email().unwrap_or("").to_string(),
                time: commit.time().seconds(),
            });
        }
        Ok(commits)
    }

    #[instrument(skip(self, url), fields(url = %mask_credentials(url)))]
    fn list_remote_refs(&self, url: &str) -> Result<Vec<String>, GitError> {
        let opened;
        let repo = match &self.repo {
            Some(repo) => Some(repo),
            None => {
                opened = Repository::open(&self.repo_path).ok();
                opened.as_ref()
            }
        };
        let mut remote = match repo {
            Some(repo) => repo.remote_anonymous(url),
            None => Remote::create_detached(url),
        }
        .map_err(remote_error)?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(self.remote_callbacks()), None)
            .map_err(remote_error)?;

        // `list()` is unsound on an empty advertisement, and the default
        // branch lookup needs a repository to fall back on. Without a local
        // repository the successful connect is the whole answer.
        if repo.is_none() {
            debug!("remote reachable, no local repository to list refs with");
            return Ok(Vec::new());
        }
        match connection.default_branch() {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("remote reachable, no HEAD advertised");
                return Ok(Vec::new());
            }
            Err(e) => return Err(remote_error(e)),
        }
        let refs = connection
            .list()
            .map_err(remote_error)?
            .iter()
            .map(|head| head.name().to_string())
            .collect::<Vec<_>>();
        debug!(count = refs.len(), "listed remote refs");
        Ok(refs)
    }
}
