//! Conflict resolution and merge abort tests.

mod common;

use common::{sample_config, FakeAdapter};

use vaultsync_core::conflict::{ConflictResolver, ResolutionStrategy};
use vaultsync_core::errors::{GitError, SyncError};
use vaultsync_core::git::ConflictSide;
use vaultsync_core::models::{ConflictSet, OutcomeKind, TriggerSource};
use vaultsync_core::sync_engine::SyncController;

/// A controller whose first cycle stopped on `paths`.
fn conflicted(paths: &[&str]) -> (FakeAdapter, SyncController<FakeAdapter>) {
    let fake = FakeAdapter::with(|s| {
        s.incoming_conflicts = paths.iter().map(|p| p.to_string()).collect();
    });
    let mut sync = SyncController::new(sample_config(), fake.clone());
    let outcome = sync.run_cycle(TriggerSource::Manual, None).unwrap();
    assert!(outcome.conflict);
    (fake, sync)
}

#[test]
fn test_keep_local_resolves_every_path_and_commits_merge() {
    let (fake, mut sync) = conflicted(&["b.md", "a.md"]);

    let outcome = sync.resolve_conflicts(ResolutionStrategy::KeepLocal).unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Resolved);
    assert_eq!(outcome.changed_files, vec!["a.md", "b.md"]);
    assert!(outcome.commit.is_some());

    let state = fake.state();
    assert!(state.conflicted.is_empty());
    assert!(!state.merging);
    assert_eq!(state.merge_commits, 1);
    assert_eq!(
        state.resolutions,
        vec![
            ("a.md".to_string(), ConflictSide::Ours),
            ("b.md".to_string(), ConflictSide::Ours),
        ]
    );
    // Resolution does not push.
    assert_eq!(state.pushes, 0);
}

#[test]
fn test_keep_remote_then_next_cycle_pushes_merge() {
    let (fake, mut sync) = conflicted(&["a.md"]);

    sync.resolve_conflicts(ResolutionStrategy::KeepRemote).unwrap();
    assert_eq!(fake.state().resolutions[0].1, ConflictSide::Theirs);

    let outcome = sync.run_cycle(TriggerSource::Manual, None).unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Pushed);
    assert_eq!(fake.state().pushes, 1);
}

#[test]
fn test_resolution_failure_reports_remaining_paths() {
    let (fake, mut sync) = conflicted(&["a.md", "b.md", "c.md"]);
    fake.state().checkout_side_failure_for = Some("b.md".into());

    let err = sync
        .resolve_conflicts(ResolutionStrategy::KeepRemote)
        .unwrap_err();
    match err {
        SyncError::PartialResolution {
            resolved,
            remaining,
            ..
        } => {
            assert_eq!(resolved, vec!["a.md"]);
            assert_eq!(remaining, vec!["b.md", "c.md"]);
        }
        other => panic!("expected PartialResolution, got {other:?}"),
    }

    let state = fake.state();
    assert!(state.merging);
    assert_eq!(state.conflicted, vec!["b.md", "c.md"]);
    assert_eq!(state.merge_commits, 0);
}

#[test]
fn test_resolving_without_conflicts_is_a_noop() {
    let fake = FakeAdapter::new();
    let mut sync = SyncController::new(sample_config(), fake.clone());

    let outcome = sync.resolve_conflicts(ResolutionStrategy::KeepLocal).unwrap();
    assert_eq!(outcome.kind, OutcomeKind::NothingToSync);
    assert!(outcome.success);

    let state = fake.state();
    assert!(!state.called("checkout_conflict_side"));
    assert!(!state.called("commit_merge"));
}

#[test]
fn test_resolver_with_empty_set_touches_nothing() {
    let mut fake = FakeAdapter::new();

    let report =
        ConflictResolver::resolve(&mut fake, &ConflictSet::default(), ResolutionStrategy::KeepRemote)
            .unwrap();
    assert!(report.resolved.is_empty());
    assert!(report.commit.is_none());
    assert!(fake.state().calls.is_empty());
}

#[test]
fn test_abort_merge_restores_clean_state() {
    let (fake, mut sync) = conflicted(&["a.md"]);

    let outcome = sync.abort_merge().unwrap();
    assert_eq!(outcome.kind, OutcomeKind::MergeAborted);

    let info = sync.status().unwrap();
    assert!(!info.merging);
    assert!(info.conflicted_paths.is_empty());
    assert!(fake.state().called("abort_merge"));
}

#[test]
fn test_abort_without_merge_fails() {
    let fake = FakeAdapter::new();
    let mut sync = SyncController::new(sample_config(), fake);

    let err = sync.abort_merge().unwrap_err();
    assert!(matches!(
        err,
        SyncError::RepositoryState(GitError::NoMergeInProgress)
    ));
}

/// A paused merge in a vault whose credentials are unusable.
fn conflicted_without_credentials(paths: &[&str]) -> (FakeAdapter, SyncController<FakeAdapter>) {
    let fake = FakeAdapter::with(|s| {
        s.conflicted = paths.iter().map(|p| p.to_string()).collect();
        s.merging = true;
    });
    let mut config = sample_config();
    config.auth.token = None;
    (fake.clone(), SyncController::new(config, fake))
}

#[test]
fn test_resolve_needs_no_credentials() {
    let (fake, mut sync) = conflicted_without_credentials(&["a.md"]);

    let outcome = sync.resolve_conflicts(ResolutionStrategy::KeepLocal).unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Resolved);

    let state = fake.state();
    assert_eq!(state.merge_commits, 1);
    assert!(!state.called("configure_credentials"));
    assert!(!state.called("add_remote"));
    assert!(!state.called("checkout_branch"));
    assert!(!sync.is_initialized());
}

#[test]
fn test_abort_needs_no_credentials() {
    let (fake, mut sync) = conflicted_without_credentials(&["a.md"]);

    let outcome = sync.abort_merge().unwrap();
    assert_eq!(outcome.kind, OutcomeKind::MergeAborted);

    let state = fake.state();
    assert!(state.called("abort_merge"));
    assert!(!state.called("configure_credentials"));
    assert!(!state.called("add_remote"));
}
