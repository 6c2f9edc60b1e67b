//! Conflict resolution actions.
//!
//! The [`ConflictResolver`] applies one [`ResolutionStrategy`] to every
//! conflicted path, stages the result and completes the interrupted merge
//! with its prepared message.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::SyncError;
use crate::git::adapter::{ConflictSide, RepositoryAdapter};
use crate::models::ConflictSet;

/// Named resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Keep the local branch's content.
    KeepLocal,
    /// Keep the incoming remote content.
    KeepRemote,
}

impl ResolutionStrategy {
    pub fn side(self) -> ConflictSide {
        match self {
            Self::KeepLocal => ConflictSide::Ours,
            Self::KeepRemote => ConflictSide::Theirs,
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepLocal => write!(f, "keep-local"),
            Self::KeepRemote => write!(f, "keep-remote"),
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-local" | "local" | "ours" => Ok(Self::KeepLocal),
            "keep-remote" | "remote" | "theirs" => Ok(Self::KeepRemote),
            other => Err(format!(
                "unknown strategy '{other}' (expected 'keep-local' or 'keep-remote')"
            )),
        }
    }
}

/// What a resolution did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolved: Vec<String>,
    /// Merge commit id; `None` when there was nothing to resolve.
    pub commit: Option<String>,
}

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve every path in `conflicts` with `strategy` and commit the merge.
    ///
    /// An empty set is a successful no-op. A failure after the first path
    /// was touched is reported as [`SyncError::PartialResolution`].
    pub fn resolve<A>(
        adapter: &mut A,
        conflicts: &ConflictSet,
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionReport, SyncError>
    where
        A: RepositoryAdapter + ?Sized,
    {
        if conflicts.is_empty() {
            debug!("no conflicts to resolve");
            return Ok(ResolutionReport::default());
        }

        info!(count = conflicts.len(), %strategy, "resolving conflicts");
        let side = strategy.side();
        let paths = conflicts.paths();
        let mut resolved = Vec::with_capacity(paths.len());

        for (i, path) in paths.iter().enumerate() {
            let applied = adapter
                .checkout_conflict_side(path, side)
                .and_then(|()| adapter.add(Some(std::slice::from_ref(path))));
            if let Err(source) = applied {
                warn!(path = %path, error = %source, "conflict resolution stopped");
                return Err(SyncError::PartialResolution {
                    resolved,
                    remaining: paths[i..].to_vec(),
                    source,
                });
            }
            debug!(path = %path, "resolved");
            resolved.push(path.clone());
        }

        match adapter.commit_merge() {
            Ok(sha) => {
                info!(sha = %sha, "merge completed");
                Ok(ResolutionReport {
                    resolved,
                    commit: Some(sha),
                })
            }
            Err(source) => {
                warn!(error = %source, "merge commit failed after staging resolutions");
                Err(SyncError::PartialResolution {
                    resolved,
                    remaining: Vec::new(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!(
            "keep-local".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::KeepLocal
        );
        assert_eq!(
            "Keep-Remote".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::KeepRemote
        );
        assert!("both".parse::<ResolutionStrategy>().is_err());
        assert_eq!(ResolutionStrategy::KeepRemote.to_string(), "keep-remote");
    }

    #[test]
    fn test_strategy_side() {
        assert_eq!(ResolutionStrategy::KeepLocal.side(), ConflictSide::Ours);
        assert_eq!(ResolutionStrategy::KeepRemote.side(), ConflictSide::Theirs);
    }

    #[test]
    fn test_strategy_serde() {
        let json = serde_json::to_string(&ResolutionStrategy::KeepLocal).unwrap();
        assert_eq!(json, "\"keep-local\"");
    }
}
