//! Authentication resolver.
//!
//! Turns the `[auth]` and `[remote]` configuration into the URL registered as
//! `origin` plus the transport credentials handed to the adapter. Key mode
//! falls back to token mode when the key is unusable and a token exists.

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::{AuthMode, SyncConfig};
use crate::errors::SyncError;
use crate::git::adapter::{RemoteCredentials, RepositoryAdapter, ORIGIN};
use crate::git::remote_url::{self, mask_credentials};

/// Outcome of credential resolution.
#[derive(Clone)]
pub struct ResolvedRemote {
    /// URL to register as `origin`. May carry an inline token.
    pub url: String,
    pub credentials: RemoteCredentials,
    /// Mode actually in effect after any fallback.
    pub mode: AuthMode,
    /// Key mode was configured but token mode is in effect.
    pub fell_back: bool,
}

impl ResolvedRemote {
    /// The URL with any inline credential masked.
    pub fn display_url(&self) -> String {
        mask_credentials(&self.url)
    }
}

impl fmt::Debug for ResolvedRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRemote")
            .field("url", &self.display_url())
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

/// Why the configured private key cannot be used, if it cannot.
pub fn key_problem(config: &SyncConfig) -> Option<String> {
    let Some(path) = config.auth.expanded_key_path() else {
        return Some("no SSH key path configured".into());
    };
    if !path.is_file() {
        return Some(format!("SSH key not found at '{}'", path.display()));
    }
    match std::fs::File::open(&path) {
        Ok(_) => None,
        Err(e) => Some(format!("SSH key at '{}' is not readable: {e}", path.display())),
    }
}

/// Credential problems for the configured mode, for validation reports.
///
/// Unlike [`resolve`], a broken key is reported even when a token fallback
/// would let syncing proceed.
pub fn credential_problems(config: &SyncConfig) -> Vec<String> {
    match config.auth.mode {
        AuthMode::SshKey => key_problem(config).into_iter().collect(),
        AuthMode::Token if config.auth.token().is_none() => {
            vec!["token authentication selected but no token is configured".into()]
        }
        AuthMode::Token => Vec::new(),
    }
}

/// Derive the remote URL and transport credentials from `config`.
pub fn resolve(config: &SyncConfig) -> Result<ResolvedRemote, SyncError> {
    let url = config.remote.url.trim();

    if config.auth.mode == AuthMode::SshKey {
        match key_problem(config) {
            None => {
                let path: PathBuf = config.auth.expanded_key_path().unwrap_or_default();
                return Ok(ResolvedRemote {
                    url: remote_url::to_ssh_url(url),
                    credentials: RemoteCredentials::SshKey {
                        path,
                        passphrase: config.auth.key_passphrase.clone().filter(|p| !p.is_empty()),
                    },
                    mode: AuthMode::SshKey,
                    fell_back: false,
                });
            }
            Some(problem) if config.auth.token().is_some() => {
                warn!(%problem, "SSH key unusable, falling back to token authentication");
                let mut resolved = resolve_token(config, url)?;
                resolved.fell_back = true;
                return Ok(resolved);
            }
            Some(problem) => {
                return Err(SyncError::AuthUnavailable(format!(
                    "{problem} and no token is configured"
                )));
            }
        }
    }

    resolve_token(config, url)
}

fn resolve_token(config: &SyncConfig, url: &str) -> Result<ResolvedRemote, SyncError> {
    let token = config.auth.token().ok_or_else(|| {
        SyncError::AuthUnavailable("token authentication selected but no token is configured".into())
    })?;

    match remote_url::embed_token(url, token, &config.remote.token_hosts) {
        Some(embedded) => Ok(ResolvedRemote {
            url: embedded,
            credentials: RemoteCredentials::Token(token.to_string()),
            mode: AuthMode::Token,
            fell_back: false,
        }),
        None => {
            // The token never leaves for hosts outside `token_hosts`.
            let plain = remote_url::to_https_url(url);
            warn!(
                url = %mask_credentials(&plain),
                "remote host not in token_hosts; token not sent"
            );
            Ok(ResolvedRemote {
                url: plain,
                credentials: RemoteCredentials::Default,
                mode: AuthMode::Token,
                fell_back: false,
            })
        }
    }
}

/// Register `resolved.url` as `origin`, replacing any existing remote of
/// that name.
pub fn register_remote<A>(adapter: &mut A, resolved: &ResolvedRemote) -> Result<(), SyncError>
where
    A: RepositoryAdapter + ?Sized,
{
    if adapter
        .has_remote(ORIGIN)
        .map_err(SyncError::RemoteConfigFailed)?
    {
        adapter
            .remove_remote(ORIGIN)
            .map_err(SyncError::RemoteConfigFailed)?;
    }
    adapter
        .add_remote(ORIGIN, &resolved.url)
        .map_err(SyncError::RemoteConfigFailed)?;
    info!(url = %resolved.display_url(), mode = %resolved.mode, "configured remote");
    Ok(())
}

/// Resolve credentials, hand them to the adapter, and register `origin`.
pub fn apply<A>(adapter: &mut A, config: &SyncConfig) -> Result<ResolvedRemote, SyncError>
where
    A: RepositoryAdapter + ?Sized,
{
    let resolved = resolve(config)?;
    adapter.configure_credentials(resolved.credentials.clone());
    register_remote(adapter, &resolved)?;
    Ok(resolved)
}
