//! Configuration for vaultsync.
//!
//! A single TOML file describes the local vault, the remote it mirrors, the
//! committer identity, how to authenticate and when to sync. The file is
//! loaded once per repository initialization; a changed [`SyncConfig::fingerprint`]
//! tells the controller it must re-initialize.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete configuration for one synchronized vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local working tree settings.
    pub repository: RepositoryConfig,

    /// Remote repository settings.
    pub remote: RemoteConfig,

    /// Committer identity.
    pub identity: IdentityConfig,

    /// How to authenticate against the remote.
    #[serde(default)]
    pub auth: AuthConfig,

    /// When and how to sync.
    #[serde(default)]
    pub sync: SyncOptions,

    /// Log level and data directory.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Local working tree settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Root of the local file tree. Created and initialized if absent.
    pub path: PathBuf,

    /// Branch to keep in sync (default `main`).
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl RepositoryConfig {
    /// `path` with a leading `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path.to_string_lossy())
    }
}

fn default_branch() -> String {
    "main".into()
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Remote repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Clone URL, HTTPS (`https://host/owner/repo.git`) or SCP-style
    /// (`git@host:owner/repo.git`).
    pub url: String,

    /// Hosts whose HTTPS URLs may carry an inline token. Subdomains match.
    #[serde(default = "default_token_hosts")]
    pub token_hosts: Vec<String>,
}

fn default_token_hosts() -> Vec<String> {
    vec![
        "github.com".into(),
        "gitlab.com".into(),
        "bitbucket.org".into(),
    ]
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Author/committer identity written to the repository config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Personal access token embedded in an HTTPS URL.
    Token,
    /// SSH private key file.
    SshKey,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::SshKey => write!(f, "ssh-key"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token" => Ok(Self::Token),
            "ssh-key" | "ssh" => Ok(Self::SshKey),
            other => Err(ConfigError::InvalidValue {
                field: "auth.mode".into(),
                detail: format!("unknown auth mode '{other}' (expected 'token' or 'ssh-key')"),
            }),
        }
    }
}

/// Credentials for the remote.
///
/// `Debug` masks the token and passphrase.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,

    /// Inline token. Prefer `token_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the token; read by `resolve_env_vars`
    /// when `token` is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Private key path. A leading `~` expands to the home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Token
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: None,
            token_env: None,
            key_path: None,
            key_passphrase: None,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("token_env", &self.token_env)
            .field("key_path", &self.key_path)
            .field("key_passphrase", &self.key_passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AuthConfig {
    /// The configured token, if non-empty.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// The configured key path with `~` expanded, if non-empty.
    pub fn expanded_key_path(&self) -> Option<PathBuf> {
        self.key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
    }
}

// ---------------------------------------------------------------------------
// Sync options
// ---------------------------------------------------------------------------

/// When and how sync cycles run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Run a cycle when the host starts.
    #[serde(default)]
    pub auto_sync_on_open: bool,

    /// Run a (debounced) cycle after each file save.
    #[serde(default)]
    pub auto_sync_on_save: bool,

    /// Commit message template. Placeholders: `{date}`, `{files}`.
    #[serde(default = "default_commit_template")]
    pub commit_template: String,

    /// `chrono` format string used for `{date}`.
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Minutes between background cycles. 0 disables the background timer.
    #[serde(default)]
    pub background_interval_minutes: u64,

    /// Quiescence window for on-save triggers, in seconds.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

fn default_commit_template() -> String {
    "vault sync: {date}{files}".into()
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S".into()
}

fn default_debounce_secs() -> u64 {
    2
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            auto_sync_on_open: false,
            auto_sync_on_save: false,
            commit_template: default_commit_template(),
            date_format: default_date_format(),
            background_interval_minutes: 0,
            debounce_secs: default_debounce_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging settings for the host binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for log files. Defaults to the platform data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vaultsync"))
        .unwrap_or_else(|| PathBuf::from(".vaultsync"))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading, saving & validation
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// Default config file location (`<config_dir>/vaultsync/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vaultsync")
            .join("config.toml")
    }

    /// Load a [`SyncConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Write the configuration to a TOML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Fill `auth.token` from `auth.token_env` when no inline token is set.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if self.auth.token().is_some() {
            return Ok(());
        }
        if let Some(env_name) = self.auth.token_env.as_deref().filter(|n| !n.is_empty()) {
            self.auth.token = resolve_optional_env(env_name, "auth.token_env");
        }
        Ok(())
    }

    /// Every structural problem with this configuration, in a stable order.
    ///
    /// Filesystem checks (key readability) belong to the authentication
    /// resolver and are not performed here.
    pub fn validation_errors(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, detail: &str| {
            errors.push(ConfigError::InvalidValue {
                field: field.into(),
                detail: detail.into(),
            })
        };

        let url = self.remote.url.trim();
        if url.is_empty() {
            invalid("remote.url", "remote URL must not be empty");
        } else if url.ends_with('/') {
            invalid("remote.url", "remote URL must not end with '/'");
        } else if crate::git::remote_url::parse_remote_url(url).is_none() {
            invalid(
                "remote.url",
                "remote URL must be an https:// or git@host:owner/repo URL",
            );
        }
        if self.repository.path.as_os_str().is_empty() {
            invalid("repository.path", "repository path must not be empty");
        }
        if self.repository.branch.trim().is_empty() {
            invalid("repository.branch", "branch must not be empty");
        }
        if self.identity.name.trim().is_empty() {
            invalid("identity.name", "committer name must not be empty");
        }
        if self.identity.email.trim().is_empty() {
            invalid("identity.email", "committer email must not be empty");
        }
        match self.auth.mode {
            AuthMode::Token if self.auth.token().is_none() => {
                invalid("auth.token", "token mode requires a token (or token_env)");
            }
            AuthMode::SshKey if self.auth.expanded_key_path().is_none() => {
                invalid("auth.key_path", "ssh-key mode requires a key path");
            }
            _ => {}
        }
        if chrono::format::StrftimeItems::new(&self.sync.date_format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            invalid("sync.date_format", "date format is not a valid strftime string");
        }
        if self.sync.debounce_secs == 0 {
            invalid("sync.debounce_secs", "debounce window must be > 0");
        }

        errors
    }

    /// Validate the parts of the config the sync cycle cannot run without.
    ///
    /// Credential completeness is left to the authentication resolver, which
    /// may fall back from key to token mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self
            .validation_errors()
            .into_iter()
            .find(|e| !matches!(e, ConfigError::InvalidValue { field, .. } if field.starts_with("auth.")))
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Validate only what purely local repository operations need: the
    /// working tree and the committer identity.
    pub fn validate_local(&self) -> Result<(), ConfigError> {
        match self.validation_errors().into_iter().find(|e| {
            matches!(e, ConfigError::InvalidValue { field, .. }
                if field.starts_with("repository.") || field.starts_with("identity."))
        }) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Hash of every field that affects repository initialization.
    ///
    /// Sync options and logging are excluded; changing them does not require
    /// re-opening the repository.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.repository.path.hash(&mut hasher);
        self.repository.branch.hash(&mut hasher);
        self.remote.url.hash(&mut hasher);
        self.remote.token_hosts.hash(&mut hasher);
        self.identity.name.hash(&mut hasher);
        self.identity.email.hash(&mut hasher);
        self.auth.mode.hash(&mut hasher);
        self.auth.token.hash(&mut hasher);
        self.auth.key_path.hash(&mut hasher);
        self.auth.key_passphrase.hash(&mut hasher);
        hasher.finish()
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# vaultsync configuration

[repository]
path = "~/Notes"
branch = "main"

[remote]
url = "https://github.com/yourname/notes.git"
# token_hosts = ["github.com", "gitlab.com", "bitbucket.org"]

[identity]
name = "Your Name"
email = "you@example.com"

[auth]
mode = "token"            # "token" or "ssh-key"
token_env = "VAULTSYNC_TOKEN"
# key_path = "~/.ssh/id_ed25519"
# key_passphrase = ""

[sync]
auto_sync_on_open = true
auto_sync_on_save = false
commit_template = "vault sync: {date}{files}"
date_format = "%Y-%m-%d %H:%M:%S"
background_interval_minutes = 10   # 0 = disabled
debounce_secs = 2

[logging]
log_level = "info"
# data_dir = "~/.local/share/vaultsync"  # auto-detected
"#
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Try to read an environment variable by name.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[repository]
path = "/tmp/vault"
branch = "main"

[remote]
url = "https://github.com/jdoe/notes.git"

[identity]
name = "John Doe"
email = "jdoe@example.com"

[auth]
mode = "token"
token = "ghp_secret"

[sync]
auto_sync_on_save = true
commit_template = "[Sync] {date}{files}"
background_interval_minutes = 15

[logging]
log_level = "debug"
data_dir = "/tmp/vaultsync-data"
"#
    }

    fn sample() -> SyncConfig {
        toml::from_str(sample_toml()).expect("failed to parse toml")
    }

    #[test]
    fn test_parse_full_config() {
        let config = sample();
        assert_eq!(config.repository.path, PathBuf::from("/tmp/vault"));
        assert_eq!(config.remote.url, "https://github.com/jdoe/notes.git");
        assert_eq!(config.auth.mode, AuthMode::Token);
        assert_eq!(config.auth.token(), Some("ghp_secret"));
        assert!(config.sync.auto_sync_on_save);
        assert!(!config.sync.auto_sync_on_open);
        assert_eq!(config.sync.background_interval_minutes, 15);
        assert_eq!(config.sync.debounce_secs, 2);
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[repository]
path = "/tmp/vault"
[remote]
url = "git@github.com:jdoe/notes.git"
[identity]
name = "J"
email = "j@example.com"
"#;
        let config: SyncConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.auth.mode, AuthMode::Token);
        assert_eq!(config.remote.token_hosts.len(), 3);
        assert_eq!(config.sync.commit_template, "vault sync: {date}{files}");
        assert_eq!(config.sync.background_interval_minutes, 0);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_auth_mode_kebab_case() {
        let toml_str = sample_toml().replace(r#"mode = "token""#, r#"mode = "ssh-key""#);
        let config: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.auth.mode, AuthMode::SshKey);
        assert_eq!("ssh-key".parse::<AuthMode>().unwrap(), AuthMode::SshKey);
        assert!("password".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_debug_masks_secrets() {
        let mut config = sample();
        config.auth.key_passphrase = Some("hunter2".into());
        let dbg = format!("{:?}", config);
        assert!(!dbg.contains("ghp_secret"));
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn test_load_and_save_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = sample();
        config.save_to_file(&path).unwrap();

        let loaded = SyncConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.remote.url, config.remote.url);
        assert_eq!(loaded.fingerprint(), config.fingerprint());
    }

    #[test]
    fn test_file_not_found() {
        let result = SyncConfig::load_from_file("/nonexistent/vaultsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config = sample();
        config.remote.url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "remote.url"
        ));
    }

    #[test]
    fn test_validate_rejects_trailing_slash() {
        let mut config = sample();
        config.remote.url = "https://github.com/jdoe/notes/".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "remote.url"
        ));
    }

    #[test]
    fn test_validate_ignores_missing_token() {
        let mut config = sample();
        config.auth.token = None;
        assert!(config.validate().is_ok());
        let errors = config.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("auth.token"));
    }

    #[test]
    fn test_validation_errors_are_ordered() {
        let mut config = sample();
        config.remote.url = String::new();
        config.identity.name = String::new();
        config.identity.email = " ".into();
        let fields: Vec<String> = config
            .validation_errors()
            .into_iter()
            .map(|e| match e {
                ConfigError::InvalidValue { field, .. } => field,
                other => other.to_string(),
            })
            .collect();
        assert_eq!(fields, vec!["remote.url", "identity.name", "identity.email"]);
    }

    #[test]
    fn test_fingerprint_ignores_sync_options() {
        let config = sample();
        let mut changed = config.clone();
        changed.sync.debounce_secs = 10;
        assert_eq!(config.fingerprint(), changed.fingerprint());

        changed.remote.url = "https://github.com/jdoe/other.git".into();
        assert_ne!(config.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn test_resolve_token_env() {
        let mut config = sample();
        config.auth.token = None;
        config.auth.token_env = Some("VAULTSYNC_TEST_TOKEN_RESOLVE".into());
        std::env::set_var("VAULTSYNC_TEST_TOKEN_RESOLVE", "from-env");
        config.resolve_env_vars().unwrap();
        assert_eq!(config.auth.token(), Some("from-env"));
        std::env::remove_var("VAULTSYNC_TEST_TOKEN_RESOLVE");
    }

    #[test]
    fn test_default_template_parses() {
        let config: SyncConfig = toml::from_str(SyncConfig::default_template()).unwrap();
        assert_eq!(config.sync.background_interval_minutes, 10);
        assert!(config.auth.token_env.is_some());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/key"), PathBuf::from("/abs/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
        }
    }
}
