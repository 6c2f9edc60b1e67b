//! Remote URL parsing and rewriting.
//!
//! Handles the three remote forms a vault can point at:
//!
//! - HTTPS: `https://host/owner/repo.git` (optionally `user[:pass]@host`)
//! - SSH: `git@host:owner/repo.git` or `ssh://git@host/owner/repo.git`
//! - Local: `file:///srv/git/repo.git` or an absolute path
//!
//! Token authentication embeds the token as inline userinfo in the HTTPS
//! form; key authentication rewrites the URL to the SCP-style SSH form.
//! Any URL that may carry a credential goes through [`mask_credentials`]
//! before it is logged or displayed.

use std::sync::OnceLock;

use regex_lite::Regex;

/// Transport family of a remote URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Https,
    Ssh,
    Local,
}

/// A remote URL split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRemote {
    pub transport: Transport,
    /// Host without port. Empty for local remotes.
    pub host: String,
    /// Port, when given explicitly in an `https://` or `ssh://` URL.
    pub port: Option<u16>,
    /// Repository path without a leading slash (`owner/repo.git`). For local
    /// remotes, the full filesystem path.
    pub path: String,
    /// Userinfo (`git`, `token`, `user:pass`), if any.
    pub user: Option<String>,
}

fn https_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i:https?)://(?:([^@/]+)@)?([A-Za-z0-9.-]+)(?::(\d+))?/(.+)$")
            .unwrap_or_else(|e| panic!("invalid https regex: {e}"))
    })
}

fn ssh_scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ssh://(?:([^@/]+)@)?([A-Za-z0-9.-]+)(?::(\d+))?/(.+)$")
            .unwrap_or_else(|e| panic!("invalid ssh regex: {e}"))
    })
}

fn scp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9._-]+)@([A-Za-z0-9.-]+):([^/].*)$")
            .unwrap_or_else(|e| panic!("invalid scp regex: {e}"))
    })
}

fn userinfo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"://[^@/\s]+@").unwrap_or_else(|e| panic!("invalid userinfo regex: {e}"))
    })
}

/// Parse a remote URL. Returns `None` for anything that is not a
/// recognisable HTTPS, SSH or local remote.
pub fn parse_remote_url(url: &str) -> Option<ParsedRemote> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    if let Some(path) = url.strip_prefix("file://") {
        return (!path.is_empty()).then(|| local(path));
    }
    if url.starts_with('/') {
        return Some(local(url));
    }

    for (re, transport) in [(https_re(), Transport::Https), (ssh_scheme_re(), Transport::Ssh)] {
        if let Some(caps) = re.captures(url) {
            let port = match caps.get(3) {
                Some(p) => Some(p.as_str().parse::<u16>().ok()?),
                None => None,
            };
            return Some(ParsedRemote {
                transport,
                host: caps[2].to_string(),
                port,
                path: caps[4].to_string(),
                user: caps.get(1).map(|m| m.as_str().to_string()),
            });
        }
    }

    scp_re().captures(url).map(|caps| ParsedRemote {
        transport: Transport::Ssh,
        host: caps[2].to_string(),
        port: None,
        path: caps[3].to_string(),
        user: Some(caps[1].to_string()),
    })
}

fn local(path: &str) -> ParsedRemote {
    ParsedRemote {
        transport: Transport::Local,
        host: String::new(),
        port: None,
        path: path.to_string(),
        user: None,
    }
}

/// Whether `host` equals one of `allowed` or is a subdomain of one.
/// Comparison is case-insensitive.
pub fn host_matches(host: &str, allowed: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|a| {
        let a = a.trim().to_ascii_lowercase();
        !a.is_empty() && (host == a || host.ends_with(&format!(".{a}")))
    })
}

/// Rewrite a remote URL into the SCP-style SSH form (`git@host:path`).
///
/// HTTPS URLs are converted (dropping any userinfo and port); SSH and local
/// URLs are returned unchanged.
pub fn to_ssh_url(url: &str) -> String {
    match parse_remote_url(url) {
        Some(p) if p.transport == Transport::Https => format!("git@{}:{}", p.host, p.path),
        _ => url.trim().to_string(),
    }
}

/// Rewrite a remote URL into the plain HTTPS form, without credentials.
///
/// SSH URLs are converted; local URLs are returned unchanged.
pub fn to_https_url(url: &str) -> String {
    match parse_remote_url(url) {
        Some(p) if p.transport == Transport::Local => url.trim().to_string(),
        Some(p) if p.transport == Transport::Ssh => format!("https://{}/{}", p.host, p.path),
        Some(p) => match p.port {
            Some(port) => format!("https://{}:{}/{}", p.host, port, p.path),
            None => format!("https://{}/{}", p.host, p.path),
        },
        None => url.trim().to_string(),
    }
}

/// Embed `token` into the HTTPS form of `url` as inline userinfo
/// (`https://<token>@host/path`).
///
/// Returns `None` when the host is not in `allowed_hosts` (or the remote is
/// local); callers then use the credential-free HTTPS URL and supply the
/// token through transport callbacks instead.
pub fn embed_token(url: &str, token: &str, allowed_hosts: &[String]) -> Option<String> {
    let parsed = parse_remote_url(url)?;
    if parsed.transport == Transport::Local || !host_matches(&parsed.host, allowed_hosts) {
        return None;
    }
    let authority = match parsed.port {
        Some(port) if parsed.transport == Transport::Https => format!("{}:{}", parsed.host, port),
        _ => parsed.host.clone(),
    };
    Some(format!("https://{}@{}/{}", token, authority, parsed.path))
}

/// Replace any userinfo in `text` with `***`. Safe to call on free text
/// such as error messages that may quote a URL.
pub fn mask_credentials(text: &str) -> String {
    userinfo_re().replace_all(text, "://***@").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<String> {
        vec!["github.com".into(), "gitlab.com".into()]
    }

    // -------------------------------------------------------------------
    // parse_remote_url
    // -------------------------------------------------------------------

    #[test]
    fn test_parse_https() {
        let p = parse_remote_url("https://github.com/jdoe/notes.git").unwrap();
        assert_eq!(p.transport, Transport::Https);
        assert_eq!(p.host, "github.com");
        assert_eq!(p.path, "jdoe/notes.git");
        assert_eq!(p.user, None);
    }

    #[test]
    fn test_parse_https_with_userinfo_and_port() {
        let p = parse_remote_url("https://user:pw@git.example.com:8443/team/vault").unwrap();
        assert_eq!(p.host, "git.example.com");
        assert_eq!(p.port, Some(8443));
        assert_eq!(p.user.as_deref(), Some("user:pw"));
    }

    #[test]
    fn test_parse_scp_style() {
        let p = parse_remote_url("git@github.com:jdoe/notes.git").unwrap();
        assert_eq!(p.transport, Transport::Ssh);
        assert_eq!(p.host, "github.com");
        assert_eq!(p.path, "jdoe/notes.git");
        assert_eq!(p.user.as_deref(), Some("git"));
    }

    #[test]
    fn test_parse_ssh_scheme() {
        let p = parse_remote_url("ssh://git@gitlab.com:2222/team/notes.git").unwrap();
        assert_eq!(p.transport, Transport::Ssh);
        assert_eq!(p.port, Some(2222));
        assert_eq!(p.path, "team/notes.git");
    }

    #[test]
    fn test_parse_local() {
        assert_eq!(
            parse_remote_url("/srv/git/notes.git").unwrap().transport,
            Transport::Local
        );
        assert_eq!(
            parse_remote_url("file:///srv/git/notes.git").unwrap().path,
            "/srv/git/notes.git"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_remote_url("").is_none());
        assert!(parse_remote_url("not a url").is_none());
        assert!(parse_remote_url("https://github.com").is_none());
    }

    // -------------------------------------------------------------------
    // transport rewriting
    // -------------------------------------------------------------------

    #[test]
    fn test_https_to_ssh() {
        assert_eq!(
            to_ssh_url("https://github.com/jdoe/notes.git"),
            "git@github.com:jdoe/notes.git"
        );
        assert_eq!(
            to_ssh_url("https://tok@github.com/jdoe/notes.git"),
            "git@github.com:jdoe/notes.git"
        );
    }

    #[test]
    fn test_ssh_unchanged_by_to_ssh() {
        assert_eq!(
            to_ssh_url("git@github.com:jdoe/notes.git"),
            "git@github.com:jdoe/notes.git"
        );
        assert_eq!(to_ssh_url("/srv/git/notes.git"), "/srv/git/notes.git");
    }

    #[test]
    fn test_ssh_to_https() {
        assert_eq!(
            to_https_url("git@github.com:jdoe/notes.git"),
            "https://github.com/jdoe/notes.git"
        );
        assert_eq!(
            to_https_url("https://old@github.com/jdoe/notes.git"),
            "https://github.com/jdoe/notes.git"
        );
    }

    // -------------------------------------------------------------------
    // token embedding
    // -------------------------------------------------------------------

    #[test]
    fn test_embed_token_allowed_host() {
        assert_eq!(
            embed_token("https://github.com/jdoe/notes.git", "tok", &hosts()).as_deref(),
            Some("https://tok@github.com/jdoe/notes.git")
        );
    }

    #[test]
    fn test_embed_token_replaces_existing_userinfo() {
        assert_eq!(
            embed_token("https://old@github.com/jdoe/notes.git", "new", &hosts()).as_deref(),
            Some("https://new@github.com/jdoe/notes.git")
        );
    }

    #[test]
    fn test_embed_token_from_ssh_form() {
        assert_eq!(
            embed_token("git@gitlab.com:team/notes.git", "tok", &hosts()).as_deref(),
            Some("https://tok@gitlab.com/team/notes.git")
        );
    }

    #[test]
    fn test_embed_token_subdomain() {
        assert!(embed_token("https://eu.gitlab.com/a/b.git", "tok", &hosts()).is_some());
    }

    #[test]
    fn test_embed_token_foreign_host_refused() {
        assert!(embed_token("https://evil.example.com/a/b.git", "tok", &hosts()).is_none());
        assert!(embed_token("https://notgithub.com/a/b.git", "tok", &hosts()).is_none());
        assert!(embed_token("/srv/git/notes.git", "tok", &hosts()).is_none());
    }

    // -------------------------------------------------------------------
    // masking
    // -------------------------------------------------------------------

    #[test]
    fn test_mask_credentials() {
        assert_eq!(
            mask_credentials("https://ghp_abc123@github.com/jdoe/notes.git"),
            "https://***@github.com/jdoe/notes.git"
        );
        assert_eq!(
            mask_credentials("failed: https://u:p@host/x and https://t@host/y"),
            "failed: https://***@host/x and https://***@host/y"
        );
        assert_eq!(
            mask_credentials("git@github.com:jdoe/notes.git"),
            "git@github.com:jdoe/notes.git"
        );
    }
}
