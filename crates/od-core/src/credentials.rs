//! Credential resolution
//!
//! Exactly one source wins per job, checked in this order:
//!
//! 1. credentials set explicitly on the job
//! 2. the per-user auth cache file, when the controller is configured to
//!    reuse it
//! 3. the controller's stored credentials
//!
//! A missing or unreadable auth cache yields empty credentials rather than
//! an error. Callers treat that as the "unconfigured" state.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::GlobalConfig;

/// File name of the per-user auth cache
pub const AUTH_CACHE_FILE: &str = ".sauce-ondemand";

/// A secret value that never shows up in logs
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the plain value
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Account credentials for one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub access_key: Secret,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, access_key: Secret) -> Self {
        Self {
            username: username.into(),
            access_key,
        }
    }

    /// The "unconfigured" value
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether neither a user name nor a key is present
    pub fn is_unconfigured(&self) -> bool {
        self.username.is_empty() && self.access_key.is_empty()
    }
}

/// Default location of the auth cache (`~/.sauce-ondemand`)
pub fn default_auth_cache_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(AUTH_CACHE_FILE)
}

/// Parse auth cache contents: user name and access key separated by whitespace
pub fn parse_auth_cache(content: &str) -> Option<Credentials> {
    let mut tokens = content.split_whitespace();
    let username = tokens.next()?;
    let access_key = tokens.next()?;
    Some(Credentials::new(username, Secret::new(access_key)))
}

/// Picks the credentials a job runs with
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    auth_cache: PathBuf,
}

impl CredentialResolver {
    /// Resolver reading the auth cache at `auth_cache`
    pub fn new(auth_cache: impl Into<PathBuf>) -> Self {
        Self {
            auth_cache: auth_cache.into(),
        }
    }

    /// Resolver for a controller configuration
    pub fn for_config(global: &GlobalConfig) -> Self {
        Self::new(
            global
                .auth_cache_path
                .clone()
                .unwrap_or_else(default_auth_cache_path),
        )
    }

    /// Location of the auth cache this resolver reads
    pub fn auth_cache(&self) -> &Path {
        &self.auth_cache
    }

    /// Resolve the credentials for one job
    pub fn resolve(&self, job: Option<&Credentials>, global: &GlobalConfig) -> Credentials {
        if let Some(explicit) = job {
            return explicit.clone();
        }

        if global.reuse_auth {
            return self.read_auth_cache();
        }

        Credentials::new(global.username.clone(), Secret::new(global.api_key.clone()))
    }

    /// Read the auth cache, yielding empty credentials when it is unusable
    pub fn read_auth_cache(&self) -> Credentials {
        match std::fs::read_to_string(&self.auth_cache) {
            Ok(content) => parse_auth_cache(&content).unwrap_or_else(|| {
                tracing::warn!("Auth cache {} is malformed", self.auth_cache.display());
                Credentials::empty()
            }),
            Err(e) => {
                tracing::debug!("Auth cache {} not readable: {}", self.auth_cache.display(), e);
                Credentials::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(reuse_auth: bool) -> GlobalConfig {
        GlobalConfig {
            username: "stored-user".to_string(),
            api_key: "stored-key".to_string(),
            reuse_auth,
            ..Default::default()
        }
    }

    fn write_cache(content: &str) -> (tempfile::TempDir, CredentialResolver) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUTH_CACHE_FILE);
        std::fs::write(&path, content).unwrap();
        (dir, CredentialResolver::new(path))
    }

    #[test]
    fn test_explicit_credentials_win_over_reuse() {
        let (_dir, resolver) = write_cache("cached-user cached-key");
        let explicit = Credentials::new("job-user", Secret::new("job-key"));

        let resolved = resolver.resolve(Some(&explicit), &global(true));
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn test_reuse_reads_auth_cache() {
        let (_dir, resolver) = write_cache("cached-user\ncached-key\n");

        let resolved = resolver.resolve(None, &global(true));
        assert_eq!(resolved.username, "cached-user");
        assert_eq!(resolved.access_key.expose(), "cached-key");
    }

    #[test]
    fn test_missing_cache_is_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CredentialResolver::new(dir.path().join("absent"));

        let resolved = resolver.resolve(None, &global(true));
        assert!(resolved.is_unconfigured());
    }

    #[test]
    fn test_truncated_cache_is_unconfigured() {
        let (_dir, resolver) = write_cache("only-a-user");
        assert!(resolver.resolve(None, &global(true)).is_unconfigured());
    }

    #[test]
    fn test_stored_credentials_without_reuse() {
        let (_dir, resolver) = write_cache("cached-user cached-key");

        let resolved = resolver.resolve(None, &global(false));
        assert_eq!(resolved.username, "stored-user");
        assert_eq!(resolved.access_key.expose(), "stored-key");
    }

    #[test]
    fn test_secret_is_redacted() {
        let creds = Credentials::new("u", Secret::new("hunter2"));
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert_eq!(creds.access_key.to_string(), "****");
    }
}
