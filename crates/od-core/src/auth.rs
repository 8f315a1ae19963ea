//! Agent authentication tokens
//!
//! A node agent only serves controllers presenting its token. The token is
//! either configured on both sides or generated by the agent on first start
//! and written to a file readable only by the owner, from where it is copied
//! into the controller configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::default_config_dir;

/// Length of a generated token in bytes (before hex encoding)
const TOKEN_BYTES: usize = 32;

/// Default location of the agent token file
pub fn default_token_path() -> PathBuf {
    default_config_dir().join("agent_token")
}

/// Generate a new random token
///
/// Returns a 64-character hex string.
pub fn generate_token() -> String {
    use rand::Rng;
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Compare a presented token with the expected one in constant time
pub fn validate_token(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }

    let mut result = 0u8;
    for (a, b) in provided.bytes().zip(expected.bytes()) {
        result |= a ^ b;
    }
    result == 0
}

/// Read a token file, `None` when it does not exist or is empty
pub fn read_token(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let token = contents.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a token file with owner-only permissions
pub fn write_token(path: &Path, token: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", token))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Token stored at `path`, generating and writing one when there is none
pub fn load_or_create_token(path: &Path) -> io::Result<String> {
    if let Some(token) = read_token(path)? {
        return Ok(token);
    }

    let token = generate_token();
    write_token(path, &token)?;
    tracing::info!("Generated agent token in {}", path.display());
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_validate_token() {
        let token = "abc123def456";
        assert!(validate_token(token, token));
        assert!(!validate_token(token, "abc123def457"));
        assert!(!validate_token(token, "abc123def45"));
        assert!(!validate_token("", token));
    }

    #[test]
    fn test_load_or_create_token_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent_token");

        let first = load_or_create_token(&path).unwrap();
        let second = load_or_create_token(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(read_token(&path).unwrap(), Some(first));
    }

    #[test]
    fn test_read_missing_or_blank_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_token");
        assert_eq!(read_token(&path).unwrap(), None);

        fs::write(&path, "  \n").unwrap();
        assert_eq!(read_token(&path).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_token");
        write_token(&path, "secret").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
