//! Token storage.
//!
//! Persists the access/refresh token pair in `<base>/tokens.json` with
//! restricted permissions (0600). Tokens are never logged or displayed in full.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::paths;

/// Token file name.
const TOKENS_FILE: &str = "tokens.json";

/// Access and refresh token, always stored and replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived bearer credential
    pub access_token: String,
    /// Long-lived credential exchanged for a new pair
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// Shortens a token to a recognizable prefix.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.len() < token.len() {
        format!("{prefix}…")
    } else {
        "…".to_string()
    }
}

/// Storage for the current token pair.
///
/// Implementations must return the latest persisted values on every `get`;
/// the client never caches tokens across calls.
pub trait TokenStore: Send + Sync {
    /// Returns the current pair, or `None` when logged out.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be read.
    fn get(&self) -> Result<Option<TokenPair>>;

    /// Replaces both tokens.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, pair: &TokenPair) -> Result<()>;

    /// Removes both tokens.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be cleared.
    fn clear(&self) -> Result<()>;
}

/// In-memory store, used by tests and embedders that manage persistence.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<TokenPair>> {
        Ok(self
            .pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, pair: &TokenPair) -> Result<()> {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// File-backed store at `${HRDESK_HOME}/tokens.json`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store at the default location.
    pub fn new() -> Self {
        Self::at(paths::hrdesk_home().join(TOKENS_FILE))
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<TokenPair>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read tokens from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let pair: TokenPair = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse tokens from {}", self.path.display()))?;
        Ok(Some(pair))
    }

    fn set(&self, pair: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(pair).context("Failed to serialize tokens")?;

        // Both tokens land in one rename so readers never see half a pair.
        let tmp_path = self.path.with_extension("json.tmp");
        write_restricted(&tmp_path, contents.as_bytes())?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

fn write_restricted(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_file_store_missing_file_is_logged_out() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::at(dir.path().join(TOKENS_FILE));
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn test_file_store_uses_fixed_key_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TOKENS_FILE);
        let store = FileTokenStore::at(&path);

        store.set(&TokenPair::new("a1", "r1")).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["accessToken"], "a1");
        assert_eq!(json["refreshToken"], "r1");
    }

    #[test]
    fn test_file_store_reads_latest_value_written_elsewhere() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TOKENS_FILE);
        let store = FileTokenStore::at(&path);
        store.set(&TokenPair::new("a1", "r1")).unwrap();

        fs::write(&path, r#"{"accessToken":"a2","refreshToken":"r2"}"#).unwrap();

        assert_eq!(store.get().unwrap(), Some(TokenPair::new("a2", "r2")));
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::at(dir.path().join(TOKENS_FILE));
        store.set(&TokenPair::new("a1", "r1")).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();

        assert!(store.get().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join(TOKENS_FILE);
        FileTokenStore::at(&path)
            .set(&TokenPair::new("a1", "r1"))
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let pair = TokenPair::new("eyJhbGciOiJIUzI1NiJ9.secret", "refresh-secret-value");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("eyJhbG…"));
    }

    #[test]
    fn test_memory_store_set_replaces_pair() {
        let store = MemoryTokenStore::with_pair(TokenPair::new("old", "r1"));
        store.set(&TokenPair::new("new", "r2")).unwrap();
        assert_eq!(store.get().unwrap(), Some(TokenPair::new("new", "r2")));
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }
}
