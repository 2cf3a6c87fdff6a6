use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::api::Tokens;
use crate::crypto::{CryptoError, SaltedKeyPass};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace session file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

/// Everything needed to restore a session without a password
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(flatten)]
    pub tokens: Tokens,
    /// Standard base64 of the salted key pass
    pub salted_key_pass: String,
}

impl Credentials {
    pub fn new(tokens: Tokens, key_pass: &SaltedKeyPass) -> Self {
        Self {
            tokens,
            salted_key_pass: key_pass.to_base64(),
        }
    }

    pub fn key_pass(&self) -> Result<SaltedKeyPass, CryptoError> {
        SaltedKeyPass::from_base64(&self.salted_key_pass)
    }

    /// Same key pass, rotated tokens
    pub fn with_tokens(mut self, tokens: Tokens) -> Self {
        self.tokens = tokens;
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tokens", &self.tokens)
            .field("salted_key_pass", &"<redacted>")
            .finish()
    }
}

/// Persistence for per-account credentials
///
/// A store is bound to one current account; `load`, `save` and `delete`
///  act on that account only.
pub trait SessionStore: Send + Sync {
    /// Name of the current account
    fn account(&self) -> &str;

    /// Credentials for the current account, if any were saved
    fn load(&self) -> Result<Option<Credentials>, StoreError>;

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;

    fn delete(&self) -> Result<(), StoreError>;

    /// Every account with saved credentials
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Make `account` current. Only accounts with saved credentials
    ///  can be switched to.
    fn switch(&mut self, account: &str) -> Result<(), StoreError>;
}

type Accounts = BTreeMap<String, Credentials>;

/// JSON file holding `{account: credentials}`
///
/// Tokens and key pass are stored in clear text; the file should live
///  somewhere only the user can read.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    account: String,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>, account: impl Into<String>) -> Self {
        let path = path.into();
        tracing::warn!(
            path = %path.display(),
            "session credentials are stored unencrypted"
        );
        Self {
            path,
            account: account.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Accounts, StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Accounts::new()),
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Accounts::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    // Write to a sibling temp file, then rename over the old one
    fn write(&self, accounts: &Accounts) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut file = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer_pretty(&mut file, accounts)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn account(&self) -> &str {
        &self.account
    }

    fn load(&self) -> Result<Option<Credentials>, StoreError> {
        Ok(self.read()?.remove(&self.account))
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let mut accounts = self.read()?;
        accounts.insert(self.account.clone(), credentials.clone());
        self.write(&accounts)?;
        tracing::debug!(account = %self.account, "saved credentials");
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        let mut accounts = self.read()?;
        if accounts.remove(&self.account).is_some() {
            self.write(&accounts)?;
            tracing::debug!(account = %self.account, "deleted credentials");
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.into_keys().collect())
    }

    fn switch(&mut self, account: &str) -> Result<(), StoreError> {
        if !self.read()?.contains_key(account) {
            return Err(StoreError::UnknownAccount(account.to_string()));
        }
        self.account = account.to_string();
        Ok(())
    }
}

/// In-memory store; clones share the same accounts
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    accounts: Arc<Mutex<Accounts>>,
    account: String,
}

impl MemorySessionStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(Accounts::new())),
            account: account.into(),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new("default")
    }
}

impl SessionStore for MemorySessionStore {
    fn account(&self) -> &str {
        &self.account
    }

    fn load(&self) -> Result<Option<Credentials>, StoreError> {
        Ok(self.accounts.lock().get(&self.account).cloned())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        self.accounts
            .lock()
            .insert(self.account.clone(), credentials.clone());
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        self.accounts.lock().remove(&self.account);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.accounts.lock().keys().cloned().collect())
    }

    fn switch(&mut self, account: &str) -> Result<(), StoreError> {
        if !self.accounts.lock().contains_key(account) {
            return Err(StoreError::UnknownAccount(account.to_string()));
        }
        self.account = account.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn credentials(uid: &str) -> Credentials {
        Credentials::new(
            Tokens {
                uid: uid.to_string(),
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
            },
            &SaltedKeyPass::new(b"pass".to_vec()),
        )
    }

    #[test]
    fn test_credentials_json_is_flat() {
        let json = serde_json::to_value(credentials("uid-1")).unwrap();
        assert_eq!(json["uid"], "uid-1");
        assert_eq!(json["access_token"], "access");
        assert_eq!(json["salted_key_pass"], "cGFzcw==");
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let debug = format!("{:?}", credentials("uid-1"));
        assert!(!debug.contains("cGFzcw=="));
        assert!(!debug.contains("access\""));
    }

    #[test]
    fn test_memory_store_accounts() {
        let mut store = MemorySessionStore::new("work");
        assert!(store.load().unwrap().is_none());

        store.save(&credentials("uid-work")).unwrap();
        let other = MemorySessionStore {
            account: "home".to_string(),
            ..store.clone()
        };
        other.save(&credentials("uid-home")).unwrap();

        assert_eq!(store.list().unwrap(), vec!["home", "work"]);
        assert!(matches!(
            store.switch("missing"),
            Err(StoreError::UnknownAccount(_))
        ));

        store.switch("home").unwrap();
        assert_eq!(store.load().unwrap().unwrap().tokens.uid, "uid-home");

        store.delete().unwrap();
        assert_eq!(store.list().unwrap(), vec!["work"]);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");
        let store = FileSessionStore::new(&path, "default");

        assert!(store.load().unwrap().is_none());
        store.save(&credentials("uid-1")).unwrap();

        let reopened = FileSessionStore::new(&path, "default");
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded, credentials("uid-1"));
        assert_eq!(
            loaded.key_pass().unwrap(),
            SaltedKeyPass::new(b"pass".to_vec())
        );

        reopened.delete().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, "  \n").unwrap();

        let store = FileSessionStore::new(&path, "default");
        assert!(store.load().unwrap().is_none());
    }
}
