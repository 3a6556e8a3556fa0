//! Credential persistence.
//!
//! The token manager never caches credentials itself: every lookup goes to a
//! [`CredentialStore`] keyed by realm id. Two implementations ship with the
//! crate, an in-memory map and a JSON file that is rewritten atomically
//! (temp file + rename) on every save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::token::TokenRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(quickbooks_rs::store::io))]
    Io(String),

    #[error("could not parse stored credentials: {0}")]
    #[diagnostic(
        code(quickbooks_rs::store::parse),
        help("The credential file may be corrupt; delete it and re-authorize")
    )]
    Parse(String),

    /// Failure reported by an embedder-supplied store.
    #[error("{0}")]
    #[diagnostic(code(quickbooks_rs::store::backend))]
    Backend(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the record stored for `realm_id`, if any.
    async fn fetch(&self, realm_id: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Replaces the record stored for `realm_id` and returns what was stored.
    async fn save(&self, realm_id: &str, record: TokenRecord) -> Result<TokenRecord, StoreError>;
}

/// Keeps credentials in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, TokenRecord>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of realms with stored credentials.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn fetch(&self, realm_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.records.read().await.get(realm_id).cloned())
    }

    async fn save(&self, realm_id: &str, record: TokenRecord) -> Result<TokenRecord, StoreError> {
        self.records
            .write()
            .await
            .insert(realm_id.to_string(), record.clone());
        Ok(record)
    }
}

/// Keeps credentials in a JSON file mapping realm ids to token records.
pub struct JsonFileCredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, TokenRecord>>,
}

impl JsonFileCredentialStore {
    /// Loads the store from `path`. A missing file is an empty store; it is
    /// created on the first save.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let records: HashMap<String, TokenRecord> = serde_json::from_str(&contents)
                    .map_err(|e| StoreError::Parse(format!("{}: {e}", path.display())))?;
                info!(path = %path.display(), realms = records.len(), "loaded credentials");
                records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "credential file not found, starting empty");
                HashMap::new()
            }
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "reading {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for JsonFileCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileCredentialStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for JsonFileCredentialStore {
    async fn fetch(&self, realm_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.state.lock().await.get(realm_id).cloned())
    }

    async fn save(&self, realm_id: &str, record: TokenRecord) -> Result<TokenRecord, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.insert(realm_id.to_string(), record.clone());
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(realm_id, "persisted credentials");
        Ok(record)
    }
}

/// Sibling of `path` named after it, so stores sharing a directory never share
/// a temp file.
fn temp_path_for(path: &Path) -> Result<PathBuf, StoreError> {
    let file_name = path.file_name().ok_or_else(|| {
        StoreError::Io(format!("{} does not name a file", path.display()))
    })?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

async fn write_atomic(path: &Path, data: &HashMap<String, TokenRecord>) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| StoreError::Parse(format!("serializing credentials: {e}")))?;

    let tmp_path = temp_path_for(path)?;

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| StoreError::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("renaming temp credential file: {e}")))
}
