//! Persisted session records.
//!
//! All records live in a single JSON array file. Every mutation reads the whole
//! collection, edits it and rewrites the file atomically (temp file + rename),
//! holding an in-process mutex so concurrent writers in this daemon cannot lose
//! updates.
//!
//! Identifiers are trimmed before they are stored and before every
//! comparison, so `find`, `change_webhook` and `remove` agree on which record
//! an identifier names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Errors from the session records file.
#[derive(Error, Debug)]
pub enum RecordError {
    /// Identifier was empty or whitespace.
    #[error("session id is required")]
    EmptySessionId,

    #[error("failed to read session records at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write session records at {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session records at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize session records")]
    Serialize(#[source] serde_json::Error),
}

/// Metadata kept for one session across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub client_fingerprint: Option<String>,
}

/// File-backed collection of [`SessionRecord`]s, most recently added first.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every record. A missing or empty file is an empty collection.
    pub async fn list(&self) -> Result<Vec<SessionRecord>, RecordError> {
        let _guard = self.write_lock.lock().await;
        self.read_all().await
    }

    pub async fn find(&self, session_id: &str) -> Result<Option<SessionRecord>, RecordError> {
        let key = normalize(session_id)?;
        let records = self.list().await?;
        Ok(records.into_iter().find(|r| r.session_id.trim() == key))
    }

    /// Replaces the webhook and fingerprint of an existing record in place, or
    /// prepends a new record.
    pub async fn upsert(
        &self,
        session_id: &str,
        webhook_url: Option<String>,
        client_fingerprint: Option<String>,
    ) -> Result<(), RecordError> {
        let key = normalize(session_id)?;
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;

        match records.iter_mut().find(|r| r.session_id.trim() == key) {
            Some(record) => {
                record.session_id = key.to_string();
                record.webhook_url = webhook_url;
                record.client_fingerprint = client_fingerprint;
            }
            None => records.insert(
                0,
                SessionRecord {
                    session_id: key.to_string(),
                    webhook_url,
                    client_fingerprint,
                },
            ),
        }

        self.write_all(&records).await
    }

    /// Updates only the webhook of a record. Returns `false` when no record
    /// matches.
    pub async fn change_webhook(
        &self,
        session_id: &str,
        webhook_url: Option<String>,
    ) -> Result<bool, RecordError> {
        let key = normalize(session_id)?;
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;

        let Some(record) = records.iter_mut().find(|r| r.session_id.trim() == key) else {
            return Ok(false);
        };
        record.webhook_url = webhook_url;
        self.write_all(&records).await?;
        Ok(true)
    }

    /// Removes every record for `session_id`. Returns the number removed.
    pub async fn remove(&self, session_id: &str) -> Result<usize, RecordError> {
        let key = normalize(session_id)?;
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;

        let before = records.len();
        records.retain(|r| r.session_id.trim() != key);
        let removed = before - records.len();
        if removed > 0 {
            self.write_all(&records).await?;
        }
        Ok(removed)
    }

    async fn read_all(&self) -> Result<Vec<SessionRecord>, RecordError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RecordError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|source| RecordError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_all(&self, records: &[SessionRecord]) -> Result<(), RecordError> {
        let json = serde_json::to_vec_pretty(records).map_err(RecordError::Serialize)?;
        let write_err = |source| RecordError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
        file.write_all(&json).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)
    }
}

fn normalize(session_id: &str) -> Result<&str, RecordError> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        Err(RecordError::EmptySessionId)
    } else {
        Ok(trimmed)
    }
}
