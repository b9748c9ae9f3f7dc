//! On-disk credential directories.
//!
//! The automation client keeps each session's credentials under
//! `<root>/session-<id>`. These directories are the durable evidence of which
//! sessions exist; the hub only reads them at restore time and deletes them
//! after a session is fully torn down.

use std::path::{Component, Path, PathBuf};

use crate::SessionError;

const DIR_PREFIX: &str = "session-";

#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the client uses for `session_id`.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{DIR_PREFIX}{session_id}"))
    }

    /// Identifiers of every `session-<id>` directory under the root, sorted.
    ///
    /// Creates the root when missing. Unreadable entries and identifiers
    /// that would not survive trimming are logged and skipped.
    pub async fn list_session_ids(&self) -> Result<Vec<String>, SessionError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SessionError::io(&self.root, e))?;
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| SessionError::io(&self.root, e))?;

        let mut ids = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(root = %self.root.display(), error = %e, "failed to read sessions directory entry");
                    continue;
                }
            };
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to stat session entry");
                    continue;
                }
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 session directory");
                continue;
            };
            let Some(id) = name.strip_prefix(DIR_PREFIX) else {
                continue;
            };
            if id.trim() != id {
                tracing::warn!(path = %entry.path().display(), "skipping session directory with surrounding whitespace");
                continue;
            }
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Rejects identifiers whose directory would not be a direct child of the
    /// root. Performs no I/O.
    pub fn check_identifier(&self, session_id: &str) -> Result<(), SessionError> {
        let name = format!("{DIR_PREFIX}{session_id}");
        let mut components = Path::new(&name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) if c == name.as_str() => Ok(()),
            _ => Err(SessionError::PathTraversal {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Deletes the credential directory of `session_id`.
    ///
    /// The symlink-resolved target must lie strictly inside the resolved root;
    /// otherwise nothing is touched. A missing directory is not an error.
    /// Returns whether a directory was removed.
    pub async fn remove_session_dir(&self, session_id: &str) -> Result<bool, SessionError> {
        self.check_identifier(session_id)?;
        let target = self.session_dir(session_id);

        let real_root = match tokio::fs::canonicalize(&self.root).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(SessionError::io(&self.root, e)),
        };
        let real_target = match tokio::fs::canonicalize(&target).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(SessionError::io(&target, e)),
        };

        if real_target == real_root || !real_target.starts_with(&real_root) {
            return Err(SessionError::PathTraversal {
                session_id: session_id.to_string(),
            });
        }

        tokio::fs::remove_dir_all(&real_target)
            .await
            .map_err(|e| SessionError::io(&real_target, e))?;
        tracing::debug!(session_id, path = %real_target.display(), "removed credential directory");
        Ok(true)
    }
}
