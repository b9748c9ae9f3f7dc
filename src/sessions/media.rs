//! Local asset store for downloaded message attachments.
//!
//! Attachments are written as `<assets_dir>/<uuid>.<ext>` and referenced in
//! forwarded events by a public URL under `<public_base_url>/assets/`.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use thiserror::Error;

use crate::client::MediaPayload;
use crate::config::settings::MediaSettings;

/// Extension used when the content type says nothing useful.
pub const FALLBACK_EXTENSION: &str = "bin";

/// Extensions for common chat media where the registry lists several.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("audio/ogg", "ogg"),
    ("audio/mpeg", "mp3"),
    ("audio/mp4", "m4a"),
    ("video/mp4", "mp4"),
    ("video/3gpp", "3gp"),
    ("application/pdf", "pdf"),
    ("text/plain", "txt"),
];

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("attachment is not valid base64")]
    Decode(#[from] base64::DecodeError),

    #[error("attachment of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to write asset {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reference to a persisted attachment, as attached to forwarded messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMedia {
    pub mimetype: String,
    pub extension: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
    public_base_url: String,
    max_size: u64,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>, max_size: u64) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_size,
        }
    }

    pub fn from_settings(settings: &MediaSettings) -> Self {
        Self::new(
            &settings.assets_dir,
            settings.public_base_url.clone(),
            settings.max_attachment_size,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decodes and writes `media` under a fresh unique name.
    pub async fn store(&self, media: &MediaPayload) -> Result<StoredMedia, MediaError> {
        if let Some(size) = media.filesize {
            self.check_size(size)?;
        }
        let bytes = STANDARD.decode(media.data.trim())?;
        self.check_size(bytes.len() as u64)?;

        let extension = extension_for(&media.mimetype);
        let filename = format!("{}.{}", uuid::Uuid::new_v4(), extension);
        let path = self.dir.join(&filename);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| MediaError::Io {
                path: self.dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| MediaError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(StoredMedia {
            mimetype: media.mimetype.clone(),
            extension: extension.to_string(),
            url: format!("{}/assets/{}", self.public_base_url, filename),
        })
    }

    fn check_size(&self, size: u64) -> Result<(), MediaError> {
        if size > self.max_size {
            return Err(MediaError::TooLarge {
                size,
                limit: self.max_size,
            });
        }
        Ok(())
    }
}

/// File extension for a declared content type, ignoring parameters.
pub fn extension_for(mimetype: &str) -> &'static str {
    let essence = mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if let Some((_, ext)) = PREFERRED_EXTENSIONS.iter().find(|(m, _)| *m == essence) {
        return ext;
    }
    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first().copied())
        .unwrap_or(FALLBACK_EXTENSION)
}
