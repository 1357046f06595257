//! Storage folder resolution.
//!
//! A promoted attachment lands under `<folder>/<hh>/<sha256-hex><.ext>`.
//! The folder comes from the session's target folder path, else from the
//! classification's folder, else from the configured default.

use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use stowage_core::ContentHash;
use stowage_core::config::FoldersConfig;

/// Prefix reserved for in-flight promotion objects.
pub const STAGING_PREFIX: &str = "staging";

const MAX_EXTENSION_LEN: usize = 10;

/// Classification id to folder path lookup.
#[async_trait]
pub trait FolderResolver: Send + Sync {
    /// Folder for a classification, or `None` if it has none.
    async fn folder_for(&self, classification_id: i64) -> UploadResult<Option<String>>;
}

/// Resolver backed by the `[folders]` configuration section.
#[derive(Debug, Clone, Default)]
pub struct StaticFolderResolver {
    folders: BTreeMap<i64, String>,
}

impl StaticFolderResolver {
    pub fn new(folders: BTreeMap<i64, String>) -> Self {
        Self { folders }
    }

    /// Build from configuration. Entries whose key is not an integer or
    /// whose folder normalizes to nothing are skipped with a warning.
    pub fn from_config(config: &FoldersConfig) -> Self {
        let mut folders = BTreeMap::new();
        for (key, path) in &config.classifications {
            let Ok(id) = key.parse::<i64>() else {
                tracing::warn!(key = %key, "Ignoring folder mapping with non-numeric classification id");
                continue;
            };
            match normalize_folder(path) {
                Ok(folder) => {
                    folders.insert(id, folder);
                }
                Err(e) => {
                    tracing::warn!(classification_id = id, error = %e, "Ignoring invalid folder mapping");
                }
            }
        }
        Self { folders }
    }
}

#[async_trait]
impl FolderResolver for StaticFolderResolver {
    async fn folder_for(&self, classification_id: i64) -> UploadResult<Option<String>> {
        Ok(self.folders.get(&classification_id).cloned())
    }
}

/// Normalize a client-supplied folder path into a relative storage prefix.
///
/// Empty and `.` segments are dropped, backslashes count as separators and
/// characters outside `[A-Za-z0-9._ -]` become `_`. Segments containing `..`
/// and the reserved staging prefix are rejected; the object store refuses
/// any key containing `..`.
pub fn normalize_folder(path: &str) -> UploadResult<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        let segment = segment.trim();
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment.contains("..") {
            return Err(UploadError::InvalidArgument(
                "folder path must not contain '..'".to_string(),
            ));
        }
        let cleaned: String = segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        segments.push(cleaned);
    }

    match segments.first() {
        None => Err(UploadError::InvalidArgument(
            "folder path is empty".to_string(),
        )),
        Some(first) if first == STAGING_PREFIX => Err(UploadError::InvalidArgument(format!(
            "folder path must not start with '{STAGING_PREFIX}'"
        ))),
        Some(_) => Ok(segments.join("/")),
    }
}

/// Content-addressed key for promoted bytes.
pub fn storage_key(folder: &str, hash: &ContentHash, file_name: &str) -> String {
    let hex = hash.to_hex();
    let ext = file_extension(file_name)
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{folder}/{}/{hex}{ext}", &hex[..2])
}

/// Key of the staging object for one promotion claim.
pub fn staging_key(session_guid: &impl std::fmt::Display, version: i64) -> String {
    format!("{STAGING_PREFIX}/{session_guid}-{version}")
}

/// Lower-cased extension, if it is short and alphanumeric.
fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
