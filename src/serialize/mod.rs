//! Result serializers, picked by the scheme of the collector's output path.
//! Only the local driver ships with the crate; `hdfs://` and `http(s)://`
//! uploads are host concerns behind the same [`Serializer`] contract.

use crate::fs::{FsError, FsHandle, GzHint, LocalFs, OpenMode};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("no serializer registered for scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("failed to encode '{path}': {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Writes one JSON value to a destination path or URL.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value, path: &str) -> Result<(), SerializeError>;
}

/// Pick a serializer for a path or URL. Bare paths and `file://` URLs get
/// the local driver; anything else must be supplied by the host.
pub fn detect(path_or_url: &str) -> Result<Arc<dyn Serializer>, SerializeError> {
    match scheme(path_or_url) {
        None | Some("file") => Ok(Arc::new(LocalSerializer::new())),
        Some(other) => Err(SerializeError::UnsupportedScheme(other.to_string())),
    }
}

fn scheme(path: &str) -> Option<&str> {
    path.split_once("://").map(|(scheme, _)| scheme)
}

fn strip_scheme(path: &str) -> &str {
    path.split_once("://").map(|(_, rest)| rest).unwrap_or(path)
}

/// JSON writer over a [`Filesystem`](crate::fs::Filesystem); gzips when the
/// destination ends in `.gz`.
pub struct LocalSerializer {
    fs: FsHandle,
}

impl Default for LocalSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSerializer {
    pub fn new() -> Self {
        Self {
            fs: LocalFs::handle(),
        }
    }

    pub fn with_fs(fs: FsHandle) -> Self {
        Self { fs }
    }
}

impl Serializer for LocalSerializer {
    fn serialize(&self, value: &serde_json::Value, path: &str) -> Result<(), SerializeError> {
        let path = Path::new(strip_scheme(path));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                self.fs.makedirs_all(parent)?;
            }
        }

        let file = self.fs.open(path, OpenMode::Write, GzHint::Auto)?;
        let mut writer = file.into_writer()?;
        serde_json::to_writer(&mut writer, value).map_err(|source| SerializeError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}
