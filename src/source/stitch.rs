use crate::fs::{FsError, FsHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StitchError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("malformed stitch metadata: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Timestamp bounds of one archive within a boot session, wall-clock
/// nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchFileInfo {
    pub start: i64,
    pub end: i64,
}

/// Precomputed boot-session metadata (`info.json`): for every boot id, the
/// timestamp bounds of each archive file, plus the flat list of source files
/// that contributed. Lets a scan be clipped to a date range without opening
/// any archive.
///
/// Maps are ordered so boot and file iteration is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StitchInfo {
    #[serde(default)]
    pub boot_info: BTreeMap<String, BTreeMap<String, StitchFileInfo>>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl StitchInfo {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StitchError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Read `<dir>/info.json` through the given filesystem.
    pub fn load(fs: &FsHandle, dir: &Path) -> Result<Self, StitchError> {
        let path = dir.join("info.json");
        let bytes = fs.read_file(&path)?;
        Self::from_bytes(&bytes)
    }

    pub fn boot_ids(&self) -> Vec<String> {
        self.boot_info.keys().cloned().collect()
    }
}
