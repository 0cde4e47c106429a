pub mod daterange;
pub mod phonelab;
pub mod stitch;

pub use daterange::{DateRange, DateRangeError};
pub use phonelab::{device_paths_from_globs, PhonelabSourceGenerator, PhonelabSourceProcessor};
pub use stitch::{StitchError, StitchFileInfo, StitchInfo};

use crate::fs::{FsError, FsHandle, GzHint, OpenMode};
use crate::pipeline::{record_channel, Processor, RecordReceiver, SharedProcessor};
use crate::record::Record;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("error reading '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad stitch metadata for device '{device}': {source}")]
    Stitch {
        device: String,
        #[source]
        source: StitchError,
    },

    #[error("invalid date range: {0}")]
    DateRange(#[from] DateRangeError),
}

/// Callback invoked on source-side I/O failures. Sources constructed without
/// a handler terminate on the first failure instead.
pub type ErrHandler = Arc<dyn Fn(SourceError) + Send + Sync>;

pub(crate) fn report(handler: &Option<ErrHandler>, err: SourceError) {
    match handler {
        Some(handler) => handler(err),
        None => panic!("source error with no error handler configured: {err}"),
    }
}

/// Typed metadata describing where a pipeline's records come from. The
/// `context` names collector output scopes.
#[derive(Clone)]
pub enum SourceInfo {
    File {
        file_name: String,
    },
    Device {
        device_id: String,
        boot_id: String,
        base_path: PathBuf,
        fs: FsHandle,
        date_range: Option<DateRange>,
    },
}

impl SourceInfo {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceInfo::File { .. } => "file",
            SourceInfo::Device { .. } => "phonelab-device",
        }
    }

    pub fn context(&self) -> String {
        match self {
            SourceInfo::File { file_name } => file_name.clone(),
            SourceInfo::Device {
                device_id, boot_id, ..
            } => format!("{device_id}->{boot_id}"),
        }
    }
}

impl fmt::Debug for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceInfo::File { file_name } => {
                f.debug_struct("File").field("file_name", file_name).finish()
            }
            SourceInfo::Device {
                device_id,
                boot_id,
                base_path,
                date_range,
                ..
            } => f
                .debug_struct("Device")
                .field("device_id", device_id)
                .field("boot_id", boot_id)
                .field("base_path", base_path)
                .field("date_range", date_range)
                .finish(),
        }
    }
}

/// One independently-buildable pipeline input: a string-producing processor
/// plus the metadata describing it.
#[derive(Clone)]
pub struct SourceInstance {
    pub processor: SharedProcessor,
    pub info: SourceInfo,
}

/// Enumerates the source instances a runner should build pipelines for.
pub trait SourceGenerator: Send + Sync {
    fn instances(&self) -> mpsc::Receiver<SourceInstance>;
}

/// Emits the lines of a single text file, decompressing by extension. Each
/// `process` call re-opens the file, so re-entry is cheap and idempotent.
pub struct TextFileProcessor {
    path: PathBuf,
    fs: FsHandle,
    err_handler: Option<ErrHandler>,
}

impl TextFileProcessor {
    pub fn new(path: PathBuf, fs: FsHandle, err_handler: Option<ErrHandler>) -> Self {
        Self {
            path,
            fs,
            err_handler,
        }
    }
}

impl Processor for TextFileProcessor {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();
        let path = self.path.clone();
        let fs = self.fs.clone();
        let handler = self.err_handler.clone();

        tokio::spawn(async move {
            let lines = match fs
                .open(&path, OpenMode::Read, GzHint::Auto)
                .and_then(|file| file.lines())
            {
                Ok(lines) => lines,
                Err(err) => {
                    report(&handler, err.into());
                    return;
                }
            };

            for line in lines {
                match line {
                    Ok(text) => {
                        if tx.send(Record::line(text)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        // Report and end the stream; closure propagates
                        // downstream.
                        report(
                            &handler,
                            SourceError::Read {
                                path: path.clone(),
                                source: err,
                            },
                        );
                        return;
                    }
                }
            }
        });

        rx
    }
}

/// One [`TextFileProcessor`] source instance per file.
pub struct TextFileSourceGenerator {
    files: Vec<PathBuf>,
    fs: FsHandle,
    err_handler: Option<ErrHandler>,
}

impl TextFileSourceGenerator {
    pub fn new(files: Vec<PathBuf>, fs: FsHandle, err_handler: Option<ErrHandler>) -> Self {
        Self {
            files,
            fs,
            err_handler,
        }
    }
}

impl SourceGenerator for TextFileSourceGenerator {
    fn instances(&self) -> mpsc::Receiver<SourceInstance> {
        let (tx, rx) = mpsc::channel(1);
        let files = self.files.clone();
        let fs = self.fs.clone();
        let handler = self.err_handler.clone();

        tokio::spawn(async move {
            for path in files {
                let info = SourceInfo::File {
                    file_name: path.display().to_string(),
                };
                let processor: SharedProcessor =
                    Arc::new(TextFileProcessor::new(path, fs.clone(), handler.clone()));
                if tx.send(SourceInstance { processor, info }).await.is_err() {
                    return;
                }
            }
        });

        rx
    }
}
