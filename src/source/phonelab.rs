use super::{
    report, DateRange, ErrHandler, SourceError, SourceGenerator, SourceInfo, SourceInstance,
    StitchFileInfo, StitchInfo,
};
use crate::fs::{FsHandle, GzHint, OpenMode};
use crate::pipeline::{record_channel, Processor, RecordReceiver, SharedProcessor};
use crate::record::Record;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Resolve `info.json` glob patterns into a `device id -> [base path]` map.
///
/// Each matched path is expected to look like `<base>/<device>/info.json`.
pub fn device_paths_from_globs(
    fs: &FsHandle,
    patterns: &[String],
) -> Result<BTreeMap<String, Vec<PathBuf>>, SourceError> {
    let mut device_paths: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for pattern in patterns {
        for info_path in fs.glob(pattern)? {
            let Some(device_dir) = info_path.parent() else {
                continue;
            };
            let Some(device) = device_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let base = device_dir.parent().unwrap_or(device_dir).to_path_buf();
            let bases = device_paths.entry(device.to_string()).or_default();
            if !bases.contains(&base) {
                bases.push(base);
            }
        }
    }

    Ok(device_paths)
}

/// Clip a name-sorted archive list to a date range using the per-file start
/// timestamps from the stitch metadata.
///
/// The kept window begins at the last file whose start precedes the range
/// start (it may still contain in-range lines) and ends before the first
/// file whose start exceeds the range end.
fn clip_to_range(
    files: &[PathBuf],
    bounds: &BTreeMap<String, StitchFileInfo>,
    range: &DateRange,
) -> Vec<PathBuf> {
    let start_ns = range.start_nanos();
    let end_ns = range.end_nanos();

    let mut start_idx = 0;
    let mut end_idx = files.len();

    for (idx, file) in files.iter().enumerate() {
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(info) = bounds.get(name) else {
            continue;
        };
        if info.start < start_ns {
            start_idx = idx;
        }
        if info.start > end_ns {
            end_idx = idx;
            break;
        }
    }

    files[start_idx.min(end_idx)..end_idx].to_vec()
}

/// Emits the lines of one boot session: globs the boot's `*.gz` archives,
/// sorts them, clips to the configured date range, then streams each archive
/// in order.
pub struct PhonelabSourceProcessor {
    fs: FsHandle,
    base_path: PathBuf,
    device_id: String,
    boot_id: String,
    stitch: Arc<StitchInfo>,
    date_range: Option<DateRange>,
    err_handler: Option<ErrHandler>,
}

impl PhonelabSourceProcessor {
    pub fn new(
        fs: FsHandle,
        base_path: PathBuf,
        device_id: String,
        boot_id: String,
        stitch: Arc<StitchInfo>,
        date_range: Option<DateRange>,
        err_handler: Option<ErrHandler>,
    ) -> Self {
        Self {
            fs,
            base_path,
            device_id,
            boot_id,
            stitch,
            date_range,
            err_handler,
        }
    }

    fn boot_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let pattern = self
            .base_path
            .join(&self.device_id)
            .join(&self.boot_id)
            .join("*.gz");
        let mut files = self.fs.glob(&pattern.display().to_string())?;
        files.sort();

        if let Some(range) = &self.date_range {
            if let Some(bounds) = self.stitch.boot_info.get(&self.boot_id) {
                let clipped = clip_to_range(&files, bounds, range);
                debug!(
                    device = %self.device_id,
                    boot = %self.boot_id,
                    total = files.len(),
                    kept = clipped.len(),
                    "clipped boot archives to date range"
                );
                files = clipped;
            }
        }

        Ok(files)
    }
}

impl Processor for PhonelabSourceProcessor {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();
        let fs = self.fs.clone();
        let handler = self.err_handler.clone();
        let files = match self.boot_files() {
            Ok(files) => files,
            Err(err) => {
                report(&self.err_handler, err);
                Vec::new()
            }
        };

        tokio::spawn(async move {
            for path in files {
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
            }
        });

        rx
    }
}

/// One source instance per `(device, base path, boot id)`, discovered from
/// the device's stitch metadata.
pub struct PhonelabSourceGenerator {
    device_paths: BTreeMap<String, Vec<PathBuf>>,
    fs: FsHandle,
    date_range: Option<DateRange>,
    err_handler: Option<ErrHandler>,
}

impl PhonelabSourceGenerator {
    pub fn new(
        device_paths: BTreeMap<String, Vec<PathBuf>>,
        fs: FsHandle,
        date_range: Option<DateRange>,
        err_handler: Option<ErrHandler>,
    ) -> Self {
        Self {
            device_paths,
            fs,
            date_range,
            err_handler,
        }
    }
}

impl SourceGenerator for PhonelabSourceGenerator {
    fn instances(&self) -> mpsc::Receiver<SourceInstance> {
        let (tx, rx) = mpsc::channel(1);
        let device_paths = self.device_paths.clone();
        let fs = self.fs.clone();
        let date_range = self.date_range;
        let handler = self.err_handler.clone();

        tokio::spawn(async move {
            for (device, base_paths) in device_paths {
                for base_path in base_paths {
                    let device_dir = base_path.join(&device);
                    let stitch = match StitchInfo::load(&fs, &device_dir) {
                        Ok(stitch) => Arc::new(stitch),
                        Err(err) => {
                            report(
                                &handler,
                                SourceError::Stitch {
                                    device: device.clone(),
                                    source: err,
                                },
                            );
                            continue;
                        }
                    };

                    for boot_id in stitch.boot_ids() {
                        let processor: SharedProcessor = Arc::new(PhonelabSourceProcessor::new(
                            fs.clone(),
                            base_path.clone(),
                            device.clone(),
                            boot_id.clone(),
                            stitch.clone(),
                            date_range,
                            handler.clone(),
                        ));
                        let info = SourceInfo::Device {
                            device_id: device.clone(),
                            boot_id,
                            base_path: base_path.clone(),
                            fs: fs.clone(),
                            date_range,
                        };
                        if tx.send(SourceInstance { processor, info }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }
}
