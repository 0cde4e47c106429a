use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("error globbing '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::GlobError,
    },

    #[error("'{0}' is open for writing, not reading")]
    NotReadable(PathBuf),

    #[error("'{0}' is open for reading, not writing")]
    NotWritable(PathBuf),
}

impl FsError {
    fn io(path: &Path, source: io::Error) -> Self {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Compression hint for [`Filesystem::open`]: force gzip, force plain, or
/// deduce from the `.gz`/`.tgz` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GzHint {
    Gzip,
    Plain,
    Auto,
}

impl GzHint {
    fn is_gzip(self, path: &Path) -> bool {
        match self {
            GzHint::Gzip => true,
            GzHint::Plain => false,
            GzHint::Auto => matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("gz") | Some("tgz")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// An open file: either a buffered (possibly decompressing) reader or a
/// (possibly compressing) writer.
pub struct FsFile {
    path: PathBuf,
    inner: FileInner,
}

impl std::fmt::Debug for FsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsFile").field("path", &self.path).finish_non_exhaustive()
    }
}

enum FileInner {
    Read(Box<dyn BufRead + Send>),
    Write(Box<dyn Write + Send>),
}

impl FsFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the file as a line scanner.
    pub fn lines(self) -> Result<LineScanner, FsError> {
        match self.inner {
            FileInner::Read(reader) => Ok(LineScanner { reader }),
            FileInner::Write(_) => Err(FsError::NotReadable(self.path)),
        }
    }

    /// Consume the file as a raw byte reader.
    pub fn into_reader(self) -> Result<Box<dyn Read + Send>, FsError> {
        match self.inner {
            FileInner::Read(reader) => Ok(Box::new(reader)),
            FileInner::Write(_) => Err(FsError::NotReadable(self.path)),
        }
    }

    pub fn into_writer(self) -> Result<Box<dyn Write + Send>, FsError> {
        match self.inner {
            FileInner::Write(writer) => Ok(writer),
            FileInner::Read(_) => Err(FsError::NotWritable(self.path)),
        }
    }
}

/// Iterator over the lines of an [`FsFile`], with the trailing newline
/// stripped.
pub struct LineScanner {
    reader: Box<dyn BufRead + Send>,
}

impl Iterator for LineScanner {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(&['\n', '\r'][..]).len();
                line.truncate(trimmed);
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Uniform file access over local and remote stores. Remote drivers (HDFS,
/// HTTP) are supplied by host code; [`LocalFs`] is the built-in driver.
pub trait Filesystem: Send + Sync {
    fn open(&self, path: &Path, mode: OpenMode, gz: GzHint) -> Result<FsFile, FsError>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, FsError>;

    fn exists(&self, path: &Path) -> bool;

    fn makedirs_all(&self, path: &Path) -> Result<(), FsError>;

    fn remove(&self, path: &Path) -> Result<(), FsError>;

    fn remove_all(&self, path: &Path) -> Result<(), FsError>;
}

pub type FsHandle = Arc<dyn Filesystem>;

/// The local filesystem driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    pub fn handle() -> FsHandle {
        Arc::new(LocalFs)
    }
}

impl Filesystem for LocalFs {
    fn open(&self, path: &Path, mode: OpenMode, gz: GzHint) -> Result<FsFile, FsError> {
        let gzip = gz.is_gzip(path);
        let inner = match mode {
            OpenMode::Read => {
                let file = fs::File::open(path).map_err(|e| FsError::io(path, e))?;
                let reader: Box<dyn BufRead + Send> = if gzip {
                    Box::new(BufReader::new(MultiGzDecoder::new(file)))
                } else {
                    Box::new(BufReader::new(file))
                };
                FileInner::Read(reader)
            }
            OpenMode::Write => {
                let file = fs::File::create(path).map_err(|e| FsError::io(path, e))?;
                let writer: Box<dyn Write + Send> = if gzip {
                    Box::new(GzEncoder::new(file, Compression::default()))
                } else {
                    Box::new(file)
                };
                FileInner::Write(writer)
            }
        };

        Ok(FsFile {
            path: path.to_path_buf(),
            inner,
        })
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(path).map_err(|e| FsError::io(path, e))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, FsError> {
        let paths = glob::glob(pattern).map_err(|source| FsError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut out = Vec::new();
        for entry in paths {
            let path = entry.map_err(|source| FsError::Glob {
                pattern: pattern.to_string(),
                source,
            })?;
            out.push(path);
        }
        Ok(out)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn makedirs_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| FsError::io(path, e))
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|e| FsError::io(path, e))
    }

    fn remove_all(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_dir_all(path).map_err(|e| FsError::io(path, e))
    }
}
