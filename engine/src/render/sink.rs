//! Where finished documents go.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default name of the output directory created beside the data source.
pub const OUTPUT_DIR_NAME: &str = "documents";

/// How many `_<n>` suffixes are tried after the plain name fails.
pub const DEFAULT_NAME_ATTEMPTS: usize = 20;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot create output directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no writable file name for '{name}' after {attempts} attempts: {source}")]
    Exhausted {
        name: String,
        attempts: usize,
        #[source]
        source: io::Error,
    },
}

/// Receives one PDF per row.
pub trait DocumentSink {
    /// Called once before the first document. A failure here aborts the run.
    fn prepare(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Store `bytes` under (a variant of) `name`, without extension. Returns
    /// where the document ended up.
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, SinkError>;
}

/// Writes `<dir>/<name>.pdf`, replacing an existing file. When the target
/// cannot be replaced (open in a viewer, read-only, a directory in the way)
/// `<name>_1.pdf`, `<name>_2.pdf`, ... are tried instead.
#[derive(Debug, Clone)]
pub struct FsSink {
    dir: PathBuf,
    attempts: usize,
}

impl FsSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            attempts: DEFAULT_NAME_ATTEMPTS,
        }
    }

    /// `documents/` beside `data_path` (inside it when it is a directory).
    pub fn beside(data_path: &Path) -> Self {
        Self::new(default_output_dir(data_path))
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidate(&self, name: &str, attempt: usize) -> PathBuf {
        if attempt == 0 {
            self.dir.join(format!("{}.pdf", name))
        } else {
            self.dir.join(format!("{}_{}.pdf", name, attempt))
        }
    }
}

impl DocumentSink for FsSink {
    fn prepare(&mut self) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir).map_err(|source| SinkError::Directory {
            path: self.dir.clone(),
            source,
        })
    }

    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, SinkError> {
        let mut last = io::Error::other("no attempt made");
        for attempt in 0..=self.attempts {
            let target = self.candidate(name, attempt);
            match replace_file(&target, bytes) {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::warn!(
                            wanted = %self.candidate(name, 0).display(),
                            written = %target.display(),
                            "output file was not writable, used another name"
                        );
                    }
                    return Ok(target);
                }
                Err(e) => {
                    tracing::debug!(path = %target.display(), error = %e, "cannot write output candidate");
                    last = e;
                }
            }
        }
        Err(SinkError::Exhausted {
            name: name.to_string(),
            attempts: self.attempts + 1,
            source: last,
        })
    }
}

/// `documents/` beside the data source.
pub fn default_output_dir(data_path: &Path) -> PathBuf {
    let base = if data_path.is_dir() {
        data_path
    } else {
        data_path.parent().unwrap_or_else(|| Path::new("."))
    };
    base.join(OUTPUT_DIR_NAME)
}

/// Write to `<target>.tmp`, then rename over `target`.
fn replace_file(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = fs::File::create(&tmp)
        .and_then(|mut f| f.write_all(bytes))
        .and_then(|_| fs::rename(&tmp, target));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Collects documents in memory. Useful for previews and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub documents: Vec<(String, Vec<u8>)>,
}

impl DocumentSink for MemorySink {
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, SinkError> {
        self.documents.push((name.to_string(), bytes.to_vec()));
        Ok(PathBuf::from(format!("{}.pdf", name)))
    }
}
