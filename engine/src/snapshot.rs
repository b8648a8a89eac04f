//! # Configuration Snapshots
//!
//! The durable form of a template: page, elements, groups, allocation
//! counters and the data source it was last used with. Stored as JSON next to
//! the data (`config.json`) with a copy in the user's home directory so a
//! template survives the data folder being moved or cleaned.
//!
//! Floats are written and parsed round-trip exact (`serde_json`'s
//! `float_roundtrip`), so save then load reproduces the template bit for bit.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{json_hint, with_hint};
use crate::model::{Command, Element, Group, ModelError, Page, Template};

pub const SNAPSHOT_VERSION: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "config.json";
const BACKUP_DIR_NAME: &str = ".rowpress";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {}", with_hint(.source, .hint))]
    Parse {
        #[source]
        source: serde_json::Error,
        hint: String,
    },
    #[error("configuration describes an invalid template: {0}")]
    Invalid(#[from] ModelError),
    #[error("configuration format version {0} is newer than this build understands")]
    UnsupportedVersion(u32),
    #[error("{0} is locked by another writer")]
    Locked(PathBuf),
    #[error("no saved configuration found")]
    NotFound,
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        let hint = json_hint(&e);
        SnapshotError::Parse { source: e, hint }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The serialized template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub version: u32,
    pub page: Page,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub groups: Vec<Group>,
    pub next_id: u64,
    pub next_z: u64,
    /// Data source the template was last generated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
}

impl ConfigSnapshot {
    pub fn capture(template: &Template, data_path: Option<&Path>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            page: template.page,
            elements: template.elements.values().cloned().collect(),
            groups: template.groups.values().cloned().collect(),
            next_id: template.next_id,
            next_z: template.next_z,
            data_path: data_path.map(Path::to_path_buf),
        }
    }

    /// Rebuild the template. Every element and group goes through the same
    /// validation as an interactive edit.
    pub fn to_template(&self) -> Result<Template, SnapshotError> {
        if self.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        let mut template = Template::new(self.page);
        template.apply(Command::SetPageSize { size: self.page.size() })?;
        for element in &self.elements {
            template.apply(Command::AddElement {
                element: element.clone(),
            })?;
        }
        for group in &self.groups {
            template.apply(Command::AddGroup { group: group.clone() })?;
        }
        template.next_id = template.next_id.max(self.next_id);
        template.next_z = template.next_z.max(self.next_z);
        Ok(template)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Where a loaded snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    Primary,
    Backup,
}

/// Reads and writes snapshots at a primary location with a backup copy.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    primary: PathBuf,
    backup: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn new(primary: impl Into<PathBuf>, backup: Option<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            backup,
        }
    }

    /// `config.json` in the directory holding `data_path` (or in `data_path`
    /// itself when it is a directory), backed up under `~/.rowpress/`.
    pub fn beside(data_path: &Path) -> Self {
        let dir = if data_path.is_dir() {
            data_path.to_path_buf()
        } else {
            data_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        };
        Self::new(dir.join(CONFIG_FILE_NAME), default_backup_path())
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Write the primary file under its lock, then refresh the backup. A
    /// failing backup is logged and does not fail the save.
    pub fn save(&self, snapshot: &ConfigSnapshot) -> Result<(), SnapshotError> {
        let json = snapshot.to_json()?;
        {
            let _lock = LockFile::acquire(&self.primary)?;
            write_atomically(&self.primary, json.as_bytes())?;
        }
        tracing::debug!(path = %self.primary.display(), "configuration saved");

        if let Some(backup) = &self.backup {
            let result = backup
                .parent()
                .map(|dir| fs::create_dir_all(dir).map_err(io_err(dir)))
                .unwrap_or(Ok(()))
                .and_then(|_| write_atomically(backup, json.as_bytes()));
            if let Err(e) = result {
                tracing::warn!(path = %backup.display(), error = %e, "could not refresh configuration backup");
            }
        }
        Ok(())
    }

    /// Load the primary file, falling back to the backup when it is missing
    /// or unreadable.
    pub fn load(&self) -> Result<(ConfigSnapshot, LoadOrigin), SnapshotError> {
        let primary = read_snapshot(&self.primary);
        let primary_err = match primary {
            Ok(snapshot) => return Ok((snapshot, LoadOrigin::Primary)),
            Err(e) => e,
        };
        let Some(backup) = &self.backup else {
            return Err(not_found_or(primary_err));
        };
        match read_snapshot(backup) {
            Ok(snapshot) => {
                tracing::warn!(
                    primary = %self.primary.display(),
                    error = %primary_err,
                    "primary configuration unavailable, loaded backup"
                );
                Ok((snapshot, LoadOrigin::Backup))
            }
            Err(_) => Err(not_found_or(primary_err)),
        }
    }
}

/// `~/.rowpress/config.json`, when a home directory is known.
pub fn default_backup_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(BACKUP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn not_found_or(e: SnapshotError) -> SnapshotError {
    match e {
        SnapshotError::Io { ref source, .. } if source.kind() == io::ErrorKind::NotFound => SnapshotError::NotFound,
        other => other,
    }
}

fn read_snapshot(path: &Path) -> Result<ConfigSnapshot, SnapshotError> {
    let json = fs::read_to_string(path).map_err(io_err(path))?;
    ConfigSnapshot::from_json(&json)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err(path))
}

/// `<file>.lock` beside the guarded file, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(target: &Path) -> Result<Self, SnapshotError> {
        let mut name = target.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(SnapshotError::Locked(target.to_path_buf())),
            Err(e) => Err(SnapshotError::Io { path, source: e }),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
