//! Folder-backed persistence for snapshots.
//!
//! Each snapshot lives in its own `<name>.json` file. Writes go to a temp
//! file that is fsynced and renamed over the target, so a crash leaves either
//! the old file or the new one. File handles are scoped to the call that
//! opened them and closed on every return path.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use super::SnapshotCodec;
use crate::error::Result;
use crate::history::HistoryBuffer;
use crate::preamble::PreambleExpander;
use crate::tokenizer::Tokenizer;

const EXTENSION: &str = "json";

/// Saves and loads snapshots in a single folder.
///
/// # Example
/// ```ignore
/// use chatlog::SnapshotStore;
///
/// let store = SnapshotStore::new("chat_log_saves");
/// store.save("weather", &buffer, false)?;
/// let restored = store.load("weather", tokenizer)?;
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    folder: PathBuf,
}

impl SnapshotStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// The file a snapshot name maps to. A trailing `.json` is optional.
    ///
    /// Names must stay inside the store folder: empty names, path
    /// separators, `..` and a leading `.` are rejected.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let stem = name.strip_suffix(".json").unwrap_or(name);
        if stem.is_empty() || stem.starts_with('.') || stem.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid snapshot name `{name}`"),
            )
            .into());
        }
        Ok(self.folder.join(format!("{stem}.{EXTENSION}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    /// Snapshot `buffer` into `<name>.json`.
    ///
    /// Returns `false` without touching the disk when the file already exists
    /// and `overwrite` is not set.
    pub fn save(&self, name: &str, buffer: &HistoryBuffer, overwrite: bool) -> Result<bool> {
        let path = self.path_for(name)?;
        if path.exists() && !overwrite {
            tracing::debug!(path = %path.display(), "snapshot exists, not overwriting");
            return Ok(false);
        }

        let snapshot = SnapshotCodec::snapshot(buffer)?;
        fs::create_dir_all(&self.folder)?;

        let temp_path = path.with_file_name(format!(
            ".{}.tmp.{}",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id()
        ));

        if let Err(e) = write_json(&temp_path, &snapshot) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            if let Ok(dir) = File::open(&self.folder) {
                let _ = dir.sync_all();
            }
        }

        tracing::info!(
            path = %path.display(),
            messages = snapshot.full_log.len(),
            size = snapshot.size,
            "snapshot saved"
        );
        Ok(true)
    }

    /// Read the raw document stored under `name`.
    pub fn read(&self, name: &str) -> Result<Value> {
        let path = self.path_for(name)?;
        let file = File::open(&path)?;
        let document = serde_json::from_reader(BufReader::new(file))?;
        Ok(document)
    }

    /// Restore a new buffer from `<name>.json`, resolving dynamic wildcards
    /// against the built-in capabilities.
    pub fn load(&self, name: &str, tokenizer: Arc<dyn Tokenizer>) -> Result<HistoryBuffer> {
        self.load_with(name, tokenizer, &PreambleExpander::new())
    }

    /// Restore a new buffer from `<name>.json`, resolving dynamic wildcards
    /// against `resolver` first.
    pub fn load_with(
        &self,
        name: &str,
        tokenizer: Arc<dyn Tokenizer>,
        resolver: &PreambleExpander,
    ) -> Result<HistoryBuffer> {
        let document = self.read(name)?;
        let buffer = SnapshotCodec::restore_with(&document, tokenizer, resolver)?;
        tracing::info!(name, buffer = %buffer.id(), "snapshot loaded");
        Ok(buffer)
    }

    /// Replace `buffer` with the snapshot in `<name>.json`. On failure the
    /// buffer is unchanged.
    pub fn load_into(&self, name: &str, buffer: &mut HistoryBuffer) -> Result<()> {
        let document = self.read(name)?;
        SnapshotCodec::restore_into(&document, buffer)?;
        tracing::info!(name, buffer = %buffer.id(), "snapshot loaded");
        Ok(())
    }

    /// Names of stored snapshots, sorted, without the `.json` suffix.
    ///
    /// A folder that does not exist yet holds no snapshots.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn write_json(path: &Path, snapshot: &super::Snapshot) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
