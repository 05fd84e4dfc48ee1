use crate::error::HistoryError;
use crate::model::{HistoryDocument, MergeReport, SongBatch};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, warn};

pub const HISTORY_FILE: &str = "songs_data.json";

/// Result of reading the history file.
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub document: HistoryDocument,
    /// The file was present but not valid JSON, so an empty document stands
    /// in for it.
    pub recovered: bool,
}

/// Owns the persisted history file. Every merge is a full
/// load, merge and rewrite; nothing is cached between calls.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Loaded, HistoryError> {
        load_from_path(&self.path)
    }

    /// Merges a validated batch and rewrites the file.
    ///
    /// Calls on the same store are serialized; separate processes writing the
    /// same file are not coordinated.
    pub fn merge_batch(&self, batch: &SongBatch) -> Result<MergeReport, HistoryError> {
        self.merge_batch_at(batch, OffsetDateTime::now_utc())
    }

    /// Validates a loosely shaped payload, then merges it. Payload errors are
    /// returned before the file system is touched.
    pub fn merge_value(&self, payload: &Value) -> Result<MergeReport, HistoryError> {
        let batch = SongBatch::from_value(payload)?;
        self.merge_batch(&batch)
    }

    /// Boolean entry point for webhook handlers and the poll loop. Failures are
    /// logged here and never propagate.
    pub fn save_song_history(&self, payload: &Value) -> bool {
        info!(path = %self.path.display(), "saving song history");
        debug!(%payload, "received payload");

        match self.merge_value(payload) {
            Ok(report) => {
                info!(
                    users = report.users,
                    new_users = report.new_users,
                    songs_added = report.songs_added,
                    notes_added = report.notes_added,
                    "song history saved"
                );
                true
            }
            Err(err) if err.is_input_error() => {
                error!(error = %err, "rejected song history payload");
                false
            }
            Err(err) => {
                error!(error = %err, path = %self.path.display(), "failed to save song history");
                false
            }
        }
    }

    fn merge_batch_at(
        &self,
        batch: &SongBatch,
        now: OffsetDateTime,
    ) -> Result<MergeReport, HistoryError> {
        if batch.is_empty() {
            return Err(HistoryError::InvalidPayload(String::from(
                "payload has no users",
            )));
        }

        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        ensure_parent_dir(&self.path)?;
        let Loaded { mut document, .. } = load_from_path(&self.path)?;
        let report = document.apply(batch);
        document.last_updated = next_timestamp(&document.last_updated, now)?;

        debug!(path = %self.path.display(), "writing history document");
        save_to_path(&self.path, &document)?;
        Ok(report)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), HistoryError> {
    let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
    }
    fs::create_dir_all(dir).map_err(|source| HistoryError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

fn load_from_path(path: &Path) -> Result<Loaded, HistoryError> {
    if !path.exists() {
        info!(path = %path.display(), "history file not found, starting empty");
        return Ok(Loaded::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| HistoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value = match serde_json::from_str::<Value>(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "could not decode JSON from history file, starting with an empty structure"
            );
            return Ok(Loaded {
                document: HistoryDocument::default(),
                recovered: true,
            });
        }
    };

    // Valid JSON in the wrong shape is left alone on disk.
    let document = serde_json::from_value(value).map_err(|source| HistoryError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Loaded {
        document,
        recovered: false,
    })
}

fn save_to_path(path: &Path, document: &HistoryDocument) -> Result<(), HistoryError> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    document.serialize(&mut serializer)?;
    write_atomic(path, &out)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HistoryError> {
    let temp = temp_path(path);
    let written = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(source) = written {
        let _ = fs::remove_file(&temp);
        return Err(HistoryError::Write { path: temp, source });
    }

    fs::rename(&temp, path).map_err(|source| {
        let _ = fs::remove_file(&temp);
        HistoryError::Rename {
            from: temp.clone(),
            to: path.to_path_buf(),
            source,
        }
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from(HISTORY_FILE));
    name.push(".tmp");
    path.with_file_name(name)
}

/// RFC 3339 in UTC, never earlier than the stamp already on disk.
fn next_timestamp(previous: &str, now: OffsetDateTime) -> Result<String, HistoryError> {
    let stamp = match OffsetDateTime::parse(previous, &Rfc3339) {
        Ok(previous) if previous > now => previous,
        _ => now,
    };
    Ok(stamp.format(&Rfc3339)?)
}
