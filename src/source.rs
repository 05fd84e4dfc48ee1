use crate::model::{SongBatch, SongEvent};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub const NO_SONG_NOTES: &str = "No song notes found.";

const PROFILE_PICTURE_SUFFIX: &str = "'s profile picture";

/// What one poll of a song source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePoll {
    Songs(SongBatch),
    Empty(String),
}

/// Anything that can hand the poll loop a batch of song events. Errors mean
/// the source itself failed; "nothing new" is [`SourcePoll::Empty`].
pub trait SongEventSource {
    fn fetch(&mut self) -> Result<SourcePoll>;
}

/// One row as scraped from the inbox notes tray.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScrapedNote {
    pub user: String,
    pub song: String,
    pub artist: String,
    #[serde(default)]
    pub note: String,
}

/// The notes tray labels avatars `"<user>'s profile picture"`.
pub fn username_from_alt(alt: &str) -> &str {
    alt.split_once(PROFILE_PICTURE_SUFFIX)
        .map_or(alt, |(name, _)| name)
        .trim()
}

/// Groups scraped rows by user, keeping first-seen user order and row order.
/// Rows without a title or artist, or whose title is just the artist name,
/// are not song notes and are skipped.
pub fn group_by_user(notes: impl IntoIterator<Item = ScrapedNote>) -> SongBatch {
    let mut batch = SongBatch::new();
    for note in notes {
        let user = note.user.trim();
        let song = note.song.trim();
        let artist = note.artist.trim();
        if user.is_empty() || song.is_empty() || artist.is_empty() || song == artist {
            debug!(user, song, artist, "skipping row that is not a song note");
            continue;
        }
        batch.push(
            user,
            SongEvent::new(song, artist).with_note(note.note.trim()),
        );
    }
    batch
}

/// Reads song events from a JSON drop file written by an external scraper.
///
/// Accepted shapes: a flat list of scraped rows, a username to songs mapping,
/// or the scraper's status objects `{"message": ..}` and `{"error": ..}`.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SongEventSource for JsonFileSource {
    fn fetch(&mut self) -> Result<SourcePoll> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no song drop file");
            return Ok(SourcePoll::Empty(String::from(NO_SONG_NOTES)));
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        poll_from_value(value)
    }
}

fn poll_from_value(value: Value) -> Result<SourcePoll> {
    let batch = if let Some(object) = value.as_object() {
        if let Some(reason) = object.get("error") {
            anyhow::bail!("song source reported an error: {}", status_text(reason));
        }
        if let Some(message) = object.get("message") {
            return Ok(SourcePoll::Empty(status_text(message)));
        }
        if object.is_empty() {
            SongBatch::new()
        } else {
            SongBatch::from_value(&value)?
        }
    } else if value.is_array() {
        let rows: Vec<ScrapedNote> =
            serde_json::from_value(value).context("invalid scraped note rows")?;
        info!(rows = rows.len(), "grouping scraped notes by user");
        group_by_user(rows)
    } else {
        anyhow::bail!("unexpected song source payload: {value}");
    };

    if batch.is_empty() {
        return Ok(SourcePoll::Empty(String::from(NO_SONG_NOTES)));
    }
    Ok(SourcePoll::Songs(batch))
}

fn status_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
