use crate::error::HistoryError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info};

/// One shared song, as reported by a follower's note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongEvent {
    pub song: String,
    pub artist: String,
    pub note: String,
}

impl SongEvent {
    pub fn new(song: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            song: song.into(),
            artist: artist.into(),
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Dedup key: `"{song} by {artist}"`, compared exactly.
    pub fn identity(&self) -> String {
        format!("{} by {}", self.song, self.artist)
    }
}

/// Hand-edited files sometimes carry `null` where a string or list belongs.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub new_song: bool,
    pub new_note: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHistory {
    #[serde(rename = "songs-played", default, deserialize_with = "null_as_default")]
    pub songs_played: Vec<String>,
    #[serde(rename = "current-played", default, deserialize_with = "null_as_default")]
    pub current_played: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub notes: Vec<String>,
    /// Keys this tool does not manage, kept as found.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl UserHistory {
    /// Applies one event. `current_played` and `note` always take the event's
    /// values, an empty note included; the lists only grow.
    pub fn record(&mut self, event: &SongEvent) -> RecordOutcome {
        let identity = event.identity();
        let new_song = !self.songs_played.contains(&identity);
        if new_song {
            self.songs_played.push(identity.clone());
        }
        self.current_played = identity;
        self.note.clone_from(&event.note);

        let new_note = !event.note.is_empty() && !self.notes.contains(&event.note);
        if new_note {
            self.notes.push(event.note.clone());
        }

        RecordOutcome { new_song, new_note }
    }
}

/// Username to history mapping that keeps first-seen order on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTable {
    entries: Vec<(String, UserHistory)>,
    lookup: HashMap<String, usize>,
}

impl UserTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, username: &str) -> Option<&UserHistory> {
        self.lookup
            .get(username)
            .map(|&index| &self.entries[index].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UserHistory)> {
        self.entries
            .iter()
            .map(|(name, history)| (name.as_str(), history))
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the user's history, inserting an empty one at the end when the
    /// username is new. The flag reports whether an insert happened.
    pub fn entry_or_default(&mut self, username: &str) -> (&mut UserHistory, bool) {
        let (index, created) = match self.lookup.get(username) {
            Some(&index) => (index, false),
            None => {
                let index = self.entries.len();
                self.entries
                    .push((username.to_string(), UserHistory::default()));
                self.lookup.insert(username.to_string(), index);
                (index, true)
            }
        };
        (&mut self.entries[index].1, created)
    }

    fn insert(&mut self, username: String, history: UserHistory) {
        match self.lookup.get(&username) {
            Some(&index) => self.entries[index].1 = history,
            None => {
                self.lookup.insert(username.clone(), self.entries.len());
                self.entries.push((username, history));
            }
        }
    }
}

impl Serialize for UserTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, history) in &self.entries {
            map.serialize_entry(name, history)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UserTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = deserializer.deserialize_map(OrderedMapVisitor::<UserHistory>::new())?;
        let mut table = UserTable::default();
        for (name, history) in entries {
            table.insert(name, history);
        }
        Ok(table)
    }
}

struct OrderedMapVisitor<V> {
    marker: PhantomData<V>,
}

impl<V> OrderedMapVisitor<V> {
    fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<'de, V> Visitor<'de> for OrderedMapVisitor<V>
where
    V: Deserialize<'de>,
{
    type Value = Vec<(String, V)>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map keyed by username")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            out.push((key, value));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub users: usize,
    pub new_users: usize,
    pub songs_added: usize,
    pub notes_added: usize,
}

/// The persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_updated: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: UserTable,
}

impl HistoryDocument {
    pub fn user(&self, username: &str) -> Option<&UserHistory> {
        self.users.get(username)
    }

    /// Folds a batch into the document in batch order. Does not touch
    /// `last_updated`.
    pub fn apply(&mut self, batch: &SongBatch) -> MergeReport {
        let mut report = MergeReport::default();
        for (username, events) in batch.iter() {
            debug!(user = username, events = events.len(), "processing user");
            let (history, created) = self.users.entry_or_default(username);
            report.users += 1;
            if created {
                report.new_users += 1;
            }

            for event in events {
                let outcome = history.record(event);
                if outcome.new_song {
                    info!(user = username, song = %history.current_played, "adding new song");
                    report.songs_added += 1;
                } else {
                    debug!(user = username, song = %history.current_played, "song already known");
                }
                if outcome.new_note {
                    info!(user = username, note = %event.note, "adding new note");
                    report.notes_added += 1;
                }
            }
        }
        report
    }
}

/// Per-user song events from one poll or webhook call, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongBatch {
    users: Vec<(String, Vec<SongEvent>)>,
}

impl SongBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SongEvent])> {
        self.users
            .iter()
            .map(|(name, events)| (name.as_str(), events.as_slice()))
    }

    pub fn events(&self, username: &str) -> Option<&[SongEvent]> {
        self.users
            .iter()
            .find(|(name, _)| name == username)
            .map(|(_, events)| events.as_slice())
    }

    /// Appends an event, registering the user on first sight.
    pub fn push(&mut self, username: &str, event: SongEvent) {
        match self.users.iter_mut().find(|(name, _)| name == username) {
            Some((_, events)) => events.push(event),
            None => self.users.push((username.to_string(), vec![event])),
        }
    }

    pub fn with_user(mut self, username: &str, events: Vec<SongEvent>) -> Self {
        match self.users.iter_mut().find(|(name, _)| name == username) {
            Some((_, existing)) => existing.extend(events),
            None => self.users.push((username.to_string(), events)),
        }
        self
    }

    /// Validates a loosely shaped JSON payload. Any bad record rejects the
    /// whole batch.
    pub fn from_value(payload: &Value) -> Result<Self, HistoryError> {
        let Some(object) = payload.as_object() else {
            return Err(HistoryError::InvalidPayload(format!(
                "expected a mapping of username to songs, got {}",
                json_kind(payload)
            )));
        };
        if object.is_empty() {
            return Err(HistoryError::InvalidPayload(String::from(
                "payload has no users",
            )));
        }

        let mut batch = SongBatch::new();
        for (username, songs) in object {
            let Some(items) = songs.as_array() else {
                return Err(HistoryError::InvalidPayload(format!(
                    "songs for user {username} must be a list, got {}",
                    json_kind(songs)
                )));
            };
            let mut events = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                events.push(event_from_value(username, index, item)?);
            }
            batch = batch.with_user(username, events);
        }
        Ok(batch)
    }
}

fn event_from_value(user: &str, index: usize, item: &Value) -> Result<SongEvent, HistoryError> {
    let malformed = |field| HistoryError::MalformedEvent {
        user: user.to_string(),
        index,
        field,
    };
    let required = |field: &'static str| match item.get(field).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(malformed(field)),
    };

    let song = required("song")?;
    let artist = required("artist")?;
    let note = match item.get("note") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(_) => return Err(malformed("note")),
    };
    Ok(SongEvent { song, artist, note })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
