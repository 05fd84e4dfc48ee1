use serde_json::{Value, json};
use songnote::HistoryStore;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn stored(store: &HistoryStore) -> Value {
    let raw = fs::read_to_string(store.path()).expect("read history");
    serde_json::from_str(&raw).expect("history is json")
}

#[test]
fn same_batch_twice_records_song_once() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());
    let payload = json!({"u": [{"song": "A", "artist": "X", "note": "n1"}]});

    assert!(store.save_song_history(&payload));
    assert!(store.save_song_history(&payload));

    let doc = stored(&store);
    assert_eq!(doc["users"]["u"]["songs-played"], json!(["A by X"]));
    assert_eq!(doc["users"]["u"]["notes"], json!(["n1"]));
}

#[test]
fn latest_event_wins_and_notes_accumulate() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());

    assert!(store.save_song_history(&json!({
        "u": [
            {"song": "A", "artist": "X", "note": "n1"},
            {"song": "B", "artist": "X", "note": ""}
        ]
    })));

    let user = &stored(&store)["users"]["u"];
    assert_eq!(user["current-played"], "B by X");
    assert_eq!(user["note"], "");
    assert_eq!(user["notes"], json!(["n1"]));
}

#[test]
fn separate_calls_accumulate_in_order() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());

    assert!(store.save_song_history(&json!({"u": [{"song": "A", "artist": "X"}]})));
    assert!(store.save_song_history(&json!({"u": [{"song": "B", "artist": "X"}]})));

    assert_eq!(
        stored(&store)["users"]["u"]["songs-played"],
        json!(["A by X", "B by X"])
    );
}

#[test]
fn users_do_not_share_history() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());

    assert!(store.save_song_history(&json!({
        "ana": [{"song": "A", "artist": "X", "note": "for ana"}],
        "ben": [{"song": "B", "artist": "Y"}]
    })));

    let doc = stored(&store);
    assert_eq!(doc["users"]["ana"]["songs-played"], json!(["A by X"]));
    assert_eq!(doc["users"]["ben"]["songs-played"], json!(["B by Y"]));
    assert_eq!(doc["users"]["ben"]["notes"], json!([]));
    let names: Vec<&String> = doc["users"].as_object().expect("users").keys().collect();
    assert_eq!(names, vec!["ana", "ben"]);
}

#[test]
fn invalid_json_on_disk_is_replaced() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());
    fs::write(store.path(), "{\"users\": {\"old\": ").expect("seed broken file");

    assert!(store.save_song_history(&json!({"u": [{"song": "A", "artist": "X"}]})));

    let doc = stored(&store);
    let users = doc["users"].as_object().expect("users");
    assert_eq!(users.len(), 1);
    assert!(users.contains_key("u"));
}

#[test]
fn malformed_record_fails_whole_batch() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());
    assert!(store.save_song_history(&json!({"u": [{"song": "A", "artist": "X"}]})));
    let before = fs::read_to_string(store.path()).expect("read");

    assert!(!store.save_song_history(&json!({
        "u": [{"song": "B", "artist": "X"}],
        "v": [{"artist": "Y"}]
    })));

    assert_eq!(fs::read_to_string(store.path()).expect("read"), before);
}

#[test]
fn last_updated_does_not_decrease() {
    let dir = tempdir().expect("tempdir");
    let store = HistoryStore::in_dir(dir.path());
    let mut previous = OffsetDateTime::UNIX_EPOCH;

    for song in ["A", "B", "C"] {
        assert!(store.save_song_history(&json!({"u": [{"song": song, "artist": "X"}]})));
        let stamp = stored(&store)["last_updated"]
            .as_str()
            .expect("timestamp")
            .to_string();
        let parsed = OffsetDateTime::parse(&stamp, &Rfc3339).expect("rfc3339");
        assert!(parsed >= previous);
        previous = parsed;
    }
}

#[test]
fn concurrent_callers_do_not_lose_updates() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(HistoryStore::in_dir(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.save_song_history(&json!({
                    "shared": [{"song": format!("Song {n}"), "artist": "X"}]
                }))
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("thread"));
    }

    let doc = stored(&store);
    let songs = doc["users"]["shared"]["songs-played"]
        .as_array()
        .expect("songs");
    assert_eq!(songs.len(), 8);
}
