#![no_main]

use libfuzzer_sys::fuzz_target;
use songnote::{HistoryDocument, SongBatch};

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(batch) = SongBatch::from_value(&payload) else {
        return;
    };

    let mut doc = HistoryDocument::default();
    doc.apply(&batch);
    doc.apply(&batch);

    for (_, history) in doc.users.iter() {
        for (index, song) in history.songs_played.iter().enumerate() {
            assert!(!history.songs_played[..index].contains(song));
        }
        assert!(!history.notes.iter().any(String::is_empty));
    }

    let raw = serde_json::to_string(&doc).expect("encode");
    let decoded: HistoryDocument = serde_json::from_str(&raw).expect("decode");
    assert_eq!(decoded, doc);
});
