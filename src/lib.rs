pub mod config;
pub mod error;
pub mod history;
pub mod log;
pub mod model;
pub mod poll;
pub mod source;

pub use error::HistoryError;
pub use history::HistoryStore;
pub use model::{HistoryDocument, MergeReport, SongBatch, SongEvent, UserHistory};
