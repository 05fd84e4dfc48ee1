use crate::history::HistoryStore;
use crate::model::MergeReport;
use crate::source::{SongEventSource, SourcePoll};
use std::thread;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Saved(MergeReport),
    NothingNew(String),
    SourceFailed(String),
    SaveFailed(String),
}

/// Fetches from a source and merges into the store on a fixed interval.
pub struct PollLoop<S> {
    store: HistoryStore,
    source: S,
    interval: Duration,
}

impl<S: SongEventSource> PollLoop<S> {
    pub fn new(store: HistoryStore, source: S, interval: Duration) -> Self {
        Self {
            store,
            source,
            interval,
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// One fetch and merge. Failures are logged and reported, never raised.
    pub fn run_once(&mut self) -> CycleOutcome {
        info!("starting song retrieval");
        let batch = match self.source.fetch() {
            Ok(SourcePoll::Songs(batch)) => batch,
            Ok(SourcePoll::Empty(message)) => {
                info!(%message, "no new song data");
                return CycleOutcome::NothingNew(message);
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "song retrieval failed");
                return CycleOutcome::SourceFailed(format!("{err:#}"));
            }
        };

        info!(users = batch.len(), "song data retrieved, saving to history");
        match self.store.merge_batch(&batch) {
            Ok(report) => {
                info!(
                    songs_added = report.songs_added,
                    notes_added = report.notes_added,
                    "song history saved"
                );
                CycleOutcome::Saved(report)
            }
            Err(err) => {
                error!(error = %err, path = %self.store.path().display(), "failed to save song history");
                CycleOutcome::SaveFailed(err.to_string())
            }
        }
    }

    pub fn run_forever(&mut self) -> ! {
        loop {
            self.run_once();
            info!(
                minutes = self.interval.as_secs() / 60,
                "waiting before the next run"
            );
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SongBatch, SongEvent};
    use std::collections::VecDeque;
    use std::fs;
    use tempfile::tempdir;

    struct Scripted(VecDeque<anyhow::Result<SourcePoll>>);

    impl SongEventSource for Scripted {
        fn fetch(&mut self) -> anyhow::Result<SourcePoll> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Ok(SourcePoll::Empty(String::from("drained"))))
        }
    }

    fn songs(user: &str, song: &str) -> anyhow::Result<SourcePoll> {
        Ok(SourcePoll::Songs(
            SongBatch::new().with_user(user, vec![SongEvent::new(song, "X")]),
        ))
    }

    #[test]
    fn keeps_going_after_source_and_save_failures() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "file where a directory should be").expect("seed");

        let source = Scripted(VecDeque::from(vec![
            Err(anyhow::anyhow!("browser crashed")),
            songs("u", "A"),
        ]));
        let mut poll = PollLoop::new(
            HistoryStore::in_dir(blocker.join("data")),
            source,
            Duration::ZERO,
        );

        assert!(matches!(poll.run_once(), CycleOutcome::SourceFailed(reason) if reason.contains("browser crashed")));
        assert!(matches!(poll.run_once(), CycleOutcome::SaveFailed(_)));
        assert_eq!(
            poll.run_once(),
            CycleOutcome::NothingNew(String::from("drained"))
        );
    }

    #[test]
    fn saves_each_cycle_into_the_store() {
        let dir = tempdir().expect("tempdir");
        let source = Scripted(VecDeque::from(vec![songs("u", "A"), songs("u", "B")]));
        let mut poll = PollLoop::new(HistoryStore::in_dir(dir.path()), source, Duration::ZERO);

        assert!(matches!(poll.run_once(), CycleOutcome::Saved(report) if report.new_users == 1));
        assert!(matches!(poll.run_once(), CycleOutcome::Saved(report) if report.songs_added == 1));

        let doc = poll.store().load().expect("load").document;
        assert_eq!(
            doc.user("u").expect("u").songs_played,
            vec!["A by X", "B by X"]
        );
    }
}
