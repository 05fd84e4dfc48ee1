use crate::history::HISTORY_FILE;
use crate::poll::DEFAULT_INTERVAL;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DATA_DIR: &str = "data";
const LOG_FILE: &str = "app.log";
const SOURCE_FILE: &str = "inbox.json";

const ENV_DATA_DIR: &str = "SONGNOTE_DATA_DIR";
const ENV_LOG_FILE: &str = "SONGNOTE_LOG_FILE";
const ENV_POLL_HOURS: &str = "SONGNOTE_POLL_HOURS";
const ENV_SOURCE_FILE: &str = "SONGNOTE_SOURCE_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// `app.log` inside the data directory.
    DataDir,
    Disabled,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log: LogTarget,
    pub source_file: Option<PathBuf>,
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_DIR),
            log: LogTarget::DataDir,
            source_file: None,
            poll_interval: DEFAULT_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset or blank keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(log) = get(ENV_LOG_FILE) {
            config.log = if log == "-" {
                LogTarget::Disabled
            } else {
                LogTarget::File(PathBuf::from(log))
            };
        }
        if let Some(source) = get(ENV_SOURCE_FILE) {
            config.source_file = Some(PathBuf::from(source));
        }
        if let Some(hours) = get(ENV_POLL_HOURS) {
            config.poll_interval =
                parse_poll_hours(&hours).with_context(|| format!("invalid {ENV_POLL_HOURS}"))?;
        }
        Ok(config)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        match &self.log {
            LogTarget::DataDir => Some(self.data_dir.join(LOG_FILE)),
            LogTarget::Disabled => None,
            LogTarget::File(path) => Some(path.clone()),
        }
    }

    pub fn source_path(&self) -> PathBuf {
        self.source_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(SOURCE_FILE))
    }
}

pub fn parse_poll_hours(value: &str) -> Result<Duration> {
    let hours: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("{value:?} is not a number of hours"))?;
    if !hours.is_finite() || hours <= 0.0 {
        anyhow::bail!("poll interval must be a positive number of hours, got {value}");
    }
    Duration::try_from_secs_f64(hours * 3600.0)
        .with_context(|| format!("poll interval of {value} hours is too long"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_live_under_data_dir() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.history_path(), PathBuf::from("data/songs_data.json"));
        assert_eq!(config.log_path(), Some(PathBuf::from("data/app.log")));
        assert_eq!(config.source_path(), PathBuf::from("data/inbox.json"));
        assert_eq!(config.poll_interval, Duration::from_secs(3 * 3600));
    }

    #[test]
    fn env_overrides_apply() {
        let config = Config::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/srv/notes"),
            (ENV_LOG_FILE, "-"),
            (ENV_POLL_HOURS, "0.5"),
            (ENV_SOURCE_FILE, " "),
        ]))
        .expect("config");
        assert_eq!(config.history_path(), PathBuf::from("/srv/notes/songs_data.json"));
        assert_eq!(config.log_path(), None);
        assert_eq!(config.source_path(), PathBuf::from("/srv/notes/inbox.json"));
        assert_eq!(config.poll_interval, Duration::from_secs(1800));
    }

    #[test]
    fn rejects_bad_poll_hours() {
        assert!(parse_poll_hours("0").is_err());
        assert!(parse_poll_hours("-2").is_err());
        assert!(parse_poll_hours("soon").is_err());
        assert!(parse_poll_hours("1e300").is_err());
        assert!(parse_poll_hours("inf").is_err());
        assert!(Config::from_lookup(lookup(&[(ENV_POLL_HOURS, "nan")])).is_err());
    }
}
