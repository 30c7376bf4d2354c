// config.rs — daemon configuration loaded from TOML.
//
// Everything is optional; a missing file section falls back to the
// engine defaults. Example:
//
//   db_path = "/var/lib/icommit/engine.db"
//   events_log = "/var/log/icommit/events.jsonl"
//
//   [engine]
//   horizon_days = 14
//   approve_threshold = 0.9

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use ic_engine::EngineConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Where the engine database lives.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Optional JSONL event log; when unset, events only reach
    /// whatever sinks the fronting process registers.
    #[serde(default)]
    pub events_log: Option<PathBuf>,

    /// Seconds between materialize+sweep passes.
    #[serde(default = "default_daily_interval_secs")]
    pub daily_interval_secs: u64,

    /// Seconds between settlement retry passes.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("icommit.db")
}

fn default_daily_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_retry_interval_secs() -> u64 {
    60 * 60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            events_log: None,
            daily_interval_secs: default_daily_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            engine: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "db_path = \"/tmp/engine.db\"").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "[engine]").unwrap();
        writeln!(file, "horizon_days = 14").unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/engine.db"));
        assert!(config.events_log.is_none());
        assert_eq!(config.daily_interval_secs, 24 * 60 * 60);
        assert_eq!(config.retry_interval_secs, 60 * 60);
        assert_eq!(config.engine.horizon_days, 14);
        assert_eq!(config.engine.grace_period_days, 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "db_pathh = \"/tmp/engine.db\"").unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path, PathBuf::from("icommit.db"));
    }
}
