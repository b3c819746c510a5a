use chrono::FixedOffset;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub import: ImportSettings,
    pub feed: FeedSettings,
    pub media: MediaSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub slice_budget_secs: u64,
    /// Offset of the export's local timestamps, e.g. `+08:00`.
    pub source_utc_offset: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSettings {
    pub fetch_timeout_secs: u64,
    pub sync_interval_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaSettings {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    pub file: PathBuf,
    pub level: String,
    pub recent_lines: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            import: ImportSettings::default(),
            feed: FeedSettings::default(),
            media: MediaSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            slice_budget_secs: 20,
            source_utc_offset: "+08:00".to_string(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            sync_interval_secs: 30 * 60,
            user_agent: concat!("history-importer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("./logs/importer.log"),
            level: "info".to_string(),
            recent_lines: 100,
        }
    }
}

/// Load `Config.toml` (optional) overlaid with `HISTORY_IMPORTER__*` env vars.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let defaults = AppConfig::default();
    let builder = Config::builder()
        .add_source(Config::try_from(&defaults)?)
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("HISTORY_IMPORTER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    /// Rooted at `data_dir`, everything else defaulted. Handy for tests.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn activity_db_path(&self) -> PathBuf {
        self.data_dir.join("activity.db")
    }

    pub fn imports_dir(&self) -> PathBuf {
        self.data_dir.join("imports")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }
}

impl ImportSettings {
    pub fn slice_budget(&self) -> Duration {
        Duration::from_secs(self.slice_budget_secs)
    }

    pub fn source_offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.source_utc_offset).ok_or_else(|| {
            ConfigError::Message(format!(
                "invalid import.source_utc_offset '{}'",
                self.source_utc_offset
            ))
        })
    }
}

impl FeedSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Parse `+HH:MM` / `-HH:MM` / `Z`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.import.batch_size, 5);
        assert_eq!(config.import.slice_budget(), Duration::from_secs(20));
        assert_eq!(config.feed.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.feed.sync_interval(), Duration::from_secs(1800));
        assert_eq!(config.logging.recent_lines, 100);
    }

    #[test]
    fn test_derived_paths_live_under_data_dir() {
        let config = AppConfig::with_data_dir("/srv/importer");
        assert_eq!(config.state_dir(), PathBuf::from("/srv/importer/state"));
        assert_eq!(config.imports_dir(), PathBuf::from("/srv/importer/imports"));
        assert_eq!(config.staging_dir(), PathBuf::from("/srv/importer/temp"));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("08:00").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
    }
}
