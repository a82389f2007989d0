//! Application configuration (spec §6): defaults → file → CLI/env layering,
//! grounded on the teacher's `core::config` (`FileConfig` with `Option`
//! fields merged in, final typed `AppConfig` assembled by `.or()` chains).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    ENV_AC_DISCORD_WEBHOOK, ENV_DISCORD_WEBHOOK_URL, ENV_GOOGLE_SHEETS_WEBHOOK, ENV_LIVE_DISCORD_WEBHOOK,
    ENV_SUPABASE_KEY, ENV_SUPABASE_URL, ENV_TECHNICAL_WEBHOOK_URL,
};
use crate::error::ConfigError;

fn env_fallback(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Data provider backend selection (spec §6 `datasource`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    GoogleSheets,
    Supabase,
}

/// File-based configuration (JSON); every field optional so a partial file
/// can be merged over defaults without clobbering unspecified keys.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    pub log_file_path: Option<PathBuf>,
    pub live_log_path: Option<PathBuf>,
    pub ptu_log_path: Option<PathBuf>,
    pub auto_environment_detection: Option<bool>,
    pub datasource: Option<DataSource>,
    pub google_sheets_webhook: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub live_discord_webhook: Option<String>,
    pub ac_discord_webhook: Option<String>,
    pub technical_webhook_url: Option<String>,
    pub use_discord: Option<bool>,
    pub username: Option<String>,
    pub regex_patterns: Option<HashMap<String, String>>,
    pub messages: Option<HashMap<String, String>>,
    pub discord: Option<HashMap<String, String>>,
    pub google_sheets_mapping: Option<Vec<String>>,
    pub realtime: Option<Vec<String>>,
    pub scraping: Option<Vec<String>>,
    pub notifications_events: Option<Vec<String>>,
    pub important_players: Option<String>,
    pub rate_limit_timeout: Option<u64>,
    pub rate_limit_max_duplicates: Option<u32>,
    pub active_users_update_interval: Option<u64>,
    pub auto_reconnection: Option<bool>,
    pub notifications_enabled: Option<bool>,
    pub notifications_duration: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra {
            if !map.is_empty() {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                tracing::warn!(fields = %keys.join(", "), "unknown fields in config file");
            }
        }
    }
}

/// CLI-derived overrides (spec §6 CLI surface), layered on top of
/// `FileConfig`.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub process_all: bool,
    pub no_discord: bool,
    pub process_once: bool,
    pub datasource: Option<DataSource>,
    pub debug: bool,
    pub config_path: Option<PathBuf>,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_file_path: PathBuf,
    pub live_log_path: Option<PathBuf>,
    pub ptu_log_path: Option<PathBuf>,
    pub auto_environment_detection: bool,
    pub datasource: DataSource,
    pub google_sheets_webhook: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub live_discord_webhook: Option<String>,
    pub ac_discord_webhook: Option<String>,
    pub technical_webhook_url: Option<String>,
    pub use_discord: bool,
    pub username: String,
    pub regex_patterns: HashMap<String, String>,
    pub messages: HashMap<String, String>,
    pub discord: HashMap<String, String>,
    pub google_sheets_mapping: Vec<String>,
    pub realtime: Vec<String>,
    pub scraping: Vec<String>,
    pub notifications_events: Vec<String>,
    pub important_players: String,
    pub rate_limit_timeout_secs: u64,
    pub rate_limit_max_duplicates: u32,
    pub active_users_update_interval_secs: u64,
    pub auto_reconnection: bool,
    pub notifications_enabled: bool,
    pub notifications_duration_secs: u64,
    pub process_all: bool,
    pub process_once: bool,
    pub debug: bool,
}

impl AppConfig {
    /// Loads the CLI-specified (or local-directory default) config file
    /// over built-in defaults, then applies CLI flag overrides last.
    pub fn load(cli: &CliOverrides) -> Result<Self, ConfigError> {
        let path = cli
            .config_path
            .clone()
            .or_else(|| {
                let local = PathBuf::from("scbridge.json");
                local.exists().then_some(local)
            });

        let file = match path {
            Some(path) => {
                let cfg = FileConfig::load_from_file(&path)?;
                cfg.warn_unknown_fields();
                cfg
            }
            None => FileConfig::default(),
        };

        Ok(Self {
            log_file_path: file.log_file_path.unwrap_or_else(|| PathBuf::from("Game.log")),
            live_log_path: file.live_log_path,
            ptu_log_path: file.ptu_log_path,
            auto_environment_detection: file.auto_environment_detection.unwrap_or(true),
            datasource: cli.datasource.or(file.datasource).unwrap_or_default(),
            google_sheets_webhook: file.google_sheets_webhook.or_else(|| env_fallback(ENV_GOOGLE_SHEETS_WEBHOOK)),
            supabase_url: file.supabase_url.or_else(|| env_fallback(ENV_SUPABASE_URL)),
            supabase_key: file.supabase_key.or_else(|| env_fallback(ENV_SUPABASE_KEY)),
            discord_webhook_url: file.discord_webhook_url.or_else(|| env_fallback(ENV_DISCORD_WEBHOOK_URL)),
            live_discord_webhook: file.live_discord_webhook.or_else(|| env_fallback(ENV_LIVE_DISCORD_WEBHOOK)),
            ac_discord_webhook: file.ac_discord_webhook.or_else(|| env_fallback(ENV_AC_DISCORD_WEBHOOK)),
            technical_webhook_url: file.technical_webhook_url.or_else(|| env_fallback(ENV_TECHNICAL_WEBHOOK_URL)),
            use_discord: !cli.no_discord && file.use_discord.unwrap_or(true),
            username: file.username.unwrap_or_else(|| "Unknown".to_string()),
            regex_patterns: file.regex_patterns.unwrap_or_default(),
            messages: file.messages.unwrap_or_default(),
            discord: file.discord.unwrap_or_default(),
            google_sheets_mapping: file.google_sheets_mapping.unwrap_or_default(),
            realtime: file.realtime.unwrap_or_default(),
            scraping: file.scraping.unwrap_or_default(),
            notifications_events: file.notifications_events.unwrap_or_default(),
            important_players: file.important_players.unwrap_or_default(),
            rate_limit_timeout_secs: file.rate_limit_timeout.unwrap_or(300),
            rate_limit_max_duplicates: file.rate_limit_max_duplicates.unwrap_or(1),
            active_users_update_interval_secs: file.active_users_update_interval.unwrap_or(30),
            auto_reconnection: file.auto_reconnection.unwrap_or(true),
            notifications_enabled: file.notifications_enabled.unwrap_or(true),
            notifications_duration_secs: file.notifications_duration.unwrap_or(5),
            process_all: cli.process_all,
            process_once: cli.process_once,
            debug: cli.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_no_file_or_cli_overrides_given() {
        let cli = CliOverrides::default();
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.datasource, DataSource::GoogleSheets);
        assert!(config.use_discord);
        assert_eq!(config.rate_limit_timeout_secs, 300);
    }

    #[test]
    fn no_discord_flag_disables_discord_even_if_file_enables_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"use_discord": true}}"#).unwrap();

        let cli = CliOverrides { no_discord: true, config_path: Some(path), ..Default::default() };
        let config = AppConfig::load(&cli).unwrap();
        assert!(!config.use_discord);
    }

    #[test]
    fn cli_datasource_overrides_file_datasource() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"datasource": "supabase"}}"#).unwrap();

        let cli =
            CliOverrides { datasource: Some(DataSource::GoogleSheets), config_path: Some(path), ..Default::default() };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.datasource, DataSource::GoogleSheets);
    }

    #[test]
    fn supabase_key_falls_back_to_env_var_when_absent_from_file() {
        std::env::set_var(ENV_SUPABASE_KEY, "from-env");
        let cli = CliOverrides::default();
        let config = AppConfig::load(&cli).unwrap();
        std::env::remove_var(ENV_SUPABASE_KEY);
        assert_eq!(config.supabase_key.as_deref(), Some("from-env"));
    }
}
