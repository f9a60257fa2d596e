//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use lr_core::{DEFAULT_LOCALE, Locale};
use serde::{Deserialize, Serialize};

/// Default ceiling for a long-running report, in seconds.
pub const DEFAULT_LONG_EXECUTION_SECS: u64 = 1800;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Directory CSV exports are written to.
    pub export_dir: PathBuf,
    /// Locale used when a request does not pass one.
    pub locale: String,
    /// Optional JSON table of IP locations.
    #[serde(default)]
    pub geo_database: Option<PathBuf>,
    /// Execution budget for one report.
    pub long_execution_time_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("export_dir", &self.export_dir)
            .field("locale", &self.locale)
            .field("geo_database", &self.geo_database)
            .field("long_execution_time_secs", &self.long_execution_time_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("lr.db"),
            export_dir: std::env::temp_dir(),
            locale: DEFAULT_LOCALE.to_string(),
            geo_database: None,
            long_execution_time_secs: DEFAULT_LONG_EXECUTION_SECS,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // LR_DATABASE_PATH, LR_EXPORT_DIR, ...
        figment = figment.merge(Env::prefixed("LR_"));

        figment.extract()
    }

    pub fn default_locale(&self) -> Locale {
        Locale::new(self.locale.clone())
    }

    /// The report budget; zero disables it.
    pub const fn budget(&self) -> Option<Duration> {
        if self.long_execution_time_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.long_execution_time_secs))
        }
    }
}

/// Returns the platform-specific config directory for lr.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lr"))
}

/// Returns the platform-specific data directory for lr.
///
/// On Linux: `~/.local/share/lr`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("lr"))
}
