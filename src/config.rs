use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::registry::Source;

const APP_NAME: &str = "jobsweep";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub fetch: FetchSettings,
    pub run: RunSettings,
    pub contacts: ContactSettings,
    pub proxies: ProxySettings,
    /// Extra TOML file holding `[[sources]]` entries.
    pub sources_file: Option<PathBuf>,
    /// Inline source overrides, merged over the built-in table by name.
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub base_cooldown_ms: u64,
    pub max_cooldown_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout_secs: 30,
            base_cooldown_ms: 5_000,
            max_cooldown_ms: 60_000,
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_cooldown(&self) -> Duration {
        Duration::from_millis(self.base_cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    pub fn jitter(&self) -> (Duration, Duration) {
        let min = Duration::from_millis(self.min_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms));
        (min, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub concurrency: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactSettings {
    /// Visit company sites looking for real team members.
    pub live_extraction: bool,
    /// Generate tagged placeholder contacts when nothing is observed.
    pub synthetic_fallback: bool,
    pub max_team_pages: usize,
    pub fetch_attempts: u32,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            live_extraction: true,
            synthetic_fallback: true,
            max_team_pages: 2,
            fetch_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub urls: Vec<String>,
}

impl Settings {
    /// Loads settings from `path`, or from the user config dir when no path
    /// is given. A missing default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Applies `JOBSWEEP_*` environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("JOBSWEEP_DB") {
            self.database.path = Some(PathBuf::from(db));
        }
        if let Some(n) = lookup("JOBSWEEP_CONCURRENCY") {
            let n: usize = n
                .trim()
                .parse()
                .map_err(|_| anyhow!("JOBSWEEP_CONCURRENCY must be a positive integer, got '{}'", n))?;
            if n == 0 {
                return Err(anyhow!("JOBSWEEP_CONCURRENCY must be at least 1"));
            }
            self.run.concurrency = n;
        }
        if let Some(proxies) = lookup("JOBSWEEP_PROXIES") {
            self.proxies.urls = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }
        // Use XDG data directory or fall back to the working directory
        match directories::ProjectDirs::from("", "", APP_NAME) {
            Some(dirs) => dirs.data_dir().join("jobsweep.db"),
            None => PathBuf::from("jobsweep.db"),
        }
    }
}
