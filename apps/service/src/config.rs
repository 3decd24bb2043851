use std::str::FromStr;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks
    pub tick_interval_seconds: u64,
    /// Upper bound on checks running at the same time within a tick
    pub max_concurrent_checks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "pulsewatch.db".into(), pool_size: 16 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval_seconds: 30, max_concurrent_checks: 10 }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            max_redirects: 5,
            user_agent: concat!("pulsewatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// $XDG_CONFIG_HOME/pulsewatch/config.toml or $HOME/.config/...
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulsewatch/config.toml"))
}

fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, Error> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidEnv { name, value: raw }),
        None => Ok(None),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick Interval (s)", &self.scheduler.tick_interval_seconds)?;
        write_1(f, "Max Concurrent Checks", &self.scheduler.max_concurrent_checks)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_1(f, "Max Redirects", &self.probe.max_redirects)?;
        write_1(f, "User Agent", &self.probe.user_agent)?;

        Ok(())
    }
}

impl Config {
    /// Build the effective configuration.
    ///
    /// With an explicit path the file is read, or created with defaults if
    /// missing. Without one, the default location is read if present.
    /// Environment overrides are applied last, then the result is validated.
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let mut config = match optional_path {
            Some(path) => Self::from_config(normalize_toml_path(path.as_ref()))?,
            None => match default_config_path() {
                Ok(path) if path.exists() => Self::read_config(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, writing the defaults there first if it is missing
    pub fn from_config(config_path: path::PathBuf) -> Result<Self, Error> {
        if config_path.exists() {
            Self::read_config(&config_path)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    fn read_config(path: &path::Path) -> Result<Self, Error> {
        let raw_string = fs::read_to_string(path)
            .map_err(|source| Error::ReadFailed { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&raw_string)?)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str = toml::to_string_pretty(self)?;
        let write_failed = |source| Error::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }

    /// Apply `DATABASE_PATH`, `GLOBAL_CHECK_INTERVAL`, `HTTP_TIMEOUT`,
    /// `CHECK_CONCURRENCY` and `MAX_REDIRECTS` from `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), Error> {
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = path.into();
        }
        if let Some(tick) = parse_override(&lookup, "GLOBAL_CHECK_INTERVAL")? {
            self.scheduler.tick_interval_seconds = tick;
        }
        if let Some(timeout) = parse_override(&lookup, "HTTP_TIMEOUT")? {
            self.probe.timeout_seconds = timeout;
        }
        if let Some(concurrency) = parse_override(&lookup, "CHECK_CONCURRENCY")? {
            self.scheduler.max_concurrent_checks = concurrency;
        }
        if let Some(redirects) = parse_override(&lookup, "MAX_REDIRECTS")? {
            self.probe.max_redirects = redirects;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(Error::NotPositive("scheduler.tick_interval_seconds"));
        }
        if self.scheduler.max_concurrent_checks == 0 {
            return Err(Error::NotPositive("scheduler.max_concurrent_checks"));
        }
        if self.probe.timeout_seconds == 0 {
            return Err(Error::NotPositive("probe.timeout_seconds"));
        }
        if self.database.pool_size == 0 {
            return Err(Error::NotPositive("database.pool_size"));
        }
        Ok(())
    }
}
