use std::{env, fmt, fs, io, path, time::Duration};

use probewatch::{DEFAULT_TLS_PORT, ProbeFamily, RunnerSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {}: {}", .0.display(), .1)]
    ReadFailed(path::PathBuf, #[source] io::Error),
    #[error("failed to write config {}: {}", .0.display(), .1)]
    WriteFailed(path::PathBuf, #[source] io::Error),
    #[error("failed to parse config {}: {}", .0.display(), .1)]
    ParseFailed(path::PathBuf, #[source] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available: set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub scheduler: Scheduler,
    pub certificates: Certificates,
    pub dns: Dns,
    pub logging: Logging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    /// Seconds between trigger checks
    pub tick_seconds: u64,
    pub lock_ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Certificates {
    pub enabled: bool,
    pub timeout_seconds: u64,
    /// Port given to seeded or imported domains
    pub default_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dns {
    pub enabled: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// `compact` or `json`; `RUST_LOG_FORMAT` wins when set
    pub format: String,
    /// Default level; `RUST_LOG` wins when set
    pub level: String,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: path::PathBuf::from("probewatch.db") }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { tick_seconds: 3600, lock_ttl_seconds: 300 }
    }
}

impl Default for Certificates {
    fn default() -> Self {
        Self { enabled: true, timeout_seconds: 10, default_port: DEFAULT_TLS_PORT }
    }
}

impl Default for Dns {
    fn default() -> Self {
        Self { enabled: true, timeout_seconds: 5 }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { format: "compact".into(), level: "info".into() }
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

/// Get default config path ($XDG_CONFIG_HOME/probewatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("probewatch/config.toml"))
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
        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick (s)", &self.scheduler.tick_seconds)?;
        write_1(f, "Lock TTL (s)", &self.scheduler.lock_ttl_seconds)?;
        write_title_1(f, "Certificates")?;
        write_1(f, "Enabled", &self.certificates.enabled)?;
        write_1(f, "Timeout (s)", &self.certificates.timeout_seconds)?;
        write_1(f, "Default Port", &self.certificates.default_port)?;
        write_title_1(f, "DNS")?;
        write_1(f, "Enabled", &self.dns.enabled)?;
        write_1(f, "Timeout (s)", &self.dns.timeout_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Format", &self.logging.format)?;
        write_1(f, "Level", &self.logging.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/probewatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|err| Error::ReadFailed(config_path.clone(), err))?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(config_path, err))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::WriteFailed(parent.to_path_buf(), err))?;
        }

        fs::write(path, config_str).map_err(|err| Error::WriteFailed(path.to_path_buf(), err))
    }

    pub fn family_enabled(&self, family: ProbeFamily) -> bool {
        match family {
            ProbeFamily::Certificate => self.certificates.enabled,
            ProbeFamily::Dns => self.dns.enabled,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_seconds.max(1))
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            lock_ttl: Duration::from_secs(self.scheduler.lock_ttl_seconds.max(1)),
            certificate_timeout: Duration::from_secs(self.certificates.timeout_seconds.max(1)),
            dns_timeout: Duration::from_secs(self.dns.timeout_seconds.max(1)),
        }
    }
}
