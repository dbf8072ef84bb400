//! Configuration for upyterm.
//!
//! Settings are read from `~/.upyterm/config.toml`. Every key is optional:
//!
//! ```toml
//! # Serial device used when no --port is given
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! read_timeout_ms = 500
//! log_level = "info"
//!
//! [write]
//! chunk_size = 256
//! pacing_ms = 10
//!
//! [terminal]
//! rows = 24
//! columns = 80
//!
//! [exec]
//! # 0 waits forever
//! timeout_secs = 10
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::exec::ExecOptions;
use crate::core::transport::Pacing;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default serial device
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Bounded wait of one read-loop pass
    pub read_timeout_ms: u64,
    /// Log filter for the log file
    pub log_level: String,
    pub write: WriteConfig,
    pub terminal: TerminalConfig,
    pub exec: ExecConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 500,
            log_level: "info".to_string(),
            write: WriteConfig::default(),
            terminal: TerminalConfig::default(),
            exec: ExecConfig::default(),
        }
    }
}

/// Write pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    pub chunk_size: usize,
    pub pacing_ms: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        let pacing = Pacing::default();
        Self {
            chunk_size: pacing.chunk_size,
            pacing_ms: pacing.delay.as_millis() as u64,
        }
    }
}

/// Emulated screen size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub rows: u16,
    pub columns: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { rows: 24, columns: 80 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub timeout_secs: u64, // 0 = no timeout
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Config {
    /// Load `~/.upyterm/config.toml`. A missing file gives the defaults; a
    /// broken one is an error so the caller can warn once logging is up.
    pub fn try_load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            chunk_size: self.write.chunk_size.max(1),
            delay: Duration::from_millis(self.write.pacing_ms),
        }
    }

    pub fn exec_options(&self) -> ExecOptions {
        match self.exec.timeout_secs {
            0 => ExecOptions::default(),
            secs => ExecOptions::with_timeout(Duration::from_secs(secs)),
        }
    }
}

/// `~/.upyterm`, home of the config and log files
pub fn app_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".upyterm"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.pacing(), Pacing::default());
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            port = "/dev/ttyACM0"
            baud_rate = 9600

            [write]
            pacing_ms = 25

            [terminal]
            rows = 40
            "#,
        )
        .unwrap();

        assert_eq!(config.write.chunk_size, 256);
        assert_eq!(config.pacing().delay, Duration::from_millis(25));
        assert_eq!((config.terminal.rows, config.terminal.columns), (40, 80));
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_exec_timeout_zero_disables_it() {
        let config = Config::from_toml_str("[exec]\ntimeout_secs = 0").unwrap();
        assert_eq!(config.exec_options().timeout, None);
        assert_eq!(
            Config::default().exec_options().timeout,
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("baud_rate = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let result = Config::load_from(Path::new("/nonexistent/upyterm/config.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
