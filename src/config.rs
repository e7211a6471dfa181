//! Configuration file.
//!
//! ```toml
//! [backend]
//! kind = "hidraw"          # hidraw | libusb | hidapi | virtual; omit for the build default
//!
//! [read]
//! poll_interval_ms = 20    # upper bound on one backend read inside a blocking read
//! default_report_len = 64  # read size used by the CLI when --len is not given
//!
//! [logging]
//! level = "warn"           # tracing filter; RUST_LOG overrides it
//! ```
//!
//! Every field is optional.

use crate::backends::BackendKind;
use crate::error::{HidError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest poll interval accepted; keeps cancellation of blocked reads prompt.
pub const MAX_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendSettings,
    pub read: ReadSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Explicit backend; `None` uses the build default.
    pub kind: Option<BackendKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadSettings {
    pub poll_interval_ms: u64,
    pub default_report_len: usize,
}

impl Default for ReadSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            default_report_len: 64,
        }
    }
}

impl ReadSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// `<config dir>/hidkit/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hidkit").join("config.toml"))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(s).map_err(|e| HidError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| HidError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::load(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.read.poll_interval_ms == 0 || self.read.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(HidError::Config(format!(
                "read.poll_interval_ms must be between 1 and {MAX_POLL_INTERVAL_MS}, got {}",
                self.read.poll_interval_ms
            )));
        }
        if self.read.default_report_len == 0 {
            return Err(HidError::Config(
                "read.default_report_len must be non-zero".into(),
            ));
        }
        if let Some(kind) = self.backend.kind {
            if !kind.is_compiled_in() {
                return Err(HidError::Config(format!(
                    "backend `{kind}` is not compiled into this build"
                )));
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HidError::Config(e.to_string()))
    }
}
