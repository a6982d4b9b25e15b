//! Configuration file support for ft8-feed.
//!
//! Loads settings from `~/.config/ft8-feed/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::StreamClientConfig;
use crate::decode::{Band, deserialize_band_selection};
use crate::grid::Coordinate;
use crate::transport::{DEFAULT_HOST, DEFAULT_PORT, TransportKind, TransportTimeouts};

/// Fixed receiver location, used until a live position is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ReceiverConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl ReceiverConfig {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Periodic upload of the receiver position to the feed server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionUploadConfig {
    pub enabled: bool,

    /// Seconds between uploads.
    pub interval: u64,
}

impl Default for PositionUploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 30,
        }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed server hostname or address.
    pub host: String,

    /// Feed server port.
    pub port: u16,

    /// How decodes are read from the server.
    pub transport: TransportKind,

    /// Band announced on connect. `"Select Band"` or empty means none.
    #[serde(deserialize_with = "deserialize_band_selection")]
    pub band: Option<Band>,

    /// Show distances in miles instead of kilometers.
    pub use_miles: bool,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,

    /// Read timeout in seconds.
    pub read_timeout: u64,

    /// Seconds to wait before reconnecting.
    pub reconnect_delay: u64,

    pub receiver: Option<ReceiverConfig>,

    pub position_upload: PositionUploadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::default(),
            band: None,
            use_miles: true,
            connect_timeout: 30,
            read_timeout: 120,
            reconnect_delay: 5,
            receiver: None,
            position_upload: PositionUploadConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ft8-feed/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.reconnect_delay == 0 {
            bail!("reconnect_delay must be at least 1 second");
        }
        if let Some(receiver) = &self.receiver {
            if !(-90.0..=90.0).contains(&receiver.latitude) {
                bail!("receiver latitude out of range: {}", receiver.latitude);
            }
            if !(-180.0..=180.0).contains(&receiver.longitude) {
                bail!("receiver longitude out of range: {}", receiver.longitude);
            }
        }
        if self.position_upload.enabled && self.position_upload.interval == 0 {
            bail!("position_upload.interval must be at least 1 second");
        }
        Ok(())
    }

    pub fn timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            connect: Duration::from_secs(self.connect_timeout),
            read: Duration::from_secs(self.read_timeout),
        }
    }

    pub fn client_config(&self) -> StreamClientConfig {
        StreamClientConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
            ..Default::default()
        }
    }

    pub fn receiver_coordinate(&self) -> Option<Coordinate> {
        self.receiver.as_ref().map(ReceiverConfig::coordinate)
    }
}
