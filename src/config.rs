//! Bridge configuration
//!
//! Read from the TOML file named by `BRIDGE_CONFIG`, else
//! `<config dir>/bridge.toml`, else built-in defaults. Every field has a
//! default, so a file only needs the values it changes:
//!
//! ```toml
//! [engine]
//! period_frames = 512
//!
//! [transport]
//! kind = "tcp"
//! peer_host = "10.137.0.5"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::transport::TcpOptions;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "BRIDGE_CONFIG";

const CONFIG_FILE: &str = "bridge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub engine: EngineConfig,
    pub transport: TransportConfig,
    pub events: EventConfig,
    /// Seconds between statistics log lines (0 disables them)
    pub stats_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            transport: TransportConfig::default(),
            events: EventConfig::default(),
            stats_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device name (None = host default)
    pub output_device: Option<String>,
    /// Input device name (None = host default, if any)
    pub input_device: Option<String>,
    /// Requested period size in frames; must be a power of two
    pub period_frames: u32,
    /// Channels per direction, at most `MAX_CHANNELS`
    pub max_channels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            input_device: None,
            period_frames: DEFAULT_PERIOD_FRAMES,
            max_channels: DEFAULT_MAX_CHANNELS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Vchan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Host the client connects to (TCP)
    pub peer_host: String,
    /// Address the server listens on (TCP)
    pub bind_host: String,
    /// Control channel port; playback and record use the next two
    pub base_port: u16,
    /// Staging ring size per direction (TCP)
    pub ring_bytes: usize,
    /// Kernel socket buffer size (TCP, None = OS default)
    pub socket_buffer_bytes: Option<usize>,
    pub connect_timeout_ms: u64,
    pub vchan: VchanRingConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            peer_host: "127.0.0.1".to_string(),
            bind_host: "0.0.0.0".to_string(),
            base_port: DEFAULT_BASE_PORT,
            ring_bytes: 256 * 1024,
            socket_buffer_bytes: None,
            connect_timeout_ms: 5000,
            vchan: VchanRingConfig::default(),
        }
    }
}

/// Ring minimums the listening side requests for each audio channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VchanRingConfig {
    pub playback_read_min: usize,
    pub playback_write_min: usize,
    pub record_read_min: usize,
    pub record_write_min: usize,
    pub control_read_min: usize,
    pub control_write_min: usize,
}

impl Default for VchanRingConfig {
    fn default() -> Self {
        Self {
            playback_read_min: 8192,
            playback_write_min: 128,
            record_read_min: 128,
            record_write_min: 8192,
            control_read_min: 128,
            control_write_min: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Events buffered between the real-time thread and the logger
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: EVENT_QUEUE_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Load from the environment-named file, the default location, or defaults
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/bridge.toml` for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "domain-audio-bridge", "domain-audio-bridge")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.max_channels == 0 || engine.max_channels > MAX_CHANNELS {
            return Err(Error::Config(format!(
                "engine.max_channels must be 1..={}, got {}",
                MAX_CHANNELS, engine.max_channels
            )));
        }
        if !engine.period_frames.is_power_of_two()
            || engine.period_frames as usize > MAX_PERIOD_FRAMES
        {
            return Err(Error::Config(format!(
                "engine.period_frames must be a power of two up to {}, got {}",
                MAX_PERIOD_FRAMES, engine.period_frames
            )));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            ring_bytes: self.transport.ring_bytes,
            socket_buffer_bytes: self.transport.socket_buffer_bytes,
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
        }
    }
}
