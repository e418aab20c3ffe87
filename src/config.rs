//! Static configuration
//!
//! Serial endpoint, tone, audio negotiation candidates and timing.
//! Loaded from `~/.config/openbleep/config.json` when present. Device and
//! keybind choices are made per run and never written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Returns the path to the config file: `~/.config/openbleep/config.json`
pub fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("openbleep");
    path.push("config.json");
    path
}

#[cfg(windows)]
const DEFAULT_SERIAL_PORT: &str = "COM3";
#[cfg(not(windows))]
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Serial trigger endpoint and loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port identifier (`COM3`, `/dev/ttyUSB0`, ...)
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout; also bounds how long a stop request can go unnoticed
    pub read_timeout_ms: u64,
    /// Delay before reopening a disconnected port
    pub reconnect_backoff_ms: u64,
    /// Sleep between read loop iterations
    pub poll_interval_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            reconnect_backoff_ms: 3000,
            poll_interval_ms: 10,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Audio stream negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Candidate sample rates, tried in order
    pub sample_rates: Vec<u32>,
    /// Frames per callback requested from the backend
    pub buffer_frames: u32,
    /// Output devices whose name contains this are picked first
    pub preferred_output: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rates: vec![48_000, 44_100, 32_000, 16_000],
            buffer_frames: 1024,
            preferred_output: "CABLE Input".to_string(),
        }
    }
}

/// Bleep tone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Tone frequency (Hz)
    pub frequency: f32,
    /// Initial amplitude (0.0 to 1.0)
    pub amplitude: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            amplitude: 0.25,
        }
    }
}

/// Slack on top of a serial read when waiting for the trigger thread
const SHUTDOWN_MARGIN_MS: u64 = 250;

/// Complete configuration.
///
/// Fields use `#[serde(default)]` so that a partial file only overrides
/// what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleepConfig {
    pub serial: SerialConfig,
    pub audio: AudioConfig,
    pub tone: ToneConfig,
    /// How long `stop_routing` waits for the trigger thread.
    /// Never shorter than one serial read plus one poll interval.
    pub shutdown_timeout_ms: u64,
}

impl Default for BleepConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            audio: AudioConfig::default(),
            tone: ToneConfig::default(),
            shutdown_timeout_ms: 1500,
        }
    }
}

impl BleepConfig {
    /// Load the config from the default location, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load the config from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No config file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        // A stop can land just as a blocking read starts
        let floor = self.serial.read_timeout_ms + self.serial.poll_interval_ms + SHUTDOWN_MARGIN_MS;
        Duration::from_millis(self.shutdown_timeout_ms.max(floor))
    }
}
