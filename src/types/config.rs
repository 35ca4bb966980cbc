//! Session and coordinator configuration
//!
//! All configuration types are plain serde structures with defaults, so a
//! session can be described in YAML:
//!
//! ```rust
//! use aresplot::{ProtocolKind, SessionConfig, Source};
//!
//! let config = SessionConfig::from_yaml_str(
//!     r#"
//! source: Serial
//! protocol: Aresplot
//! serial:
//!   baud_rate: 921600
//! "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.source, Source::Serial);
//! assert_eq!(config.protocol, ProtocolKind::Aresplot);
//! assert_eq!(config.serial.data_bits, 8);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{AresplotError, Result};

/// Default device-side buffer size requested when opening a port.
pub const DEFAULT_BUFFER_SIZE: usize = 32_768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
}

/// Options used to open the serial peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(default)]
pub struct SerialOptions {
    /// Device path (`/dev/ttyACM0`, `COM3`); ignored by in-memory transports
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub buffer_size: usize,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl SerialOptions {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Reject option sets no port could be opened with.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(AresplotError::invalid_serial_options("baud rate must be greater than 0"));
        }
        if !matches!(self.data_bits, 7 | 8) {
            return Err(AresplotError::invalid_serial_options(format!(
                "data bits must be 7 or 8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(AresplotError::invalid_serial_options(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.buffer_size == 0 {
            return Err(AresplotError::invalid_serial_options("buffer size must be non-zero"));
        }
        Ok(())
    }
}

/// Where samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Source {
    #[default]
    Simulated,
    Serial,
}

/// Wire protocol selected for the inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ProtocolKind {
    /// Comma or whitespace separated numbers, one sample per line
    #[default]
    Default,
    /// `label:1,2,3` lines
    FireWater,
    /// Little-endian float32 frames terminated by `00 00 80 7F`
    JustFloat,
    /// Framed request/response protocol with the MCU
    Aresplot,
    /// User-supplied parser script
    Custom,
}

impl ProtocolKind {
    /// Whether the protocol splits frames on line feeds.
    pub const fn is_line_oriented(self) -> bool {
        matches!(self, ProtocolKind::Default | ProtocolKind::FireWater | ProtocolKind::Custom)
    }
}

/// Protocol plus the user parser source when the protocol is `Custom`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ParserSelection {
    pub protocol: ProtocolKind,
    pub parser_source: Option<String>,
}

impl ParserSelection {
    pub fn new(protocol: ProtocolKind, parser_source: Option<String>) -> Self {
        Self { protocol, parser_source }
    }

    pub fn builtin(protocol: ProtocolKind) -> Self {
        Self { protocol, parser_source: None }
    }

    /// A custom protocol needs a non-empty parser source.
    pub fn validate(&self) -> Result<()> {
        if self.protocol == ProtocolKind::Custom
            && self.parser_source.as_deref().is_none_or(|s| s.trim().is_empty())
        {
            return Err(AresplotError::config("custom protocol selected without a parser source"));
        }
        Ok(())
    }
}

/// Simulated signal parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(default)]
pub struct SimConfig {
    pub num_channels: usize,
    /// Samples per second
    pub frequency: f64,
    pub amplitude: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { num_channels: 4, frequency: 1000.0, amplitude: 1.0 }
    }
}

impl SimConfig {
    pub const MAX_CHANNELS: usize = 64;

    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 || self.num_channels > Self::MAX_CHANNELS {
            return Err(AresplotError::config(format!(
                "simulation channel count must be within 1..={}, got {}",
                Self::MAX_CHANNELS,
                self.num_channels
            )));
        }
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(AresplotError::config("simulation frequency must be positive"));
        }
        if !self.amplitude.is_finite() {
            return Err(AresplotError::config("simulation amplitude must be finite"));
        }
        Ok(())
    }
}

/// Everything chosen when a session starts.
///
/// Only `sim` and `parser_source` may change while collecting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(default)]
pub struct SessionConfig {
    pub source: Source,
    pub protocol: ProtocolKind,
    pub parser_source: Option<String>,
    pub serial: SerialOptions,
    pub sim: SimConfig,
}

impl SessionConfig {
    pub fn simulated(sim: SimConfig) -> Self {
        Self { source: Source::Simulated, sim, ..Self::default() }
    }

    pub fn serial(protocol: ProtocolKind, serial: SerialOptions) -> Self {
        Self { source: Source::Serial, protocol, serial, ..Self::default() }
    }

    pub fn parser_selection(&self) -> ParserSelection {
        ParserSelection::new(self.protocol, self.parser_source.clone())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AresplotError::config_file(path.to_path_buf(), e))?;
        Self::from_yaml_str(&text)
    }
}

/// Tuning of the coordinator, worker, and batching layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// ACK wait before a request resolves with a timeout
    pub request_timeout_ms: u64,
    /// Maximum age of an unflushed batch
    pub flush_interval_ms: u64,
    /// Flush early once a batch holds this many samples
    pub max_batch_samples: usize,
    /// Host-side retained points (`M`)
    pub max_points: usize,
    /// Simulation generator tick
    pub sim_tick_ms: u64,
    pub rate_window_ms: u64,
    /// Rate drops to zero after this long without input
    pub rate_decay_ms: u64,
    /// Binary protocols: bytes without a frame boundary before the buffer is flushed
    pub garbage_flush_threshold: usize,
    /// Line protocols: bytes without a line feed before a forced break
    pub forced_break_len: usize,
    /// Accept protocol changes while collecting and hot-swap the codec
    pub allow_parser_update_while_collecting: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 500,
            flush_interval_ms: 10,
            max_batch_samples: 1000,
            max_points: 100_000,
            sim_tick_ms: 10,
            rate_window_ms: 1000,
            rate_decay_ms: 2000,
            garbage_flush_threshold: 256,
            forced_break_len: 80,
            allow_parser_update_while_collecting: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn sim_tick(&self) -> Duration {
        Duration::from_millis(self.sim_tick_ms.max(1))
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms.max(1))
    }

    pub fn rate_decay(&self) -> Duration {
        Duration::from_millis(self.rate_decay_ms)
    }

    /// Batches per second the worker emits at most on its flush cadence.
    pub fn emission_hz(&self) -> f64 {
        1000.0 / self.flush_interval_ms.max(1) as f64
    }
}
