//! Command station configuration.
//!
//! Uses `heapless::String` for the short text settings so the same types can
//! be embedded in a fixed-size settings block on a microcontroller.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc_station::config::{Config, ListenerConfig, StationConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.listener.port, 2560);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_station(StationConfig::default().with_refresh_interval_ms(40))
//!     .with_listener(ListenerConfig::default().with_port(12090));
//! ```
//!
//! # JSON
//!
//! Every section is optional when loading from JSON:
//!
//! ```rust
//! use rs_dcc_station::config::Config;
//!
//! let config = Config::from_json(r#"{"storage": {"data_dir": "/var/lib/dcc"}}"#).unwrap();
//! assert_eq!(config.storage.data_dir.as_str(), "/var/lib/dcc");
//! assert_eq!(config.station.estop_packet_count, 200);
//! ```

use heapless::String as HString;
use serde::{Deserialize, Serialize};

use crate::loco_registry::RegistryOptions;

/// Maximum length for short config strings (hostnames, device names)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for longer config strings (paths)
pub const MAX_LONG_STRING: usize = 128;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

fn truncated<const N: usize>(s: &str) -> HString<N> {
    let mut hs = HString::new();
    let valid_end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= N)
        .last()
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    truncated(s)
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    truncated(s)
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry timing and policy
    pub station: StationConfig,
    /// Where documents are persisted
    pub storage: StorageConfig,
    /// Text protocol TCP listener
    pub listener: ListenerConfig,
    /// Device identification
    pub device: DeviceConfig,
}

impl Config {
    /// Parse from JSON text; missing sections and fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Set station configuration
    pub fn with_station(mut self, station: StationConfig) -> Self {
        self.station = station;
        self
    }

    /// Set storage configuration
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set listener configuration
    pub fn with_listener(mut self, listener: ListenerConfig) -> Self {
        self.listener = listener;
        self
    }

    /// Set device configuration
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }
}

// ============================================================================
// Station Config
// ============================================================================

/// Refresh, emergency stop and persistence settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Period of the locomotive refresh scan in milliseconds
    pub refresh_interval_ms: u32,
    /// Extra transmissions of the broadcast emergency stop
    pub estop_packet_count: u8,
    /// Extra transmissions of packets caused directly by a command
    pub update_repeat: u8,
    /// Create a roster entry the first time a locomotive is driven
    pub auto_create_roster_entries: bool,
    /// Period of the automatic store in seconds (0 = never)
    pub persist_interval_secs: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 25,
            estop_packet_count: 200,
            update_repeat: 2,
            auto_create_roster_entries: true,
            persist_interval_secs: 30,
        }
    }
}

impl StationConfig {
    /// Set the refresh period (minimum 1 ms)
    pub fn with_refresh_interval_ms(mut self, ms: u32) -> Self {
        self.refresh_interval_ms = ms.max(1);
        self
    }

    /// Set the emergency stop repeat count
    pub fn with_estop_packet_count(mut self, count: u8) -> Self {
        self.estop_packet_count = count;
        self
    }

    /// Set the repeat count for command-driven packets
    pub fn with_update_repeat(mut self, repeat: u8) -> Self {
        self.update_repeat = repeat;
        self
    }

    /// Enable or disable roster auto-creation
    pub fn with_auto_create_roster_entries(mut self, enabled: bool) -> Self {
        self.auto_create_roster_entries = enabled;
        self
    }

    /// Set the auto-persist period
    pub fn with_persist_interval_secs(mut self, secs: u32) -> Self {
        self.persist_interval_secs = secs;
        self
    }

    /// Options for the locomotive registry.
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            estop_repeat: self.estop_packet_count,
            update_repeat: self.update_repeat,
            auto_create_roster_entries: self.auto_create_roster_entries,
        }
    }
}

// ============================================================================
// Storage Config
// ============================================================================

/// Document store location
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the JSON documents
    pub data_dir: LongString,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: long_string("data"),
        }
    }
}

impl StorageConfig {
    /// Set the data directory
    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = long_string(dir);
        self
    }
}

// ============================================================================
// Listener Config
// ============================================================================

/// Text protocol listener configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to bind
    pub bind: ShortString,
    /// TCP port (2560 is what JMRI expects)
    pub port: u16,
    /// Whether the listener runs
    pub enabled: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: short_string("0.0.0.0"),
            port: 2560,
            enabled: true,
        }
    }
}

impl ListenerConfig {
    /// Set the bind address
    pub fn with_bind(mut self, bind: &str) -> Self {
        self.bind = short_string(bind);
        self
    }

    /// Set the TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable the listener
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `bind:port` for the socket.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Device identification configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Human-readable station name, reported in the log banner
    pub name: ShortString,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: short_string("rs-dcc-station"),
        }
    }
}

impl DeviceConfig {
    /// Set the device name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
