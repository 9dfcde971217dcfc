//! Configuration snapshots for kernels and transports.
//!
//! Config values are plain data. A kernel keeps its own copy; changing the
//! configuration means building a new snapshot and handing it to
//! `Kernel::set_config`, which posts it into the worker thread.
//!
//! Strings use `heapless::String` so the structs stay fixed-size.
//!
//! # Example
//!
//! ```rust
//! use rs_trackside::config::{CanConfig, Config, NetworkConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.can.request_attempts, 3);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_can(CanConfig::default().with_default_switch_time_ms(200))
//!     .with_network(NetworkConfig::default().with_hostname("192.168.1.50"));
//! ```
//!
//! # File format
//!
//! ```toml
//! [can]
//! node_uid = 1415934720
//! default_switch_time_ms = 200
//!
//! [diy]
//! heartbeat_timeout_ms = 500
//!
//! [network]
//! hostname = "cs2.local"
//!
//! [log]
//! filter = "rs_trackside=debug"
//! debug_dir = "/tmp/trackside-debug"
//! ```

use std::path::Path;

use anyhow::Context as _;
use heapless::String as HString;
use serde::{Deserialize, Serialize};

/// Maximum length for short config strings (hostnames, filters)
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
    // Find valid UTF-8 boundary
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
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Märklin CAN kernel
    pub can: CanConfig,
    /// DIY kernel
    pub diy: DiyConfig,
    /// Serial port transport
    pub serial: SerialConfig,
    /// TCP/UDP transport
    pub network: NetworkConfig,
    /// Logging
    pub log: LogConfig,
}

impl Config {
    /// Set CAN kernel configuration
    pub fn with_can(mut self, can: CanConfig) -> Self {
        self.can = can;
        self
    }

    /// Set DIY kernel configuration
    pub fn with_diy(mut self, diy: DiyConfig) -> Self {
        self.diy = diy;
        self
    }

    /// Set serial configuration
    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Set network configuration
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Set logging configuration
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Parse a TOML document. Missing sections and keys keep their defaults.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("invalid configuration")
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

// ============================================================================
// CAN Config
// ============================================================================

/// Node UID used on the CAN bus when none is configured.
pub const DEFAULT_NODE_UID: u32 = 0x5472_6B00;

/// Longest accessory switch time the bus can carry.
pub const MAX_SWITCH_TIME_MS: u32 = 163_000;

/// Märklin CAN kernel configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    /// Our own UID on the bus
    pub node_uid: u32,
    /// Accessory switch time pushed during startup, 0 = leave the device default
    pub default_switch_time_ms: u32,
    /// How long to collect ping replies
    pub discovery_timeout_ms: u32,
    /// Response timeout for descriptor and config data requests
    pub request_timeout_ms: u32,
    /// Sends per request before giving up
    pub request_attempts: u8,
    /// Fetch the locomotive list during startup
    pub download_locomotive_list: bool,
    /// Log every frame
    pub debug_log_rx_tx: bool,
    /// Dump node descriptors into the debug directory
    pub debug_status_data_config: bool,
    /// Dump config data streams into the debug directory
    pub debug_config_stream: bool,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            node_uid: DEFAULT_NODE_UID,
            default_switch_time_ms: 0,
            discovery_timeout_ms: 1000,
            request_timeout_ms: 1000,
            request_attempts: 3,
            download_locomotive_list: true,
            debug_log_rx_tx: false,
            debug_status_data_config: false,
            debug_config_stream: false,
        }
    }
}

impl CanConfig {
    /// Set the node UID
    pub fn with_node_uid(mut self, uid: u32) -> Self {
        self.node_uid = uid;
        self
    }

    /// Set the default accessory switch time
    pub fn with_default_switch_time_ms(mut self, ms: u32) -> Self {
        self.default_switch_time_ms = ms.min(MAX_SWITCH_TIME_MS);
        self
    }

    /// Set the discovery window
    pub fn with_discovery_timeout_ms(mut self, ms: u32) -> Self {
        self.discovery_timeout_ms = ms;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout_ms(mut self, ms: u32) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Set the number of sends per request
    pub fn with_request_attempts(mut self, attempts: u8) -> Self {
        self.request_attempts = attempts.max(1);
        self
    }

    /// Enable or disable the locomotive list download
    pub fn with_download_locomotive_list(mut self, enabled: bool) -> Self {
        self.download_locomotive_list = enabled;
        self
    }

    /// Enable or disable frame logging
    pub fn with_debug_log_rx_tx(mut self, enabled: bool) -> Self {
        self.debug_log_rx_tx = enabled;
        self
    }

    /// Enable or disable descriptor dumps
    pub fn with_debug_status_data_config(mut self, enabled: bool) -> Self {
        self.debug_status_data_config = enabled;
        self
    }

    /// Enable or disable config stream dumps
    pub fn with_debug_config_stream(mut self, enabled: bool) -> Self {
        self.debug_config_stream = enabled;
        self
    }

    /// Switch time in the bus unit of 10 ms, `None` if not configured.
    pub fn switch_time_units(&self) -> Option<u16> {
        match self.default_switch_time_ms.min(MAX_SWITCH_TIME_MS) {
            0 => None,
            ms => Some((ms / 10) as u16),
        }
    }
}

// ============================================================================
// DIY Config
// ============================================================================

/// DIY kernel configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiyConfig {
    /// Idle time before a heartbeat is sent; twice this without traffic is a link failure
    pub heartbeat_timeout_ms: u32,
    /// Response timeout for the feature handshake
    pub handshake_timeout_ms: u32,
    /// Sends of the feature request before giving up
    pub request_attempts: u8,
    /// Log every frame
    pub debug_log_rx_tx: bool,
    /// Include heartbeats in frame logging
    pub debug_log_heartbeat: bool,
}

impl Default for DiyConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 1000,
            handshake_timeout_ms: 1000,
            request_attempts: 3,
            debug_log_rx_tx: false,
            debug_log_heartbeat: false,
        }
    }
}

impl DiyConfig {
    /// Set the heartbeat timeout
    pub fn with_heartbeat_timeout_ms(mut self, ms: u32) -> Self {
        self.heartbeat_timeout_ms = ms.max(1);
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout_ms(mut self, ms: u32) -> Self {
        self.handshake_timeout_ms = ms.max(1);
        self
    }

    /// Set the number of handshake attempts
    pub fn with_request_attempts(mut self, attempts: u8) -> Self {
        self.request_attempts = attempts.max(1);
        self
    }

    /// Enable or disable frame logging
    pub fn with_debug_log_rx_tx(mut self, enabled: bool) -> Self {
        self.debug_log_rx_tx = enabled;
        self
    }

    /// Enable or disable heartbeat logging
    pub fn with_debug_log_heartbeat(mut self, enabled: bool) -> Self {
        self.debug_log_heartbeat = enabled;
        self
    }
}

// ============================================================================
// Transport Config
// ============================================================================

/// Serial flow control
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control
    #[default]
    None,
    /// RTS/CTS
    Hardware,
}

/// Serial port configuration (8 data bits, no parity, one stop bit)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path
    pub device: LongString,
    /// Baud rate
    pub baudrate: u32,
    /// Flow control
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: long_string("/dev/ttyUSB0"),
            baudrate: 115_200,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Set the device path
    pub fn with_device(mut self, device: &str) -> Self {
        self.device = long_string(device);
        self
    }

    /// Set the baud rate
    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    /// Set flow control
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// TCP/UDP configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hostname or IP of the device
    pub hostname: ShortString,
    /// Port; `None` uses the protocol's well-known port
    pub port: Option<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: short_string("192.168.1.2"),
            port: None,
        }
    }
}

impl NetworkConfig {
    /// Set the hostname
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = short_string(hostname);
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Configured port or `default`.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

// ============================================================================
// Log Config
// ============================================================================

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub filter: ShortString,
    /// Directory for debug dumps, empty = disabled
    pub debug_dir: LongString,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: short_string("info"),
            debug_dir: LongString::new(),
        }
    }
}

impl LogConfig {
    /// Set the filter directive
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = short_string(filter);
        self
    }

    /// Set the debug directory
    pub fn with_debug_dir(mut self, dir: &str) -> Self {
        self.debug_dir = long_string(dir);
        self
    }

    /// Check if a debug directory is configured
    pub fn has_debug_dir(&self) -> bool {
        !self.debug_dir.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.can.node_uid, DEFAULT_NODE_UID);
        assert_eq!(config.diy.heartbeat_timeout_ms, 1000);
        assert_eq!(config.serial.baudrate, 115_200);
        assert!(!config.log.has_debug_dir());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::default()
            .with_can(
                CanConfig::default()
                    .with_node_uid(0x1234_5678)
                    .with_default_switch_time_ms(250),
            )
            .with_network(NetworkConfig::default().with_hostname("cs2.local").with_port(15731))
            .with_log(LogConfig::default().with_debug_dir("/tmp/x"));

        assert_eq!(config.can.node_uid, 0x1234_5678);
        assert_eq!(config.can.default_switch_time_ms, 250);
        assert_eq!(config.network.hostname.as_str(), "cs2.local");
        assert_eq!(config.network.port, Some(15731));
        assert!(config.log.has_debug_dir());
    }

    // =========================================================================
    // CanConfig Tests
    // =========================================================================

    #[test]
    fn switch_time_units() {
        assert_eq!(CanConfig::default().switch_time_units(), None);
        let can = CanConfig::default().with_default_switch_time_ms(250);
        assert_eq!(can.switch_time_units(), Some(25));
    }

    #[test]
    fn switch_time_clamped() {
        let can = CanConfig::default().with_default_switch_time_ms(500_000);
        assert_eq!(can.default_switch_time_ms, MAX_SWITCH_TIME_MS);
        assert_eq!(can.switch_time_units(), Some(16_300));
    }

    #[test]
    fn request_attempts_at_least_one() {
        assert_eq!(CanConfig::default().with_request_attempts(0).request_attempts, 1);
        assert_eq!(DiyConfig::default().with_request_attempts(0).request_attempts, 1);
    }

    // =========================================================================
    // NetworkConfig Tests
    // =========================================================================

    #[test]
    fn port_fallback() {
        let net = NetworkConfig::default();
        assert_eq!(net.port_or(15731), 15731);
        assert_eq!(net.with_port(1234).port_or(15731), 1234);
    }

    // =========================================================================
    // TOML Tests
    // =========================================================================

    #[test]
    fn parse_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [can]
            default_switch_time_ms = 200

            [diy]
            heartbeat_timeout_ms = 500
            debug_log_heartbeat = true

            [serial]
            device = "/dev/ttyACM0"
            flow_control = "hardware"
            "#,
        )
        .unwrap();

        assert_eq!(config.can.default_switch_time_ms, 200);
        assert_eq!(config.can.request_attempts, 3);
        assert_eq!(config.diy.heartbeat_timeout_ms, 500);
        assert!(config.diy.debug_log_heartbeat);
        assert_eq!(config.serial.device.as_str(), "/dev/ttyACM0");
        assert_eq!(config.serial.flow_control, FlowControl::Hardware);
        assert_eq!(config.serial.baudrate, 115_200);
    }

    #[test]
    fn parse_rejects_bad_types() {
        assert!(Config::from_toml_str("[can]\nnode_uid = \"x\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackside.toml");
        std::fs::write(&path, "[network]\nhostname = \"10.0.0.5\"\nport = 5550\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.network.hostname.as_str(), "10.0.0.5");
        assert_eq!(config.network.port, Some(5550));
    }

    #[test]
    fn load_missing_file() {
        assert!(Config::load("/nonexistent/trackside.toml").is_err());
    }

    // =========================================================================
    // String Helper Tests
    // =========================================================================

    #[test]
    fn short_string_truncation() {
        let long_input = "a".repeat(100);
        let s = short_string(&long_input);
        assert_eq!(s.len(), MAX_SHORT_STRING);
    }

    #[test]
    fn string_helpers_utf8_boundary() {
        let input = "🚂".repeat(40); // 4 bytes each
        let s = short_string(&input);
        assert_eq!(s.len(), 64);
        let s = long_string(&input[..]);
        assert_eq!(s.len(), 128);
        let s = short_string("ab🚂");
        assert_eq!(s.as_str(), "ab🚂");
    }
}
