//! # Configuration
//!
//! TOML settings for every service in this crate.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [graphics]
//! bind_address = "0.0.0.0:6000"
//! mode = "automatic"
//!
//! [peer]
//! name = "wall-left"
//! connect = [{ label = "hub", address = "10.0.0.2:6001" }]
//!
//! [master_slave]
//! ack_timeout_ms = 1000
//!
//! [[input.filters]]
//! kind = "axis_scale"
//! scale = 2.0
//! indices = [0, 1]
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use szg_core::input::{AxisScaleFilter, ButtonSuppressFilter, MatrixTransformFilter, PassThroughFilter};
use szg_core::{FilterSettings, IoFilter, Matrix4};

use crate::error::{NetError, NetResult};
use crate::graphics::PeerConfig;
use crate::master_slave::MasterConfig;
use crate::server::{SyncMode, SyncServerConfig};

fn default_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}
fn default_graphics_address() -> String {
    "0.0.0.0:6000".into()
}
fn default_graphics_name() -> String {
    "graphics".into()
}
fn default_send_limit() -> usize {
    1 << 20
}
fn default_flush_interval_ms() -> u64 {
    10
}
fn default_peer_name() -> String {
    "peer".into()
}
fn default_peer_address() -> String {
    "0.0.0.0:6001".into()
}
fn default_hop_limit() -> usize {
    8
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_master_address() -> String {
    "0.0.0.0:6002".into()
}
fn default_ack_timeout_ms() -> u64 {
    1_000
}
fn default_max_misses() -> u32 {
    3
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SzgConfig {
    /// Log output.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Graphics server.
    #[serde(default)]
    pub graphics: GraphicsSettings,
    /// Graphics peer.
    #[serde(default)]
    pub peer: PeerSettings,
    /// Master/slave frame exchange.
    #[serde(default)]
    pub master_slave: MasterSlaveSettings,
    /// Input filter chain.
    #[serde(default)]
    pub input: InputSettings,
}

impl SzgConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        toml::from_str(text).map_err(|e| NetError::Config(e.to_string()))
    }

    /// Reads and parses a file.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NetError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(target: "szg::config", "loaded {}", path.display());
        Ok(config)
    }
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info,szg::peer=debug"`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Colored output.
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// Include thread names, useful with one thread per connection.
    #[serde(default = "default_true")]
    pub thread_names: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_level(), ansi: true, thread_names: true }
    }
}

/// `[graphics]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsSettings {
    /// Name in log messages.
    #[serde(default = "default_graphics_name")]
    pub name: String,
    /// Listen address.
    #[serde(default = "default_graphics_address")]
    pub bind_address: String,
    /// `automatic` or `manual`.
    #[serde(default)]
    pub mode: SyncMode,
    /// Back buffer size above which writers wait.
    #[serde(default = "default_send_limit")]
    pub send_limit: usize,
    /// Longest sleep of the flush thread.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            name: default_graphics_name(),
            bind_address: default_graphics_address(),
            mode: SyncMode::default(),
            send_limit: default_send_limit(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl GraphicsSettings {
    /// Parsed listen address.
    pub fn address(&self) -> NetResult<SocketAddr> {
        parse_addr("graphics.bind_address", &self.bind_address)
    }

    /// Settings for a `GraphicsServer`.
    #[must_use]
    pub fn server_config(&self) -> SyncServerConfig {
        SyncServerConfig {
            name: self.name.clone(),
            mode: self.mode,
            send_limit: self.send_limit,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            dictionary: None,
        }
    }
}

/// One outgoing peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerLinkSettings {
    /// Connection label.
    pub label: String,
    /// Remote address.
    pub address: String,
    /// Relay records arriving from other connections to this one.
    #[serde(default)]
    pub relay: bool,
}

/// `[peer]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    /// Name announced to other peers.
    #[serde(default = "default_peer_name")]
    pub name: String,
    /// Listen address.
    #[serde(default = "default_peer_address")]
    pub bind_address: String,
    /// Longest relay history accepted.
    #[serde(default = "default_hop_limit")]
    pub hop_limit: usize,
    /// Limit for ping and dump replies.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Peers to connect to at startup.
    #[serde(default)]
    pub connect: Vec<PeerLinkSettings>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            name: default_peer_name(),
            bind_address: default_peer_address(),
            hop_limit: default_hop_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            connect: Vec::new(),
        }
    }
}

impl PeerSettings {
    /// Parsed listen address.
    pub fn address(&self) -> NetResult<SocketAddr> {
        parse_addr("peer.bind_address", &self.bind_address)
    }

    /// Settings for a `GraphicsPeer`.
    #[must_use]
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            name: self.name.clone(),
            hop_limit: self.hop_limit,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// `[master_slave]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSlaveSettings {
    /// Master listen address, and where slaves connect.
    #[serde(default = "default_master_address")]
    pub address: String,
    /// How long the master waits for acknowledgements.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Consecutive misses before eviction.
    #[serde(default = "default_max_misses")]
    pub max_misses: u32,
    /// Limit for the schema handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How long a slave waits for a frame; unset waits forever.
    #[serde(default)]
    pub frame_timeout_ms: Option<u64>,
}

impl Default for MasterSlaveSettings {
    fn default() -> Self {
        Self {
            address: default_master_address(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_misses: default_max_misses(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            frame_timeout_ms: None,
        }
    }
}

impl MasterSlaveSettings {
    /// Parsed master address.
    pub fn master_address(&self) -> NetResult<SocketAddr> {
        parse_addr("master_slave.address", &self.address)
    }

    /// Settings for a `MasterSync`.
    pub fn master_config(&self) -> NetResult<MasterConfig> {
        if self.max_misses == 0 {
            return Err(NetError::Config("master_slave.max_misses must be at least 1".into()));
        }
        Ok(MasterConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_misses: self.max_misses,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        })
    }

    /// Slave frame wait.
    #[must_use]
    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }

    /// Slave handshake wait.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// One filter of the chain. Keys other than `kind` become `FilterSettings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEntry {
    /// `pass_through`, `button_suppress`, `axis_scale` or `matrix_transform`.
    pub kind: String,
    /// Filter parameters.
    #[serde(flatten)]
    pub params: toml::Table,
}

impl FilterEntry {
    /// Parameters as strings. Arrays become comma-separated lists.
    #[must_use]
    pub fn settings(&self) -> FilterSettings {
        let mut settings = FilterSettings::new();
        for (key, value) in &self.params {
            settings.set(key, &value_string(value));
        }
        settings
    }

    /// Builds and configures the filter.
    pub fn build(&self) -> NetResult<Box<dyn IoFilter>> {
        let mut filter: Box<dyn IoFilter> = match self.kind.as_str() {
            "pass_through" => Box::new(PassThroughFilter),
            "button_suppress" => Box::new(ButtonSuppressFilter::all()),
            "axis_scale" => Box::new(AxisScaleFilter::new(1.0, 0.0)),
            "matrix_transform" => Box::new(MatrixTransformFilter::new(Matrix4::IDENTITY, Matrix4::IDENTITY)),
            other => return Err(NetError::Config(format!("unknown filter kind '{other}'"))),
        };
        if !filter.configure(&self.settings()) {
            return Err(NetError::Config(format!("bad parameters for filter '{}'", self.kind)));
        }
        Ok(filter)
    }
}

/// `[input]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSettings {
    /// Filters in chain order.
    #[serde(default)]
    pub filters: Vec<FilterEntry>,
}

impl InputSettings {
    /// Builds every filter in order.
    pub fn build_filters(&self) -> NetResult<Vec<Box<dyn IoFilter>>> {
        self.filters.iter().map(FilterEntry::build).collect()
    }
}

fn value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(value_string).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn parse_addr(key: &str, text: &str) -> NetResult<SocketAddr> {
    text.parse().map_err(|e| NetError::Config(format!("{key} = '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = SzgConfig::from_toml_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.graphics.mode, SyncMode::Automatic);
        assert_eq!(config.peer.hop_limit, 8);
        assert_eq!(config.master_slave.max_misses, 3);
        assert!(config.input.filters.is_empty());
        assert!(config.master_slave.frame_timeout().is_none());
    }

    #[test]
    fn test_sections_convert_to_service_configs() {
        let config = SzgConfig::from_toml_str(
            r#"
            [graphics]
            mode = "manual"
            flush_interval_ms = 25

            [peer]
            name = "wall"
            bind_address = "127.0.0.1:7001"
            connect = [{ label = "hub", address = "127.0.0.1:7002", relay = true }]

            [master_slave]
            ack_timeout_ms = 250
            max_misses = 2
            "#,
        )
        .unwrap();
        let server = config.graphics.server_config();
        assert_eq!(server.mode, SyncMode::Manual);
        assert_eq!(server.flush_interval, Duration::from_millis(25));
        assert_eq!(config.peer.peer_config().name, "wall");
        assert_eq!(config.peer.address().unwrap().port(), 7001);
        assert!(config.peer.connect[0].relay);
        let master = config.master_slave.master_config().unwrap();
        assert_eq!(master.ack_timeout, Duration::from_millis(250));
        assert_eq!(master.max_misses, 2);
    }

    #[test]
    fn test_filter_tables_become_settings() {
        let config = SzgConfig::from_toml_str(
            r#"
            [[input.filters]]
            kind = "axis_scale"
            scale = 2.5
            indices = [0, 3]

            [[input.filters]]
            kind = "button_suppress"
            indices = "1 2"
            "#,
        )
        .unwrap();
        let settings = config.input.filters[0].settings();
        assert_eq!(settings.get_f32("scale"), Some(2.5));
        assert_eq!(settings.get_indices("indices"), Some(vec![0, 3]));
        assert_eq!(config.input.build_filters().unwrap().len(), 2);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        assert!(matches!(SzgConfig::from_toml_str("[peer]\nhop_limit = \"x\""), Err(NetError::Config(_))));
        let unknown = SzgConfig::from_toml_str("[[input.filters]]\nkind = \"blur\"").unwrap();
        assert!(matches!(unknown.input.build_filters(), Err(NetError::Config(_))));
        let zero = SzgConfig::from_toml_str("[master_slave]\nmax_misses = 0").unwrap();
        assert!(zero.master_slave.master_config().is_err());
        let addr = SzgConfig::from_toml_str("[graphics]\nbind_address = \"nowhere\"").unwrap();
        assert!(addr.graphics.address().is_err());
    }
}
