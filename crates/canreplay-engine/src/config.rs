//! Replay and analysis configuration
//!
//! Loaded from TOML; every section and field has a default so an empty
//! file is a valid configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use canreplay_core::RunMode;

use crate::router::ChannelSelection;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            replay: ReplayConfig::default(),
            analysis: AnalysisConfig::default(),
            knowledge_base: KnowledgeBaseConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

fn default_mode() -> RunMode {
    RunMode::Analysis
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.replay.validate()?;
        self.analysis.id_set()?;
        Ok(())
    }
}

// =============================================================================
// Replay
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Playback rate: 1.0 real time, 2.0 twice as fast, 0.0 as fast as possible
    ///
    /// Timestamp gaps are divided by this value. It is a rate, not a delay
    /// multiplier: a setting that meant "multiply delays by 0.5" must be
    /// written here as 2.0.
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f64,
    /// "auto" or an explicit channel such as "Vector Ch2" / "can1"
    #[serde(default)]
    pub channel: ChannelSelection,
    /// Start a listener per channel and record responses
    #[serde(default = "default_true")]
    pub monitor_responses: bool,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Countdown ticks before playback starts (0 disables)
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u8,
    #[serde(default = "default_countdown_tick_ms")]
    pub countdown_tick_ms: u64,
    /// Keep listening this long after the last frame was sent
    #[serde(default)]
    pub response_grace_ms: u64,
    #[serde(default = "default_true")]
    pub detect_diagnostics: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed_factor: default_speed_factor(),
            channel: ChannelSelection::default(),
            monitor_responses: true,
            poll_timeout_ms: default_poll_timeout_ms(),
            countdown_secs: default_countdown_secs(),
            countdown_tick_ms: default_countdown_tick_ms(),
            response_grace_ms: 0,
            detect_diagnostics: true,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.speed_factor.is_finite() || self.speed_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "speed_factor must be a non-negative number, got {}",
                self.speed_factor
            )));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn response_grace(&self) -> Duration {
        Duration::from_millis(self.response_grace_ms)
    }
}

fn default_speed_factor() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_countdown_secs() -> u8 {
    3
}

fn default_countdown_tick_ms() -> u64 {
    1000
}

// =============================================================================
// Analysis
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Only keep these arbitration IDs (hex strings such as "0x7E0"); empty keeps all
    #[serde(default)]
    pub id_filter: Vec<String>,
    /// Only keep conventional diagnostic IDs
    #[serde(default)]
    pub diagnostic_ids_only: bool,
    #[serde(default = "default_true")]
    pub detect_diagnostics: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            id_filter: Vec::new(),
            diagnostic_ids_only: false,
            detect_diagnostics: true,
        }
    }
}

impl AnalysisConfig {
    /// Parse `id_filter` into a set of IDs
    pub fn id_set(&self) -> Result<HashSet<u32>, ConfigError> {
        self.id_filter.iter().map(|s| parse_can_id(s)).collect()
    }
}

/// Parse a CAN ID written as "0x7E0" or "7E0"
pub fn parse_can_id(s: &str) -> Result<u32, ConfigError> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(hex, 16)
        .map_err(|_| ConfigError::Invalid(format!("Invalid CAN ID: {}", s)))
}

// =============================================================================
// Knowledge base
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// CDD/ODX export; absent means heuristic classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-process virtual bus
    Virtual(VirtualBusConfig),
    /// SocketCAN interfaces (Linux only)
    SocketCan(SocketCanConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Virtual(VirtualBusConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualBusConfig {
    /// Simulated transmit latency
    #[serde(default)]
    pub latency_ms: u64,
    /// Answer common UDS requests like a simulated ECU
    #[serde(default = "default_true")]
    pub simulate_ecu: bool,
}

impl Default for VirtualBusConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            simulate_ecu: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// Channel N maps to interface "{prefix}{N}"
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface_prefix: default_interface_prefix(),
        }
    }
}

fn default_interface_prefix() -> String {
    "can".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.mode, RunMode::Analysis);
        assert_eq!(config.replay.speed_factor, 1.0);
        assert_eq!(config.replay.channel, ChannelSelection::Auto);
        assert!(config.replay.monitor_responses);
        assert_eq!(config.replay.poll_timeout(), Duration::from_millis(100));
        assert_eq!(config.replay.countdown_secs, 3);
        assert!(matches!(config.transport, TransportConfig::Virtual(_)));
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml(
            r#"
            mode = "replay"

            [replay]
            speed_factor = 2.0
            channel = "Vector Ch2"
            countdown_secs = 0

            [analysis]
            id_filter = ["0x7E0", "7E8"]
            diagnostic_ids_only = true

            [knowledge_base]
            path = "ecu.cdd"

            [transport]
            type = "socketcan"
            interface_prefix = "vcan"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, RunMode::Replay);
        assert_eq!(config.replay.channel, ChannelSelection::Explicit(1));
        assert_eq!(
            config.analysis.id_set().unwrap(),
            HashSet::from([0x7E0, 0x7E8])
        );
        assert_eq!(config.knowledge_base.path, Some(PathBuf::from("ecu.cdd")));
        match config.transport {
            TransportConfig::SocketCan(cfg) => assert_eq!(cfg.interface_prefix, "vcan"),
            other => panic!("unexpected transport: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[replay]\nspeed_factor = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[analysis]\nid_filter = [\"0xZZ\"]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[replay]\nchannel = \"Bluetooth 3\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
