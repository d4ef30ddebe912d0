use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::core::config::{ConfigError, Result};
use crate::core::segments::Action;
use crate::core::utils::network;

/// The default port of the Cast protocol channel.
pub const DEFAULT_CAST_PORT: u16 = 8009;

const DEFAULT_LOG_LEVEL: fn() -> String = || "info".to_string();
const DEFAULT_DISCOVER_INTERVAL: fn() -> Duration = || Duration::from_secs(5 * 60);
const DEFAULT_PAUSED_INTERVAL: fn() -> Duration = || Duration::from_secs(60);
const DEFAULT_PLAYING_INTERVAL: fn() -> Duration = || Duration::from_millis(500);
const DEFAULT_SKIP_DELAY: fn() -> Duration = || Duration::ZERO;
const DEFAULT_IGNORE_SEGMENT_DURATION: fn() -> Duration = || Duration::from_secs(60);
const DEFAULT_CATEGORIES: fn() -> Vec<String> = || vec!["sponsor".to_string()];
const DEFAULT_ACTION_TYPES: fn() -> Vec<Action> = || vec![Action::Skip, Action::Mute];
const DEFAULT_ENABLED: fn() -> bool = || true;

/// The process-wide application configuration.
///
/// It is assembled once during startup by [Config::load] and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The root log level of the application.
    #[serde(default = "DEFAULT_LOG_LEVEL")]
    pub log_level: String,
    /// Static list of device addresses, disabling discovery when non-empty.
    #[serde(default)]
    pub devices: Vec<String>,
    /// The interval between device discovery restarts.
    #[serde(with = "humantime_serde", default = "DEFAULT_DISCOVER_INTERVAL")]
    pub discover_interval: Duration,
    /// The poll interval while a device is idle or not playing YouTube.
    #[serde(with = "humantime_serde", default = "DEFAULT_PAUSED_INTERVAL")]
    pub paused_interval: Duration,
    /// The poll interval while a YouTube stream is playing or buffering.
    #[serde(with = "humantime_serde", default = "DEFAULT_PLAYING_INTERVAL")]
    pub playing_interval: Duration,
    /// The offset added to a segment start before a skip fires.
    #[serde(with = "humantime_serde", default = "DEFAULT_SKIP_DELAY")]
    pub skip_delay: Duration,
    /// The window during which a just-skipped segment is suppressed from re-firing.
    #[serde(with = "humantime_serde", default = "DEFAULT_IGNORE_SEGMENT_DURATION")]
    pub ignore_segment_duration: Duration,
    /// The network interface to use for discovery and device connections.
    #[serde(default)]
    pub network_interface: Option<String>,
    /// Master enable for sponsor segment handling.
    #[serde(default = "DEFAULT_ENABLED")]
    pub skip_sponsors: bool,
    /// The segment categories to act on.
    #[serde(default = "DEFAULT_CATEGORIES")]
    pub categories: Vec<String>,
    /// The segment action types to act on.
    #[serde(default = "DEFAULT_ACTION_TYPES")]
    pub action_types: Vec<Action>,
    /// The YouTube Data API key enabling the video id resolver.
    #[serde(default)]
    pub youtube_api_key: Option<String>,
    /// Master enable for ad muting.
    #[serde(default = "DEFAULT_ENABLED")]
    pub mute_ads: bool,
    /// The parsed static device addresses, derived from `devices`.
    #[serde(skip)]
    pub device_addrs: Vec<DeviceAddr>,
}

impl Config {
    /// The root log level of the application.
    pub fn log_level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    /// Validates and derives the computed configuration fields.
    ///
    /// This trims list values, parses the static device addresses and resolves the
    /// network interface name to an address.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        LevelFilter::from_str(&self.log_level).map_err(|e| {
            ConfigError::InvalidValue("log-level".to_string(), format!("{}: {}", self.log_level, e))
        })?;

        self.categories = self
            .categories
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        self.device_addrs = self
            .devices
            .iter()
            .map(|e| DeviceAddr::from_str(e))
            .collect::<Result<Vec<DeviceAddr>>>()?;

        if let Some(name) = self.network_interface.as_ref().filter(|e| !e.is_empty()) {
            network::interface_addr(name)
                .ok_or_else(|| ConfigError::UnknownInterface(name.clone()))?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL(),
            devices: Vec::new(),
            discover_interval: DEFAULT_DISCOVER_INTERVAL(),
            paused_interval: DEFAULT_PAUSED_INTERVAL(),
            playing_interval: DEFAULT_PLAYING_INTERVAL(),
            skip_delay: DEFAULT_SKIP_DELAY(),
            ignore_segment_duration: DEFAULT_IGNORE_SEGMENT_DURATION(),
            network_interface: None,
            skip_sponsors: true,
            categories: DEFAULT_CATEGORIES(),
            action_types: DEFAULT_ACTION_TYPES(),
            youtube_api_key: None,
            mute_ads: true,
            device_addrs: Vec::new(),
        }
    }
}

/// A statically configured device address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddr {
    /// The configured `host[:port]` value.
    pub host: String,
    /// The literal address of the device.
    pub addr: IpAddr,
    /// The Cast channel port of the device.
    pub port: u16,
}

impl FromStr for DeviceAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let host = s.trim();

        if let Ok(socket) = SocketAddr::from_str(host) {
            return Ok(Self {
                host: host.to_string(),
                addr: socket.ip(),
                port: socket.port(),
            });
        }

        let literal = host
            .strip_prefix('[')
            .and_then(|e| e.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(addr) = IpAddr::from_str(literal) {
            return Ok(Self {
                host: host.to_string(),
                addr,
                port: DEFAULT_CAST_PORT,
            });
        }

        Err(ConfigError::InvalidIP(host.to_string()))
    }
}
