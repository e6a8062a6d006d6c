//! Configuration module
//!
//! Reads/writes configuration from ~/.config/rmcp-netsense/config.toml.
//! Every section falls back to defaults, so a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// List of disabled tool names (all others are enabled)
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Single payload used by the lightweight poll
    pub quick_poll_url: String,
    /// Payloads fetched in order by an explicit speed test
    pub speed_test_urls: Vec<String>,
    /// host:port probed with a TCP connect to measure latency
    pub latency_host: String,
    pub latency_timeout_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            quick_poll_url: "https://httpbin.org/bytes/1000000".to_string(),
            speed_test_urls: vec![
                "https://httpbin.org/bytes/1000000".to_string(),
                "https://httpbin.org/bytes/5000000".to_string(),
                "https://httpbin.org/bytes/10000000".to_string(),
            ],
            latency_host: "8.8.8.8:53".to_string(),
            latency_timeout_ms: 5000,
            request_timeout_secs: 30,
        }
    }
}

impl NetworkConfig {
    pub fn latency_timeout(&self) -> Duration {
        Duration::from_millis(self.latency_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// Root of the Industrial I/O sysfs tree
    pub iio_root: PathBuf,
    pub poll_interval_ms: u64,
    /// How long read_sensor waits for a first sample
    pub read_timeout_ms: u64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            iio_root: PathBuf::from("/sys/bus/iio/devices"),
            poll_interval_ms: 200,
            read_timeout_ms: 2000,
        }
    }
}

impl SensorsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Whether location access is granted to this server
    pub permission_granted: bool,
    pub gps_enabled: bool,
    pub gpsd_address: String,
    pub network_enabled: bool,
    pub network_url: String,
    pub network_interval_secs: u64,
    /// Delay between gpsd connection attempts
    pub gpsd_retry_ms: u64,
    /// How long get_location waits for a fresh fix
    pub fix_timeout_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            permission_granted: true,
            gps_enabled: true,
            gpsd_address: "127.0.0.1:2947".to_string(),
            network_enabled: true,
            network_url: "https://ipinfo.io/json".to_string(),
            network_interval_secs: 300,
            gpsd_retry_ms: 5000,
            fix_timeout_ms: 10_000,
        }
    }
}

impl LocationConfig {
    pub fn gpsd_retry(&self) -> Duration {
        Duration::from_millis(self.gpsd_retry_ms.max(10))
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rmcp-netsense").join("config.toml"))
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            tracing::warn!("Could not determine config directory, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Save config to file
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check if a tool is enabled
    pub fn is_enabled(&self, tool_name: &str) -> bool {
        !self.disabled.iter().any(|t| t == tool_name)
    }
}

/// Get list of all tool names (compile-time known)
pub fn all_tool_names() -> Vec<&'static str> {
    vec![
        // dashboard
        "get_dashboard",
        // network
        "get_connection_type",
        "get_network_info",
        "run_speed_test",
        "get_wifi_details",
        "get_cellular_details",
        // sensors
        "list_available_sensors",
        "get_sensor_info",
        "read_sensor",
        "stop_sensor",
        "stop_all_sensors",
        "get_environment_snapshot",
        "get_motion_snapshot",
        "get_location",
    ]
}
