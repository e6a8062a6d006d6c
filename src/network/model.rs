//! Network data types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Wifi,
    MobileLte,
    #[serde(rename = "MOBILE_4G")]
    Mobile4g,
    #[serde(rename = "MOBILE_3G")]
    Mobile3g,
    #[serde(rename = "MOBILE_2G")]
    Mobile2g,
    #[serde(rename = "MOBILE_5G")]
    Mobile5g,
    Ethernet,
    Unknown,
}

impl ConnectionType {
    pub fn is_cellular(self) -> bool {
        matches!(
            self,
            Self::MobileLte | Self::Mobile4g | Self::Mobile3g | Self::Mobile2g | Self::Mobile5g
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Wifi => "WiFi",
            Self::MobileLte => "LTE",
            Self::Mobile4g => "4G",
            Self::Mobile3g => "3G",
            Self::Mobile2g => "2G",
            Self::Mobile5g => "5G",
            Self::Ethernet => "Ethernet",
            Self::Unknown => "Unknown",
        }
    }
}

/// Physical medium the platform reports for the active network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
}

/// Cellular radio access technology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioTechnology {
    Nr,
    Lte,
    Hspap,
    Hspa,
    Hsupa,
    Hsdpa,
    Umts,
    Edge,
    Gprs,
    Other(String),
}

impl RadioTechnology {
    /// Parse a technology name as reported by a modem manager (case-insensitive)
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "5gnr" | "nr" | "5g" => Self::Nr,
            "lte" | "4g" => Self::Lte,
            "hspa-plus" | "hspa+" | "hspap" => Self::Hspap,
            "hspa" => Self::Hspa,
            "hsupa" => Self::Hsupa,
            "hsdpa" => Self::Hsdpa,
            "umts" => Self::Umts,
            "edge" => Self::Edge,
            "gprs" => Self::Gprs,
            other => Self::Other(other.to_string()),
        }
    }

    /// Human readable network type
    pub fn label(&self) -> &str {
        match self {
            Self::Nr => "5G NR",
            Self::Lte => "LTE",
            Self::Hspap => "HSPA+",
            Self::Hspa => "HSPA",
            Self::Hsupa => "HSUPA",
            Self::Hsdpa => "HSDPA",
            Self::Umts => "UMTS",
            Self::Edge => "EDGE",
            Self::Gprs => "GPRS",
            Self::Other(_) => "Unknown",
        }
    }
}

/// Capability set of the active network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCapabilities {
    pub transports: BTreeSet<Transport>,
    pub radio_technology: Option<RadioTechnology>,
    pub interface: Option<String>,
}

impl NetworkCapabilities {
    pub fn has_transport(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }
}

/// Point-in-time view of the current connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSample {
    pub connection_type: ConnectionType,
    pub network_name: String,
    pub signal_strength: u8,
    pub download_speed_mbps: f64,
    /// Never measured, always 0.0
    pub upload_speed_mbps: f64,
    pub latency_ms: u64,
    pub timestamp: u64,
}

/// One successful download measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedSample {
    pub download_speed_mbps: f64,
    pub latency_ms: u64,
    pub bytes: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedTestResult {
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub latency_ms: u64,
    pub jitter_ms: u64,
    pub packet_loss: f64,
    pub test_duration_ms: u64,
    pub successful_samples: usize,
    pub attempted_samples: usize,
    pub timestamp: u64,
}

impl SpeedTestResult {
    /// Zeroed result used when a lightweight poll fails
    pub fn empty(timestamp: u64) -> Self {
        Self {
            download_speed_mbps: 0.0,
            upload_speed_mbps: 0.0,
            latency_ms: 0,
            jitter_ms: 0,
            packet_loss: 0.0,
            test_duration_ms: 0,
            successful_samples: 0,
            attempted_samples: 0,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WifiDetails {
    pub interface: Option<String>,
    pub ssid: Option<String>,
    pub bssid: Option<String>,
    pub frequency_mhz: Option<u32>,
    pub link_speed_mbps: Option<u32>,
    pub rssi_dbm: Option<i32>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellularDetails {
    pub network_type: String,
    pub operator_name: Option<String>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
    pub signal_strength: u8,
}

impl Default for CellularDetails {
    fn default() -> Self {
        Self {
            network_type: "Unknown".to_string(),
            operator_name: None,
            mcc: None,
            mnc: None,
            signal_strength: 0,
        }
    }
}

/// Split an operator code ("310260") into MCC and MNC
pub fn split_operator_code(code: &str) -> (Option<String>, Option<String>) {
    let code = code.trim();
    if code.len() < 5 || !code.chars().all(|c| c.is_ascii_digit()) {
        return (None, None);
    }
    (Some(code[..3].to_string()), Some(code[3..].to_string()))
}
