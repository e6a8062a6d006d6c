//! Network sampler - connection type, signal, throughput and latency

pub mod classify;
pub mod model;
pub mod platform;
pub mod speed;

use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::shared::now_millis;
use classify::{classify, signal_level};
use model::{CellularDetails, ConnectionType, NetworkSample, SpeedTestResult, WifiDetails};
use platform::ConnectivityProvider;
use speed::{SpeedProbe, SpeedSampler, SpeedTestError, SpeedTestGuard};

/// Outcome of an explicit speed test request
#[derive(Debug)]
pub enum SpeedTestOutcome {
    Completed(SpeedTestResult),
    AlreadyRunning,
}

pub struct NetworkMonitor<P> {
    provider: Arc<dyn ConnectivityProvider>,
    sampler: SpeedSampler<P>,
    guard: SpeedTestGuard,
    config: NetworkConfig,
}

impl<P: SpeedProbe> NetworkMonitor<P> {
    pub fn new(provider: Arc<dyn ConnectivityProvider>, probe: P, config: NetworkConfig) -> Self {
        Self {
            provider,
            sampler: SpeedSampler::new(probe),
            guard: SpeedTestGuard::default(),
            config,
        }
    }

    pub async fn connection_type(&self) -> ConnectionType {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || classify(provider.active_capabilities().as_ref()))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Classification task failed: {}", e);
                ConnectionType::Unknown
            })
    }

    /// Classify, name and rate the active connection, then run a quick poll
    pub async fn current_network_info(&self) -> NetworkSample {
        let provider = self.provider.clone();
        let (connection_type, network_name, rssi) = tokio::task::spawn_blocking(move || {
            let connection = classify(provider.active_capabilities().as_ref());
            let (name, rssi) = match connection {
                ConnectionType::Wifi => match provider.wifi_details() {
                    Ok(w) => (w.ssid.unwrap_or_else(|| "Unknown WiFi".to_string()), w.rssi_dbm),
                    Err(e) => {
                        tracing::warn!("Error getting wifi details: {}", e);
                        ("Unknown WiFi".to_string(), None)
                    }
                },
                ConnectionType::Unknown => ("Unknown".to_string(), None),
                ConnectionType::Ethernet => ("Ethernet".to_string(), None),
                _ => match provider.cellular_details() {
                    Ok(c) => (
                        c.operator_name
                            .filter(|n| !n.is_empty())
                            .unwrap_or_else(|| "Unknown Carrier".to_string()),
                        None,
                    ),
                    Err(e) => {
                        tracing::warn!("Error getting carrier name: {}", e);
                        ("Unknown Carrier".to_string(), None)
                    }
                },
            };
            (connection, name, rssi)
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Network info task failed: {}", e);
            (ConnectionType::Unknown, "Unknown".to_string(), None)
        });

        let speed = self.sampler.quick_poll(&self.config.quick_poll_url).await;

        NetworkSample {
            connection_type,
            network_name,
            signal_strength: signal_level(connection_type, rssi),
            download_speed_mbps: speed.download_speed_mbps,
            upload_speed_mbps: 0.0,
            latency_ms: speed.latency_ms,
            timestamp: now_millis(),
        }
    }

    /// Multi-URL speed test. A second call while one runs is a no-op.
    pub async fn run_speed_test(&self) -> Result<SpeedTestOutcome, SpeedTestError> {
        let Some(_in_flight) = self.guard.try_begin() else {
            tracing::info!("Speed test already running, ignoring request");
            return Ok(SpeedTestOutcome::AlreadyRunning);
        };

        tracing::info!("Starting speed test over {} URLs", self.config.speed_test_urls.len());
        let result = self.sampler.sample_speed(&self.config.speed_test_urls).await?;
        tracing::info!(
            "Speed test done: {:.2} Mbps, {} ms latency ({}/{} samples)",
            result.download_speed_mbps,
            result.latency_ms,
            result.successful_samples,
            result.attempted_samples
        );
        Ok(SpeedTestOutcome::Completed(result))
    }

    pub fn is_speed_test_running(&self) -> bool {
        self.guard.is_running()
    }

    pub async fn wifi_details(&self) -> WifiDetails {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.wifi_details())
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r)
            .unwrap_or_else(|e| {
                tracing::debug!("Wifi details unavailable: {}", e);
                WifiDetails::default()
            })
    }

    pub async fn cellular_details(&self) -> CellularDetails {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.cellular_details())
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r)
            .unwrap_or_else(|e| {
                tracing::debug!("Cellular details unavailable: {}", e);
                CellularDetails::default()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::model::{NetworkCapabilities, RadioTechnology, Transport};
    use super::speed::Download;
    use super::*;
    use std::time::Duration;

    struct FixedProvider {
        caps: Option<NetworkCapabilities>,
        wifi: Option<WifiDetails>,
    }

    impl ConnectivityProvider for FixedProvider {
        fn active_capabilities(&self) -> Option<NetworkCapabilities> {
            self.caps.clone()
        }

        fn wifi_details(&self) -> anyhow::Result<WifiDetails> {
            self.wifi.clone().ok_or_else(|| anyhow::anyhow!("no wifi"))
        }

        fn cellular_details(&self) -> anyhow::Result<CellularDetails> {
            Ok(CellularDetails {
                network_type: "LTE".to_string(),
                operator_name: Some("Carrier".to_string()),
                ..CellularDetails::default()
            })
        }
    }

    /// Each fetch takes `delay` of real time and returns 1 MB
    struct SlowProbe {
        delay: Duration,
    }

    impl SpeedProbe for SlowProbe {
        async fn fetch(&self, _url: &str) -> anyhow::Result<Download> {
            tokio::time::sleep(self.delay).await;
            Ok(Download {
                bytes: 1_000_000,
                elapsed: Duration::from_millis(200),
            })
        }

        async fn latency(&self) -> anyhow::Result<Duration> {
            Ok(Duration::from_millis(12))
        }
    }

    fn wifi_provider() -> Arc<dyn ConnectivityProvider> {
        Arc::new(FixedProvider {
            caps: Some(NetworkCapabilities {
                transports: [Transport::Wifi].into_iter().collect(),
                radio_technology: None,
                interface: Some("wlan0".to_string()),
            }),
            wifi: Some(WifiDetails {
                ssid: Some("HomeNet".to_string()),
                rssi_dbm: Some(-50),
                ..WifiDetails::default()
            }),
        })
    }

    #[tokio::test]
    async fn test_network_info_for_wifi() {
        let monitor = NetworkMonitor::new(
            wifi_provider(),
            SlowProbe { delay: Duration::ZERO },
            NetworkConfig::default(),
        );

        let info = monitor.current_network_info().await;
        assert_eq!(info.connection_type, ConnectionType::Wifi);
        assert_eq!(info.network_name, "HomeNet");
        assert_eq!(info.signal_strength, 4);
        assert!((info.download_speed_mbps - 40.0).abs() < 1e-9);
        assert_eq!(info.latency_ms, 12);
        assert_eq!(info.upload_speed_mbps, 0.0);
    }

    #[tokio::test]
    async fn test_network_info_for_cellular() {
        let provider = Arc::new(FixedProvider {
            caps: Some(NetworkCapabilities {
                transports: [Transport::Cellular].into_iter().collect(),
                radio_technology: Some(RadioTechnology::Lte),
                interface: Some("wwan0".to_string()),
            }),
            wifi: None,
        });
        let monitor = NetworkMonitor::new(provider, SlowProbe { delay: Duration::ZERO }, NetworkConfig::default());

        let info = monitor.current_network_info().await;
        assert_eq!(info.connection_type, ConnectionType::MobileLte);
        assert_eq!(info.network_name, "Carrier");
        assert_eq!(info.signal_strength, 3);
    }

    #[tokio::test]
    async fn test_no_network_degrades_to_unknown() {
        let provider = Arc::new(FixedProvider { caps: None, wifi: None });
        let monitor = NetworkMonitor::new(provider, SlowProbe { delay: Duration::ZERO }, NetworkConfig::default());

        assert_eq!(monitor.connection_type().await, ConnectionType::Unknown);
        assert_eq!(monitor.wifi_details().await, WifiDetails::default());
    }

    #[tokio::test]
    async fn test_second_speed_test_is_noop_while_running() {
        let monitor = Arc::new(NetworkMonitor::new(
            wifi_provider(),
            SlowProbe {
                delay: Duration::from_millis(100),
            },
            NetworkConfig::default(),
        ));

        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run_speed_test().await })
        };
        while !monitor.is_speed_test_running() {
            tokio::task::yield_now().await;
        }

        let second = monitor.run_speed_test().await.unwrap();
        assert!(matches!(second, SpeedTestOutcome::AlreadyRunning));

        let first = first.await.unwrap().unwrap();
        match first {
            SpeedTestOutcome::Completed(result) => assert_eq!(result.successful_samples, 3),
            SpeedTestOutcome::AlreadyRunning => panic!("first run should complete"),
        }
        assert!(!monitor.is_speed_test_running());
    }
}
