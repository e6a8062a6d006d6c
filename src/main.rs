//! rmcp-netsense: MCP server for network quality and device sensors
//!
//! Features:
//! - dashboard: one-shot overview of connection, sensors and environment
//! - network: connection type, quick poll, speed test, wifi and cellular details
//! - sensors: hardware sensor readings, environmental and motion snapshots, location

use clap::{Parser, Subcommand};
use futures::{stream::BoxStream, StreamExt};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    ErrorData as McpError,
    ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// === Modules ===

mod config;
mod network;
mod sensors;
mod shared;

use config::Config;
use network::model::{ConnectionType, NetworkSample};
use network::platform::LinuxConnectivity;
use network::speed::{HttpProbe, SpeedTestError};
use network::{NetworkMonitor, SpeedTestOutcome};
use sensors::aggregator::SensorAggregator;
use sensors::iio::IioSensorHardware;
use sensors::location::{GpsdProvider, IpGeolocationProvider, LocationHub, LocationProvider};
use sensors::model::{EnvironmentalSnapshot, SensorType};
use shared::{format_millis, internal_error, json_result, text_result};

// === CLI ===

#[derive(Parser)]
#[command(name = "rmcp-netsense")]
#[command(about = "MCP server for network quality and device sensors")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the config file in your editor
    Config,
}

// === Common Parameter Types ===

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SensorParams {
    #[schemars(description = "Sensor type, e.g. 'accelerometer', 'temperature', 'light', 'linear_acceleration'")]
    pub sensor: SensorType,
}

#[derive(Debug, Serialize)]
struct Dashboard {
    network: NetworkSample,
    speed_test_running: bool,
    available_sensors: BTreeSet<SensorType>,
    environment: EnvironmentalSnapshot,
}

#[derive(Debug, Serialize)]
struct ConnectionTypeReport {
    connection_type: ConnectionType,
    label: &'static str,
    is_cellular: bool,
}

#[derive(Debug, Serialize)]
struct SensorListing {
    sensor_type: SensorType,
    unit: &'static str,
}

// === Server ===

#[derive(Clone)]
pub struct NetsenseServer {
    tool_router: ToolRouter<Self>,
    network: Arc<NetworkMonitor<HttpProbe>>,
    sensors: Arc<SensorAggregator>,
    config: Arc<Config>,
}

impl NetsenseServer {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let mut tool_router = Self::tool_router();

        let known = config::all_tool_names();
        for tool_name in &config.disabled {
            if tool_router.has_route(tool_name) {
                tool_router.remove_route(tool_name);
                tracing::info!("Disabled tool: {}", tool_name);
            } else if !known.contains(&tool_name.as_str()) {
                tracing::warn!("Config disables unknown tool: {}", tool_name);
            }
        }

        if !config.disabled.is_empty() {
            let enabled = known.iter().filter(|t| config.is_enabled(t)).count();
            tracing::info!(
                "Loaded config: {} tools disabled, {} of {} tools active",
                config.disabled.len(),
                enabled,
                tool_router.map.len()
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.network.request_timeout())
            .build()?;

        let probe = HttpProbe::new(
            client.clone(),
            config.network.latency_host.clone(),
            config.network.latency_timeout(),
        );
        let network = NetworkMonitor::new(Arc::new(LinuxConnectivity::default()), probe, config.network.clone());

        let (iio_root, poll_interval) = (config.sensors.iio_root.clone(), config.sensors.poll_interval());
        let hardware = tokio::task::spawn_blocking(move || IioSensorHardware::new(iio_root, poll_interval)).await?;
        let providers: Vec<Arc<dyn LocationProvider>> = vec![
            Arc::new(GpsdProvider::new(&config.location)),
            Arc::new(IpGeolocationProvider::new(client, &config.location)),
        ];
        let sensors = SensorAggregator::new(Arc::new(hardware), LocationHub::new(providers));

        Ok(Self {
            tool_router,
            network: Arc::new(network),
            sensors: Arc::new(sensors),
            config: Arc::new(config),
        })
    }

    fn read_timeout(&self) -> Duration {
        self.config.sensors.read_timeout()
    }

    /// Long enough for every present sensor to report once
    fn settle_window(&self) -> Duration {
        self.config.sensors.poll_interval()
    }

    fn latest_environment(&self) -> EnvironmentalSnapshot {
        let latest: Vec<_> = SensorType::ENVIRONMENTAL
            .iter()
            .map(|kind| self.sensors.latest(*kind))
            .collect();
        EnvironmentalSnapshot::from_latest(&latest)
    }
}

/// Wait for the first snapshot, then keep the newest one that arrives within
/// `linger` so constituents polled a moment later are reflected too
async fn settle<T>(mut snapshots: BoxStream<'static, T>, wait: Duration, linger: Duration) -> Option<T> {
    let mut latest = tokio::time::timeout(wait, snapshots.next()).await.ok().flatten()?;
    let deadline = tokio::time::Instant::now() + linger;
    while let Ok(Some(next)) = tokio::time::timeout_at(deadline, snapshots.next()).await {
        latest = next;
    }
    Some(latest)
}

// Tool implementations
#[rmcp::tool_router]
impl NetsenseServer {
    // ============================================================
    // DASHBOARD
    // ============================================================

    #[rmcp::tool(description = "Get a one-shot overview: current connection with quick speed poll, available sensors, latest environmental readings")]
    pub async fn get_dashboard(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let dashboard = Dashboard {
            network: self.network.current_network_info().await,
            speed_test_running: self.network.is_speed_test_running(),
            available_sensors: self.sensors.available_sensors(),
            environment: self.latest_environment(),
        };
        json_result(&dashboard)
    }

    // ============================================================
    // NETWORK
    // ============================================================

    #[rmcp::tool(description = "Classify the active connection: WIFI, ETHERNET, MOBILE_5G/LTE/4G/3G/2G or UNKNOWN")]
    pub async fn get_connection_type(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let connection_type = self.network.connection_type().await;
        json_result(&ConnectionTypeReport {
            connection_type,
            label: connection_type.label(),
            is_cellular: connection_type.is_cellular(),
        })
    }

    #[rmcp::tool(description = "Get current network info: connection type, network name, signal level (0-4) and a quick download/latency poll")]
    pub async fn get_network_info(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.network.current_network_info().await)
    }

    #[rmcp::tool(description = "Run a full download speed test over several URLs and report average speed and latency. Ignored while another test runs.")]
    pub async fn run_speed_test(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.network.run_speed_test().await {
            Ok(SpeedTestOutcome::Completed(result)) => json_result(&result),
            Ok(SpeedTestOutcome::AlreadyRunning) => Ok(text_result("A speed test is already running")),
            Err(e @ SpeedTestError::NoSuccessfulSamples { .. }) => Err(internal_error(e.to_string())),
            Err(e) => Err(internal_error(format!("Speed test failed: {}", e))),
        }
    }

    #[rmcp::tool(description = "Get wifi link details: SSID, BSSID, RSSI, frequency, link speed")]
    pub async fn get_wifi_details(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.network.wifi_details().await)
    }

    #[rmcp::tool(description = "Get cellular details: operator, MCC/MNC, radio technology")]
    pub async fn get_cellular_details(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.network.cellular_details().await)
    }

    // ============================================================
    // SENSORS
    // ============================================================

    #[rmcp::tool(description = "List hardware sensor types present on this device")]
    pub async fn list_available_sensors(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let listing: Vec<SensorListing> = self
            .sensors
            .available_sensors()
            .into_iter()
            .map(|sensor_type| SensorListing {
                sensor_type,
                unit: sensor_type.unit(),
            })
            .collect();
        json_result(&listing)
    }

    #[rmcp::tool(description = "Describe the default sensor of a type: name, vendor, range, resolution, power")]
    pub async fn get_sensor_info(
        &self,
        Parameters(params): Parameters<SensorParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.sensors.sensor_info(params.sensor) {
            Some(descriptor) => json_result(&descriptor),
            None => Ok(text_result(format!("No {:?} sensor on this device", params.sensor))),
        }
    }

    #[rmcp::tool(description = "Read a sensor: starts listening if needed and returns the latest sample")]
    pub async fn read_sensor(
        &self,
        Parameters(params): Parameters<SensorParams>,
    ) -> Result<CallToolResult, McpError> {
        let wait = self.read_timeout();
        let mut subscription = self.sensors.stream(params.sensor);
        match tokio::time::timeout(wait, subscription.recv()).await {
            Ok(Some(sample)) => json_result(&sample),
            _ => Ok(text_result(format!(
                "No {:?} reading within {}",
                params.sensor,
                format_millis(wait.as_millis() as u64)
            ))),
        }
    }

    #[rmcp::tool(description = "Stop listening to a sensor type")]
    pub async fn stop_sensor(
        &self,
        Parameters(params): Parameters<SensorParams>,
    ) -> Result<CallToolResult, McpError> {
        let message = if self.sensors.stop_listening(params.sensor) {
            format!("Stopped {:?} listener", params.sensor)
        } else {
            format!("{:?} was not being listened to", params.sensor)
        };
        Ok(text_result(message))
    }

    #[rmcp::tool(description = "Stop every sensor listener and location updates")]
    pub async fn stop_all_sensors(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sensors.stop_all();
        Ok(text_result("Stopped all sensor listeners and location updates"))
    }

    #[rmcp::tool(description = "Get an environmental snapshot: temperature, humidity, pressure, light, proximity (absent values are null)")]
    pub async fn get_environment_snapshot(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let wait = self.read_timeout();
        match settle(self.sensors.environmental_snapshot(), wait, self.settle_window()).await {
            Some(snapshot) => json_result(&snapshot),
            None => Ok(text_result(format!(
                "No environmental readings within {}",
                format_millis(wait.as_millis() as u64)
            ))),
        }
    }

    #[rmcp::tool(description = "Get a motion snapshot: accelerometer, gyroscope, magnetometer, gravity, linear acceleration, rotation vector (unreported sensors are zero)")]
    pub async fn get_motion_snapshot(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let wait = self.read_timeout();
        match settle(self.sensors.motion_snapshot(), wait, self.settle_window()).await {
            Some(snapshot) => json_result(&snapshot),
            None => Ok(text_result(format!(
                "No motion readings within {}",
                format_millis(wait.as_millis() as u64)
            ))),
        }
    }

    #[rmcp::tool(description = "Get the current location from GPS (gpsd) or network geolocation")]
    pub async fn get_location(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut subscription = self.sensors.location();
        match tokio::time::timeout(self.config.location.fix_timeout(), subscription.recv()).await {
            Ok(Some(location)) => json_result(&location),
            _ => match self.sensors.latest_location() {
                Some(location) => json_result(&location),
                None => Ok(text_result("No location fix available")),
            },
        }
    }
}

#[rmcp::tool_handler]
impl ServerHandler for NetsenseServer {
    fn get_info(&self) -> ServerInfo {
        let description = String::from(
            "rmcp-netsense: network quality and device sensors.\n\
             - dashboard: connection, sensors, environment at a glance\n\
             - network: connection type, network info, speed test, wifi, cellular\n\
             - sensors: readings, snapshots, location\n",
        );

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(description),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config) => {
            run_config_command()?;
        }
        None => {
            run_server().await?;
        }
    }

    Ok(())
}

/// Open config file in user's editor
fn run_config_command() -> anyhow::Result<()> {
    let config_path = Config::path().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    if !config_path.exists() {
        Config::default().save()?;
        println!("Created config file: {}", config_path.display());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "nano".to_string());

    println!("Opening {} with {}", config_path.display(), editor);

    std::process::Command::new(&editor).arg(&config_path).status()?;

    Ok(())
}

/// Run the MCP server
async fn run_server() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting rmcp-netsense server");

    let server = NetsenseServer::new(Config::load()).await?;
    let sensors = server.sensors.clone();
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    sensors.stop_all();
    tracing::info!("rmcp-netsense server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_settle_takes_last_queued() {
        let snapshots = stream::iter(vec![1, 2, 3]).chain(stream::pending()).boxed();
        let settled = settle(snapshots, Duration::from_millis(50), Duration::from_millis(10)).await;
        assert_eq!(settled, Some(3));
    }

    #[tokio::test]
    async fn test_settle_waits_for_late_constituent() {
        let late = stream::once(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            2
        });
        let snapshots = stream::iter(vec![1]).chain(late).chain(stream::pending()).boxed();
        let settled = settle(snapshots, Duration::from_millis(50), Duration::from_millis(200)).await;
        assert_eq!(settled, Some(2));
    }

    #[tokio::test]
    async fn test_settle_ignores_values_after_window() {
        let late = stream::once(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            2
        });
        let snapshots = stream::iter(vec![1]).chain(late).boxed();
        let settled = settle(snapshots, Duration::from_millis(50), Duration::from_millis(20)).await;
        assert_eq!(settled, Some(1));
    }

    #[tokio::test]
    async fn test_settle_times_out() {
        let snapshots = stream::pending::<u8>().boxed();
        assert_eq!(settle(snapshots, Duration::from_millis(10), Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn test_disabled_tools_are_removed() {
        let config = Config {
            disabled: vec!["run_speed_test".to_string(), "not_a_tool".to_string()],
            ..Config::default()
        };
        let server = NetsenseServer::new(config).await.unwrap();
        assert!(!server.tool_router.has_route("run_speed_test"));
        assert!(server.tool_router.has_route("get_network_info"));
        assert_eq!(server.tool_router.map.len(), config::all_tool_names().len() - 1);
    }
}
