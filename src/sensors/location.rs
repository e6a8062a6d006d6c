//! Location updates from GPS (gpsd) and network (IP geolocation) providers

use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use super::channel::{ReplayChannel, Subscription};
use super::model::LocationSample;
use crate::config::LocationConfig;
use crate::shared::now_millis;

pub const GPS_PROVIDER: &str = "gps";
pub const NETWORK_PROVIDER: &str = "network";

/// Rough accuracy of city-level IP geolocation, in meters
const IP_GEOLOCATION_ACCURACY_M: f32 = 5000.0;

pub type LocationSink = Arc<dyn Fn(LocationSample) + Send + Sync>;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission not granted")]
    PermissionDenied,
    #[error("{provider} provider unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
}

pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    fn request_updates(&self, sink: LocationSink) -> Result<(), LocationError>;
    fn remove_updates(&self);
}

/// Replaying stream of location samples fed by every enabled provider
pub struct LocationHub {
    providers: Vec<Arc<dyn LocationProvider>>,
    channel: Arc<ReplayChannel<LocationSample>>,
    listening: Mutex<bool>,
}

impl LocationHub {
    pub fn new(providers: Vec<Arc<dyn LocationProvider>>) -> Self {
        Self {
            providers,
            channel: Arc::new(ReplayChannel::default()),
            listening: Mutex::new(false),
        }
    }

    /// Subscribe, registering with the providers on first use
    pub fn subscribe(&self) -> Subscription<LocationSample> {
        let mut listening = self.listening.lock().unwrap_or_else(|e| e.into_inner());
        if !*listening {
            *listening = true;
            self.start();
        }
        self.channel.subscribe()
    }

    pub fn latest(&self) -> Option<LocationSample> {
        self.channel.latest()
    }

    fn start(&self) {
        let channel = self.channel.clone();
        let sink: LocationSink = Arc::new(move |sample| {
            channel.publish(sample);
        });

        for provider in self.providers.iter().filter(|p| p.is_enabled()) {
            match provider.request_updates(sink.clone()) {
                Ok(()) => tracing::info!("Started {} location updates", provider.name()),
                Err(LocationError::PermissionDenied) => {
                    // the stream stays empty; nothing is surfaced to subscribers
                    tracing::error!("Location permission not granted");
                    return;
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }

    pub fn stop(&self) {
        let mut listening = self.listening.lock().unwrap_or_else(|e| e.into_inner());
        if *listening {
            for provider in &self.providers {
                provider.remove_updates();
            }
            *listening = false;
            tracing::debug!("Stopped location updates");
        }
    }

    #[cfg(test)]
    pub fn is_listening(&self) -> bool {
        *self.listening.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, handle: Option<JoinHandle<()>>) {
    let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(previous) = std::mem::replace(&mut *slot, handle) {
        previous.abort();
    }
}

fn spawn_on_runtime<F>(provider: &str, future: F) -> Result<JoinHandle<()>, LocationError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| LocationError::Unavailable {
        provider: provider.to_string(),
        reason: e.to_string(),
    })?;
    Ok(runtime.spawn(future))
}

// === GPS via gpsd ===

/// Time-position-velocity report from gpsd
#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
    alt: Option<f64>,
    eph: Option<f32>,
    epx: Option<f32>,
    epy: Option<f32>,
    speed: Option<f32>,
    track: Option<f32>,
}

/// Parse one gpsd JSON line into a fix. Only TPV reports with a 2D/3D fix count.
pub fn parse_tpv(line: &str) -> Option<LocationSample> {
    let report: TpvReport = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }

    let accuracy = report
        .eph
        .or_else(|| match (report.epx, report.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(0.0);

    Some(LocationSample {
        latitude: report.lat?,
        longitude: report.lon?,
        altitude: report.alt_msl.or(report.alt).unwrap_or(0.0),
        accuracy,
        speed: report.speed.unwrap_or(0.0),
        bearing: report.track.unwrap_or(0.0),
        provider: GPS_PROVIDER.to_string(),
        timestamp: now_millis(),
    })
}

pub struct GpsdProvider {
    address: String,
    retry: Duration,
    enabled: bool,
    permission_granted: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GpsdProvider {
    pub fn new(config: &LocationConfig) -> Self {
        Self {
            address: config.gpsd_address.clone(),
            retry: config.gpsd_retry(),
            enabled: config.gps_enabled,
            permission_granted: config.permission_granted,
            task: Mutex::new(None),
        }
    }
}

async fn watch_gpsd(address: &str, sink: &LocationSink) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(address).await?;
    stream
        .write_all(b"?WATCH={\"enable\":true,\"json\":true};\n")
        .await?;

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(sample) = parse_tpv(&line) {
            sink(sample);
        }
    }
    Ok(())
}

impl LocationProvider for GpsdProvider {
    fn name(&self) -> &str {
        GPS_PROVIDER
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn request_updates(&self, sink: LocationSink) -> Result<(), LocationError> {
        if !self.permission_granted {
            return Err(LocationError::PermissionDenied);
        }

        let address = self.address.clone();
        let retry = self.retry;
        let handle = spawn_on_runtime(GPS_PROVIDER, async move {
            let mut failures = 0u32;
            loop {
                match watch_gpsd(&address, &sink).await {
                    Ok(()) => {
                        failures = 0;
                        tracing::info!("gpsd at {} closed the connection, reconnecting", address);
                    }
                    Err(e) => {
                        failures += 1;
                        if failures == 1 {
                            tracing::warn!("gpsd at {} unavailable: {}", address, e);
                        } else {
                            tracing::debug!("gpsd at {} still unavailable ({} attempts): {}", address, failures, e);
                        }
                    }
                }
                tokio::time::sleep(retry).await;
            }
        })?;
        replace_task(&self.task, Some(handle));
        Ok(())
    }

    fn remove_updates(&self) {
        replace_task(&self.task, None);
    }
}

// === Network location via IP geolocation ===

/// Subset of the ipinfo.io response
#[derive(Debug, Deserialize)]
pub struct IpInfo {
    #[serde(default)]
    pub loc: Option<String>,
}

/// Parse a "lat,lon" pair
pub fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

pub struct IpGeolocationProvider {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    enabled: bool,
    permission_granted: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IpGeolocationProvider {
    pub fn new(client: reqwest::Client, config: &LocationConfig) -> Self {
        Self {
            client,
            url: config.network_url.clone(),
            interval: Duration::from_secs(config.network_interval_secs.max(1)),
            enabled: config.network_enabled,
            permission_granted: config.permission_granted,
            task: Mutex::new(None),
        }
    }
}

async fn fetch_ip_location(client: &reqwest::Client, url: &str) -> anyhow::Result<LocationSample> {
    let info: IpInfo = client
        .get(url)
        .header("Accept", "application/json")
        .timeout(Duration::from_secs(5))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let (latitude, longitude) = info
        .loc
        .as_deref()
        .and_then(parse_loc)
        .ok_or_else(|| anyhow::anyhow!("response carries no usable location"))?;

    Ok(LocationSample {
        latitude,
        longitude,
        altitude: 0.0,
        accuracy: IP_GEOLOCATION_ACCURACY_M,
        speed: 0.0,
        bearing: 0.0,
        provider: NETWORK_PROVIDER.to_string(),
        timestamp: now_millis(),
    })
}

impl LocationProvider for IpGeolocationProvider {
    fn name(&self) -> &str {
        NETWORK_PROVIDER
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn request_updates(&self, sink: LocationSink) -> Result<(), LocationError> {
        if !self.permission_granted {
            return Err(LocationError::PermissionDenied);
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let interval = self.interval;
        let handle = spawn_on_runtime(NETWORK_PROVIDER, async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match fetch_ip_location(&client, &url).await {
                    Ok(sample) => sink(sample),
                    Err(e) => tracing::warn!("Network location lookup failed: {}", e),
                }
            }
        })?;
        replace_task(&self.task, Some(handle));
        Ok(())
    }

    fn remove_updates(&self) {
        replace_task(&self.task, None);
    }
}
