//! Download speed and latency sampling

use std::future::Future;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use thiserror::Error;

use super::model::{SpeedSample, SpeedTestResult};
use crate::shared::{format_bytes, format_millis, now_millis};

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("no successful samples out of {attempted} attempted")]
    NoSuccessfulSamples { attempted: usize },
    #[error("download of {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("latency probe failed: {0}")]
    Latency(#[source] anyhow::Error),
}

/// Raw outcome of fetching one payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Download {
    pub bytes: u64,
    pub elapsed: Duration,
}

/// The two measurements a speed sample needs
pub trait SpeedProbe: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Download>> + Send;
    fn latency(&self) -> impl Future<Output = anyhow::Result<Duration>> + Send;
}

/// Probe backed by reqwest and a TCP connect to a well-known host
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    latency_host: String,
    latency_timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, latency_host: impl Into<String>, latency_timeout: Duration) -> Self {
        Self {
            client,
            latency_host: latency_host.into(),
            latency_timeout,
        }
    }
}

impl SpeedProbe for HttpProbe {
    async fn fetch(&self, url: &str) -> anyhow::Result<Download> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .header("User-Agent", concat!("rmcp-netsense/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .context("request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("response not successful: {}", response.status());
        }

        let body = response.bytes().await.context("failed to read body")?;
        Ok(Download {
            bytes: body.len() as u64,
            elapsed: start.elapsed(),
        })
    }

    async fn latency(&self) -> anyhow::Result<Duration> {
        let host = self.latency_host.clone();
        let timeout = self.latency_timeout;

        tokio::task::spawn_blocking(move || -> anyhow::Result<Duration> {
            let addr = host
                .to_socket_addrs()
                .with_context(|| format!("cannot resolve {}", host))?
                .next()
                .ok_or_else(|| anyhow::anyhow!("no address for {}", host))?;
            let start = Instant::now();
            TcpStream::connect_timeout(&addr, timeout)
                .with_context(|| format!("connect to {} failed", addr))?;
            Ok(start.elapsed())
        })
        .await
        .context("latency task failed")?
    }
}

/// Throughput in megabits per second
pub fn mbps(bytes: u64, elapsed_ms: u64) -> f64 {
    (bytes as f64 * 8.0) / (elapsed_ms.max(1) as f64 * 1000.0)
}

/// Average a set of successful samples. `None` when there are none.
pub fn average(samples: &[SpeedSample]) -> Option<(f64, u64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len();
    let speed = samples.iter().map(|s| s.download_speed_mbps).sum::<f64>() / n as f64;
    let latency = samples.iter().map(|s| s.latency_ms).sum::<u64>() / n as u64;
    Some((speed, latency))
}

pub struct SpeedSampler<P> {
    probe: P,
}

impl<P: SpeedProbe> SpeedSampler<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Measure latency, then download `url` and derive its throughput
    pub async fn sample_single(&self, url: &str) -> Result<SpeedSample, SpeedTestError> {
        let latency = self.probe.latency().await.map_err(SpeedTestError::Latency)?;

        let download = self
            .probe
            .fetch(url)
            .await
            .map_err(|source| SpeedTestError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let duration_ms = download.elapsed.as_millis() as u64;
        tracing::debug!(
            "Fetched {} from {} in {}",
            format_bytes(download.bytes),
            url,
            format_millis(duration_ms)
        );

        Ok(SpeedSample {
            download_speed_mbps: mbps(download.bytes, duration_ms),
            latency_ms: latency.as_millis() as u64,
            bytes: download.bytes,
            duration_ms,
        })
    }

    /// Sample every URL in order and average the ones that succeed
    pub async fn sample_speed(&self, urls: &[String]) -> Result<SpeedTestResult, SpeedTestError> {
        let mut samples = Vec::with_capacity(urls.len());
        let mut total_ms = 0u64;

        for url in urls {
            match self.sample_single(url).await {
                Ok(sample) => {
                    total_ms += sample.duration_ms;
                    samples.push(sample);
                }
                Err(e) => tracing::warn!("Speed test sample skipped: {}", e),
            }
        }

        let (download_speed_mbps, latency_ms) = average(&samples)
            .ok_or(SpeedTestError::NoSuccessfulSamples { attempted: urls.len() })?;

        Ok(SpeedTestResult {
            download_speed_mbps,
            upload_speed_mbps: 0.0,
            latency_ms,
            jitter_ms: 0,
            packet_loss: 0.0,
            test_duration_ms: total_ms,
            successful_samples: samples.len(),
            attempted_samples: urls.len(),
            timestamp: now_millis(),
        })
    }

    /// Single-URL poll that degrades to a zeroed result on failure
    pub async fn quick_poll(&self, url: &str) -> SpeedTestResult {
        let urls = [url.to_string()];
        match self.sample_speed(&urls).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Quick speed test failed: {}", e);
                SpeedTestResult::empty(now_millis())
            }
        }
    }
}

/// Single in-flight flag for explicit speed tests
#[derive(Debug, Default)]
pub struct SpeedTestGuard {
    running: AtomicBool,
}

/// Clears the flag when dropped
pub struct InFlight<'a> {
    guard: &'a SpeedTestGuard,
}

impl SpeedTestGuard {
    /// Claim the flag, or `None` if a test is already running
    pub fn try_begin(&self) -> Option<InFlight<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}
