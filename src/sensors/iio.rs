//! Linux Industrial I/O (IIO) sensor backend
//!
//! Each `iio:deviceN` directory under the IIO root exposes channels as
//! sysfs attributes. A channel is read from `<chan>_input` when the driver
//! provides processed values, otherwise as `(<chan>_raw + offset) * scale`.
//! Devices are scanned once at construction. Registered sensor types are
//! polled on a tokio task at a fixed interval.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::hardware::{HardwareError, SampleSink, SensorHardware};
use super::model::{SensorDescriptor, SensorSample, SensorType};

/// Accuracy reported for every successful read (high)
const ACCURACY_HIGH: i32 = 3;

/// How one sensor type maps onto IIO channels
struct ChannelSpec {
    kind: SensorType,
    /// Channel attribute prefixes, one value each (or several if `packed`)
    channels: &'static [&'static str],
    /// Scale/offset attribute prefix shared by the channels
    shared: &'static str,
    /// Multiplier from IIO units to reported units
    factor: f32,
    /// A single attribute holding space separated values (quaternions)
    packed: bool,
}

const SPECS: &[ChannelSpec] = &[
    ChannelSpec {
        kind: SensorType::Accelerometer,
        channels: &["in_accel_x", "in_accel_y", "in_accel_z"],
        shared: "in_accel",
        factor: 1.0,
        packed: false,
    },
    ChannelSpec {
        kind: SensorType::Gyroscope,
        channels: &["in_anglvel_x", "in_anglvel_y", "in_anglvel_z"],
        shared: "in_anglvel",
        factor: 1.0,
        packed: false,
    },
    // gauss -> microtesla
    ChannelSpec {
        kind: SensorType::Magnetometer,
        channels: &["in_magn_x", "in_magn_y", "in_magn_z"],
        shared: "in_magn",
        factor: 100.0,
        packed: false,
    },
    ChannelSpec {
        kind: SensorType::Gravity,
        channels: &["in_gravity_x", "in_gravity_y", "in_gravity_z"],
        shared: "in_gravity",
        factor: 1.0,
        packed: false,
    },
    ChannelSpec {
        kind: SensorType::RotationVector,
        channels: &["in_rot_quaternion"],
        shared: "in_rot_quaternion",
        factor: 1.0,
        packed: true,
    },
    ChannelSpec {
        kind: SensorType::Orientation,
        channels: &["in_rot_from_north_magnetic_tilt_comp"],
        shared: "in_rot",
        factor: 1.0,
        packed: false,
    },
    // kPa -> hPa
    ChannelSpec {
        kind: SensorType::Pressure,
        channels: &["in_pressure"],
        shared: "in_pressure",
        factor: 10.0,
        packed: false,
    },
    // milli degrees -> degrees
    ChannelSpec {
        kind: SensorType::Temperature,
        channels: &["in_temp"],
        shared: "in_temp",
        factor: 0.001,
        packed: false,
    },
    // milli percent -> percent
    ChannelSpec {
        kind: SensorType::Humidity,
        channels: &["in_humidityrelative"],
        shared: "in_humidityrelative",
        factor: 0.001,
        packed: false,
    },
    ChannelSpec {
        kind: SensorType::Light,
        channels: &["in_illuminance"],
        shared: "in_illuminance",
        factor: 1.0,
        packed: false,
    },
    ChannelSpec {
        kind: SensorType::Proximity,
        channels: &["in_proximity"],
        shared: "in_proximity",
        factor: 1.0,
        packed: false,
    },
    ChannelSpec {
        kind: SensorType::StepCounter,
        channels: &["in_steps"],
        shared: "in_steps",
        factor: 1.0,
        packed: false,
    },
];

fn spec_for(kind: SensorType) -> Option<&'static ChannelSpec> {
    SPECS.iter().find(|s| s.kind == kind)
}

/// Device backing one sensor type, found at construction
struct Discovered {
    dir: PathBuf,
    descriptor: SensorDescriptor,
}

pub struct IioSensorHardware {
    sensors: HashMap<SensorType, Discovered>,
    interval: Duration,
    pollers: Mutex<HashMap<SensorType, JoinHandle<()>>>,
}

impl IioSensorHardware {
    /// Scan `root` once for supported channels. Blocks on sysfs reads.
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> Self {
        let root = root.into();
        let devices = devices(&root);
        let sensors: HashMap<_, _> = SPECS
            .iter()
            .filter_map(|spec| {
                let dir = devices.iter().find(|dir| supports(dir, spec))?.clone();
                let descriptor = describe(&dir, spec);
                Some((spec.kind, Discovered { dir, descriptor }))
            })
            .collect();
        tracing::info!("Found {} IIO sensor types under {:?}", sensors.len(), root);

        Self {
            sensors,
            interval,
            pollers: Mutex::new(HashMap::new()),
        }
    }
}

/// `iio:device*` directories, sorted so the lowest index is the default
fn devices(root: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("No IIO devices at {:?}: {}", root, e);
            return Vec::new();
        }
    };

    let mut devices: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("iio:device"))
        .map(|e| e.path())
        .collect();
    devices.sort();
    devices
}

impl Drop for IioSensorHardware {
    fn drop(&mut self) {
        let pollers = self.pollers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in pollers.drain() {
            handle.abort();
        }
    }
}

impl SensorHardware for IioSensorHardware {
    fn default_sensor(&self, kind: SensorType) -> Option<SensorDescriptor> {
        self.sensors.get(&kind).map(|found| found.descriptor.clone())
    }

    fn register(&self, kind: SensorType, sink: SampleSink) -> Result<(), HardwareError> {
        let spec = spec_for(kind).ok_or(HardwareError::NotPresent(kind))?;
        let dir = self
            .sensors
            .get(&kind)
            .map(|found| found.dir.clone())
            .ok_or(HardwareError::NotPresent(kind))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| HardwareError::Registration {
            kind,
            reason: e.to_string(),
        })?;

        let interval = self.interval;
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let path = dir.clone();
                match tokio::task::spawn_blocking(move || read_sample(&path, spec)).await {
                    Ok(Ok(values)) => sink(SensorSample::new(kind, values, ACCURACY_HIGH)),
                    Ok(Err(e)) => tracing::debug!("Failed to read {:?} from {:?}: {}", kind, dir, e),
                    Err(e) => {
                        tracing::error!("IIO read task for {:?} failed: {}", kind, e);
                        break;
                    }
                }
            }
        });

        let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pollers.insert(kind, handle) {
            previous.abort();
        }
        Ok(())
    }

    fn unregister(&self, kind: SensorType) {
        let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pollers.remove(&kind) {
            handle.abort();
        }
    }
}

fn channel_present(dir: &Path, channel: &str) -> bool {
    dir.join(format!("{}_input", channel)).exists() || dir.join(format!("{}_raw", channel)).exists()
}

fn supports(dir: &Path, spec: &ChannelSpec) -> bool {
    spec.channels.iter().all(|c| channel_present(dir, c))
}

fn read_f32(path: &Path) -> Option<f32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// `<chan>_<attr>`, falling back to the shared `<prefix>_<attr>`
fn attribute(dir: &Path, channel: &str, shared: &str, attr: &str) -> Option<f32> {
    read_f32(&dir.join(format!("{}_{}", channel, attr)))
        .or_else(|| read_f32(&dir.join(format!("{}_{}", shared, attr))))
}

fn parse_values(contents: &str) -> io::Result<Vec<f32>> {
    contents
        .split_whitespace()
        .map(|v| {
            v.parse::<f32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", v, e)))
        })
        .collect()
}

fn read_channel(dir: &Path, channel: &str, spec: &ChannelSpec) -> io::Result<Vec<f32>> {
    let input = dir.join(format!("{}_input", channel));
    if input.exists() {
        let values = parse_values(&fs::read_to_string(input)?)?;
        return Ok(values.into_iter().map(|v| v * spec.factor).collect());
    }

    let raw = parse_values(&fs::read_to_string(dir.join(format!("{}_raw", channel)))?)?;
    let scale = attribute(dir, channel, spec.shared, "scale").unwrap_or(1.0);
    let offset = attribute(dir, channel, spec.shared, "offset").unwrap_or(0.0);
    Ok(raw
        .into_iter()
        .map(|v| (v + offset) * scale * spec.factor)
        .collect())
}

fn read_sample(dir: &Path, spec: &ChannelSpec) -> io::Result<Vec<f32>> {
    let mut values = Vec::with_capacity(spec.channels.len());
    for channel in spec.channels {
        let mut read = read_channel(dir, channel, spec)?;
        if !spec.packed {
            read.truncate(1);
        }
        values.extend(read);
    }
    Ok(values)
}

fn describe(dir: &Path, spec: &ChannelSpec) -> SensorDescriptor {
    let name = fs::read_to_string(dir.join("name"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let resolution = spec
        .channels
        .first()
        .and_then(|c| attribute(dir, c, spec.shared, "scale"))
        .map(|s| s * spec.factor)
        .unwrap_or(0.0);
    let min_delay_us = read_f32(&dir.join("sampling_frequency"))
        .filter(|hz| *hz > 0.0)
        .map(|hz| (1_000_000.0 / hz) as i64)
        .unwrap_or(0);

    SensorDescriptor {
        sensor_type: spec.kind,
        name,
        vendor: "Linux IIO".to_string(),
        version: 1,
        max_range: 0.0,
        resolution,
        power_ma: 0.0,
        min_delay_us,
        device_path: Some(dir.display().to_string()),
    }
}
