//! Sensor data types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::shared::now_millis;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Gravity,
    LinearAcceleration,
    RotationVector,
    Orientation,
    Pressure,
    Temperature,
    Humidity,
    Light,
    Proximity,
    StepCounter,
    HeartRate,
}

impl SensorType {
    pub const ALL: [SensorType; 14] = [
        Self::Accelerometer,
        Self::Gyroscope,
        Self::Magnetometer,
        Self::Gravity,
        Self::LinearAcceleration,
        Self::RotationVector,
        Self::Orientation,
        Self::Pressure,
        Self::Temperature,
        Self::Humidity,
        Self::Light,
        Self::Proximity,
        Self::StepCounter,
        Self::HeartRate,
    ];

    /// Constituents of an environmental snapshot, in snapshot order
    pub const ENVIRONMENTAL: [SensorType; 5] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::Light,
        Self::Proximity,
    ];

    /// Constituents of a motion snapshot, in snapshot order
    pub const MOTION: [SensorType; 6] = [
        Self::Accelerometer,
        Self::Gyroscope,
        Self::Magnetometer,
        Self::Gravity,
        Self::LinearAcceleration,
        Self::RotationVector,
    ];

    pub fn unit(self) -> &'static str {
        match self {
            Self::Accelerometer | Self::Gravity | Self::LinearAcceleration => "m/s²",
            Self::Gyroscope => "rad/s",
            Self::Magnetometer => "μT",
            Self::RotationVector => "",
            Self::Orientation => "°",
            Self::Pressure => "hPa",
            Self::Temperature => "°C",
            Self::Humidity => "%",
            Self::Light => "lx",
            Self::Proximity => "cm",
            Self::StepCounter => "steps",
            Self::HeartRate => "bpm",
        }
    }
}

/// One hardware reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSample {
    pub sensor_type: SensorType,
    pub values: Vec<f32>,
    pub accuracy: i32,
    pub timestamp: u64,
}

impl SensorSample {
    pub fn new(sensor_type: SensorType, values: Vec<f32>, accuracy: i32) -> Self {
        Self {
            sensor_type,
            values,
            accuracy,
            timestamp: now_millis(),
        }
    }

    pub fn first(&self) -> Option<f32> {
        self.values.first().copied()
    }
}

/// Static description of a physical sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDescriptor {
    pub sensor_type: SensorType,
    pub name: String,
    pub vendor: String,
    pub version: i32,
    pub max_range: f32,
    pub resolution: f32,
    pub power_ma: f32,
    pub min_delay_us: i64,
    pub device_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f32,
    pub speed: f32,
    pub bearing: f32,
    pub provider: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentalSnapshot {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
    pub light_level: Option<f32>,
    pub proximity: Option<f32>,
    pub timestamp: u64,
}

impl EnvironmentalSnapshot {
    /// Build from latest samples ordered as [`SensorType::ENVIRONMENTAL`]
    pub fn from_latest(latest: &[Option<SensorSample>]) -> Self {
        let value = |i: usize| latest.get(i).and_then(|s| s.as_ref()).and_then(SensorSample::first);
        Self {
            temperature: value(0),
            humidity: value(1),
            pressure: value(2),
            light_level: value(3),
            proximity: value(4),
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionSnapshot {
    pub accelerometer: [f32; 3],
    pub gyroscope: [f32; 3],
    pub magnetometer: [f32; 3],
    pub gravity: [f32; 3],
    pub linear_acceleration: [f32; 3],
    pub rotation_vector: [f32; 4],
    pub timestamp: u64,
}

impl Default for MotionSnapshot {
    fn default() -> Self {
        Self {
            accelerometer: [0.0; 3],
            gyroscope: [0.0; 3],
            magnetometer: [0.0; 3],
            gravity: [0.0; 3],
            linear_acceleration: [0.0; 3],
            rotation_vector: [0.0; 4],
            timestamp: 0,
        }
    }
}

impl MotionSnapshot {
    /// Build from latest samples ordered as [`SensorType::MOTION`].
    /// Constituents that have not reported stay zeroed.
    pub fn from_latest(latest: &[Option<SensorSample>]) -> Self {
        let sample = |i: usize| latest.get(i).and_then(|s| s.as_ref());
        Self {
            accelerometer: fill(sample(0)),
            gyroscope: fill(sample(1)),
            magnetometer: fill(sample(2)),
            gravity: fill(sample(3)),
            linear_acceleration: fill(sample(4)),
            rotation_vector: fill(sample(5)),
            timestamp: now_millis(),
        }
    }
}

fn fill<const N: usize>(sample: Option<&SensorSample>) -> [f32; N] {
    let mut out = [0.0; N];
    if let Some(sample) = sample {
        for (slot, value) in out.iter_mut().zip(&sample.values) {
            *slot = *value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_types_are_distinct() {
        let set: std::collections::BTreeSet<_> = SensorType::ALL.iter().collect();
        assert_eq!(set.len(), 14);
    }

    #[test]
    fn test_sensor_type_names() {
        assert_eq!(serde_json::to_string(&SensorType::LinearAcceleration).unwrap(), "\"linear_acceleration\"");
        let parsed: SensorType = serde_json::from_str("\"heart_rate\"").unwrap();
        assert_eq!(parsed, SensorType::HeartRate);
    }

    #[test]
    fn test_environmental_from_partial_latest() {
        let latest = vec![
            Some(SensorSample::new(SensorType::Temperature, vec![21.5], 3)),
            None,
            Some(SensorSample::new(SensorType::Pressure, vec![1013.2], 3)),
            None,
            None,
        ];
        let snap = EnvironmentalSnapshot::from_latest(&latest);
        assert_eq!(snap.temperature, Some(21.5));
        assert_eq!(snap.humidity, None);
        assert_eq!(snap.pressure, Some(1013.2));
        assert_eq!(snap.light_level, None);
    }

    #[test]
    fn test_motion_pads_and_truncates() {
        let latest = vec![
            Some(SensorSample::new(SensorType::Accelerometer, vec![0.1, 9.8], 3)),
            None,
            None,
            None,
            None,
            Some(SensorSample::new(SensorType::RotationVector, vec![1.0, 2.0, 3.0, 4.0, 5.0], 3)),
        ];
        let snap = MotionSnapshot::from_latest(&latest);
        assert_eq!(snap.accelerometer, [0.1, 9.8, 0.0]);
        assert_eq!(snap.gyroscope, [0.0; 3]);
        assert_eq!(snap.rotation_vector, [1.0, 2.0, 3.0, 4.0]);
    }
}
