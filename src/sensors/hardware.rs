//! Hardware sensor seam

use std::sync::Arc;
use thiserror::Error;

use super::model::{SensorDescriptor, SensorSample, SensorType};

/// Callback a registered listener delivers readings to
pub type SampleSink = Arc<dyn Fn(SensorSample) + Send + Sync>;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("no {0:?} sensor present")]
    NotPresent(SensorType),
    #[error("failed to register {kind:?} listener: {reason}")]
    Registration { kind: SensorType, reason: String },
}

/// Platform sensor service. One listener per sensor type.
///
/// Methods are called from async tasks and must not block on I/O.
pub trait SensorHardware: Send + Sync {
    /// Default physical sensor for `kind`, if the device has one
    fn default_sensor(&self, kind: SensorType) -> Option<SensorDescriptor>;

    /// Start delivering readings of `kind` to `sink`
    fn register(&self, kind: SensorType, sink: SampleSink) -> Result<(), HardwareError>;

    fn unregister(&self, kind: SensorType);
}
