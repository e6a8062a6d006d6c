//! Per-type sensor streams over a [`SensorHardware`] backend

use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::channel::{ReplayChannel, Subscription};
use super::combine::combine_latest;
use super::hardware::{SampleSink, SensorHardware};
use super::location::LocationHub;
use super::model::{EnvironmentalSnapshot, LocationSample, MotionSnapshot, SensorDescriptor, SensorSample, SensorType};

struct Registration {
    channel: Arc<ReplayChannel<SensorSample>>,
    listening: bool,
}

pub struct SensorAggregator {
    hardware: Arc<dyn SensorHardware>,
    registry: Mutex<HashMap<SensorType, Registration>>,
    location: LocationHub,
}

impl SensorAggregator {
    pub fn new(hardware: Arc<dyn SensorHardware>, location: LocationHub) -> Self {
        Self {
            hardware,
            registry: Mutex::new(HashMap::new()),
            location,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SensorType, Registration>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sensor types the device has a default sensor for
    pub fn available_sensors(&self) -> BTreeSet<SensorType> {
        SensorType::ALL
            .into_iter()
            .filter(|kind| self.hardware.default_sensor(*kind).is_some())
            .collect()
    }

    pub fn sensor_info(&self, kind: SensorType) -> Option<SensorDescriptor> {
        self.hardware.default_sensor(kind)
    }

    /// Subscribe to readings of `kind`, registering a hardware listener on
    /// first use. A type without hardware yields a stream that never emits.
    pub fn stream(&self, kind: SensorType) -> Subscription<SensorSample> {
        let present = self.hardware.default_sensor(kind).is_some();

        let mut registry = self.registry();
        let registration = registry.entry(kind).or_insert_with(|| Registration {
            channel: Arc::new(ReplayChannel::default()),
            listening: false,
        });

        if !registration.listening {
            if present {
                let channel = registration.channel.clone();
                let sink: SampleSink = Arc::new(move |sample| {
                    channel.publish(sample);
                });
                match self.hardware.register(kind, sink) {
                    Ok(()) => {
                        registration.listening = true;
                        tracing::info!("Registered {:?} listener", kind);
                    }
                    Err(e) => tracing::error!("{}", e),
                }
            } else {
                tracing::debug!("No {:?} sensor on this device", kind);
            }
        }

        registration.channel.subscribe()
    }

    /// Unregister the listener for `kind`. Returns whether one was active.
    pub fn stop_listening(&self, kind: SensorType) -> bool {
        let mut registry = self.registry();
        match registry.get_mut(&kind) {
            Some(registration) if registration.listening => {
                self.hardware.unregister(kind);
                registration.listening = false;
                tracing::info!("Stopped {:?} listener", kind);
                true
            }
            _ => false,
        }
    }

    /// Unregister every listener and stop location updates
    pub fn stop_all(&self) {
        let mut registry = self.registry();
        for (kind, registration) in registry.iter_mut().filter(|(_, r)| r.listening) {
            self.hardware.unregister(*kind);
            registration.listening = false;
        }
        drop(registry);
        self.location.stop();
        tracing::info!("Stopped all sensor listeners");
    }

    #[cfg(test)]
    pub fn is_registered(&self, kind: SensorType) -> bool {
        self.registry().get(&kind).is_some_and(|r| r.listening)
    }

    pub fn latest(&self, kind: SensorType) -> Option<SensorSample> {
        self.registry().get(&kind).and_then(|r| r.channel.latest())
    }

    fn joined(&self, kinds: &[SensorType]) -> BoxStream<'static, Vec<Option<SensorSample>>> {
        let sources = kinds.iter().map(|kind| self.stream(*kind).into_stream()).collect();
        combine_latest(sources)
    }

    pub fn environmental_snapshot(&self) -> BoxStream<'static, EnvironmentalSnapshot> {
        self.joined(&SensorType::ENVIRONMENTAL)
            .map(|latest| EnvironmentalSnapshot::from_latest(&latest))
            .boxed()
    }

    pub fn motion_snapshot(&self) -> BoxStream<'static, MotionSnapshot> {
        self.joined(&SensorType::MOTION)
            .map(|latest| MotionSnapshot::from_latest(&latest))
            .boxed()
    }

    pub fn location(&self) -> Subscription<LocationSample> {
        self.location.subscribe()
    }

    pub fn latest_location(&self) -> Option<LocationSample> {
        self.location.latest()
    }
}

impl Drop for SensorAggregator {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::hardware::HardwareError;
    use futures::FutureExt;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeHardware {
        present: HashSet<SensorType>,
        failing: HashSet<SensorType>,
        registrations: Mutex<Vec<SensorType>>,
        unregistrations: Mutex<Vec<SensorType>>,
        sinks: Mutex<HashMap<SensorType, SampleSink>>,
    }

    impl FakeHardware {
        fn with(present: &[SensorType]) -> Arc<Self> {
            Arc::new(Self {
                present: present.iter().copied().collect(),
                ..Self::default()
            })
        }

        fn emit(&self, kind: SensorType, values: Vec<f32>) -> bool {
            let sink = self.sinks.lock().unwrap().get(&kind).cloned();
            match sink {
                Some(sink) => {
                    sink(SensorSample::new(kind, values, 3));
                    true
                }
                None => false,
            }
        }

        fn registration_count(&self, kind: SensorType) -> usize {
            self.registrations.lock().unwrap().iter().filter(|k| **k == kind).count()
        }
    }

    impl SensorHardware for FakeHardware {
        fn default_sensor(&self, kind: SensorType) -> Option<SensorDescriptor> {
            self.present.contains(&kind).then(|| SensorDescriptor {
                sensor_type: kind,
                name: format!("fake {:?}", kind),
                vendor: "test".to_string(),
                version: 1,
                max_range: 100.0,
                resolution: 0.1,
                power_ma: 0.5,
                min_delay_us: 10_000,
                device_path: None,
            })
        }

        fn register(&self, kind: SensorType, sink: SampleSink) -> Result<(), HardwareError> {
            self.registrations.lock().unwrap().push(kind);
            if self.failing.contains(&kind) {
                return Err(HardwareError::Registration {
                    kind,
                    reason: "busy".to_string(),
                });
            }
            self.sinks.lock().unwrap().insert(kind, sink);
            Ok(())
        }

        fn unregister(&self, kind: SensorType) {
            self.unregistrations.lock().unwrap().push(kind);
            self.sinks.lock().unwrap().remove(&kind);
        }
    }

    fn aggregator(hardware: Arc<FakeHardware>) -> SensorAggregator {
        SensorAggregator::new(hardware, LocationHub::new(Vec::new()))
    }

    #[test]
    fn test_available_sensors() {
        let hw = FakeHardware::with(&[SensorType::Light, SensorType::Accelerometer]);
        let agg = aggregator(hw);
        let available = agg.available_sensors();
        assert_eq!(available.len(), 2);
        assert!(available.contains(&SensorType::Light));
        assert!(agg.sensor_info(SensorType::Gyroscope).is_none());
        assert_eq!(agg.sensor_info(SensorType::Light).unwrap().name, "fake Light");
    }

    #[tokio::test]
    async fn test_second_subscription_reuses_listener() {
        let hw = FakeHardware::with(&[SensorType::Accelerometer]);
        let agg = aggregator(hw.clone());

        let mut first = agg.stream(SensorType::Accelerometer);
        let mut second = agg.stream(SensorType::Accelerometer);
        assert_eq!(hw.registration_count(SensorType::Accelerometer), 1);

        hw.emit(SensorType::Accelerometer, vec![0.0, 0.0, 9.8]);
        assert_eq!(first.recv().await.unwrap().values, vec![0.0, 0.0, 9.8]);
        assert_eq!(second.recv().await.unwrap().values, vec![0.0, 0.0, 9.8]);
    }

    #[tokio::test]
    async fn test_missing_hardware_never_emits() {
        let hw = FakeHardware::with(&[]);
        let agg = aggregator(hw.clone());

        let mut sub = agg.stream(SensorType::HeartRate);
        assert_eq!(hw.registration_count(SensorType::HeartRate), 0);
        assert!(!agg.is_registered(SensorType::HeartRate));
        assert!(sub.recv().now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_failed_registration_is_retried_on_next_subscription() {
        let hw = Arc::new(FakeHardware {
            present: [SensorType::Pressure].into_iter().collect(),
            failing: [SensorType::Pressure].into_iter().collect(),
            ..FakeHardware::default()
        });
        let agg = aggregator(hw.clone());

        let _a = agg.stream(SensorType::Pressure);
        let _b = agg.stream(SensorType::Pressure);
        assert_eq!(hw.registration_count(SensorType::Pressure), 2);
        assert!(!agg.is_registered(SensorType::Pressure));
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_sample() {
        let hw = FakeHardware::with(&[SensorType::Light]);
        let agg = aggregator(hw.clone());

        let _early = agg.stream(SensorType::Light);
        hw.emit(SensorType::Light, vec![100.0]);
        hw.emit(SensorType::Light, vec![250.0]);

        let mut late = agg.stream(SensorType::Light);
        assert_eq!(late.recv().await.unwrap().first(), Some(250.0));
        assert_eq!(agg.latest(SensorType::Light).unwrap().first(), Some(250.0));
    }

    #[tokio::test]
    async fn test_stop_then_resubscribe_registers_again() {
        let hw = FakeHardware::with(&[SensorType::Gyroscope]);
        let agg = aggregator(hw.clone());

        let _sub = agg.stream(SensorType::Gyroscope);
        assert!(agg.stop_listening(SensorType::Gyroscope));
        assert!(!agg.stop_listening(SensorType::Gyroscope));
        assert!(!hw.emit(SensorType::Gyroscope, vec![1.0, 0.0, 0.0]));

        let _sub = agg.stream(SensorType::Gyroscope);
        assert_eq!(hw.registration_count(SensorType::Gyroscope), 2);
        assert!(agg.is_registered(SensorType::Gyroscope));
    }

    #[tokio::test]
    async fn test_stop_all_and_drop_unregister_everything() {
        let hw = FakeHardware::with(&[SensorType::Light, SensorType::Proximity]);
        let agg = aggregator(hw.clone());

        let _a = agg.stream(SensorType::Light);
        let _b = agg.stream(SensorType::Proximity);
        agg.stop_all();
        assert_eq!(hw.unregistrations.lock().unwrap().len(), 2);
        assert!(!agg.is_registered(SensorType::Light));

        let _c = agg.stream(SensorType::Light);
        drop(agg);
        assert_eq!(hw.unregistrations.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_environmental_snapshot_emits_per_constituent() {
        let hw = FakeHardware::with(&SensorType::ENVIRONMENTAL);
        let agg = aggregator(hw.clone());
        let mut snapshots = agg.environmental_snapshot();

        hw.emit(SensorType::Temperature, vec![21.0]);
        let snap = snapshots.next().await.unwrap();
        assert_eq!(snap.temperature, Some(21.0));
        assert_eq!(snap.humidity, None);

        hw.emit(SensorType::Humidity, vec![40.0]);
        let snap = snapshots.next().await.unwrap();
        assert_eq!(snap.temperature, Some(21.0));
        assert_eq!(snap.humidity, Some(40.0));

        hw.emit(SensorType::Temperature, vec![22.5]);
        let snap = snapshots.next().await.unwrap();
        assert_eq!(snap.temperature, Some(22.5));
        assert_eq!(snap.humidity, Some(40.0));
        assert!(snapshots.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_includes_values_from_before_subscription() {
        let hw = FakeHardware::with(&SensorType::ENVIRONMENTAL);
        let agg = aggregator(hw.clone());

        let _warm = agg.stream(SensorType::Temperature);
        hw.emit(SensorType::Temperature, vec![19.0]);

        let mut snapshots = agg.environmental_snapshot();
        let snap = snapshots.next().await.unwrap();
        assert_eq!(snap.temperature, Some(19.0));
        assert_eq!(snap.humidity, None);

        hw.emit(SensorType::Humidity, vec![55.0]);
        let snap = snapshots.next().await.unwrap();
        assert_eq!(snap.temperature, Some(19.0));
        assert_eq!(snap.humidity, Some(55.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_subscribers_register_once() {
        let hw = FakeHardware::with(&[SensorType::Accelerometer]);
        let agg = Arc::new(aggregator(hw.clone()));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let agg = agg.clone();
                tokio::spawn(async move { agg.stream(SensorType::Accelerometer) })
            })
            .collect();
        let mut subscriptions = Vec::new();
        for task in tasks {
            subscriptions.push(task.await.unwrap());
        }

        assert_eq!(hw.registration_count(SensorType::Accelerometer), 1);
        hw.emit(SensorType::Accelerometer, vec![0.0, 0.0, 9.8]);
        for mut sub in subscriptions {
            assert_eq!(sub.recv().await.unwrap().values, vec![0.0, 0.0, 9.8]);
        }
    }

    #[tokio::test]
    async fn test_motion_snapshot_zero_seeded() {
        let hw = FakeHardware::with(&SensorType::MOTION);
        let agg = aggregator(hw.clone());
        let mut snapshots = agg.motion_snapshot();

        hw.emit(SensorType::Gyroscope, vec![0.1, 0.2, 0.3]);
        let snap = snapshots.next().await.unwrap();
        assert_eq!(snap.gyroscope, [0.1, 0.2, 0.3]);
        assert_eq!(snap.accelerometer, [0.0; 3]);
        assert_eq!(snap.rotation_vector, [0.0; 4]);
    }
}
