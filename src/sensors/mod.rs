//! Sensor aggregator - per-type hardware streams, snapshots and location

pub mod aggregator;
pub mod channel;
pub mod combine;
pub mod hardware;
pub mod iio;
pub mod location;
pub mod model;
