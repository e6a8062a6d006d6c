//! Connection classification and signal levels

use super::model::{ConnectionType, NetworkCapabilities, RadioTechnology, Transport};

/// Weakest RSSI that still counts as a signal (dBm)
const MIN_RSSI: i32 = -100;
/// RSSI at and above which the top level is reported (dBm)
const MAX_RSSI: i32 = -55;
/// Levels reported for wifi signal strength
pub const SIGNAL_LEVELS: u8 = 5;
/// Reported for cellular links, whose strength is not read
const DEFAULT_CELLULAR_LEVEL: u8 = 3;

/// Map the active network's capabilities to a connection type.
///
/// Wifi wins over cellular, cellular over ethernet. No capabilities at all
/// means there is no active network.
pub fn classify(capabilities: Option<&NetworkCapabilities>) -> ConnectionType {
    let Some(caps) = capabilities else {
        return ConnectionType::Unknown;
    };

    if caps.has_transport(Transport::Wifi) {
        ConnectionType::Wifi
    } else if caps.has_transport(Transport::Cellular) {
        cellular_type(caps.radio_technology.as_ref())
    } else if caps.has_transport(Transport::Ethernet) {
        ConnectionType::Ethernet
    } else {
        ConnectionType::Unknown
    }
}

fn cellular_type(radio: Option<&RadioTechnology>) -> ConnectionType {
    match radio {
        Some(RadioTechnology::Nr) => ConnectionType::Mobile5g,
        Some(RadioTechnology::Lte) => ConnectionType::MobileLte,
        Some(
            RadioTechnology::Hspap
            | RadioTechnology::Hspa
            | RadioTechnology::Hsupa
            | RadioTechnology::Hsdpa
            | RadioTechnology::Umts,
        ) => ConnectionType::Mobile3g,
        Some(RadioTechnology::Edge | RadioTechnology::Gprs) => ConnectionType::Mobile2g,
        _ => ConnectionType::Mobile4g,
    }
}

/// Bucket an RSSI reading into `levels` evenly spaced levels
pub fn rssi_to_level(rssi: i32, levels: u8) -> u8 {
    if levels == 0 {
        return 0;
    }
    if rssi <= MIN_RSSI {
        0
    } else if rssi >= MAX_RSSI {
        levels - 1
    } else {
        let span = (MAX_RSSI - MIN_RSSI) as f32;
        let top = (levels - 1) as f32;
        ((rssi - MIN_RSSI) as f32 * top / span) as u8
    }
}

/// Signal level for the given connection
pub fn signal_level(connection: ConnectionType, rssi: Option<i32>) -> u8 {
    match connection {
        ConnectionType::Wifi => rssi.map(|r| rssi_to_level(r, SIGNAL_LEVELS)).unwrap_or(0),
        ConnectionType::Unknown => 0,
        _ => DEFAULT_CELLULAR_LEVEL,
    }
}
