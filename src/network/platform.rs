//! Host connectivity information
//!
//! The sampler only talks to [`ConnectivityProvider`]. [`LinuxConnectivity`]
//! answers from sysfs/procfs, the network-interface and sysinfo crates, and
//! the `iw` / `mmcli` tools when they are installed.

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::classify::signal_level;
use super::model::{
    split_operator_code, CellularDetails, ConnectionType, NetworkCapabilities, RadioTechnology,
    Transport, WifiDetails,
};

/// Read-only view of the platform's network state
pub trait ConnectivityProvider: Send + Sync {
    /// Capabilities of the active network, `None` when nothing is connected
    fn active_capabilities(&self) -> Option<NetworkCapabilities>;
    fn wifi_details(&self) -> anyhow::Result<WifiDetails>;
    fn cellular_details(&self) -> anyhow::Result<CellularDetails>;
}

const VIRTUAL_PREFIXES: &[&str] = &["docker", "veth", "br-", "virbr", "vmnet", "vboxnet", "tun", "tap", "wg", "lo"];
const CELLULAR_PREFIXES: &[&str] = &["wwan", "rmnet", "ccmni", "ppp"];

#[derive(Debug, Clone)]
pub struct LinuxConnectivity {
    sys_root: PathBuf,
    proc_root: PathBuf,
}

impl Default for LinuxConnectivity {
    fn default() -> Self {
        Self::new("/sys", "/proc")
    }
}

impl LinuxConnectivity {
    pub fn new(sys_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            proc_root: proc_root.into(),
        }
    }

    /// Pick the interface carrying the most traffic among those with addresses
    fn active_interface(&self) -> Option<NetworkInterface> {
        let interfaces = match NetworkInterface::show() {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Failed to list network interfaces: {}", e);
                return None;
            }
        };

        let networks = sysinfo::Networks::new_with_refreshed_list();
        let traffic = |name: &str| {
            networks
                .iter()
                .find(|(n, _)| n.as_str() == name)
                .map(|(_, data)| data.total_received() + data.total_transmitted())
                .unwrap_or(0)
        };

        interfaces
            .into_iter()
            .filter(|iface| !is_virtual(&iface.name))
            .filter(|iface| iface.addr.iter().any(|a| !is_loopback(a)))
            .max_by_key(|iface| traffic(&iface.name))
    }

    fn transport_for(&self, name: &str) -> Option<Transport> {
        let dir = self.sys_root.join("class/net").join(name);
        if dir.join("wireless").exists() || dir.join("phy80211").exists() {
            return Some(Transport::Wifi);
        }
        if CELLULAR_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return Some(Transport::Cellular);
        }
        // ARPHRD_ETHER
        match read_trimmed(&dir.join("type")).as_deref() {
            Some("1") => Some(Transport::Ethernet),
            _ => None,
        }
    }

    fn modem_status(&self) -> Option<ModemStatus> {
        let output = run_tool("mmcli", &["-m", "any", "--output-keyvalue"])?;
        Some(parse_mmcli(&output))
    }

    fn proc_rssi(&self, name: &str) -> Option<i32> {
        let contents = fs::read_to_string(self.proc_root.join("net/wireless")).ok()?;
        parse_proc_wireless(&contents, name)
    }
}

impl ConnectivityProvider for LinuxConnectivity {
    fn active_capabilities(&self) -> Option<NetworkCapabilities> {
        let iface = self.active_interface()?;
        let mut transports = BTreeSet::new();
        if let Some(t) = self.transport_for(&iface.name) {
            transports.insert(t);
        }

        let radio_technology = if transports.contains(&Transport::Cellular) {
            self.modem_status().and_then(|m| m.access_technology)
        } else {
            None
        };

        tracing::debug!("Active interface {} transports {:?}", iface.name, transports);
        Some(NetworkCapabilities {
            transports,
            radio_technology,
            interface: Some(iface.name),
        })
    }

    fn wifi_details(&self) -> anyhow::Result<WifiDetails> {
        let iface = self
            .active_interface()
            .filter(|i| self.transport_for(&i.name) == Some(Transport::Wifi))
            .ok_or_else(|| anyhow::anyhow!("No active wifi interface"))?;

        let mut details = run_tool("iw", &["dev", &iface.name, "link"])
            .map(|out| parse_iw_link(&out))
            .unwrap_or_default();

        if details.rssi_dbm.is_none() {
            details.rssi_dbm = self.proc_rssi(&iface.name);
        }
        details.ip_address = iface.addr.iter().find_map(|a| match a {
            Addr::V4(v4) => Some(v4.ip.to_string()),
            _ => None,
        });
        details.interface = Some(iface.name);
        Ok(details)
    }

    fn cellular_details(&self) -> anyhow::Result<CellularDetails> {
        let modem = self
            .modem_status()
            .ok_or_else(|| anyhow::anyhow!("No modem manager available"))?;

        let (mcc, mnc) = modem
            .operator_code
            .as_deref()
            .map(split_operator_code)
            .unwrap_or((None, None));

        Ok(CellularDetails {
            network_type: modem
                .access_technology
                .as_ref()
                .map(|t| t.label().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            operator_name: modem.operator_name,
            mcc,
            mnc,
            signal_strength: signal_level(ConnectionType::Mobile4g, None),
        })
    }
}

fn is_virtual(name: &str) -> bool {
    VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn is_loopback(addr: &Addr) -> bool {
    match addr {
        Addr::V4(v4) => v4.ip.is_loopback(),
        Addr::V6(v6) => v6.ip.is_loopback(),
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Run a helper tool, `None` if it is missing or fails
fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            tracing::debug!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
        Err(e) => {
            tracing::debug!("Failed to run {}: {}", program, e);
            None
        }
    }
}

/// Parse `iw dev <if> link` output
pub fn parse_iw_link(output: &str) -> WifiDetails {
    let mut details = WifiDetails::default();

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Connected to ") {
            details.bssid = rest.split_whitespace().next().map(str::to_string);
        } else if let Some(ssid) = line.strip_prefix("SSID:") {
            let ssid = ssid.trim().replace('"', "");
            if !ssid.is_empty() {
                details.ssid = Some(ssid);
            }
        } else if let Some(freq) = line.strip_prefix("freq:") {
            details.frequency_mhz = freq.trim().parse::<f64>().ok().map(|f| f as u32);
        } else if let Some(signal) = line.strip_prefix("signal:") {
            details.rssi_dbm = signal
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<i32>().ok());
        } else if let Some(rate) = line.strip_prefix("tx bitrate:") {
            details.link_speed_mbps = rate
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v as u32);
        }
    }

    details
}

/// Signal level column of `/proc/net/wireless` for one interface
pub fn parse_proc_wireless(contents: &str, iface: &str) -> Option<i32> {
    contents.lines().skip(2).find_map(|line| {
        let (name, rest) = line.trim().split_once(':')?;
        if name != iface {
            return None;
        }
        let level = rest.split_whitespace().nth(2)?;
        level.trim_end_matches('.').parse::<f64>().ok().map(|v| v as i32)
    })
}

#[derive(Debug, Default, PartialEq)]
pub struct ModemStatus {
    pub access_technology: Option<RadioTechnology>,
    pub operator_name: Option<String>,
    pub operator_code: Option<String>,
}

/// Parse `mmcli --output-keyvalue` output. The first access technology wins.
pub fn parse_mmcli(output: &str) -> ModemStatus {
    let mut status = ModemStatus::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if value.is_empty() || value == "--" {
            continue;
        }

        if key.starts_with("modem.generic.access-technologies")
            && !key.ends_with(".length")
            && status.access_technology.is_none()
        {
            status.access_technology = value.split(',').next().map(RadioTechnology::parse);
        } else if key == "modem.3gpp.operator-name" {
            status.operator_name = Some(value.to_string());
        } else if key == "modem.3gpp.operator-code" {
            status.operator_code = Some(value.to_string());
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iw_link() {
        let out = "Connected to aa:bb:cc:dd:ee:ff (on wlan0)\n\
                   \tSSID: \"HomeNet\"\n\
                   \tfreq: 5180.0\n\
                   \tRX: 1234 bytes (10 packets)\n\
                   \tsignal: -54 dBm\n\
                   \ttx bitrate: 866.7 MBit/s VHT-MCS 9 80MHz short GI VHT-NSS 2\n";
        let d = parse_iw_link(out);
        assert_eq!(d.bssid.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(d.ssid.as_deref(), Some("HomeNet"));
        assert_eq!(d.frequency_mhz, Some(5180));
        assert_eq!(d.rssi_dbm, Some(-54));
        assert_eq!(d.link_speed_mbps, Some(866));
    }

    #[test]
    fn test_parse_iw_not_connected() {
        assert_eq!(parse_iw_link("Not connected.\n"), WifiDetails::default());
    }

    #[test]
    fn test_parse_proc_wireless() {
        let contents = "Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE\n \
                        face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22\n \
                        wlan0: 0000   56.  -54.  -256        0      0      0      0     12        0\n";
        assert_eq!(parse_proc_wireless(contents, "wlan0"), Some(-54));
        assert_eq!(parse_proc_wireless(contents, "wlan1"), None);
    }

    #[test]
    fn test_parse_mmcli() {
        let out = "modem.generic.access-technologies.length : 1\n\
                   modem.generic.access-technologies.value[1] : lte\n\
                   modem.3gpp.operator-name : T-Mobile\n\
                   modem.3gpp.operator-code : 310260\n\
                   modem.3gpp.registration-state : home\n";
        let status = parse_mmcli(out);
        assert_eq!(status.access_technology, Some(RadioTechnology::Lte));
        assert_eq!(status.operator_name.as_deref(), Some("T-Mobile"));
        assert_eq!(status.operator_code.as_deref(), Some("310260"));
    }

    #[test]
    fn test_parse_mmcli_empty_values() {
        let out = "modem.3gpp.operator-name : --\n";
        assert_eq!(parse_mmcli(out), ModemStatus::default());
    }

    #[test]
    fn test_transport_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        let net = root.path().join("class/net");
        fs::create_dir_all(net.join("wlp2s0/wireless")).unwrap();
        fs::create_dir_all(net.join("enp3s0")).unwrap();
        fs::write(net.join("enp3s0/type"), "1\n").unwrap();

        let linux = LinuxConnectivity::new(root.path(), "/proc");
        assert_eq!(linux.transport_for("wlp2s0"), Some(Transport::Wifi));
        assert_eq!(linux.transport_for("enp3s0"), Some(Transport::Ethernet));
        assert_eq!(linux.transport_for("wwan0"), Some(Transport::Cellular));
        assert_eq!(linux.transport_for("missing0"), None);
    }

    #[test]
    fn test_virtual_interfaces_are_skipped() {
        assert!(is_virtual("docker0"));
        assert!(is_virtual("veth12ab"));
        assert!(!is_virtual("eth0"));
        assert!(!is_virtual("wlan0"));
    }
}
