use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ::time::{format_description::well_known, OffsetDateTime};
use serde::{Deserialize, Serialize};

/// Sentinel used for vendors, device types and hardware addresses that could not be resolved.
pub const UNKNOWN: &str = "Unknown";

/// Prefix of the synthesized hardware-address key for hosts without a resolvable MAC.
pub const PLACEHOLDER_MAC_PREFIX: &str = "unknown_";

/// A live host reported by discovery, before enrichment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub ip: Ipv4Addr,
    /// Lowercase colon-separated MAC, or `"Unknown"` when the neighbor cache had no entry.
    pub mac: String,
}

impl DiscoveredHost {
    pub fn new(ip: Ipv4Addr, mac: impl Into<String>) -> Self {
        Self { ip, mac: mac.into() }
    }

    /// Hardware-address key for the device store.
    ///
    /// Hosts without a resolvable MAC get `unknown_<ip>` so that repeated scans of the
    /// same host keep landing on the same record.
    pub fn record_key(&self) -> String {
        let mac = self.mac.trim();
        if mac.is_empty() || mac.eq_ignore_ascii_case(UNKNOWN) {
            placeholder_mac(IpAddr::V4(self.ip))
        } else {
            mac.to_ascii_lowercase()
        }
    }
}

pub fn placeholder_mac(ip: IpAddr) -> String {
    format!("{PLACEHOLDER_MAC_PREFIX}{ip}")
}

/// Device-type label derived from open ports.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    #[serde(rename = "Node Exporter")]
    NodeExporter,
    #[serde(rename = "Windows PC")]
    WindowsPc,
    #[serde(rename = "Linux Server")]
    LinuxServer,
    #[serde(rename = "Windows/Samba")]
    WindowsSamba,
    #[serde(rename = "Web Server")]
    WebServer,
    #[serde(rename = "MQTT Broker")]
    MqttBroker,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn label(self) -> &'static str {
        match self {
            DeviceType::NodeExporter => "Node Exporter",
            DeviceType::WindowsPc => "Windows PC",
            DeviceType::LinuxServer => "Linux Server",
            DeviceType::WindowsSamba => "Windows/Samba",
            DeviceType::WebServer => "Web Server",
            DeviceType::MqttBroker => "MQTT Broker",
            DeviceType::Unknown => UNKNOWN,
        }
    }

    /// Inverse of [`DeviceType::label`]; unrecognised labels map to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "Node Exporter" => DeviceType::NodeExporter,
            "Windows PC" => DeviceType::WindowsPc,
            "Linux Server" => DeviceType::LinuxServer,
            "Windows/Samba" => DeviceType::WindowsSamba,
            "Web Server" => DeviceType::WebServer,
            "MQTT Broker" => DeviceType::MqttBroker,
            _ => DeviceType::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One enriched device, keyed by hardware address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub mac: String,
    pub ip: String,
    pub vendor: String,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub open_ports: BTreeSet<u16>,
    #[serde(default)]
    pub metrics_urls: Vec<String>,
    /// RFC 3339 UTC timestamp of the last enrichment pass that saw this device.
    pub last_seen: String,
}

/// Lifecycle state of a full-range scan job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Complete,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Snapshot of a scan job as returned to API callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanProgress {
    pub ip: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_port: u16,
    pub total_ports: u32,
    pub open_ports: Vec<u16>,
    pub count: usize,
    pub elapsed_seconds: f64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

/// RFC 3339 UTC timestamp for records and job bookkeeping.
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
