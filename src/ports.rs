use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

/// Ports probed during enrichment: infrastructure, IoT and common dev services.
pub const COMMON_PORTS: &[u16] = &[
    21,   // FTP
    22,   // SSH
    23,   // Telnet
    25,   // SMTP
    53,   // DNS
    80,   // HTTP
    110,  // POP3
    143,  // IMAP
    443,  // HTTPS
    445,  // SMB
    3306, // MySQL
    3389, // RDP
    5432, // PostgreSQL
    5900, // VNC
    8080, // HTTP alt
    8443, // HTTPS alt
    9100, // node exporter
    1883, // MQTT
    8883, // MQTT over TLS
    3000, // Node.js / Grafana
    5000, // Flask
    5001, // Synology DSM
    8000, // Python HTTP
    8008, // Google Home
    8081, // HTTP alt
    8888, // Jupyter
    9000, // Portainer
    9090, // Prometheus
];

/// Ports checked for a `/metrics` endpoint.
pub const METRICS_PORTS: &[u16] = &[9100, 8080, 80, 3000, 9090];

pub const FIRST_PORT: u16 = 1;
pub const LAST_PORT: u16 = 65535;

/// Parse a ports list into a sorted, deduplicated set of TCP ports (1..=65535).
///
/// Each line may hold several comma-separated entries, each either a single port
/// (`80`) or an inclusive range (`8000-8010`). Everything after `#` is a comment.
pub fn parse_ports_str(s: &str) -> Result<BTreeSet<u16>> {
    let mut out = BTreeSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");

        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                out.extend(start..=end);
            } else {
                let p = parse_port_str(item)
                    .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
                out.insert(p);
            }
        }
    }

    Ok(out)
}

/// Load a ports list from a file. Errors if the file cannot be read, fails to parse or is empty.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    let ports = parse_ports_str(&content)?;
    if ports.is_empty() {
        bail!("ports file {} lists no ports", path.as_ref().display());
    }
    Ok(ports.into_iter().collect())
}

/// Split `first..=last` into consecutive inclusive chunks of at most `chunk_size` ports.
///
/// A zero chunk size is treated as one port per chunk.
pub fn port_chunks(first: u16, last: u16, chunk_size: usize) -> Vec<RangeInclusive<u16>> {
    let step = chunk_size.max(1) as u32;
    let (first, last) = (u32::from(first), u32::from(last));
    let mut chunks = Vec::new();
    let mut start = first;
    while start <= last {
        let end = (start + step - 1).min(last);
        // both bounds stay within `first..=last`, which came from u16
        chunks.push(start as u16..=end as u16);
        start = end + 1;
    }
    chunks
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
