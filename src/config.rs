//! Tuning knobs for discovery, enrichment and full-range scans.
//!
//! Every field has a default, so a JSON config file only needs the values it changes:
//!
//! ```json
//! { "full_scan": { "chunk_size": 500 }, "vendor": { "backoff_ms": 3000 } }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ports::{COMMON_PORTS, FIRST_PORT, LAST_PORT, METRICS_PORTS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Ports probed for every host during enrichment.
    pub common_ports: Vec<u16>,
    pub common_port_timeout_ms: u64,
    /// Ports checked for a `/metrics` endpoint.
    pub metrics_ports: Vec<u16>,
    pub metrics_timeout_ms: u64,
    /// Hosts enriched concurrently.
    pub enrich_workers: usize,
    pub full_scan: FullScanConfig,
    pub vendor: VendorConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            common_ports: COMMON_PORTS.to_vec(),
            common_port_timeout_ms: 300,
            metrics_ports: METRICS_PORTS.to_vec(),
            metrics_timeout_ms: 1000,
            enrich_workers: 20,
            full_scan: FullScanConfig::default(),
            vendor: VendorConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Read a JSON config file. Missing keys fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config file: {}", path.as_ref().display()))
    }

    pub fn common_port_timeout(&self) -> Duration {
        Duration::from_millis(self.common_port_timeout_ms)
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_millis(self.metrics_timeout_ms)
    }
}

/// Full-range scan parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullScanConfig {
    pub first_port: u16,
    pub last_port: u16,
    /// Ports per chunk; progress and cancellation are handled between chunks.
    pub chunk_size: usize,
    pub timeout_ms: u64,
    /// Concurrent connects within one chunk.
    pub concurrency: usize,
}

impl Default for FullScanConfig {
    fn default() -> Self {
        Self {
            first_port: FIRST_PORT,
            last_port: LAST_PORT,
            chunk_size: 1000,
            timeout_ms: 100,
            concurrency: 500,
        }
    }
}

impl FullScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn total_ports(&self) -> u32 {
        if self.last_port < self.first_port {
            return 0;
        }
        u32::from(self.last_port) - u32::from(self.first_port) + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// The MAC is appended as the last path segment.
    pub base_url: String,
    pub max_attempts: u32,
    /// Sleep after the n-th rate-limited attempt is `n * backoff_ms`.
    pub backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.macvendors.com".to_string(),
            max_attempts: 3,
            backoff_ms: 1500,
            request_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long ARP replies are collected after the last request went out.
    pub arp_wait_ms: u64,
    pub ping_workers: usize,
    pub ping_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            arp_wait_ms: 2000,
            ping_workers: 50,
            ping_timeout_ms: 500,
        }
    }
}
