use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::config::ScannerConfig;
use crate::probe::MetricsProbe;
use crate::scanner;
use crate::store::VendorCache;
use crate::types::{now_rfc3339, DeviceRecord, DiscoveredHost};
use crate::vendor::{HttpVendorSource, VendorResolver};

/// Turns discovered hosts into device records: vendor, common ports, metrics
/// endpoints and device type, one host per worker.
#[derive(Clone)]
pub struct EnrichmentPipeline {
    vendors: Arc<VendorResolver>,
    metrics: MetricsProbe,
    config: Arc<ScannerConfig>,
}

impl EnrichmentPipeline {
    pub fn new(
        vendors: Arc<VendorResolver>,
        metrics: MetricsProbe,
        config: Arc<ScannerConfig>,
    ) -> Self {
        Self {
            vendors,
            metrics,
            config,
        }
    }

    /// Pipeline backed by the HTTP vendor service and the configured metrics ports.
    pub fn from_config(config: Arc<ScannerConfig>, cache: Arc<dyn VendorCache>) -> Result<Self> {
        let source =
            HttpVendorSource::new(&config.vendor).context("failed to build vendor client")?;
        let vendors = VendorResolver::new(Arc::new(source), cache, &config.vendor);
        let metrics = MetricsProbe::new(config.metrics_ports.clone(), config.metrics_timeout())
            .context("failed to build metrics client")?;
        Ok(Self::new(Arc::new(vendors), metrics, config))
    }

    /// Enrich every host with at most `enrich_workers` in flight.
    ///
    /// A host that fails is logged and left out; the others are unaffected.
    pub async fn enrich(&self, hosts: Vec<DiscoveredHost>) -> Vec<DeviceRecord> {
        let total = hosts.len();
        let sem = Arc::new(Semaphore::new(self.config.enrich_workers.max(1)));
        let mut set = JoinSet::new();

        for host in hosts {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let pipeline = self.clone();
            set.spawn(async move {
                let _permit = permit;
                let ip = host.ip;
                (ip, pipeline.enrich_host(host).await)
            });
        }

        let mut devices = Vec::with_capacity(total);
        let mut failed = 0usize;
        while let Some(res) = set.join_next().await {
            match res {
                Ok((_, Ok(device))) => devices.push(device),
                Ok((ip, Err(e))) => {
                    failed += 1;
                    warn!("enrichment of {ip} failed: {e:#}");
                }
                Err(e) => {
                    failed += 1;
                    warn!("enrichment task failed: {e}");
                }
            }
        }
        if failed > 0 {
            warn!("{failed} of {total} hosts could not be enriched");
        }
        devices
    }

    /// Build the record for a single host.
    pub async fn enrich_host(&self, host: DiscoveredHost) -> Result<DeviceRecord> {
        let mac = host.record_key();
        let ip = IpAddr::V4(host.ip);

        let vendor = self.vendors.resolve(&mac).await;
        debug!("scanning ports for {ip}...");
        let open_ports = scanner::scan_common_ports(ip, &self.config)
            .await
            .with_context(|| format!("common-port scan of {ip}"))?;
        let metrics_urls = self.metrics.check(ip).await;
        if !metrics_urls.is_empty() {
            info!("found metrics at {metrics_urls:?} on {ip}");
        }

        Ok(DeviceRecord {
            mac,
            ip: host.ip.to_string(),
            vendor,
            device_type: classify(&open_ports),
            open_ports,
            metrics_urls,
            last_seen: now_rfc3339(),
        })
    }
}
