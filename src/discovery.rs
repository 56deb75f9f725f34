//! Host discovery: ARP sweep first, ping sweep of the implied /24 as fallback.

use std::future::Future;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

use crate::arp;
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::neighbor;
use crate::netdetect::{expand_hosts, ipv4_to_default_cidr};
use crate::types::{DiscoveredHost, UNKNOWN};

pub struct NetworkDiscovery {
    config: DiscoveryConfig,
}

impl NetworkDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Live hosts in `range`. Order is unspecified.
    pub async fn discover(&self, range: Ipv4Net) -> Vec<DiscoveredHost> {
        debug!("scanning network {range}");
        let primary = arp::sweep(range, Duration::from_millis(self.config.arp_wait_ms)).await;
        with_fallback(primary, || self.ping_sweep(range)).await
    }

    /// Ping every host of the /24 containing `range`, then look up responders' MACs.
    pub async fn ping_sweep(&self, range: Ipv4Net) -> Vec<DiscoveredHost> {
        let subnet = ipv4_to_default_cidr(range.network());
        info!("starting ping sweep of {subnet}");

        let timeout = Duration::from_millis(self.config.ping_timeout_ms);
        let sem = Arc::new(Semaphore::new(self.config.ping_workers.max(1)));
        let mut set = JoinSet::new();

        for ip in expand_hosts(subnet) {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            set.spawn(async move {
                let _permit = permit;
                if !ping(ip, timeout).await {
                    return None;
                }
                let mac = neighbor::lookup_mac(ip)
                    .await
                    .unwrap_or_else(|| UNKNOWN.to_string());
                Some(DiscoveredHost::new(ip, mac))
            });
        }

        let mut hosts = Vec::new();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Some(host)) => hosts.push(host),
                Ok(None) => {}
                Err(e) => debug!("ping task failed: {e}"),
            }
        }
        hosts
    }
}

/// Keep the primary result unless it failed or came back empty. Partial results never
/// trigger the fallback.
pub async fn with_fallback<F, Fut>(
    primary: Result<Vec<DiscoveredHost>, DiscoveryError>,
    fallback: F,
) -> Vec<DiscoveredHost>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Vec<DiscoveredHost>>,
{
    match primary {
        Ok(hosts) if !hosts.is_empty() => hosts,
        Ok(_) => {
            info!("ARP sweep found no devices, trying ping sweep");
            fallback().await
        }
        Err(e) => {
            warn!("ARP sweep failed: {e}. Falling back to ping sweep");
            fallback().await
        }
    }
}

/// One echo request through the system `ping`, bounded by `timeout`.
pub async fn ping(ip: Ipv4Addr, timeout: Duration) -> bool {
    let mut cmd = Command::new("ping");
    cmd.args(ping_args(ip, timeout))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    matches!(time::timeout(timeout, cmd.status()).await, Ok(Ok(status)) if status.success())
}

fn ping_args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let ms = timeout.as_millis().max(1).to_string();
    if cfg!(windows) {
        vec!["-n".into(), "1".into(), "-w".into(), ms, ip.to_string()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-W".into(), ms, ip.to_string()]
    } else {
        // iputils only takes whole seconds here
        let secs = timeout.as_secs().max(1).to_string();
        vec!["-c".into(), "1".into(), "-W".into(), secs, ip.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(last: u8) -> DiscoveredHost {
        DiscoveredHost::new(Ipv4Addr::new(10, 0, 0, last), "aa:bb:cc:dd:ee:ff")
    }

    #[tokio::test]
    async fn partial_primary_result_is_kept() {
        let fallback = || async { vec![host(2), host(3)] };
        let hosts = with_fallback(Ok(vec![host(1)]), fallback).await;
        assert_eq!(hosts, vec![host(1)]);
    }

    #[tokio::test]
    async fn empty_primary_falls_back() {
        let hosts = with_fallback(Ok(Vec::new()), || async { vec![host(2)] }).await;
        assert_eq!(hosts, vec![host(2)]);
    }

    #[tokio::test]
    async fn failed_primary_falls_back() {
        let primary = Err(DiscoveryError::NoInterface("10.0.0.0/24".into()));
        let hosts = with_fallback(primary, || async { vec![host(4)] }).await;
        assert_eq!(hosts, vec![host(4)]);
    }

    #[test]
    fn ping_args_end_with_target() {
        let args = ping_args(Ipv4Addr::new(10, 0, 0, 1), Duration::from_millis(500));
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.1"));
        assert_eq!(args.len(), 5);
    }
}
