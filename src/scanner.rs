use crate::config::{FullScanConfig, ScannerConfig};
use crate::ports::port_chunks;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Probe one socket with a TCP connect. Any failure, including the timeout, counts as closed.
pub async fn probe_port(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Scan `ports` on a single host using asynchronous TCP connects with a concurrency limit.
///
/// - Limits concurrent socket attempts using a `Semaphore`.
/// - Uses `tokio::time::timeout` to bound connect time per socket.
/// - Per-port failures only show up as absence from the result; the returned set is
///   ascending and deduplicated regardless of probe order.
///
/// The only error is a probe task that failed to run to completion.
pub async fn scan_ports(
    ip: IpAddr,
    ports: &[u16],
    concurrency: usize,
    timeout: Duration,
) -> Result<BTreeSet<u16>> {
    let sem = Arc::new(Semaphore::new(concurrency.clamp(1, 5_000)));
    let mut set = JoinSet::new();

    for &port in ports {
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .context("probe semaphore closed")?;
        set.spawn(async move {
            let _permit = permit; // keep permit until the probe completes
            let open = probe_port(SocketAddr::new(ip, port), timeout).await;
            (port, open)
        });
    }

    let mut open = BTreeSet::new();
    while let Some(res) = set.join_next().await {
        let (port, is_open) = res.with_context(|| format!("port probe task for {ip} failed"))?;
        if is_open {
            open.insert(port);
        }
    }
    Ok(open)
}

/// Common-port mode: the curated port list with its short timeout, all probed at once.
pub async fn scan_common_ports(ip: IpAddr, config: &ScannerConfig) -> Result<BTreeSet<u16>> {
    let ports = &config.common_ports;
    scan_ports(ip, ports, ports.len(), config.common_port_timeout()).await
}

/// Progress published after each completed chunk of a full-range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    /// Ports scanned so far, this chunk included.
    pub scanned: u32,
    /// Last port of the chunk just finished.
    pub cursor: u16,
    /// Open ports found in this chunk.
    pub open: BTreeSet<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullScanOutcome {
    Completed(BTreeSet<u16>),
    /// Stopped at a chunk boundary; carries what was found before stopping.
    Cancelled(BTreeSet<u16>),
}

/// Full-range mode: scan `first_port..=last_port` chunk by chunk.
///
/// `cancel` is only consulted between chunks, so probes already in flight always finish
/// and cancellation latency is bounded by one chunk's scan time.
pub async fn scan_full_range<F>(
    ip: IpAddr,
    config: &FullScanConfig,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<FullScanOutcome>
where
    F: FnMut(&ChunkReport),
{
    let mut found = BTreeSet::new();
    let mut scanned = 0u32;

    for chunk in port_chunks(config.first_port, config.last_port, config.chunk_size) {
        if cancel.is_cancelled() {
            debug!(%ip, scanned, "full scan cancelled at chunk boundary");
            return Ok(FullScanOutcome::Cancelled(found));
        }
        let ports: Vec<u16> = chunk.clone().collect();
        let open = scan_ports(ip, &ports, config.concurrency, config.timeout()).await?;
        scanned += ports.len() as u32;
        found.extend(open.iter().copied());
        on_chunk(&ChunkReport {
            scanned,
            cursor: *chunk.end(),
            open,
        });
    }

    Ok(FullScanOutcome::Completed(found))
}
