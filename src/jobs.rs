//! Full-range scan jobs, one per target address.
//!
//! Each address has at most one `running` job. A job's state sits behind its own mutex,
//! written by the scan task after every chunk and read by progress requests; jobs for
//! different addresses never contend with each other.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::anyhow;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FullScanConfig;
use crate::error::ScanJobError;
use crate::scanner::{self, ChunkReport, FullScanOutcome};
use crate::store::DeviceStore;
use crate::types::{now_rfc3339, JobStatus, ScanProgress};

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: u8,
    current_port: u16,
    open_ports: BTreeSet<u16>,
    started_at: String,
    finished_at: Option<String>,
    started: Instant,
    finished: Option<Instant>,
    error: Option<String>,
}

impl JobState {
    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished = Some(Instant::now());
        self.finished_at = Some(now_rfc3339());
    }
}

#[derive(Debug)]
struct ScanJob {
    state: Mutex<JobState>,
    cancel: CancellationToken,
    total_ports: u32,
}

impl ScanJob {
    fn new(total_ports: u32, first_port: u16) -> Self {
        Self {
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                progress: 0,
                current_port: first_port,
                open_ports: BTreeSet::new(),
                started_at: now_rfc3339(),
                finished_at: None,
                started: Instant::now(),
                finished: None,
                error: None,
            }),
            cancel: CancellationToken::new(),
            total_ports,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.lock().status == JobStatus::Running
    }

    /// Fold one finished chunk into the job. Ignored once the job left `running`,
    /// so a cancelled job never shows further progress.
    fn record_chunk(&self, report: &ChunkReport) {
        let mut state = self.lock();
        if state.status != JobStatus::Running {
            return;
        }
        let pct = if self.total_ports == 0 {
            100
        } else {
            u64::from(report.scanned) * 100 / u64::from(self.total_ports)
        };
        state.progress = pct.min(100) as u8;
        state.current_port = report.cursor;
        state.open_ports.extend(report.open.iter().copied());
    }

    /// Move a running job into a terminal state. Returns `false` if it already was terminal.
    fn finish(&self, status: JobStatus, error: Option<String>) -> bool {
        let mut state = self.lock();
        if state.status != JobStatus::Running {
            return false;
        }
        if status == JobStatus::Complete {
            state.progress = 100;
        }
        state.error = error;
        state.finish(status);
        true
    }

    /// Write `ports` back to the device record and mark the job complete.
    ///
    /// Both happen under the job lock, so a concurrent cancel either lands first and
    /// nothing is written, or finds the job already complete.
    fn complete(&self, ip: IpAddr, ports: &BTreeSet<u16>, store: &dyn DeviceStore) {
        let mut state = self.lock();
        if state.status != JobStatus::Running {
            debug!("full scan of {ip} finished after cancellation; discarding results");
            return;
        }
        match store.replace_open_ports(ip, ports) {
            Ok(true) => {}
            Ok(false) => debug!("no device record for {ip}; open ports not written back"),
            Err(e) => {
                warn!("failed to store full scan results for {ip}: {e:#}");
                state.error = Some(format!("failed to store results: {e:#}"));
                state.finish(JobStatus::Error);
                return;
            }
        }
        state.progress = 100;
        state.finish(JobStatus::Complete);
        info!("full port scan of {ip} complete: {} open", ports.len());
    }

    fn snapshot(&self, ip: IpAddr) -> ScanProgress {
        let state = self.lock();
        let elapsed = match state.finished {
            Some(end) => end.duration_since(state.started),
            None => state.started.elapsed(),
        };
        ScanProgress {
            ip: ip.to_string(),
            status: state.status,
            progress: state.progress,
            current_port: state.current_port,
            total_ports: self.total_ports,
            open_ports: state.open_ports.iter().copied().collect(),
            count: state.open_ports.len(),
            elapsed_seconds: elapsed.as_secs_f64(),
            started_at: state.started_at.clone(),
            finished_at: state.finished_at.clone(),
            error: state.error.clone(),
        }
    }
}

struct TrackerInner {
    jobs: DashMap<IpAddr, Arc<ScanJob>>,
    store: Arc<dyn DeviceStore>,
    config: FullScanConfig,
}

/// Owns every full-range scan job. Cheap to clone; clones share the same jobs.
#[derive(Clone)]
pub struct ScanJobTracker {
    inner: Arc<TrackerInner>,
}

impl ScanJobTracker {
    pub fn new(store: Arc<dyn DeviceStore>, config: FullScanConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                jobs: DashMap::new(),
                store,
                config,
            }),
        }
    }

    /// Start a full-range scan of `ip` in the background.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`ScanJobError::AlreadyRunning`] while a previous job for `ip` is running; a
    /// finished job is replaced.
    pub fn start_full_scan(&self, ip: IpAddr) -> Result<ScanProgress, ScanJobError> {
        let config = &self.inner.config;
        let job = Arc::new(ScanJob::new(config.total_ports(), config.first_port));

        // The entry guard holds the shard lock, making check-and-insert atomic per address.
        match self.inner.jobs.entry(ip) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_running() {
                    return Err(ScanJobError::AlreadyRunning(ip));
                }
                existing.insert(job.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }

        info!("starting full port scan of {ip}");
        let snapshot = job.snapshot(ip);
        tokio::spawn(run_job(self.inner.clone(), ip, job));
        Ok(snapshot)
    }

    /// Current snapshot of the latest job for `ip`.
    pub fn get_progress(&self, ip: IpAddr) -> Result<ScanProgress, ScanJobError> {
        let job = self.job(ip)?;
        Ok(job.snapshot(ip))
    }

    /// Cancel the running job for `ip`.
    ///
    /// The job reports `cancelled` right away; the scan itself stops at the next chunk
    /// boundary. Cancelling a finished job returns its snapshot unchanged.
    pub fn cancel_full_scan(&self, ip: IpAddr) -> Result<ScanProgress, ScanJobError> {
        let job = self.job(ip)?;
        if job.finish(JobStatus::Cancelled, None) {
            info!("cancelling full port scan of {ip}");
        }
        job.cancel.cancel();
        Ok(job.snapshot(ip))
    }

    /// Snapshots of every known job.
    pub fn list(&self) -> Vec<ScanProgress> {
        self.inner
            .jobs
            .iter()
            .map(|entry| entry.value().snapshot(*entry.key()))
            .collect()
    }

    fn job(&self, ip: IpAddr) -> Result<Arc<ScanJob>, ScanJobError> {
        self.inner
            .jobs
            .get(&ip)
            .map(|entry| entry.value().clone())
            .ok_or(ScanJobError::NotFound(ip))
    }
}

async fn run_job(inner: Arc<TrackerInner>, ip: IpAddr, job: Arc<ScanJob>) {
    let config = inner.config.clone();
    let scan_job = job.clone();
    // Run the scan in its own task so a panic lands here as an error instead of vanishing.
    let worker = tokio::spawn(async move {
        let cancel = scan_job.cancel.clone();
        let on_chunk = |report: &ChunkReport| scan_job.record_chunk(report);
        scanner::scan_full_range(ip, &config, &cancel, on_chunk).await
    });

    let outcome = match worker.await {
        Ok(res) => res,
        Err(e) => Err(anyhow!("scan task aborted: {e}")),
    };

    match outcome {
        Ok(FullScanOutcome::Completed(ports)) => job.complete(ip, &ports, inner.store.as_ref()),
        Ok(FullScanOutcome::Cancelled(_)) => {
            job.finish(JobStatus::Cancelled, None);
        }
        Err(e) => {
            warn!("full port scan of {ip} failed: {e:#}");
            job.finish(JobStatus::Error, Some(format!("{e:#}")));
        }
    }
}
