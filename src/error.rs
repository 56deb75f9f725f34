//! Error types surfaced by the scan-job tracker and the ARP discovery strategy.

use std::net::IpAddr;

use thiserror::Error;

/// Rejections from the full-scan job tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanJobError {
    /// A job for this address is still running.
    #[error("a full scan for {0} is already running")]
    AlreadyRunning(IpAddr),

    /// No job was ever created for this address.
    #[error("no scan job found for {0}")]
    NotFound(IpAddr),
}

/// Reasons the ARP sweep could not run. Any of these sends discovery to the ping fallback.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No up, non-loopback interface with a MAC and an IPv4 address in the target range.
    #[error("no usable interface for {0}")]
    NoInterface(String),

    /// Opening the datalink channel failed (usually missing privileges).
    #[error("failed to open datalink channel: {0}")]
    Channel(#[source] std::io::Error),

    /// The platform handed back a non-ethernet channel.
    #[error("unsupported datalink channel type")]
    UnsupportedChannel,

    /// Writing an ARP request frame failed.
    #[error("failed to send ARP request: {0}")]
    Send(#[source] std::io::Error),

    /// The blocking sweep task panicked or was cancelled.
    #[error("ARP sweep task failed: {0}")]
    Task(String),
}
