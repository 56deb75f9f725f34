//! Library crate for lan-device-exporter: LAN discovery, device enrichment and
//! tracked full-range port scans.
pub mod arp;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod enrich;
pub mod error;
pub mod exporter;
pub mod jobs;
pub mod neighbor;
pub mod netdetect;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod store;
pub mod types;
pub mod vendor;
