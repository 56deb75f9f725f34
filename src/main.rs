use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use ipnet::Ipv4Net;
use tracing::{debug, error, info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use lan_device_exporter::config::ScannerConfig;
use lan_device_exporter::discovery::NetworkDiscovery;
use lan_device_exporter::enrich::EnrichmentPipeline;
use lan_device_exporter::jobs::ScanJobTracker;
use lan_device_exporter::store::{DeviceStore, SqliteStore};
use lan_device_exporter::{netdetect, ports, server};

/// Discover LAN devices, enrich them and export them to Prometheus.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-device-exporter",
    version,
    about = "Discover LAN devices, identify their vendors and services, export to Prometheus.",
    long_about = None
)]
struct Cli {
    /// IP range to scan (e.g., 192.168.1.0/24). If omitted, auto-detect the local /24.
    #[arg(long)]
    range: Option<String>,

    /// Seconds between scan cycles.
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Prometheus exporter port.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Web API port.
    #[arg(long = "web-port", default_value_t = 5050)]
    web_port: u16,

    /// Address both HTTP servers bind to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Log level (DEBUG, INFO, WARNING, ERROR). RUST_LOG takes precedence when set.
    #[arg(long, default_value = "INFO")]
    loglevel: String,

    /// SQLite database holding devices and the vendor cache.
    #[arg(long, default_value = "network_devices.db")]
    db: PathBuf,

    /// JSON file with scanner tuning knobs.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ports file replacing the common-port list (one port or range per line).
    #[arg(long)]
    ports: Option<PathBuf>,

    /// Directory with the dashboard's static assets.
    #[arg(long = "ui-dir", default_value = "ui")]
    ui_dir: PathBuf,

    /// Run a single scan cycle without starting the HTTP servers, then exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.loglevel)?;

    let mut config = match cli.config.as_deref() {
        Some(path) => ScannerConfig::load(path)?,
        None => ScannerConfig::default(),
    };
    if let Some(path) = cli.ports.as_deref() {
        config.common_ports = ports::load_ports_from_path(path)?;
    }
    let config = Arc::new(config);

    let range = match cli.range.as_deref() {
        Some(r) => netdetect::parse_range(r)?,
        None => {
            let detected = netdetect::detect_local_network();
            info!("No range specified. Auto-detected: {detected}");
            detected
        }
    };

    info!("Loading known devices from {}...", cli.db.display());
    let store = Arc::new(SqliteStore::open(&cli.db)?);
    info!("Loaded {} devices.", store.get_all()?.len());

    let devices: Arc<dyn DeviceStore> = store.clone();
    let pipeline = EnrichmentPipeline::from_config(config.clone(), store.clone())?;
    let discovery = NetworkDiscovery::new(config.discovery.clone());

    if !cli.once {
        let tracker = ScanJobTracker::new(devices.clone(), config.full_scan.clone());
        let exporter = server::exporter_router(devices.clone());
        let exporter_addr = SocketAddr::new(cli.bind, cli.port);
        tokio::spawn(async move {
            let served = server::serve(exporter_addr, exporter, "Prometheus exporter").await;
            if let Err(e) = served {
                error!("exporter error: {e:#}");
            }
        });

        let state = server::AppState::new(devices.clone(), tracker);
        let api = server::api_router(state, &cli.ui_dir);
        let web_addr = SocketAddr::new(cli.bind, cli.web_port);
        tokio::spawn(async move {
            if let Err(e) = server::serve(web_addr, api, "web server").await {
                error!("web server error: {e:#}");
            }
        });
    }

    loop {
        info!("Starting scan for {range}");
        run_cycle(&discovery, &pipeline, devices.as_ref(), range).await;

        if cli.once {
            break;
        }
        debug!("Sleeping for {} seconds...", cli.interval);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cli.interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// One discover → enrich → persist pass. Failures are logged, never fatal.
async fn run_cycle(
    discovery: &NetworkDiscovery,
    pipeline: &EnrichmentPipeline,
    store: &dyn DeviceStore,
    range: Ipv4Net,
) {
    let hosts = discovery.discover(range).await;
    info!("Found {} active devices.", hosts.len());

    let devices = pipeline.enrich(hosts).await;
    let mut saved = 0usize;
    for device in devices {
        let mac = device.mac.clone();
        match store.upsert(device) {
            Ok(()) => saved += 1,
            Err(e) => error!("failed to save {mac}: {e:#}"),
        }
    }
    info!("{saved} devices updated and saved.");
}

fn init_logging(level: &str) -> Result<()> {
    let level = parse_level(level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn parse_level(raw: &str) -> Result<Level> {
    if raw.eq_ignore_ascii_case("warning") {
        return Ok(Level::WARN);
    }
    match raw.parse::<Level>() {
        Ok(level) => Ok(level),
        Err(_) => bail!("Invalid log level: {raw}"),
    }
}
