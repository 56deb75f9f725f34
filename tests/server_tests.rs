use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use lan_device_exporter::config::FullScanConfig;
use lan_device_exporter::jobs::ScanJobTracker;
use lan_device_exporter::server::{api_router, exporter_router, AppState};
use lan_device_exporter::store::{DeviceStore, MemoryStore};
use lan_device_exporter::types::{DeviceRecord, DeviceType, JobStatus, ScanProgress};
use tower::ServiceExt;

fn device(mac: &str, ip: &str) -> DeviceRecord {
    DeviceRecord {
        mac: mac.into(),
        ip: ip.into(),
        vendor: "Acme".into(),
        device_type: DeviceType::WebServer,
        open_ports: [80].into_iter().collect::<BTreeSet<u16>>(),
        metrics_urls: vec![format!("http://{ip}:9100/metrics")],
        last_seen: "2024-01-01T00:00:00Z".into(),
    }
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.upsert(device("aa:00:00:00:00:01", "192.168.1.20")).unwrap();
    store.upsert(device("aa:00:00:00:00:02", "192.168.1.3")).unwrap();
    store
}

fn app(store: Arc<MemoryStore>) -> Router {
    let config = FullScanConfig {
        chunk_size: 50,
        concurrency: 1,
        ..FullScanConfig::default()
    };
    let tracker = ScanJobTracker::new(store.clone(), config);
    api_router(AppState::new(store, tracker), "ui")
}

async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn devices_are_sorted_numerically_by_ip() {
    let app = app(seeded_store());
    let (status, body) = call(&app, Method::GET, "/api/devices").await;
    assert_eq!(status, StatusCode::OK);

    let devices: Vec<DeviceRecord> = serde_json::from_slice(&body).unwrap();
    let ips: Vec<&str> = devices.iter().map(|d| d.ip.as_str()).collect();
    assert_eq!(ips, vec!["192.168.1.3", "192.168.1.20"]);
    assert_eq!(devices[0].device_type, DeviceType::WebServer);
}

#[tokio::test]
async fn unknown_scan_is_404_and_bad_ip_is_400() {
    let app = app(seeded_store());
    let (status, _) = call(&app, Method::GET, "/api/scan/10.9.9.9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::DELETE, "/api/scan/10.9.9.9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::POST, "/api/scan/not-an-ip").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scan_lifecycle_over_http() {
    let app = app(seeded_store());

    let (status, body) = call(&app, Method::POST, "/api/scan/127.0.0.1").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let started: ScanProgress = serde_json::from_slice(&body).unwrap();
    assert_eq!(started.status, JobStatus::Running);
    assert_eq!(started.total_ports, 65535);

    let (status, _) = call(&app, Method::POST, "/api/scan/127.0.0.1").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, Method::GET, "/api/scan/127.0.0.1").await;
    assert_eq!(status, StatusCode::OK);
    let progress: ScanProgress = serde_json::from_slice(&body).unwrap();
    assert!(progress.progress <= 100);

    let (status, body) = call(&app, Method::DELETE, "/api/scan/127.0.0.1").await;
    assert_eq!(status, StatusCode::OK);
    let cancelled: ScanProgress = serde_json::from_slice(&body).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let (status, body) = call(&app, Method::GET, "/api/scans").await;
    assert_eq!(status, StatusCode::OK);
    let jobs: Vec<ScanProgress> = serde_json::from_slice(&body).unwrap();
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn exporter_serves_gauges() {
    let store: Arc<dyn DeviceStore> = seeded_store();
    let app = exporter_router(store);
    let (status, body) = call(&app, Method::GET, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains(
        "network_device_up{ip=\"192.168.1.3\",mac=\"aa:00:00:00:00:02\",vendor=\"Acme\"} 1"
    ));
    assert!(text.contains("url=\"http://192.168.1.20:9100/metrics\""));
}
