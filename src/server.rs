use std::{
    cmp::Ordering,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    error::ScanJobError,
    exporter,
    jobs::ScanJobTracker,
    store::DeviceStore,
    types::DeviceRecord,
};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DeviceStore>,
    tracker: ScanJobTracker,
}

impl AppState {
    pub fn new(store: Arc<dyn DeviceStore>, tracker: ScanJobTracker) -> Self {
        Self { store, tracker }
    }
}

/// Web API under `/api`, with static dashboard assets from `ui_dir` as fallback.
pub fn api_router(state: AppState, ui_dir: impl AsRef<Path>) -> Router {
    let api = Router::new()
        .route("/devices", get(get_devices))
        .route("/scans", get(list_scans))
        .route(
            "/scan/{ip}",
            post(start_scan).get(get_scan).delete(cancel_scan),
        )
        .with_state(state);

    let static_svc = ServeDir::new(ui_dir.as_ref()).append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

/// Prometheus scrape endpoint at `/metrics`.
pub fn exporter_router(store: Arc<dyn DeviceStore>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(store)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(bind: SocketAddr, app: Router, what: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {what} on {bind}"))?;
    info!("{what} listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// IPv4 order; records whose IP does not parse go last, most recently seen first.
pub fn sort_by_ip(devices: &mut [DeviceRecord]) {
    devices.sort_by(|a, b| {
        match (a.ip.parse::<Ipv4Addr>(), b.ip.parse::<Ipv4Addr>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => b.last_seen.cmp(&a.last_seen),
        }
    });
}

async fn get_devices(State(app): State<AppState>) -> Response {
    match app.store.get_all() {
        Ok(mut devices) => {
            sort_by_ip(&mut devices);
            (StatusCode::OK, Json(devices)).into_response()
        }
        Err(e) => {
            error!("failed to load devices: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to load devices").into_response()
        }
    }
}

async fn list_scans(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.tracker.list()))
}

async fn start_scan(State(app): State<AppState>, UrlPath(ip): UrlPath<String>) -> Response {
    let ip = match parse_ip(&ip) {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };
    match app.tracker.start_full_scan(ip) {
        Ok(progress) => (StatusCode::ACCEPTED, Json(progress)).into_response(),
        Err(e) => job_error(e),
    }
}

async fn get_scan(State(app): State<AppState>, UrlPath(ip): UrlPath<String>) -> Response {
    let ip = match parse_ip(&ip) {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };
    match app.tracker.get_progress(ip) {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(e) => job_error(e),
    }
}

async fn cancel_scan(State(app): State<AppState>, UrlPath(ip): UrlPath<String>) -> Response {
    let ip = match parse_ip(&ip) {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };
    match app.tracker.cancel_full_scan(ip) {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(e) => job_error(e),
    }
}

async fn get_metrics(State(store): State<Arc<dyn DeviceStore>>) -> Response {
    match store.get_all() {
        Ok(devices) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            exporter::render(&devices),
        )
            .into_response(),
        Err(e) => {
            error!("failed to load devices for export: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn parse_ip(raw: &str) -> Result<IpAddr, Response> {
    raw.parse::<IpAddr>().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid IP {raw}: {e}") })),
        )
            .into_response()
    })
}

fn job_error(e: ScanJobError) -> Response {
    let status = match e {
        ScanJobError::AlreadyRunning(_) => StatusCode::CONFLICT,
        ScanJobError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
