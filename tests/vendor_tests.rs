use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lan_device_exporter::config::VendorConfig;
use lan_device_exporter::store::{MemoryVendorCache, VendorCache};
use lan_device_exporter::vendor::{LookupOutcome, VendorResolver, VendorSource};

/// Replays scripted outcomes and counts calls; answers `Unavailable` once the script runs dry.
#[derive(Default)]
struct ScriptedSource {
    script: Mutex<VecDeque<LookupOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(outcomes: Vec<LookupOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorSource for ScriptedSource {
    async fn lookup(&self, _mac: &str) -> LookupOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LookupOutcome::Unavailable("script exhausted".into()))
    }
}

fn fast_config() -> VendorConfig {
    VendorConfig {
        backoff_ms: 1,
        ..VendorConfig::default()
    }
}

fn resolver(source: Arc<ScriptedSource>, cache: Arc<MemoryVendorCache>) -> VendorResolver {
    VendorResolver::new(source, cache, &fast_config())
}

#[tokio::test]
async fn placeholders_never_reach_the_service() {
    let source = ScriptedSource::new(vec![LookupOutcome::Found("Acme".into())]);
    let resolver = resolver(source.clone(), Arc::new(MemoryVendorCache::new()));

    for mac in ["unknown", "UNKNOWN", "Unknown", "unknown_10.0.0.5", ""] {
        assert_eq!(resolver.resolve(mac).await, "Unknown");
    }
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn same_oui_is_served_from_cache() {
    let source = ScriptedSource::new(vec![LookupOutcome::Found("Acme Corp".into())]);
    let cache = Arc::new(MemoryVendorCache::new());
    let resolver = resolver(source.clone(), cache.clone());

    assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff").await, "Acme Corp");
    assert_eq!(resolver.resolve("aa:bb:cc:11:22:33").await, "Acme Corp");
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.get("aa:bb:cc").as_deref(), Some("Acme Corp"));
}

#[tokio::test]
async fn differently_written_macs_share_one_cache_entry() {
    let source = ScriptedSource::new(vec![LookupOutcome::Found("Acme Corp".into())]);
    let cache = Arc::new(MemoryVendorCache::new());
    let resolver = resolver(source.clone(), cache.clone());

    assert_eq!(resolver.resolve("AA-BB-CC-DD-EE-FF").await, "Acme Corp");
    assert_eq!(resolver.resolve("aa:bb:cc:01:02:03").await, "Acme Corp");
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("aa:bb:cc").as_deref(), Some("Acme Corp"));
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let source = ScriptedSource::new(vec![
        LookupOutcome::RateLimited,
        LookupOutcome::RateLimited,
        LookupOutcome::Found("Acme".into()),
    ]);
    let resolver = resolver(source.clone(), Arc::new(MemoryVendorCache::new()));

    assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff").await, "Acme");
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn gives_up_after_three_rate_limits() {
    let source = ScriptedSource::new(vec![LookupOutcome::RateLimited; 5]);
    let cache = Arc::new(MemoryVendorCache::new());
    let resolver = resolver(source.clone(), cache.clone());

    assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff").await, "Unknown");
    assert_eq!(source.calls(), 3);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn other_failures_stop_immediately_and_are_not_cached() {
    let source = ScriptedSource::new(vec![
        LookupOutcome::Unavailable("status 404 Not Found".into()),
        LookupOutcome::Found("Acme".into()),
    ]);
    let cache = Arc::new(MemoryVendorCache::new());
    let resolver = resolver(source.clone(), cache.clone());

    assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff").await, "Unknown");
    assert_eq!(source.calls(), 1);
    assert!(cache.is_empty());

    // nothing was cached, so the next call goes out again
    assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff").await, "Acme");
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn backoff_grows_with_attempt_number() {
    let source = ScriptedSource::new(vec![LookupOutcome::RateLimited; 3]);
    let config = VendorConfig {
        backoff_ms: 20,
        ..VendorConfig::default()
    };
    let cache = Arc::new(MemoryVendorCache::new());
    let resolver = VendorResolver::new(source.clone(), cache, &config);

    let started = std::time::Instant::now();
    assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff").await, "Unknown");
    // 1x + 2x + 3x the base
    assert!(started.elapsed() >= std::time::Duration::from_millis(120));
}

mod http {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Router};
    use lan_device_exporter::vendor::HttpVendorSource;

    async fn lookup(Path(mac): Path<String>) -> (StatusCode, String) {
        match mac.as_str() {
            "aa:bb:cc:dd:ee:ff" => (StatusCode::OK, "Acme Corp\n".into()),
            "11:22:33:44:55:66" => (StatusCode::TOO_MANY_REQUESTS, String::new()),
            _ => (StatusCode::NOT_FOUND, "{\"errors\":{\"detail\":\"Not Found\"}}".into()),
        }
    }

    async fn spawn_service() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/{mac}", get(lookup));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let config = VendorConfig {
            base_url: spawn_service().await,
            ..VendorConfig::default()
        };
        let source = HttpVendorSource::new(&config).unwrap();

        assert_eq!(
            source.lookup("aa:bb:cc:dd:ee:ff").await,
            LookupOutcome::Found("Acme Corp".into())
        );
        assert_eq!(source.lookup("11:22:33:44:55:66").await, LookupOutcome::RateLimited);
        assert!(matches!(
            source.lookup("de:ad:be:ef:00:01").await,
            LookupOutcome::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = VendorConfig {
            base_url: format!("http://{addr}"),
            request_timeout_ms: 500,
            ..VendorConfig::default()
        };
        let source = HttpVendorSource::new(&config).unwrap();
        assert!(matches!(
            source.lookup("aa:bb:cc:dd:ee:ff").await,
            LookupOutcome::Unavailable(_)
        ));
    }
}
