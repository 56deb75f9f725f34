//! MAC vendor resolution: cache-aside over an HTTP lookup service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::VendorConfig;
use crate::neighbor::normalize_mac;
use crate::store::VendorCache;
use crate::types::{PLACEHOLDER_MAC_PREFIX, UNKNOWN};

/// Result of one call to the lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(String),
    /// HTTP 429; worth retrying after a pause.
    RateLimited,
    /// Any other status or a transport failure.
    Unavailable(String),
}

#[async_trait]
pub trait VendorSource: Send + Sync {
    async fn lookup(&self, mac: &str) -> LookupOutcome;
}

/// Plain-text lookup API in the style of `api.macvendors.com/<mac>`.
pub struct HttpVendorSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVendorSource {
    pub fn new(config: &VendorConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VendorSource for HttpVendorSource {
    async fn lookup(&self, mac: &str) -> LookupOutcome {
        let url = format!("{}/{}", self.base_url, mac);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return LookupOutcome::Unavailable(e.to_string()),
        };
        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(body) => LookupOutcome::Found(body.trim().to_string()),
                Err(e) => LookupOutcome::Unavailable(e.to_string()),
            },
            StatusCode::TOO_MANY_REQUESTS => LookupOutcome::RateLimited,
            other => LookupOutcome::Unavailable(format!("status {other}")),
        }
    }
}

/// Lowercase `xx:xx:xx` prefix used as the cache key. `None` unless `mac` is a valid MAC.
pub fn oui_prefix(mac: &str) -> Option<String> {
    normalize_mac(mac.trim()).and_then(|m| m.get(..8).map(str::to_string))
}

/// MACs that must never reach the lookup service.
pub fn is_unresolvable(mac: &str) -> bool {
    mac.is_empty() || mac.eq_ignore_ascii_case(UNKNOWN) || mac.starts_with(PLACEHOLDER_MAC_PREFIX)
}

pub struct VendorResolver {
    source: Arc<dyn VendorSource>,
    cache: Arc<dyn VendorCache>,
    max_attempts: u32,
    backoff: Duration,
}

impl VendorResolver {
    pub fn new(
        source: Arc<dyn VendorSource>,
        cache: Arc<dyn VendorCache>,
        config: &VendorConfig,
    ) -> Self {
        Self {
            source,
            cache,
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Resolve the vendor for `mac`. Never fails: every dead end yields `"Unknown"`.
    ///
    /// A rate-limited attempt `n` sleeps `n * backoff` before the next one; any other
    /// failure stops immediately. Only real vendor names are cached.
    pub async fn resolve(&self, mac: &str) -> String {
        if is_unresolvable(mac) {
            return UNKNOWN.to_string();
        }

        let oui = oui_prefix(mac);
        if let Some(vendor) = oui.as_deref().and_then(|o| self.cache.get(o)) {
            debug!("vendor cache hit for {mac}: {vendor}");
            return vendor;
        }

        for attempt in 1..=self.max_attempts {
            match self.source.lookup(mac).await {
                LookupOutcome::Found(vendor) if !vendor.is_empty() => {
                    if let Some(oui) = oui.as_deref() {
                        self.cache.put(oui, &vendor);
                    }
                    return vendor;
                }
                LookupOutcome::Found(_) => {
                    debug!("vendor lookup for {mac} returned an empty body");
                    break;
                }
                LookupOutcome::RateLimited => {
                    debug!("vendor lookup rate limited for {mac} (attempt {attempt})");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                LookupOutcome::Unavailable(reason) => {
                    debug!("vendor lookup failed for {mac}: {reason}");
                    break;
                }
            }
        }

        UNKNOWN.to_string()
    }
}
