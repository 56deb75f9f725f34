use std::net::IpAddr;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::debug;

/// Looks for Prometheus-style `/metrics` endpoints on a fixed set of ports.
#[derive(Clone)]
pub struct MetricsProbe {
    client: reqwest::Client,
    ports: Vec<u16>,
}

impl MetricsProbe {
    pub fn new(ports: Vec<u16>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, ports })
    }

    /// URLs of every candidate port that answers `GET /metrics` with 200 and a body
    /// carrying `# HELP` or `# TYPE`. Results follow the order of the configured ports.
    pub async fn check(&self, ip: IpAddr) -> Vec<String> {
        let mut set = JoinSet::new();
        for (idx, &port) in self.ports.iter().enumerate() {
            let client = self.client.clone();
            let url = metrics_url(ip, port);
            set.spawn(async move {
                let found = is_metrics_endpoint(&client, &url).await;
                (idx, url, found)
            });
        }

        let mut hits = Vec::new();
        while let Some(res) = set.join_next().await {
            if let Ok((idx, url, true)) = res {
                hits.push((idx, url));
            }
        }
        hits.sort_by_key(|(idx, _)| *idx);
        hits.into_iter().map(|(_, url)| url).collect()
    }
}

fn metrics_url(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("http://{v4}:{port}/metrics"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{port}/metrics"),
    }
}

async fn is_metrics_endpoint(client: &reqwest::Client, url: &str) -> bool {
    let response = match client.get(url).send().await {
        Ok(r) if r.status() == reqwest::StatusCode::OK => r,
        Ok(_) => return false,
        Err(e) => {
            debug!("metrics probe {url} failed: {e}");
            return false;
        }
    };
    match response.text().await {
        Ok(body) => looks_like_metrics(&body),
        Err(_) => false,
    }
}

pub fn looks_like_metrics(body: &str) -> bool {
    body.contains("# HELP") || body.contains("# TYPE")
}
