//! Network probes behind a trait so polling can run against fakes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use cogworks_core::{CogError, Result};
use reqwest::Client;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingOutcome {
    pub reachable: bool,
    pub latency_ms: Option<f64>,
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn ping(&self, host: &str) -> Result<PingOutcome>;

    async fn http_status(&self, url: &str) -> Result<u16>;

    /// Body of a successful GET.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Real probes: `ping -c 1` as a subprocess, HTTP via reqwest. Every call is
/// bounded by `timeout`.
pub struct NetProber {
    client: Client,
    timeout: Duration,
}

impl NetProber {
    pub fn new(timeout: Duration) -> Self {
        Self { client: Client::new(), timeout }
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CogError::Transport(format!("{what} timed out after {:?}", self.timeout)))?
    }
}

/// Round-trip time from ping output: the number after the last `time=` (or
/// `time<` for sub-millisecond replies).
pub fn parse_ping_time(output: &str) -> Option<f64> {
    let start = output.rfind("time=").or_else(|| output.rfind("time<"))?;
    let tail = &output[start + "time=".len()..];
    let token = tail.split_whitespace().next()?;
    token.trim_end_matches("ms").parse().ok()
}

fn count_flag() -> &'static str {
    if cfg!(windows) {
        "-n"
    } else {
        "-c"
    }
}

#[async_trait]
impl Prober for NetProber {
    async fn ping(&self, host: &str) -> Result<PingOutcome> {
        self.bounded(&format!("ping {host}"), async {
            let output = tokio::process::Command::new("ping")
                .args([count_flag(), "1", host])
                .kill_on_drop(true)
                .output()
                .await?;
            if !output.status.success() {
                debug!(host, code = ?output.status.code(), "Host unreachable");
                return Ok(PingOutcome { reachable: false, latency_ms: None });
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(PingOutcome { reachable: true, latency_ms: parse_ping_time(&stdout) })
        })
        .await
    }

    async fn http_status(&self, url: &str) -> Result<u16> {
        self.bounded(&format!("GET {url}"), async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| CogError::Transport(format!("HTTP error: {e}")))?;
            Ok(resp.status().as_u16())
        })
        .await
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.bounded(&format!("GET {url}"), async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| CogError::Transport(format!("HTTP error: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(CogError::Transport(format!("{url} answered {status}")));
            }
            resp.text().await.map_err(|e| CogError::Transport(format!("HTTP error: {e}")))
        })
        .await
    }
}
