//! Status sources: polling, classification and counter extraction.
//!
//! Every source is polled on its own. A failure marks that source down and
//! the cycle moves on.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use cogworks_core::{retry_with_backoff, CogError, Result, RetryPolicy, Sleeper};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{FeedConfig, FeedFormat, StatusConfig};
use crate::probe::{PingOutcome, Prober};

/// Round trips at or above this are degraded.
pub const DEGRADED_LATENCY_MS: f64 = 100.0;

/// The upstream value that means a component is healthy.
pub const ALL_CLEAR: &str = "operational";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Operational,
    Degraded,
    Down,
}

impl Reachability {
    pub fn emoji(self) -> &'static str {
        match self {
            Reachability::Operational => "🟢",
            Reachability::Degraded => "🟠",
            Reachability::Down => "🔴",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Reachability::Operational => "Operational",
            Reachability::Degraded => "Degraded",
            Reachability::Down => "Down",
        }
    }

    /// Wording for feed badges.
    pub fn badge(self) -> &'static str {
        match self {
            Reachability::Operational => "Online",
            Reachability::Degraded => "Degraded",
            Reachability::Down => "Offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCounters {
    pub succeeded: u64,
    pub failed: u64,
    pub total: u64,
}

/// One source's state for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub name: String,
    pub reachability: Reachability,
    pub latency_ms: Option<f64>,
    /// `None` when the feed could not be read.
    pub counters: Option<FeedCounters>,
    /// Raw status-page value, when the page answered.
    pub upstream: Option<String>,
}

impl StatusSnapshot {
    fn new(name: &str, reachability: Reachability) -> Self {
        Self {
            name: name.to_string(),
            reachability,
            latency_ms: None,
            counters: None,
            upstream: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub page_name: Option<String>,
    pub components: Vec<StatusSnapshot>,
    pub probes: Vec<StatusSnapshot>,
    pub feeds: Vec<StatusSnapshot>,
    pub checked_at: DateTime<Utc>,
}

impl PollReport {
    /// Components whose page reported something other than all clear.
    pub fn incidents(&self) -> impl Iterator<Item = &StatusSnapshot> {
        self.components
            .iter()
            .filter(|c| c.upstream.as_deref().is_some_and(|u| u != ALL_CLEAR))
    }
}

pub fn classify_component(upstream: &str) -> Reachability {
    if upstream == ALL_CLEAR {
        Reachability::Operational
    } else {
        Reachability::Down
    }
}

pub fn classify_ping(outcome: &Result<PingOutcome>) -> Reachability {
    match outcome {
        Ok(PingOutcome { reachable: true, latency_ms: Some(ms) }) if *ms >= DEGRADED_LATENCY_MS => {
            Reachability::Degraded
        }
        Ok(PingOutcome { reachable: true, .. }) => Reachability::Operational,
        Ok(PingOutcome { reachable: false, .. }) | Err(_) => Reachability::Down,
    }
}

pub fn classify_http(outcome: &Result<u16>) -> Reachability {
    match outcome {
        Ok(200) => Reachability::Operational,
        _ => Reachability::Down,
    }
}

#[derive(Debug, Deserialize)]
struct ComponentList {
    #[serde(default)]
    components: Vec<Component>,
}

#[derive(Debug, Deserialize)]
struct Component {
    name: String,
    status: String,
}

/// Upstream status for each allow-listed component, in allow-list order.
/// Components the page does not list come back as `"unknown"`.
pub fn component_statuses(body: &str, allow: &[String]) -> Result<Vec<(String, String)>> {
    let list: ComponentList = serde_json::from_str(body)?;
    Ok(allow
        .iter()
        .map(|wanted| {
            let status = list
                .components
                .iter()
                .find(|c| &c.name == wanted)
                .map(|c| c.status.clone())
                .unwrap_or_else(|| "unknown".to_string());
            (wanted.clone(), status)
        })
        .collect())
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0).round() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn metric_series() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^[^#\n]*\{[^}]*\b(?:status|state|result)="(succeeded|failed|total)"[^}]*\}\s+([0-9][0-9.eE+]*)"#,
        )
        .expect("static regex")
    })
}

fn free_text_counter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(succeeded|failed|total)\b["']?\s*[:=]\s*(\d+)"#).expect("static regex")
    })
}

#[derive(Default)]
struct Tally {
    succeeded: Option<u64>,
    failed: Option<u64>,
    total: Option<u64>,
}

impl Tally {
    fn add(&mut self, label: &str, value: u64) {
        let slot = match label.to_ascii_lowercase().as_str() {
            "succeeded" => &mut self.succeeded,
            "failed" => &mut self.failed,
            _ => &mut self.total,
        };
        *slot = Some(slot.unwrap_or(0).saturating_add(value));
    }

    fn finish(self) -> Option<FeedCounters> {
        if self.succeeded.is_none() && self.failed.is_none() {
            return None;
        }
        let succeeded = self.succeeded.unwrap_or(0);
        let failed = self.failed.unwrap_or(0);
        Some(FeedCounters { succeeded, failed, total: self.total.unwrap_or(succeeded.saturating_add(failed)) })
    }
}

/// Extracts counters from a feed payload. JSON reads the fields directly;
/// metrics text sums labelled series and falls back to `name: value` pairs.
pub fn parse_feed_counters(format: FeedFormat, body: &str) -> Result<FeedCounters> {
    let mut tally = Tally::default();
    match format {
        FeedFormat::Json => {
            let value: Value = serde_json::from_str(body)?;
            for label in ["succeeded", "failed", "total"] {
                if let Some(n) = value.get(label).and_then(as_count) {
                    tally.add(label, n);
                }
            }
        }
        FeedFormat::Metrics => {
            for caps in metric_series().captures_iter(body) {
                if let Ok(n) = caps[2].parse::<f64>() {
                    tally.add(&caps[1], n.max(0.0).round() as u64);
                }
            }
            if tally.succeeded.is_none() && tally.failed.is_none() {
                for caps in free_text_counter().captures_iter(body) {
                    if let Ok(n) = caps[2].parse::<u64>() {
                        tally.add(&caps[1], n);
                    }
                }
            }
        }
    }
    tally
        .finish()
        .ok_or_else(|| CogError::Transport("No counters found in feed payload".into()))
}

/// Polls sources one after another, each call under `policy`.
pub struct Poller<'a> {
    pub prober: &'a dyn Prober,
    pub sleeper: &'a dyn Sleeper,
    pub policy: RetryPolicy,
}

impl Poller<'_> {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        retry_with_backoff(&self.policy, self.sleeper, |_| self.prober.fetch_text(url))
            .await
            .map_err(|exhausted| exhausted.last_error)
    }

    async fn ping(&self, host: &str) -> Result<PingOutcome> {
        retry_with_backoff(&self.policy, self.sleeper, |_| self.prober.ping(host))
            .await
            .map_err(|exhausted| exhausted.last_error)
    }

    async fn http_status(&self, url: &str) -> Result<u16> {
        retry_with_backoff(&self.policy, self.sleeper, |_| self.prober.http_status(url))
            .await
            .map_err(|exhausted| exhausted.last_error)
    }

    pub async fn poll_all(&self, config: &StatusConfig, now: DateTime<Utc>) -> PollReport {
        let mut components = Vec::new();
        if let Some(page) = &config.status_page {
            let statuses = match self.fetch_text(&page.url).await {
                Ok(body) => component_statuses(&body, &page.components),
                Err(e) => Err(e),
            };
            match statuses {
                Ok(statuses) => {
                    for (name, upstream) in statuses {
                        let mut snap = StatusSnapshot::new(&name, classify_component(&upstream));
                        snap.upstream = Some(upstream);
                        components.push(snap);
                    }
                }
                Err(e) => {
                    warn!(source = %page.name, "Status page unavailable: {e}");
                    components.extend(
                        page.components.iter().map(|name| StatusSnapshot::new(name, Reachability::Down)),
                    );
                }
            }
        }

        let mut probes = Vec::new();
        for target in &config.ping {
            let outcome = self.ping(&target.host).await;
            if let Err(e) = &outcome {
                warn!(source = %target.name, "Ping failed: {e}");
            }
            let mut snap = StatusSnapshot::new(&target.name, classify_ping(&outcome));
            snap.latency_ms = outcome.ok().and_then(|o| o.latency_ms);
            probes.push(snap);
        }
        for target in &config.http {
            let outcome = self.http_status(&target.url).await;
            match &outcome {
                Ok(code) => debug!(source = %target.name, code, "HTTP probe answered"),
                Err(e) => warn!(source = %target.name, "HTTP probe failed: {e}"),
            }
            probes.push(StatusSnapshot::new(&target.name, classify_http(&outcome)));
        }

        let mut feeds = Vec::new();
        for feed in &config.feeds {
            feeds.push(self.poll_feed(feed).await);
        }

        PollReport {
            page_name: config.status_page.as_ref().map(|p| p.name.clone()),
            components,
            probes,
            feeds,
            checked_at: now,
        }
    }

    async fn poll_feed(&self, feed: &FeedConfig) -> StatusSnapshot {
        let counters = match self.fetch_text(&feed.url).await {
            Ok(body) => parse_feed_counters(feed.format, &body),
            Err(e) => Err(e),
        };
        if let Err(e) = &counters {
            warn!(source = %feed.name, "Feed unreadable: {e}");
        }

        let (badge, latency_ms) = match &feed.probe_host {
            Some(host) => {
                let outcome = self.ping(host).await;
                (classify_ping(&outcome), outcome.ok().and_then(|o| o.latency_ms))
            }
            None => (classify_http(&self.http_status(&feed.url).await), None),
        };

        let mut snap = StatusSnapshot::new(&feed.name, badge);
        snap.latency_ms = latency_ms;
        snap.counters = counters.ok();
        snap
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;
    use cogworks_core::testing::RecordingSleeper;

    use super::fakes::FakeProber;
    use super::*;
    use crate::config::{HostProbe, HttpProbe, StatusPageConfig};

    #[test]
    fn only_operational_is_operational() {
        let body = r#"{"components":[{"name":"API","status":"operational"}]}"#;
        let statuses = component_statuses(body, &["API".to_string()]).unwrap();
        assert_eq!(classify_component(&statuses[0].1), Reachability::Operational);
        for other in ["degraded_performance", "partial_outage", "major_outage", "unknown"] {
            assert_eq!(classify_component(other), Reachability::Down);
        }
    }

    #[test]
    fn component_filter_keeps_allow_list_order() {
        let body = r#"{"components":[
            {"name":"Access","status":"partial_outage"},
            {"name":"Pages","status":"operational"},
            {"name":"Workers","status":"major_outage"}]}"#;
        let allow = vec!["Pages".to_string(), "Access".to_string(), "API".to_string()];
        assert_eq!(
            component_statuses(body, &allow).unwrap(),
            vec![
                ("Pages".to_string(), "operational".to_string()),
                ("Access".to_string(), "partial_outage".to_string()),
                ("API".to_string(), "unknown".to_string()),
            ]
        );
    }

    #[test]
    fn ping_latencies_classify_at_one_hundred_ms() {
        let at = |ms| Ok(PingOutcome { reachable: true, latency_ms: Some(ms) });
        assert_eq!(classify_ping(&at(50.0)), Reachability::Operational);
        assert_eq!(classify_ping(&at(150.0)), Reachability::Degraded);
        assert_eq!(classify_ping(&at(100.0)), Reachability::Degraded);
        assert_eq!(
            classify_ping(&Err(CogError::Transport("timed out".into()))),
            Reachability::Down
        );
        assert_eq!(
            classify_ping(&Ok(PingOutcome { reachable: false, latency_ms: None })),
            Reachability::Down
        );
        assert_eq!(
            classify_ping(&Ok(PingOutcome { reachable: true, latency_ms: None })),
            Reachability::Operational
        );
    }

    #[test]
    fn http_is_operational_only_on_200() {
        assert_eq!(classify_http(&Ok(200)), Reachability::Operational);
        assert_eq!(classify_http(&Ok(403)), Reachability::Down);
        assert_eq!(classify_http(&Ok(503)), Reachability::Down);
        assert_eq!(classify_http(&Err(CogError::Transport("x".into()))), Reachability::Down);
    }

    #[test]
    fn json_counters_accept_numbers_and_strings() {
        let counters =
            parse_feed_counters(FeedFormat::Json, r#"{"succeeded": 40, "failed": "2", "total": 42}"#)
                .unwrap();
        assert_eq!(counters, FeedCounters { succeeded: 40, failed: 2, total: 42 });
        let derived = parse_feed_counters(FeedFormat::Json, r#"{"succeeded": 3, "failed": 1}"#).unwrap();
        assert_eq!(derived.total, 4);
        assert!(parse_feed_counters(FeedFormat::Json, r#"{"other": 1}"#).is_err());
    }

    #[test]
    fn metrics_counters_sum_labelled_series() {
        let body = "# HELP jobs_total Jobs by outcome\n\
                    # TYPE jobs_total counter\n\
                    jobs_total{region=\"eu\",status=\"succeeded\"} 120\n\
                    jobs_total{region=\"us\",status=\"succeeded\"} 30\n\
                    jobs_total{status=\"failed\"} 5\n";
        let counters = parse_feed_counters(FeedFormat::Metrics, body).unwrap();
        assert_eq!(counters, FeedCounters { succeeded: 150, failed: 5, total: 155 });
    }

    #[test]
    fn metrics_fall_back_to_free_text() {
        let body = "Succeeded: 9\nFailed: 1\nTotal: 11";
        let counters = parse_feed_counters(FeedFormat::Metrics, body).unwrap();
        assert_eq!(counters, FeedCounters { succeeded: 9, failed: 1, total: 11 });
        assert!(parse_feed_counters(FeedFormat::Metrics, "nothing here").is_err());
    }

    #[test]
    fn huge_metric_series_saturate_instead_of_overflowing() {
        let body = "jobs{status=\"succeeded\"} 1e20\njobs{status=\"succeeded\"} 1e20\njobs{status=\"failed\"} 1e20\n";
        let counters = parse_feed_counters(FeedFormat::Metrics, body).unwrap();
        assert_eq!(counters, FeedCounters { succeeded: u64::MAX, failed: u64::MAX, total: u64::MAX });
    }

    fn config() -> StatusConfig {
        StatusConfig {
            status_page: Some(StatusPageConfig {
                name: "Cloudflare".into(),
                url: "https://page/components.json".into(),
                components: vec!["API".into(), "Pages".into()],
            }),
            ping: vec![
                HostProbe { name: "Fast".into(), host: "fast".into() },
                HostProbe { name: "Slow".into(), host: "slow".into() },
                HostProbe { name: "Gone".into(), host: "gone".into() },
            ],
            http: vec![HttpProbe { name: "Web".into(), url: "https://web".into() }],
            feeds: vec![
                FeedConfig {
                    name: "EU".into(),
                    url: "https://eu/feed".into(),
                    format: FeedFormat::Json,
                    probe_host: Some("fast".into()),
                },
                FeedConfig {
                    name: "US".into(),
                    url: "https://us/feed".into(),
                    format: FeedFormat::Json,
                    probe_host: Some("gone".into()),
                },
            ],
            ..StatusConfig::default()
        }
    }

    fn prober() -> FakeProber {
        let prober = FakeProber {
            pings: HashMap::from([("fast".into(), Some(50.0)), ("slow".into(), Some(150.0))]),
            statuses: HashMap::from([("https://web".into(), 200)]),
            ..FakeProber::default()
        };
        prober.set_body(
            "https://page/components.json",
            r#"{"components":[{"name":"API","status":"operational"},{"name":"Pages","status":"major_outage"}]}"#,
        );
        prober.set_body("https://eu/feed", r#"{"succeeded":10,"failed":0,"total":10}"#);
        prober
    }

    #[tokio::test]
    async fn one_failing_source_never_aborts_the_cycle() {
        let prober = prober();
        let sleeper = RecordingSleeper::default();
        let poller = Poller { prober: &prober, sleeper: &sleeper, policy: RetryPolicy::single() };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        let report = poller.poll_all(&config(), now).await;

        let probes: Vec<(&str, Reachability)> =
            report.probes.iter().map(|p| (p.name.as_str(), p.reachability)).collect();
        assert_eq!(
            probes,
            vec![
                ("Fast", Reachability::Operational),
                ("Slow", Reachability::Degraded),
                ("Gone", Reachability::Down),
                ("Web", Reachability::Operational),
            ]
        );
        assert_eq!(report.probes[0].latency_ms, Some(50.0));
        assert_eq!(report.feeds[0].counters.map(|c| c.total), Some(10));
        assert_eq!(report.feeds[0].reachability, Reachability::Operational);
        assert_eq!(report.feeds[1].counters, None);
        assert_eq!(report.feeds[1].reachability, Reachability::Down);
        assert_eq!(report.incidents().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["Pages"]);
        assert_eq!(report.checked_at, now);
    }

    #[tokio::test]
    async fn feed_badge_without_probe_host_comes_from_the_feed_url_status() {
        let prober = FakeProber {
            statuses: HashMap::from([("https://up/feed".into(), 200)]),
            ..FakeProber::default()
        };
        prober.set_body("https://up/feed", "not a counter payload");
        prober.set_body("https://down/feed", r#"{"succeeded":4,"failed":1}"#);
        let sleeper = RecordingSleeper::default();
        let poller = Poller { prober: &prober, sleeper: &sleeper, policy: RetryPolicy::single() };
        let feed = |name: &str, url: &str| FeedConfig {
            name: name.into(),
            url: url.into(),
            format: FeedFormat::Json,
            probe_host: None,
        };
        let only_feeds = StatusConfig {
            feeds: vec![feed("Up", "https://up/feed"), feed("Down", "https://down/feed")],
            ..StatusConfig::default()
        };

        let report = poller.poll_all(&only_feeds, Utc::now()).await;

        assert_eq!(report.feeds[0].reachability, Reachability::Operational);
        assert_eq!(report.feeds[0].counters, None);
        assert_eq!(report.feeds[1].reachability, Reachability::Down);
        assert_eq!(report.feeds[1].counters.map(|c| c.total), Some(5));
    }

    #[tokio::test]
    async fn unreachable_status_page_marks_components_down_without_incident() {
        let prober = FakeProber::default();
        let sleeper = RecordingSleeper::default();
        let poller = Poller { prober: &prober, sleeper: &sleeper, policy: RetryPolicy::single() };
        let report = poller.poll_all(&config(), Utc::now()).await;

        assert!(report.components.iter().all(|c| c.reachability == Reachability::Down));
        assert_eq!(report.incidents().count(), 0);
    }

    #[tokio::test]
    async fn retries_follow_the_configured_policy() {
        let prober = FakeProber::default();
        let sleeper = RecordingSleeper::default();
        let poller = Poller { prober: &prober, sleeper: &sleeper, policy: RetryPolicy::quadratic(2) };
        let only_http = StatusConfig {
            http: vec![HttpProbe { name: "Web".into(), url: "https://web".into() }],
            ..StatusConfig::default()
        };
        poller.poll_all(&only_http, Utc::now()).await;

        assert_eq!(prober.calls.lock().unwrap().len(), 2);
        assert_eq!(sleeper.recorded(), vec![std::time::Duration::from_secs(1)]);
    }
}
