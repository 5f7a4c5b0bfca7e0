use std::fmt;
use std::str::FromStr;

use cogworks_core::{CogError, Embed};
use serde::{Deserialize, Serialize};

use crate::sources::{PollReport, StatusSnapshot};

const BLUE: u32 = 0x3498db;
const TEAL: u32 = 0x1abc9c;
const RED: u32 = 0xe74c3c;

/// One independently toggled dashboard message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Main,
    Secondary,
    Alert,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Main, Section::Secondary, Section::Alert];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Main => "main",
            Section::Secondary => "secondary",
            Section::Alert => "alert",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = CogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(Section::Main),
            "secondary" | "feeds" => Ok(Section::Secondary),
            "alert" | "alerts" => Ok(Section::Alert),
            other => Err(CogError::InvalidArgument(format!(
                "Unknown section '{other}'. Use one of: main, secondary, alert."
            ))),
        }
    }
}

/// `partial_outage` -> `Partial Outage`.
fn title_case(raw: &str) -> String {
    raw.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn footer(report: &PollReport) -> String {
    format!("Last Checked: {} UTC", report.checked_at.format("%Y-%m-%d %H:%M:%S"))
}

fn probe_value(snap: &StatusSnapshot) -> String {
    let mut value = format!("{} {}", snap.reachability.emoji(), snap.reachability.label());
    if let Some(ms) = snap.latency_ms {
        value.push_str(&format!(" ({ms:.1} ms)"));
    }
    value
}

fn component_value(snap: &StatusSnapshot) -> String {
    let shown = snap.upstream.as_deref().map(title_case).unwrap_or_else(|| "Unreachable".into());
    format!("{} {shown}", snap.reachability.emoji())
}

fn feed_value(snap: &StatusSnapshot) -> String {
    let badge = format!("{} {}", snap.reachability.emoji(), snap.reachability.badge());
    match snap.counters {
        Some(c) => format!(
            "{badge}\n❌ Failed: {}\n✅ Succeeded: {}\n📊 Total: {}",
            c.failed, c.succeeded, c.total
        ),
        None => format!("{badge}\n❌ Failed: N/A\n✅ Succeeded: N/A\n📊 Total: N/A"),
    }
}

fn main_embed(report: &PollReport) -> Embed {
    let mut embed = Embed::new("Platform Status", BLUE);
    let page = report.page_name.as_deref().unwrap_or("Status");
    for snap in &report.components {
        embed = embed.field(format!("{page} {}", snap.name), component_value(snap), true);
    }
    for snap in &report.probes {
        embed = embed.field(snap.name.clone(), probe_value(snap), true);
    }
    if report.components.is_empty() && report.probes.is_empty() {
        embed = embed.description("No sources configured.");
    }
    embed.footer(footer(report))
}

fn secondary_embed(report: &PollReport) -> Option<Embed> {
    if report.feeds.is_empty() {
        return None;
    }
    let mut embed = Embed::new("Feed Status", TEAL);
    for snap in &report.feeds {
        embed = embed.field(format!("Feed - {}", snap.name), feed_value(snap), true);
    }
    Some(embed.footer(footer(report)))
}

fn alert_embed(report: &PollReport) -> Option<Embed> {
    let page = report.page_name.as_deref().unwrap_or("Status");
    let lines: Vec<String> = report
        .incidents()
        .map(|snap| {
            let upstream = snap.upstream.as_deref().map(title_case).unwrap_or_default();
            format!("{} {page} {}: {upstream}", snap.reachability.emoji(), snap.name)
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(
        Embed::new(format!("{page} Incident"), RED)
            .description(lines.join("\n"))
            .footer(footer(report)),
    )
}

/// The embed for `section`, or `None` when the section has nothing to show.
pub fn render(section: Section, report: &PollReport) -> Option<Embed> {
    match section {
        Section::Main => Some(main_embed(report)),
        Section::Secondary => secondary_embed(report),
        Section::Alert => alert_embed(report),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::sources::{FeedCounters, Reachability};

    fn snap(name: &str, reachability: Reachability) -> StatusSnapshot {
        StatusSnapshot {
            name: name.into(),
            reachability,
            latency_ms: None,
            counters: None,
            upstream: None,
        }
    }

    fn report() -> PollReport {
        let mut api = snap("API", Reachability::Operational);
        api.upstream = Some("operational".into());
        let mut backend = snap("Backend", Reachability::Degraded);
        backend.latency_ms = Some(153.27);
        let mut eu = snap("EU", Reachability::Operational);
        eu.counters = Some(FeedCounters { succeeded: 9, failed: 1, total: 10 });
        PollReport {
            page_name: Some("Cloudflare".into()),
            components: vec![api],
            probes: vec![backend],
            feeds: vec![eu, snap("US", Reachability::Down)],
            checked_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 5).unwrap(),
        }
    }

    #[test]
    fn main_section_lists_components_and_probes() {
        let embed = render(Section::Main, &report()).unwrap();
        assert_eq!(embed.title, "Platform Status");
        assert_eq!(embed.fields[0].name, "Cloudflare API");
        assert_eq!(embed.fields[0].value, "🟢 Operational");
        assert_eq!(embed.fields[1].value, "🟠 Degraded (153.3 ms)");
        assert_eq!(embed.footer.as_deref(), Some("Last Checked: 2024-05-01 08:30:05 UTC"));
    }

    #[test]
    fn secondary_section_shows_counters_or_na() {
        let embed = render(Section::Secondary, &report()).unwrap();
        assert_eq!(embed.fields[0].name, "Feed - EU");
        assert!(embed.fields[0].value.starts_with("🟢 Online"));
        assert!(embed.fields[0].value.contains("📊 Total: 10"));
        assert!(embed.fields[1].value.starts_with("🔴 Offline"));
        assert!(embed.fields[1].value.contains("❌ Failed: N/A"));
    }

    #[test]
    fn alert_only_while_an_incident_is_open() {
        assert_eq!(render(Section::Alert, &report()), None);

        let mut incident = report();
        let mut pages = snap("Pages", Reachability::Down);
        pages.upstream = Some("partial_outage".into());
        incident.components.push(pages);
        let embed = render(Section::Alert, &incident).unwrap();
        assert_eq!(embed.description.as_deref(), Some("🔴 Cloudflare Pages: Partial Outage"));
    }

    #[test]
    fn secondary_is_absent_without_feeds() {
        let mut empty = report();
        empty.feeds.clear();
        assert_eq!(render(Section::Secondary, &empty), None);
    }

    #[test]
    fn sections_parse_from_names() {
        assert_eq!("Alert".parse::<Section>().unwrap(), Section::Alert);
        assert_eq!("feeds".parse::<Section>().unwrap(), Section::Secondary);
        assert!(matches!("nope".parse::<Section>(), Err(CogError::InvalidArgument(_))));
        assert_eq!(title_case("degraded_performance"), "Degraded Performance");
    }
}
