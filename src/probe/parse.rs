//! Trace report parsing.
//!
//! The trace utilities print one line per hop, in one of two shapes:
//!
//! - stats lines (`pathping`): `  2   192.168.1.1      5/ 100 =  5%  |`
//! - row lines (`mtr -r`): `  3.|-- 10.0.0.1   20.0%   5   10.1  10.3 ...`
//!
//! Lines are tried against the stats shape first, then the row shape; the
//! first shape that matches decides the line, so a line yields at most one
//! finding. A hop whose reply field is `*` or `---` is inconclusive and
//! yields nothing, as do `pathping` link rows. Everything else (headers,
//! banners, blank lines) is skipped.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Reply-field values meaning "no data for this hop".
const NO_REPLY_SENTINELS: [&str; 2] = ["*", "---"];

/// Host value `mtr` prints for a hop it could not resolve.
const UNRESOLVED_HOST: &str = "???";

/// Packet loss observed at one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossFinding {
    /// Hop index, when the line carries one.
    pub hop: Option<u32>,
    /// Address of the hop, `None` when unresolved.
    pub address: Option<String>,
    /// Loss percentage, 0-100.
    pub loss_percent: u8,
}

impl LossFinding {
    /// Render as a single warning line for the report.
    pub fn describe(&self, target: &str) -> String {
        let address = self.address.as_deref().unwrap_or("an unresolved hop");
        let hop = self
            .hop
            .map(|n| format!(" (hop {})", n))
            .unwrap_or_default();
        format!(
            "⚠️ {}% packet loss detected at {}{} while reaching {}.",
            self.loss_percent, address, hop, target
        )
    }
}

/// Classification of one line of trace output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopLine {
    /// A hop with a measured loss value (possibly 0%).
    Loss(LossFinding),
    /// A hop line whose reply field is a no-data sentinel.
    NoReply,
    /// A `pathping` link row: loss between two hops, no index or address.
    /// The same loss shows up on the next hop's own line.
    Link,
    /// Anything that is not a hop line.
    Other,
}

/// The report sent when no hop showed loss.
pub fn no_loss_message(target: &str) -> String {
    format!("No packet loss detected to {}.", target)
}

/// Parse raw trace output into the list of lossy hops.
///
/// Zero-loss hops, sentinel hops and unrecognised lines are dropped.
pub fn parse_findings(output: &str) -> Vec<LossFinding> {
    output
        .lines()
        .filter_map(|line| match classify_line(line) {
            HopLine::Loss(finding) if finding.loss_percent > 0 => Some(finding),
            _ => None,
        })
        .collect()
}

/// Format findings as the webhook message, one line per hop.
pub fn format_report(findings: &[LossFinding], target: &str) -> String {
    if findings.is_empty() {
        return no_loss_message(target);
    }

    findings
        .iter()
        .map(|f| f.describe(target))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse raw trace output and render the report message.
pub fn render_report(output: &str, target: &str) -> String {
    format_report(&parse_findings(output), target)
}

/// Classify a single line. Stats shape wins over row shape.
pub fn classify_line(line: &str) -> HopLine {
    if let Some(hop_line) = match_stats_line(line) {
        return hop_line;
    }
    if let Some(hop_line) = match_row_line(line) {
        return hop_line;
    }
    HopLine::Other
}

/// `pathping` shape: `[hop] [rtt|address ...] lost/ sent = pct% ...`.
///
/// The first `lost/sent` group is the source-to-here figure and is the one
/// reported. The address is the first dotted quad outside that group.
fn match_stats_line(line: &str) -> Option<HopLine> {
    static STATS: OnceLock<Regex> = OnceLock::new();
    let stats = STATS.get_or_init(|| {
        Regex::new(r"(?P<lost>\d+)/\s*(?P<sent>\d+)\s*=\s*(?P<pct>\d+)%").unwrap()
    });

    static LEADING_HOP: OnceLock<Regex> = OnceLock::new();
    let leading_hop = LEADING_HOP.get_or_init(|| Regex::new(r"^\s*(?P<hop>\d+)\s").unwrap());

    let caps = stats.captures(line)?;
    let group = caps.get(0)?;
    let prefix = &line[..group.start()];
    let suffix = &line[group.end()..];

    let (hop, fields) = match leading_hop.captures(prefix) {
        Some(h) => (
            h.name("hop").and_then(|m| m.as_str().parse::<u32>().ok()),
            &prefix[h.get(0).map_or(0, |m| m.end())..],
        ),
        None => (None, prefix),
    };

    if fields.split_whitespace().any(is_sentinel) {
        return Some(HopLine::NoReply);
    }

    let loss_percent = percent_from_int(&caps, "pct")?;
    let address = first_ipv4(prefix).or_else(|| first_ipv4(suffix));

    if hop.is_none() && address.is_none() {
        return Some(HopLine::Link);
    }

    Some(HopLine::Loss(LossFinding {
        hop: hop.filter(|n| *n > 0),
        address,
        loss_percent,
    }))
}

/// `mtr --report` shape: `hop[.|--] host [(ip)] loss% timing...`.
fn match_row_line(line: &str) -> Option<HopLine> {
    static ROW: OnceLock<Regex> = OnceLock::new();
    let row = ROW.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<hop>\d+)\.?(?:\|--)?\s+(?P<host>\S+)(?:\s+\((?P<ip>[^)\s]*)\))?\s+(?P<loss>\d+(?:\.\d+)?)%(?P<rest>.*)$",
        )
        .unwrap()
    });

    let caps = row.captures(line)?;
    let host = caps.name("host")?.as_str();
    let rest = caps.name("rest").map_or("", |m| m.as_str());

    if is_sentinel(host) || rest.split_whitespace().any(is_sentinel) {
        return Some(HopLine::NoReply);
    }

    let loss: f64 = caps.name("loss")?.as_str().parse().ok()?;
    let loss_percent = loss.round().clamp(0.0, 100.0) as u8;

    let address = caps
        .name("ip")
        .map(|m| m.as_str())
        .filter(|ip| !ip.is_empty())
        .or(Some(host))
        .filter(|h| *h != UNRESOLVED_HOST)
        .map(str::to_string);

    let hop = caps
        .name("hop")
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0);

    Some(HopLine::Loss(LossFinding {
        hop,
        address,
        loss_percent,
    }))
}

fn is_sentinel(token: &str) -> bool {
    NO_REPLY_SENTINELS.contains(&token)
}

fn percent_from_int(caps: &Captures<'_>, name: &str) -> Option<u8> {
    let pct: u32 = caps.name(name)?.as_str().parse().ok()?;
    Some(pct.min(100) as u8)
}

fn first_ipv4(text: &str) -> Option<String> {
    static DOTTED_QUAD: OnceLock<Regex> = OnceLock::new();
    let dotted_quad =
        DOTTED_QUAD.get_or_init(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").unwrap());

    dotted_quad
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|candidate| candidate.parse::<Ipv4Addr>().is_ok())
        .map(str::to_string)
}
