//! Parsers for wrapped-tool text output
//!
//! The only command output this crate inspects is the interface listing from
//! `ip -o link show` and the attribute listing from `lsattr`. Each format
//! gets its own [`TextOutputParser`] implementation so the scraping stays in
//! one place, away from the orchestration logic.

/// One parser per external tool output format
pub trait TextOutputParser {
    type Output;

    fn parse(&self, raw: &str) -> Self::Output;
}

/// A single row of `ip -o link show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub name: String,
    /// Link-layer type is ethernet (`link/ether`)
    pub is_ether: bool,
    /// Operational state is UP
    pub is_up: bool,
}

/// Parses the one-line-per-interface output of `ip -o link show`
pub struct LinkTableParser;

impl TextOutputParser for LinkTableParser {
    type Output = Vec<LinkEntry>;

    fn parse(&self, raw: &str) -> Vec<LinkEntry> {
        raw.lines().filter_map(parse_link_line).collect()
    }
}

fn parse_link_line(line: &str) -> Option<LinkEntry> {
    // "2: enp3s0: <BROADCAST,...> mtu 1500 ... state UP ... link/ether aa:bb:..."
    let mut fields = line.splitn(3, ": ");
    let index = fields.next()?.trim();
    if index.parse::<u32>().is_err() {
        return None;
    }

    let name_field = fields.next()?;
    let rest = fields.next().unwrap_or("");

    // Names like "veth1a2b@if7" carry the peer after '@'
    let name = name_field
        .split_whitespace()
        .next()?
        .split('@')
        .next()?
        .to_string();
    if name.is_empty() {
        return None;
    }

    Some(LinkEntry {
        name,
        is_ether: line.contains("link/ether"),
        is_up: rest.contains("state UP"),
    })
}

/// Attribute flags reported by `lsattr` for a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrFlags {
    pub immutable: bool,
}

/// Parses the flags column of `lsattr <path>` output
///
/// Returns `None` when the output carries no flags line (for example an
/// error message from the tool itself).
pub struct AttrListingParser;

impl TextOutputParser for AttrListingParser {
    type Output = Option<AttrFlags>;

    fn parse(&self, raw: &str) -> Option<AttrFlags> {
        let line = raw.lines().find(|l| !l.trim().is_empty())?;
        let flags = line.split_whitespace().next()?;
        if flags.contains(':') {
            // "lsattr: Operation not supported ..."
            return None;
        }
        Some(AttrFlags {
            immutable: flags.contains('i'),
        })
    }
}
