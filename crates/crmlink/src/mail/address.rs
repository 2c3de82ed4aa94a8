//! Participant address extraction from raw From/To/Cc/Bcc header text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use log::debug;
use mail_parser::{Address, MessageParser};
use regex::Regex;

static RE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

static RE_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).unwrap());

/// Extracts the normalized, deduplicated set of addresses found in `fields`.
///
/// Each field is parsed on its own so one malformed header cannot hide
/// addresses in the others. Never fails; unusable input contributes nothing.
pub fn extract<S: AsRef<str>>(fields: &[S]) -> BTreeSet<String> {
    let mut addresses = BTreeSet::new();
    for field in fields {
        addresses.extend(extract_field(field.as_ref()));
    }
    addresses
}

/// Extracts addresses from a single header field.
///
/// The union of two passes: the RFC 5322 address-list parser, and a
/// permissive pattern scan of the field with quoted display names removed.
/// The scan recovers addresses the parser loses in a partly malformed list.
pub fn extract_field(raw: &str) -> BTreeSet<String> {
    if raw.trim().is_empty() {
        return BTreeSet::new();
    }

    let mut addresses: BTreeSet<String> = parse_address_list(raw)
        .into_iter()
        .filter_map(|a| normalize(&a))
        .collect();

    let unquoted = RE_QUOTED.replace_all(raw, " ");
    let recovered: Vec<String> = RE_ADDRESS
        .find_iter(&unquoted)
        .filter_map(|m| normalize(m.as_str()))
        // A match inside a parsed address is a fragment of it.
        .filter(|candidate| !addresses.iter().any(|parsed| parsed.contains(candidate.as_str())))
        .collect();
    if !recovered.is_empty() {
        debug!("Recovered {} address(es) outside the parsed list", recovered.len());
    }
    addresses.extend(recovered);
    addresses
}

/// Lowercases and trims `candidate`, returning it only if it looks like a
/// deliverable address: one `@`, a non-empty local part and a dotted domain.
pub fn normalize(candidate: &str) -> Option<String> {
    let address = candidate
        .trim()
        .trim_matches(|c| matches!(c, '<' | '>' | '"' | '\'' | ',' | ';'))
        .trim()
        .to_lowercase();

    if address.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = address.split_once('@')?;
    if local.is_empty() || domain.contains('@') {
        return None;
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return None;
    }
    Some(address)
}

/// Runs the header through the MIME parser as a synthetic `To:` line.
fn parse_address_list(raw: &str) -> Vec<String> {
    // Line breaks would end the synthetic header early.
    let unfolded: String = raw
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    let synthetic = format!("To: {}\r\n\r\n", unfolded);

    let Some(message) = MessageParser::default().parse(synthetic.as_bytes()) else {
        return Vec::new();
    };

    match message.to() {
        Some(Address::List(list)) => list
            .iter()
            .filter_map(|addr| addr.address())
            .map(str::to_string)
            .collect(),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(|addr| addr.address())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}
