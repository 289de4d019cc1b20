//! Accept header negotiation for the Markdown variant
//!
//! Decides whether the highest-precedence media range in a client's Accept
//! header selects `text/markdown`, following the RFC 9110 precedence rules:
//!
//! 1. Higher quality value wins
//! 2. On equal quality, the more specific range wins
//!    (`text/markdown` > `text/*` > `*/*`)
//! 3. On equal specificity, the range listed first wins
//!
//! An explicit `text/markdown;q=0` anywhere in the header always disables
//! conversion, even if a wildcard elsewhere would otherwise match.
//!
//! Parsing is lenient: a malformed segment is skipped and the remaining
//! segments are still considered.
//!
//! # Example
//!
//! ```
//! use nginx_markdown_filter::accept::resolve;
//!
//! assert!(resolve("text/markdown;q=0.9, text/html;q=0.9", false));
//! assert!(!resolve("text/html;q=0.9, text/markdown;q=0.9", false));
//! assert!(!resolve("*/*", false));
//! assert!(resolve("*/*", true));
//! ```

use std::cmp::Ordering;

/// Quality values are kept as thousandths so comparisons stay exact
const Q_SCALE: u16 = 1000;

/// How precisely a media range names a type
///
/// Variants are ordered so that a greater value is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// `*/*`
    All = 1,
    /// `type/*`
    Subtype = 2,
    /// `type/subtype`, and anything not recognizably a wildcard
    Exact = 3,
}

impl Specificity {
    fn of(media_type: &str, subtype: &str) -> Self {
        match (media_type, subtype) {
            ("*", "*") => Specificity::All,
            (_, "*") => Specificity::Subtype,
            _ => Specificity::Exact,
        }
    }
}

/// One parsed media range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptEntry {
    pub media_type: String,
    pub subtype: String,
    /// Quality in thousandths, `0..=1000`
    pub q_millis: u16,
    pub specificity: Specificity,
    /// Position among the successfully parsed entries
    pub order: usize,
}

impl AcceptEntry {
    /// Quality value as a float in `[0, 1]`
    pub fn q(&self) -> f32 {
        f32::from(self.q_millis) / f32::from(Q_SCALE)
    }

    /// Whether this range names `text/markdown` exactly
    pub fn is_markdown(&self) -> bool {
        self.media_type.eq_ignore_ascii_case("text")
            && self.subtype.eq_ignore_ascii_case("markdown")
    }

    /// Whether this range selects the Markdown variant
    pub fn matches_markdown(&self, allow_wildcards: bool) -> bool {
        if self.is_markdown() {
            return true;
        }
        if !allow_wildcards {
            return false;
        }
        let text_wildcard = self.media_type.eq_ignore_ascii_case("text") && self.subtype == "*";
        let all_wildcard = self.media_type == "*" && self.subtype == "*";
        text_wildcard || all_wildcard
    }

    /// Precedence ordering: q descending, specificity descending, order ascending
    fn precedence(&self, other: &Self) -> Ordering {
        other
            .q_millis
            .cmp(&self.q_millis)
            .then_with(|| other.specificity.cmp(&self.specificity))
            .then_with(|| self.order.cmp(&other.order))
    }
}

fn trim_ows(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '\t')
}

/// Parse a fixed-point decimal with at most three fractional digits
///
/// Returns the value in thousandths, or `None` when the text is not a plain
/// decimal number.
fn parse_fixed_point(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    let mut value: u32 = 0;
    let mut seen_dot = false;
    let mut fraction_digits = 0u32;

    for c in text.bytes() {
        match c {
            b'.' if !seen_dot => seen_dot = true,
            b'0'..=b'9' => {
                if seen_dot {
                    if fraction_digits == 3 {
                        return None;
                    }
                    fraction_digits += 1;
                }
                value = value.checked_mul(10)?.checked_add(u32::from(c - b'0'))?;
            }
            _ => return None,
        }
    }

    for _ in fraction_digits..3 {
        value = value.checked_mul(10)?;
    }
    Some(value)
}

/// Extract the quality value from a parameter string (the text after `;`)
///
/// Missing or unparseable values mean full quality. Values above one are
/// clamped.
fn parse_q(params: &str) -> u16 {
    for param in params.split(';') {
        let param = trim_ows(param);
        let Some(raw) = param.strip_prefix("q=") else {
            continue;
        };
        return match parse_fixed_point(trim_ows(raw)) {
            Some(v) => v.min(u32::from(Q_SCALE)) as u16,
            None => Q_SCALE,
        };
    }
    Q_SCALE
}

fn parse_entry(segment: &str, order: usize) -> Option<AcceptEntry> {
    let slash = segment.find('/')?;
    let (range, params) = match segment.find(';') {
        Some(semi) if semi < slash => return None,
        Some(semi) => (&segment[..semi], Some(&segment[semi + 1..])),
        None => (segment, None),
    };

    let media_type = trim_ows(&range[..slash]);
    let subtype = trim_ows(&range[slash + 1..]);
    if media_type.is_empty() || subtype.is_empty() {
        return None;
    }

    Some(AcceptEntry {
        media_type: media_type.to_string(),
        subtype: subtype.to_string(),
        q_millis: params.map_or(Q_SCALE, parse_q),
        specificity: Specificity::of(media_type, subtype),
        order,
    })
}

/// Parse an Accept header into entries in header order
///
/// Segments without a `/` or with an empty type or subtype are skipped.
pub fn parse_accept(header: &str) -> Vec<AcceptEntry> {
    let mut entries = Vec::new();
    for segment in header.split(',') {
        let segment = trim_ows(segment);
        if segment.is_empty() {
            continue;
        }
        if let Some(entry) = parse_entry(segment, entries.len()) {
            entries.push(entry);
        }
    }
    entries
}

/// Stable-sort entries into precedence order
pub fn sort_by_precedence(entries: &mut [AcceptEntry]) {
    entries.sort_by(AcceptEntry::precedence);
}

/// Decide whether the client asked for the Markdown variant
///
/// Returns false for an empty header or one in which no segment parses.
pub fn resolve(header: &str, allow_wildcards: bool) -> bool {
    let mut entries = parse_accept(header);
    if entries.is_empty() {
        return false;
    }

    if entries.iter().any(|e| e.q_millis == 0 && e.is_markdown()) {
        return false;
    }

    sort_by_precedence(&mut entries);
    let top = &entries[0];
    top.q_millis > 0 && top.matches_markdown(allow_wildcards)
}
