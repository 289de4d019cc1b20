//! If-None-Match evaluation for the Markdown variant
//!
//! The validator of a converted response is the hash of the Markdown it
//! produced, so answering a conditional request needs the conversion to
//! have run. Comparison is weak (RFC 9110 §13.1.2): `W/"x"`, `"x"` and `x`
//! are all the same validator.
//!
//! # Modes
//!
//! - `full_support`: parse If-None-Match and compare against the generated
//!   ETag
//! - `if_modified_since_only`: never evaluated here
//! - `disabled`: never evaluated here
//!
//! A header with an unterminated quoted string is malformed and the request
//! is treated as unconditional.

use thiserror::Error;

use crate::config::ConditionalMode;

/// Outcome of an If-None-Match evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalMatch {
    /// A client validator matches: answer 304
    Match,
    NoMatch,
    /// The request is treated as unconditional
    NotApplicable,
}

/// One entity-tag in an If-None-Match list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTag<'a> {
    /// `*`
    Any,
    /// Raw token as it appeared, weak prefix and quotes included
    Tag(&'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unterminated quoted entity-tag at offset {offset}")]
pub struct MalformedHeader {
    pub offset: usize,
}

fn is_separator(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b',')
}

/// Split an If-None-Match value into entity-tags
pub fn parse_if_none_match(value: &[u8]) -> Result<Vec<EntityTag<'_>>, MalformedHeader> {
    let mut tags = Vec::new();
    let mut pos = 0;

    while pos < value.len() {
        while pos < value.len() && is_separator(value[pos]) {
            pos += 1;
        }
        if pos >= value.len() {
            break;
        }

        let start = pos;
        if value[pos] == b'*' && value.get(pos + 1).is_none_or(|&c| is_separator(c)) {
            tags.push(EntityTag::Any);
            pos += 1;
            continue;
        }

        // Weak prefix belongs to the quoted string that follows it
        let quote_at = if value[pos..].starts_with(b"W/\"") || value[pos..].starts_with(b"w/\"") {
            Some(pos + 2)
        } else if value[pos] == b'"' {
            Some(pos)
        } else {
            None
        };

        match quote_at {
            Some(open) => {
                let close = value[open + 1..]
                    .iter()
                    .position(|&c| c == b'"')
                    .map(|i| open + 1 + i)
                    .ok_or(MalformedHeader { offset: start })?;
                pos = close + 1;
            }
            None => {
                while pos < value.len() && !is_separator(value[pos]) {
                    pos += 1;
                }
            }
        }
        tags.push(EntityTag::Tag(&value[start..pos]));
    }

    Ok(tags)
}

/// Strip one optional `W/` prefix, then one optional pair of quotes
pub fn normalize(tag: &[u8]) -> &[u8] {
    let tag = match tag {
        [b'W' | b'w', b'/', rest @ ..] => rest,
        _ => tag,
    };
    match tag {
        [b'"', inner @ .., b'"'] => inner,
        _ => tag,
    }
}

/// Decides conditional requests for one configuration
#[derive(Debug, Clone, Copy)]
pub struct ConditionalEvaluator {
    mode: ConditionalMode,
    generate_etag: bool,
}

impl ConditionalEvaluator {
    pub fn new(mode: ConditionalMode, generate_etag: bool) -> Self {
        Self { mode, generate_etag }
    }

    /// Whether a request with this If-None-Match value needs an ETag comparison
    ///
    /// Only true in full-support mode with ETag generation on and a
    /// non-empty header.
    pub fn applies(&self, if_none_match: Option<&[u8]>) -> bool {
        self.mode == ConditionalMode::FullSupport
            && self.generate_etag
            && if_none_match.is_some_and(|v| !v.is_empty())
    }

    /// Compare the client's validators against the generated ETag
    ///
    /// `*` matches any non-empty generated ETag.
    pub fn evaluate(
        &self,
        if_none_match: Option<&[u8]>,
        generated_etag: &[u8],
    ) -> ConditionalMatch {
        if !self.applies(if_none_match) {
            return ConditionalMatch::NotApplicable;
        }
        let Some(value) = if_none_match else {
            return ConditionalMatch::NotApplicable;
        };

        let tags = match parse_if_none_match(value) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring If-None-Match");
                return ConditionalMatch::NotApplicable;
            }
        };

        if generated_etag.is_empty() {
            return ConditionalMatch::NoMatch;
        }
        let generated = normalize(generated_etag);

        let matched = tags.iter().any(|tag| match tag {
            EntityTag::Any => true,
            EntityTag::Tag(raw) => normalize(raw) == generated,
        });

        if matched {
            tracing::debug!(tags = tags.len(), "If-None-Match matched");
            ConditionalMatch::Match
        } else {
            ConditionalMatch::NoMatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use ConditionalMatch::{Match, NoMatch, NotApplicable};

    fn full() -> ConditionalEvaluator {
        ConditionalEvaluator::new(ConditionalMode::FullSupport, true)
    }

    fn eval(if_none_match: &[u8], etag: &[u8]) -> ConditionalMatch {
        full().evaluate(Some(if_none_match), etag)
    }

    #[test]
    fn test_parse_tokens() {
        let tags = parse_if_none_match(br#""a", W/"b" ,c,*"#).unwrap();
        assert_eq!(
            tags,
            vec![
                EntityTag::Tag(br#""a""#),
                EntityTag::Tag(br#"W/"b""#),
                EntityTag::Tag(b"c"),
                EntityTag::Any,
            ]
        );
    }

    #[test]
    fn test_parse_quoted_with_space_and_comma() {
        let tags = parse_if_none_match(br#"W/"a, b""#).unwrap();
        assert_eq!(tags, vec![EntityTag::Tag(br#"W/"a, b""#)]);
    }

    #[test]
    fn test_parse_unterminated_quote() {
        assert!(parse_if_none_match(br#""abc"#).is_err());
        assert!(parse_if_none_match(br#""ok", W/"broken"#).is_err());
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_if_none_match(b" , ,").unwrap().is_empty());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(br#"W/"x""#), b"x");
        assert_eq!(normalize(br#"w/"x""#), b"x");
        assert_eq!(normalize(br#""x""#), b"x");
        assert_eq!(normalize(b"x"), b"x");
        assert_eq!(normalize(b"\""), b"\"");
        assert_eq!(normalize(b"\"\""), b"");
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(eval(br#""abc""#, br#""abc""#), Match);
    }

    #[test]
    fn test_weak_comparison() {
        assert_eq!(eval(br#"W/"abc""#, br#""abc""#), Match);
        assert_eq!(eval(b"abc", br#""abc""#), Match);
        assert_eq!(eval(br#""abc""#, br#"W/"abc""#), Match);
    }

    #[test]
    fn test_no_match() {
        assert_eq!(eval(br#""xyz", "abd""#, br#""abc""#), NoMatch);
        assert_eq!(eval(br#""ABC""#, br#""abc""#), NoMatch);
    }

    #[test]
    fn test_match_in_list() {
        assert_eq!(eval(br#""x", "y", "abc""#, br#""abc""#), Match);
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(eval(b"*", br#""abc""#), Match);
        assert_eq!(eval(b"*", b""), NoMatch);
    }

    #[test]
    fn test_malformed_is_not_applicable() {
        assert_eq!(eval(br#""abc"#, br#""abc""#), NotApplicable);
    }

    #[test]
    fn test_modes_skip_evaluation() {
        for mode in [
            ConditionalMode::Disabled,
            ConditionalMode::IfModifiedSinceOnly,
        ] {
            let evaluator = ConditionalEvaluator::new(mode, true);
            assert!(!evaluator.applies(Some(b"*")));
            assert_eq!(evaluator.evaluate(Some(b"*"), br#""abc""#), NotApplicable);
        }
    }

    #[test]
    fn test_etag_generation_off() {
        let evaluator = ConditionalEvaluator::new(ConditionalMode::FullSupport, false);
        assert_eq!(evaluator.evaluate(Some(b"*"), br#""abc""#), NotApplicable);
    }

    #[test]
    fn test_absent_header() {
        assert!(!full().applies(None));
        assert!(!full().applies(Some(b"")));
        assert_eq!(full().evaluate(None, br#""abc""#), NotApplicable);
    }

    proptest! {
        /// W/"x", "x" and x normalize to the same validator.
        #[test]
        fn prop_normalization_round_trip(x in "[a-zA-Z0-9]{1,40}") {
            let weak = format!("W/\"{}\"", x);
            let strong = format!("\"{}\"", x);
            prop_assert_eq!(normalize(weak.as_bytes()), x.as_bytes());
            prop_assert_eq!(normalize(strong.as_bytes()), x.as_bytes());
            prop_assert_eq!(normalize(x.as_bytes()), x.as_bytes());
        }

        /// `*` matches every non-empty generated ETag.
        #[test]
        fn prop_wildcard_matches_any_etag(etag in prop::collection::vec(any::<u8>(), 1..64)) {
            prop_assert_eq!(eval(b"*", &etag), Match);
        }

        /// Any byte sequence parses or fails cleanly.
        #[test]
        fn prop_parse_never_panics(value in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse_if_none_match(&value);
        }
    }
}
