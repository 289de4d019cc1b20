//! Response header rewriting for the Markdown variant
//!
//! On a successful conversion the upstream headers are adjusted so that the
//! response describes the Markdown body:
//!
//! - `Content-Type: text/markdown; charset=utf-8`
//! - `Vary` gains `Accept`
//! - `Content-Length` is the Markdown byte length
//! - upstream `ETag`s are dropped; the Markdown ETag replaces them when
//!   generation is on
//! - `X-Markdown-Tokens` when estimation is on and the count is nonzero
//! - `Content-Encoding`, `Transfer-Encoding` and `Accept-Ranges` are removed
//! - `Cache-Control` is hardened for authenticated requests
//!
//! A 304 for the Markdown variant carries the ETag and `Vary: Accept` and no
//! body or Content-Length.

use http::StatusCode;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::auth;
use crate::config::FilterConfig;
use crate::converter::ConversionResult;
use crate::request::ResponseHead;

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

pub const X_MARKDOWN_TOKENS: HeaderName = HeaderName::from_static("x-markdown-tokens");

/// Headers a 304 keeps from the upstream response
const NOT_MODIFIED_KEEP: [HeaderName; 5] = [
    header::CACHE_CONTROL,
    header::CONTENT_LOCATION,
    header::DATE,
    header::EXPIRES,
    header::VARY,
];

/// Whether a Vary value already lists `Accept` (or `*`)
///
/// `Accept` must be a whole element, delimited by the value boundaries,
/// spaces or commas. `Accept-Encoding` does not count.
pub fn vary_has_accept(value: &[u8]) -> bool {
    value
        .split(|&c| c == b',' || c == b' ' || c == b'\t')
        .any(|e| e.eq_ignore_ascii_case(b"accept") || e == b"*")
}

/// Make sure `Vary` covers `Accept`
///
/// Without a Vary header, `Vary: Accept` is added. Otherwise `, Accept` is
/// appended to the first Vary value unless some value already covers it.
pub fn ensure_vary_accept(headers: &mut HeaderMap) {
    let covered = headers
        .get_all(header::VARY)
        .iter()
        .any(|v| vary_has_accept(v.as_bytes()));
    if covered {
        return;
    }

    let merged = match headers.get(header::VARY) {
        None => None,
        Some(first) if first.is_empty() => None,
        Some(first) => {
            let mut value = first.as_bytes().to_vec();
            value.extend_from_slice(b", Accept");
            HeaderValue::from_bytes(&value).ok()
        }
    };

    match merged {
        Some(value) => {
            let rest: Vec<HeaderValue> = headers
                .get_all(header::VARY)
                .iter()
                .skip(1)
                .cloned()
                .collect();
            headers.insert(header::VARY, value);
            for v in rest {
                headers.append(header::VARY, v);
            }
        }
        None => {
            headers.insert(header::VARY, HeaderValue::from_static("Accept"));
        }
    }
}

/// Rewrite Cache-Control for a response to an authenticated request
///
/// Multiple Cache-Control fields are treated as one comma-joined list.
pub fn harden_cache_control(headers: &mut HeaderMap) {
    let joined = {
        let values: Vec<_> = headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    };

    let rewritten = auth::rewrite_cache_control(joined.as_deref());
    if joined.as_deref() == Some(&*rewritten) {
        tracing::debug!("Cache-Control already non-public");
        return;
    }

    match HeaderValue::from_str(&rewritten) {
        Ok(value) => {
            tracing::debug!(
                cache_control = %rewritten,
                "hardened Cache-Control for authenticated request"
            );
            headers.insert(header::CACHE_CONTROL, value);
        }
        Err(_) => {
            tracing::warn!("Cache-Control not rewritten: value is not a valid header");
        }
    }
}

fn etag_value(result: &ConversionResult) -> Option<HeaderValue> {
    let etag = result.etag.as_ref().filter(|e| !e.is_empty())?;
    match HeaderValue::from_maybe_shared(etag.clone()) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("converter ETag is not a valid header value, omitting it");
            None
        }
    }
}

/// Turn upstream headers into Markdown response headers
pub fn apply_markdown_headers(
    head: &mut ResponseHead,
    result: &ConversionResult,
    config: &FilterConfig,
    authenticated: bool,
) {
    let headers = &mut head.headers;

    let content_type = HeaderValue::from_static(MARKDOWN_CONTENT_TYPE);
    headers.insert(header::CONTENT_TYPE, content_type);
    ensure_vary_accept(headers);
    headers.remove(header::TRANSFER_ENCODING);
    let length = HeaderValue::from(result.markdown.len());
    headers.insert(header::CONTENT_LENGTH, length);

    headers.remove(header::ETAG);
    if config.generate_etag
        && let Some(etag) = etag_value(result)
    {
        headers.insert(header::ETAG, etag);
    }

    headers.remove(X_MARKDOWN_TOKENS);
    if config.token_estimate && result.token_estimate > 0 {
        headers.insert(X_MARKDOWN_TOKENS, HeaderValue::from(result.token_estimate));
    }

    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::ACCEPT_RANGES);

    if authenticated {
        harden_cache_control(headers);
    }
}

/// Build the 304 response for a matched conditional request
pub fn not_modified(
    upstream: &ResponseHead,
    result: &ConversionResult,
    authenticated: bool,
) -> ResponseHead {
    let mut head = ResponseHead::new(StatusCode::NOT_MODIFIED);
    for name in NOT_MODIFIED_KEEP {
        for value in upstream.headers.get_all(&name) {
            head.headers.append(name.clone(), value.clone());
        }
    }

    if let Some(etag) = etag_value(result) {
        head.headers.insert(header::ETAG, etag);
    }
    ensure_vary_accept(&mut head.headers);
    if authenticated {
        harden_cache_control(&mut head.headers);
    }
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConversionOptions;
    use bytes::Bytes;

    fn result(md: &'static str, etag: Option<&'static str>, tokens: u32) -> ConversionResult {
        ConversionResult {
            markdown: Bytes::from_static(md.as_bytes()),
            etag: etag.map(|e| Bytes::from_static(e.as_bytes())),
            token_estimate: tokens,
        }
    }

    fn upstream() -> ResponseHead {
        ResponseHead::new(StatusCode::OK)
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=iso-8859-1"),
            )
            .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("5000"))
            .with_header(header::ETAG, HeaderValue::from_static("\"upstream\""))
            .with_header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"))
            .with_header(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"))
            .with_header(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=60"),
            )
    }

    #[test]
    fn test_vary_has_accept() {
        assert!(vary_has_accept(b"Accept"));
        assert!(vary_has_accept(b"accept-encoding, ACCEPT"));
        assert!(vary_has_accept(b"Cookie,Accept"));
        assert!(vary_has_accept(b"*"));
        assert!(!vary_has_accept(b"Accept-Encoding"));
        assert!(!vary_has_accept(b"X-Accept"));
        assert!(!vary_has_accept(b""));
    }

    #[test]
    fn test_vary_added_or_merged() {
        let mut headers = HeaderMap::new();
        ensure_vary_accept(&mut headers);
        assert_eq!(headers[header::VARY], "Accept");

        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        ensure_vary_accept(&mut headers);
        assert_eq!(headers[header::VARY], "Accept-Encoding, Accept");

        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("Cookie, accept"));
        ensure_vary_accept(&mut headers);
        assert_eq!(headers[header::VARY], "Cookie, accept");
    }

    #[test]
    fn test_vary_star_left_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("*"));
        ensure_vary_accept(&mut headers);
        assert_eq!(headers[header::VARY], "*");
    }

    #[test]
    fn test_vary_multiple_fields() {
        let mut headers = HeaderMap::new();
        headers.append(header::VARY, HeaderValue::from_static("Cookie"));
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        ensure_vary_accept(&mut headers);
        let values: Vec<_> = headers.get_all(header::VARY).iter().collect();
        assert_eq!(values, ["Cookie, Accept", "Origin"]);
    }

    #[test]
    fn test_apply_markdown_headers() {
        let mut head = upstream();
        let conf = FilterConfig {
            token_estimate: true,
            ..FilterConfig::enabled()
        };
        let converted = result("# Hello\n", Some("\"md\""), 2);
        apply_markdown_headers(&mut head, &converted, &conf, false);

        let h = &head.headers;
        assert_eq!(h[header::CONTENT_TYPE], MARKDOWN_CONTENT_TYPE);
        assert_eq!(h[header::CONTENT_LENGTH], "8");
        assert_eq!(h.get_all(header::ETAG).iter().count(), 1);
        assert_eq!(h[header::ETAG], "\"md\"");
        assert_eq!(h[X_MARKDOWN_TOKENS], "2");
        assert_eq!(h[header::VARY], "Accept");
        assert!(h.get(header::CONTENT_ENCODING).is_none());
        assert!(h.get(header::ACCEPT_RANGES).is_none());
        assert_eq!(h[header::CACHE_CONTROL], "public, max-age=60");
    }

    #[test]
    fn test_etag_generation_off_removes_upstream_etag() {
        let mut head = upstream();
        let conf = FilterConfig {
            generate_etag: false,
            ..FilterConfig::enabled()
        };
        let converted = result("x", Some("\"md\""), 0);
        apply_markdown_headers(&mut head, &converted, &conf, false);
        assert!(head.headers.get(header::ETAG).is_none());
    }

    #[test]
    fn test_token_header_only_when_enabled_and_nonzero() {
        let mut head = upstream();
        let conf = FilterConfig::enabled();
        apply_markdown_headers(&mut head, &result("x", None, 9), &conf, false);
        assert!(head.headers.get(X_MARKDOWN_TOKENS).is_none());

        let conf = FilterConfig {
            token_estimate: true,
            ..FilterConfig::enabled()
        };
        let mut head = upstream();
        apply_markdown_headers(&mut head, &result("", None, 0), &conf, false);
        assert!(head.headers.get(X_MARKDOWN_TOKENS).is_none());
        assert_eq!(head.headers[header::CONTENT_LENGTH], "0");
    }

    #[test]
    fn test_authenticated_hardens_cache_control() {
        let conf = FilterConfig::enabled();
        let mut head = upstream();
        apply_markdown_headers(&mut head, &result("x", None, 0), &conf, true);
        assert_eq!(head.headers[header::CACHE_CONTROL], "max-age=60, private");

        let mut head = ResponseHead::new(StatusCode::OK);
        apply_markdown_headers(&mut head, &result("x", None, 0), &conf, true);
        assert_eq!(head.headers[header::CACHE_CONTROL], "private");
    }

    #[test]
    fn test_harden_joins_multiple_fields() {
        let cache_control = |values: &[&'static str]| {
            let mut headers = HeaderMap::new();
            for &v in values {
                headers.append(header::CACHE_CONTROL, HeaderValue::from_static(v));
            }
            headers
        };

        let mut headers = cache_control(&["max-age=60", "no-store"]);
        harden_cache_control(&mut headers);
        assert_eq!(headers.get_all(header::CACHE_CONTROL).iter().count(), 2);

        let mut headers = cache_control(&["public", "max-age=5"]);
        harden_cache_control(&mut headers);
        let values: Vec<_> = headers.get_all(header::CACHE_CONTROL).iter().collect();
        assert_eq!(values, ["max-age=5, private"]);
    }

    #[test]
    fn test_not_modified() {
        let opts = ConversionOptions::from_config(&FilterConfig::enabled());
        let converted = ConversionResult::from_markdown("# Same\n", &opts);
        let head = not_modified(&upstream(), &converted, false);

        assert_eq!(head.status, StatusCode::NOT_MODIFIED);
        assert!(head.headers.get(header::CONTENT_LENGTH).is_none());
        assert!(head.headers.get(header::CONTENT_TYPE).is_none());
        let etag = head.headers[header::ETAG].as_bytes();
        assert_eq!(etag, converted.etag_bytes());
        assert_eq!(head.headers[header::VARY], "Accept");
        assert_eq!(head.headers[header::CACHE_CONTROL], "public, max-age=60");
    }
}
