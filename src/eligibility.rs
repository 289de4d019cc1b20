//! Response eligibility checks
//!
//! A response is only considered for conversion when every rule below
//! passes. Rules run in a fixed order so the reported reason is always the
//! first one that failed:
//!
//! 1. Filter enabled
//! 2. Method is GET or HEAD
//! 3. Status is exactly 200 (this also excludes 206)
//! 4. No `Range` request header
//! 5. Not an unbounded stream (`text/event-stream` or a configured prefix)
//! 6. Content-Type is `text/html`
//! 7. Content-Length, when declared, is within `max_size`
//!
//! Two configuration-driven rules follow: `buffer_chunked off` rejects
//! bodies without a Content-Length, and `auth_policy deny` rejects
//! authenticated requests.

use std::fmt;

use http::{Method, StatusCode};

use crate::auth;
use crate::config::{AuthPolicy, FilterConfig};
use crate::request::{RequestMeta, ResponseHead};

/// Reason a response is passed through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ineligible {
    Disabled,
    WrongMethod,
    WrongStatus,
    RangeRequest,
    Streaming,
    WrongContentType,
    TooLarge,
    /// No Content-Length and chunked buffering is switched off
    Unbounded,
    AuthDenied,
}

impl Ineligible {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ineligible::Disabled => "disabled by config",
            Ineligible::WrongMethod => "method not GET/HEAD",
            Ineligible::WrongStatus => "status not 200",
            Ineligible::RangeRequest => "range request",
            Ineligible::Streaming => "unbounded streaming",
            Ineligible::WrongContentType => "content-type not text/html",
            Ineligible::TooLarge => "size exceeds limit",
            Ineligible::Unbounded => "no content-length and chunked buffering off",
            Ineligible::AuthDenied => "auth policy denies",
        }
    }
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(Ineligible),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// `media_type` exactly, or followed by `;` or a space (case-insensitive)
fn has_media_type(content_type: &[u8], media_type: &str) -> bool {
    let len = media_type.len();
    content_type.len() >= len
        && content_type[..len].eq_ignore_ascii_case(media_type.as_bytes())
        && matches!(content_type.get(len), None | Some(b';' | b' '))
}

/// Whether a Content-Type names HTML
pub fn is_html(content_type: &[u8]) -> bool {
    has_media_type(content_type, "text/html")
}

/// Whether a Content-Type denotes an unbounded stream
///
/// `text/event-stream` always does; each configured type is a
/// case-insensitive prefix.
pub fn is_streaming(content_type: &[u8], stream_types: &[String]) -> bool {
    if has_media_type(content_type, "text/event-stream") {
        return true;
    }
    stream_types.iter().any(|prefix| {
        let prefix = prefix.as_bytes();
        !prefix.is_empty()
            && content_type.len() >= prefix.len()
            && content_type[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

/// Run all eligibility rules in order
pub fn check(config: &FilterConfig, request: &RequestMeta, response: &ResponseHead) -> Eligibility {
    use Eligibility::Ineligible as No;

    if !config.enabled {
        return No(Ineligible::Disabled);
    }
    if request.method != Method::GET && request.method != Method::HEAD {
        return No(Ineligible::WrongMethod);
    }
    if response.status != StatusCode::OK {
        return No(Ineligible::WrongStatus);
    }
    if request.has_range() {
        return No(Ineligible::RangeRequest);
    }

    let content_type = response.content_type().unwrap_or_default();
    if is_streaming(content_type, &config.stream_types) {
        return No(Ineligible::Streaming);
    }
    if !is_html(content_type) {
        return No(Ineligible::WrongContentType);
    }

    match response.content_length() {
        Some(len) if len > config.max_size as u64 => return No(Ineligible::TooLarge),
        None if !config.buffer_chunked => return No(Ineligible::Unbounded),
        _ => {}
    }

    if config.auth_policy == AuthPolicy::Deny
        && auth::is_authenticated(&request.headers, &config.auth_cookies)
    {
        return No(Ineligible::AuthDenied);
    }

    Eligibility::Eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;
    use http::header::{self, HeaderValue};

    fn request(method: Method) -> RequestMeta {
        RequestMeta::new(method, Uri::from_static("/page"))
    }

    fn response(content_type: &'static str) -> ResponseHead {
        let value = HeaderValue::from_static(content_type);
        ResponseHead::new(StatusCode::OK).with_header(header::CONTENT_TYPE, value)
    }

    fn html_response() -> ResponseHead {
        response("text/html; charset=utf-8")
    }

    fn sized(len: &'static str) -> ResponseHead {
        let value = HeaderValue::from_static(len);
        html_response().with_header(header::CONTENT_LENGTH, value)
    }

    fn reason(config: &FilterConfig, req: &RequestMeta, resp: &ResponseHead) -> Option<Ineligible> {
        match check(config, req, resp) {
            Eligibility::Eligible => None,
            Eligibility::Ineligible(r) => Some(r),
        }
    }

    fn get_reason(config: &FilterConfig, resp: &ResponseHead) -> Option<Ineligible> {
        reason(config, &request(Method::GET), resp)
    }

    #[test]
    fn test_eligible_html_get() {
        let conf = FilterConfig::enabled();
        for method in [Method::GET, Method::HEAD] {
            let verdict = check(&conf, &request(method), &html_response());
            assert!(verdict.is_eligible());
        }
    }

    #[test]
    fn test_disabled_first() {
        let conf = FilterConfig::default();
        let why = reason(&conf, &request(Method::POST), &html_response());
        assert_eq!(why, Some(Ineligible::Disabled));
    }

    #[test]
    fn test_method() {
        let conf = FilterConfig::enabled();
        for method in [Method::POST, Method::PUT, Method::OPTIONS] {
            let why = reason(&conf, &request(method), &html_response());
            assert_eq!(why, Some(Ineligible::WrongMethod));
        }
    }

    #[test]
    fn test_status() {
        let conf = FilterConfig::enabled();
        for status in [
            StatusCode::PARTIAL_CONTENT,
            StatusCode::NOT_FOUND,
            StatusCode::NOT_MODIFIED,
        ] {
            let mut resp = html_response();
            resp.status = status;
            assert_eq!(get_reason(&conf, &resp), Some(Ineligible::WrongStatus));
        }
    }

    #[test]
    fn test_range_request_with_200() {
        let conf = FilterConfig::enabled();
        let range = HeaderValue::from_static("bytes=0-99");
        let req = request(Method::GET).with_header(header::RANGE, range);
        let why = reason(&conf, &req, &html_response());
        assert_eq!(why, Some(Ineligible::RangeRequest));
    }

    #[test]
    fn test_streaming_before_content_type() {
        let conf = FilterConfig {
            stream_types: vec!["text/html-stream".to_string()],
            ..FilterConfig::enabled()
        };
        let resp = response("text/event-stream");
        assert_eq!(get_reason(&conf, &resp), Some(Ineligible::Streaming));

        let resp = response("TEXT/HTML-STREAM; x=1");
        assert_eq!(get_reason(&conf, &resp), Some(Ineligible::Streaming));
    }

    #[test]
    fn test_configured_stream_prefix_beats_html() {
        let conf = FilterConfig {
            stream_types: vec!["text/html".to_string()],
            ..FilterConfig::enabled()
        };
        let resp = html_response();
        assert_eq!(get_reason(&conf, &resp), Some(Ineligible::Streaming));
    }

    #[test]
    fn test_content_type_matching() {
        assert!(is_html(b"text/html"));
        assert!(is_html(b"TEXT/HTML;charset=utf-8"));
        assert!(is_html(b"text/html charset"));
        assert!(!is_html(b"text/htmlx"));
        assert!(!is_html(b"application/xhtml+xml"));
        assert!(!is_html(b""));
        assert!(is_streaming(b"text/event-stream;charset=utf-8", &[]));
        assert!(!is_streaming(b"text/event-streams", &[]));
    }

    #[test]
    fn test_wrong_content_type() {
        let conf = FilterConfig::enabled();
        let untyped = ResponseHead::new(StatusCode::OK);
        for resp in [response("application/json"), untyped] {
            let why = get_reason(&conf, &resp);
            assert_eq!(why, Some(Ineligible::WrongContentType));
        }
    }

    #[test]
    fn test_content_length_limit() {
        let conf = FilterConfig {
            max_size: 1000,
            ..FilterConfig::enabled()
        };
        let resp = sized("1001");
        assert_eq!(get_reason(&conf, &resp), Some(Ineligible::TooLarge));
        assert_eq!(get_reason(&conf, &sized("1000")), None);
    }

    #[test]
    fn test_missing_content_length() {
        let conf = FilterConfig::enabled();
        assert_eq!(get_reason(&conf, &html_response()), None);

        let conf = FilterConfig {
            buffer_chunked: false,
            ..FilterConfig::enabled()
        };
        let resp = html_response();
        assert_eq!(get_reason(&conf, &resp), Some(Ineligible::Unbounded));
    }

    #[test]
    fn test_auth_policy() {
        let credentials = HeaderValue::from_static("Basic Zm9vOmJhcg==");
        let req = request(Method::GET).with_header(header::AUTHORIZATION, credentials);
        let conf = FilterConfig {
            auth_policy: AuthPolicy::Deny,
            ..FilterConfig::enabled()
        };
        let resp = html_response();
        assert_eq!(reason(&conf, &req, &resp), Some(Ineligible::AuthDenied));
        assert_eq!(reason(&FilterConfig::enabled(), &req, &resp), None);
    }
}
