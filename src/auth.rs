//! Authenticated-request detection and Cache-Control hardening
//!
//! Markdown produced for a logged-in user is personalized output. When a
//! request carries credentials, the converted response is made non-public:
//!
//! | upstream Cache-Control      | result                        |
//! |-----------------------------|-------------------------------|
//! | absent                      | `private`                     |
//! | contains `no-store`         | unchanged                     |
//! | contains `private`          | unchanged                     |
//! | contains `public`           | `public` removed, `private` appended |
//! | anything else               | `, private` appended          |
//!
//! `no-store` is never weakened.

use std::borrow::Cow;

use http::HeaderMap;
use http::header;

/// Cookie name patterns used when none are configured
pub const DEFAULT_AUTH_COOKIES: [&str; 4] = [
    "session*",
    "auth*",
    "PHPSESSID",
    "wordpress_logged_in_*",
];

/// Match a cookie name against a pattern
///
/// A trailing `*` makes the pattern a prefix match and a leading `*` a
/// suffix match; otherwise the comparison is exact. Matching is
/// case-sensitive. Empty names and patterns never match.
pub fn cookie_matches_pattern(name: &str, pattern: &str) -> bool {
    if name.is_empty() || pattern.is_empty() {
        return false;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else {
        name == pattern
    }
}

/// Iterate cookie names in a `Cookie` header value
fn cookie_names(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').filter_map(|pair| {
        let pair = pair.trim_start_matches([' ', '\t']);
        let name = pair.split('=').next().unwrap_or(pair);
        (!name.is_empty()).then_some(name)
    })
}

/// Whether the request carries credentials
///
/// True when an `Authorization` header is present or any cookie name, across
/// all `Cookie` headers, matches one of `patterns`. An empty pattern list
/// means [`DEFAULT_AUTH_COOKIES`].
pub fn is_authenticated(headers: &HeaderMap, patterns: &[String]) -> bool {
    if headers.contains_key(header::AUTHORIZATION) {
        tracing::debug!("authorization header present");
        return true;
    }

    let configured: Vec<&str> = patterns.iter().map(String::as_str).collect();
    let patterns: &[&str] = if configured.is_empty() {
        &DEFAULT_AUTH_COOKIES
    } else {
        &configured
    };

    for value in headers.get_all(header::COOKIE) {
        let value = String::from_utf8_lossy(value.as_bytes());
        for name in cookie_names(&value) {
            if let Some(pattern) = patterns.iter().find(|p| cookie_matches_pattern(name, p)) {
                tracing::debug!(cookie = name, pattern, "auth cookie detected");
                return true;
            }
        }
    }
    false
}

/// Whether a Cache-Control value contains `directive` as a whole token
///
/// The directive must start a comma-separated element and be followed by
/// the end of the value, whitespace, a comma or `=`. Comparison is
/// case-insensitive.
pub fn has_directive(value: &str, directive: &str) -> bool {
    if directive.is_empty() {
        return false;
    }
    value.split(',').any(|element| {
        let element = element.trim_start_matches([' ', '\t']).as_bytes();
        let Some(head) = element.get(..directive.len()) else {
            return false;
        };
        let next = element.get(directive.len());
        head.eq_ignore_ascii_case(directive.as_bytes())
            && matches!(next, None | Some(b' ' | b'\t' | b'='))
    })
}

fn is_public(element: &str) -> bool {
    let name = element.split('=').next().unwrap_or(element);
    let name = name.trim_end_matches([' ', '\t']);
    name.eq_ignore_ascii_case("public")
}

/// Cache-Control value for a response to an authenticated request
///
/// Returns the input unchanged (borrowed) when it already prevents shared
/// caching.
pub fn rewrite_cache_control(current: Option<&str>) -> Cow<'_, str> {
    let Some(value) = current.filter(|v| !v.trim().is_empty()) else {
        return Cow::Borrowed("private");
    };

    if has_directive(value, "no-store") || has_directive(value, "private") {
        return Cow::Borrowed(value);
    }

    if has_directive(value, "public") {
        let kept: Vec<&str> = value
            .split(',')
            .map(|element| element.trim_matches([' ', '\t']))
            .filter(|element| !element.is_empty() && !is_public(element))
            .collect();
        let mut rewritten = kept.join(", ");
        if !rewritten.is_empty() {
            rewritten.push_str(", ");
        }
        rewritten.push_str("private");
        return Cow::Owned(rewritten);
    }

    Cow::Owned(format!("{}, private", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use proptest::prelude::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_cookie_patterns() {
        assert!(cookie_matches_pattern("session", "session*"));
        assert!(cookie_matches_pattern("session_id", "session*"));
        assert!(!cookie_matches_pattern("sess", "session*"));
        assert!(cookie_matches_pattern("wordpress_logged_in", "*_logged_in"));
        assert!(!cookie_matches_pattern("logged_in", "*_logged_in"));
        assert!(cookie_matches_pattern("PHPSESSID", "PHPSESSID"));
        assert!(!cookie_matches_pattern("phpsessid", "PHPSESSID"));
        assert!(!cookie_matches_pattern("PHPSESSID2", "PHPSESSID"));
        assert!(!cookie_matches_pattern("", "*"));
        assert!(!cookie_matches_pattern("x", ""));
        assert!(cookie_matches_pattern("anything", "*"));
    }

    #[test]
    fn test_authorization_header() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer abc")]);
        assert!(is_authenticated(&map, &[]));
    }

    #[test]
    fn test_default_cookie_patterns() {
        let map = headers(&[(header::COOKIE, "theme=dark; PHPSESSID=abc123")]);
        assert!(is_authenticated(&map, &[]));

        let map = headers(&[(header::COOKIE, "wordpress_logged_in_5f2=1")]);
        assert!(is_authenticated(&map, &[]));

        let map = headers(&[(header::COOKIE, "theme=dark; lang=en")]);
        assert!(!is_authenticated(&map, &[]));
    }

    #[test]
    fn test_multiple_cookie_headers() {
        let map = headers(&[
            (header::COOKIE, "a=1"),
            (header::COOKIE, "auth_token=xyz"),
        ]);
        assert!(is_authenticated(&map, &[]));
    }

    #[test]
    fn test_configured_patterns_replace_defaults() {
        let patterns = vec!["sid".to_string()];
        let map = headers(&[(header::COOKIE, "session=1")]);
        assert!(!is_authenticated(&map, &patterns));
        let map = headers(&[(header::COOKIE, "x=1;sid=2")]);
        assert!(is_authenticated(&map, &patterns));
    }

    #[test]
    fn test_cookie_value_is_not_a_name() {
        let map = headers(&[(header::COOKIE, "theme=session_dark")]);
        assert!(!is_authenticated(&map, &[]));
    }

    #[test]
    fn test_no_credentials() {
        assert!(!is_authenticated(&HeaderMap::new(), &[]));
    }

    #[test]
    fn test_has_directive() {
        assert!(has_directive("no-store", "no-store"));
        assert!(has_directive("max-age=0, NO-STORE", "no-store"));
        assert!(has_directive("private=\"x\"", "private"));
        assert!(has_directive("public ,max-age=60", "public"));
        assert!(!has_directive("public-key", "public"));
        assert!(!has_directive("x-no-store", "no-store"));
        assert!(!has_directive("", "public"));
    }

    #[test]
    fn test_rewrite_absent() {
        assert_eq!(rewrite_cache_control(None), "private");
        assert_eq!(rewrite_cache_control(Some("  ")), "private");
    }

    #[test]
    fn test_rewrite_preserves_no_store() {
        let value = "no-store, public, max-age=0";
        let out = rewrite_cache_control(Some(value));
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, value);
    }

    #[test]
    fn test_rewrite_preserves_private() {
        let value = "private, max-age=60";
        assert_eq!(rewrite_cache_control(Some(value)), value);
    }

    #[test]
    fn test_rewrite_replaces_public() {
        let out = rewrite_cache_control(Some("public, max-age=3600"));
        assert_eq!(out, "max-age=3600, private");
        assert_eq!(rewrite_cache_control(Some("public")), "private");
        assert_eq!(
            rewrite_cache_control(Some("max-age=60 ,  PUBLIC, must-revalidate")),
            "max-age=60, must-revalidate, private"
        );
    }

    #[test]
    fn test_rewrite_appends_private() {
        let out = rewrite_cache_control(Some("max-age=60"));
        assert_eq!(out, "max-age=60, private");
        let out = rewrite_cache_control(Some("public-key=1"));
        assert_eq!(out, "public-key=1, private");
    }

    fn directive() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("public".to_string()),
            Just("PUBLIC".to_string()),
            Just("private".to_string()),
            Just("no-store".to_string()),
            Just("no-cache".to_string()),
            Just("must-revalidate".to_string()),
            Just("public-key".to_string()),
            (0u32..100000).prop_map(|n| format!("max-age={}", n)),
            (0u32..100).prop_map(|n| format!("s-maxage={}", n)),
        ]
    }

    proptest! {
        /// no-store and private values are never touched. Anything else ends
        /// up private with no public directive left.
        #[test]
        fn prop_cache_control_invariants(
            directives in prop::collection::vec(directive(), 1..6),
            sep in prop_oneof![Just(", "), Just(","), Just(" , ")],
        ) {
            let value = directives.join(sep);
            let out = rewrite_cache_control(Some(&value));

            if has_directive(&value, "no-store") || has_directive(&value, "private") {
                prop_assert_eq!(&*out, value.as_str());
            } else {
                prop_assert!(has_directive(&out, "private"));
                prop_assert!(!has_directive(&out, "public"));
            }
        }
    }
}
