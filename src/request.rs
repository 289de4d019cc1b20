//! Request and response metadata seen by the filter
//!
//! The transport hands the pipeline a [`RequestMeta`] and the upstream
//! [`ResponseHead`] once response headers are known. Both are thin wrappers
//! around `http` types with accessors for the handful of headers the filter
//! inspects.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::uri::Scheme;
use http::{Method, StatusCode, Uri};

pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

fn non_empty(value: Option<&HeaderValue>) -> Option<&[u8]> {
    value.map(HeaderValue::as_bytes).filter(|v| !v.is_empty())
}

/// Client request as seen by the response filter
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Scheme the connection was accepted on, if the transport knows it
    pub scheme: Option<Scheme>,
}

impl RequestMeta {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            scheme: None,
        }
    }

    /// Builder-style header append
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Accept header as text; invalid UTF-8 is replaced rather than rejected
    pub fn accept(&self) -> Option<String> {
        non_empty(self.headers.get(header::ACCEPT)).map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn if_none_match(&self) -> Option<&[u8]> {
        non_empty(self.headers.get(header::IF_NONE_MATCH))
    }

    pub fn has_range(&self) -> bool {
        self.headers.contains_key(header::RANGE)
    }

    /// Connection scheme, falling back to an absolute request URI
    fn request_scheme(&self) -> Option<&str> {
        self.scheme
            .as_ref()
            .map(Scheme::as_str)
            .or_else(|| self.uri.scheme_str())
    }

    fn host(&self) -> Option<&str> {
        self.headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    /// Absolute URL of the requested document, used to resolve relative links
    ///
    /// Sources, first match wins:
    ///
    /// 1. `X-Forwarded-Proto` (`http` or `https`) with `X-Forwarded-Host`
    /// 2. Connection scheme with the `Host` header
    /// 3. Connection scheme (default `http`) with `server_name`
    pub fn base_url(&self, server_name: Option<&str>) -> Option<String> {
        let path = self.uri.path();

        let forwarded_proto = self
            .headers
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok());
        let forwarded_host = self
            .headers
            .get(X_FORWARDED_HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        if let (Some(proto), Some(host)) = (forwarded_proto, forwarded_host)
            && (proto.eq_ignore_ascii_case("http") || proto.eq_ignore_ascii_case("https"))
        {
            return Some(format!("{}://{}{}", proto, host, path));
        }

        if let (Some(scheme), Some(host)) = (self.request_scheme(), self.host()) {
            return Some(format!("{}://{}{}", scheme, host, path));
        }

        let server_name = server_name.filter(|s| !s.is_empty())?;
        let scheme = self.request_scheme().unwrap_or("http");
        Some(format!("{}://{}{}", scheme, server_name, path))
    }
}

/// Response status and headers as received from upstream, or as rewritten
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn content_type(&self) -> Option<&[u8]> {
        non_empty(self.headers.get(header::CONTENT_TYPE))
    }

    /// Declared body length; unparseable values count as absent
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn content_encoding(&self) -> Option<&[u8]> {
        self.headers
            .get(header::CONTENT_ENCODING)
            .map(HeaderValue::as_bytes)
    }
}
