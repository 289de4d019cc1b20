//! NGINX Markdown Filter - response transformation core
//!
//! This library decides when an HTML response should be served as Markdown
//! and carries the response through that transformation with correct HTTP
//! semantics: content negotiation, bounded buffering, transparent
//! decompression, conditional requests and cache-safe headers.
//!
//! # Architecture
//!
//! The library is structured into several modules:
//! - `accept`: Accept header parsing and RFC 9110 precedence
//! - `eligibility`: Which upstream responses may be converted
//! - `buffer`: Bounded body accumulation
//! - `decompression`: gzip, deflate and brotli decoding with an output ceiling
//! - `conditional`: If-None-Match evaluation against the Markdown ETag
//! - `auth`: Authenticated request detection and Cache-Control hardening
//! - `headers`: Response header rewrite for the Markdown variant
//! - `converter`: Contract with the HTML to Markdown engine
//! - `etag_generator`: ETag generation using BLAKE3
//! - `token_estimator`: Token count estimation for LLMs
//! - `metrics`: Process-wide counters
//! - `pipeline`: The per-request state machine tying it all together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use http::header::{self, HeaderValue};
//! use http::{Method, StatusCode, Uri};
//! use nginx_markdown_filter::{
//!     BodyChunk, ConversionOptions, ConversionResult, ConverterError, Emit, FilterConfig,
//!     FilterMetrics, RequestMeta, ResponseHead, ResponsePipeline,
//! };
//!
//! let converter = |_html: &[u8], opts: &ConversionOptions| {
//!     Ok::<_, ConverterError>(ConversionResult::from_markdown("# Hello\n", opts))
//! };
//! let mut pipeline = ResponsePipeline::new(
//!     Arc::new(FilterConfig::enabled()),
//!     converter,
//!     Arc::new(FilterMetrics::new()),
//! );
//!
//! let request = RequestMeta::new(Method::GET, Uri::from_static("/"))
//!     .with_header(header::ACCEPT, HeaderValue::from_static("text/markdown"));
//! let upstream = ResponseHead::new(StatusCode::OK)
//!     .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
//!
//! let (mut ctx, early) = pipeline.on_headers(request, upstream);
//! assert!(early.is_empty());
//!
//! let out = pipeline
//!     .on_body(&mut ctx, vec![BodyChunk::last("<h1>Hello</h1>")])
//!     .unwrap();
//! match &out[0] {
//!     Emit::Headers(head) => {
//!         assert_eq!(head.headers[header::CONTENT_TYPE], "text/markdown; charset=utf-8")
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod accept;
pub mod auth;
pub mod buffer;
pub mod conditional;
pub mod config;
pub mod converter;
pub mod decompression;
pub mod eligibility;
pub mod error;
pub mod etag_generator;
pub mod headers;
pub mod metrics;
pub mod pipeline;
pub mod request;
pub mod token_estimator;

pub use config::{FailurePolicy, FilterConfig};
pub use converter::{ConversionOptions, ConversionResult, Converter, RawConversion};
pub use error::{ConverterError, ErrorCategory, FilterError};
pub use metrics::{FilterMetrics, MetricsSnapshot};
pub use pipeline::{BodyChunk, Emit, RequestContext, ResponsePipeline, State};
pub use request::{RequestMeta, ResponseHead};
