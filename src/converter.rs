//! Converter contract
//!
//! The HTML to Markdown engine is an external collaborator. The pipeline
//! talks to it through the [`Converter`] trait: one call per request, with
//! the complete (already decompressed) HTML body and a set of
//! [`ConversionOptions`].
//!
//! # Call discipline
//!
//! A converter instance belongs to one worker and is reused for every
//! request that worker handles, strictly one call at a time. The trait takes
//! `&mut self` to make that explicit.
//!
//! # Pointer/length results
//!
//! Engines living behind a C ABI hand back buffers with separately declared
//! lengths. [`RawConversion`] models that shape and
//! [`RawConversion::into_result`] checks it before any field is trusted: an
//! absent buffer with a nonzero length, or a length that disagrees with the
//! buffer, is an invariant violation and classified as a system error.

use std::time::Duration;

use bytes::Bytes;

use crate::config::{FilterConfig, MarkdownFlavor};
use crate::error::{ConverterError, ERROR_SUCCESS};
use crate::etag_generator::ETagGenerator;
use crate::token_estimator::TokenEstimator;

/// Per-call conversion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub flavor: MarkdownFlavor,
    pub timeout: Duration,
    pub generate_etag: bool,
    pub estimate_tokens: bool,
    pub front_matter: bool,
    /// Upstream Content-Type, for charset detection
    pub content_type: Option<String>,
    /// Absolute URL of the document, for resolving relative links
    pub base_url: Option<String>,
}

impl ConversionOptions {
    /// Options derived from the filter configuration
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            flavor: config.flavor,
            timeout: config.timeout,
            generate_etag: config.generate_etag,
            estimate_tokens: config.token_estimate,
            front_matter: config.front_matter,
            content_type: None,
            base_url: None,
        }
    }
}

/// Successful conversion output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub markdown: Bytes,
    /// Entity-tag of the Markdown, when requested and produced
    pub etag: Option<Bytes>,
    /// 0 when not requested
    pub token_estimate: u32,
}

impl ConversionResult {
    /// Build a result from finished Markdown, computing the ETag and token
    /// estimate the options ask for
    pub fn from_markdown(markdown: impl Into<Bytes>, options: &ConversionOptions) -> Self {
        let markdown = markdown.into();
        let etag = options
            .generate_etag
            .then(|| ETagGenerator::new().generate_bytes(&markdown));
        let token_estimate = if options.estimate_tokens {
            TokenEstimator::new().estimate_utf8(&markdown)
        } else {
            0
        };
        Self {
            markdown,
            etag,
            token_estimate,
        }
    }

    /// Entity-tag bytes, empty when none was generated
    pub fn etag_bytes(&self) -> &[u8] {
        self.etag.as_deref().unwrap_or_default()
    }
}

/// HTML to Markdown engine
pub trait Converter {
    fn convert(
        &mut self,
        html: &[u8],
        options: &ConversionOptions,
    ) -> Result<ConversionResult, ConverterError>;
}

impl<F> Converter for F
where
    F: FnMut(&[u8], &ConversionOptions) -> Result<ConversionResult, ConverterError>,
{
    fn convert(
        &mut self,
        html: &[u8],
        options: &ConversionOptions,
    ) -> Result<ConversionResult, ConverterError> {
        self(html, options)
    }
}

/// Converter result in pointer/length form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConversion {
    pub markdown: Option<Vec<u8>>,
    pub markdown_len: usize,
    pub etag: Option<Vec<u8>>,
    pub etag_len: usize,
    pub token_estimate: u32,
    pub error_code: u32,
    pub error_message: Option<Vec<u8>>,
    pub error_len: usize,
}

fn checked_field(
    field: &str,
    data: Option<Vec<u8>>,
    declared: usize,
) -> Result<Option<Vec<u8>>, ConverterError> {
    match data {
        None if declared > 0 => Err(ConverterError::InvariantViolation(format!(
            "{} is absent but declared {} bytes",
            field, declared
        ))),
        Some(bytes) if bytes.len() != declared => Err(ConverterError::InvariantViolation(format!(
            "{} holds {} bytes but declared {}",
            field,
            bytes.len(),
            declared
        ))),
        other => Ok(other),
    }
}

impl RawConversion {
    /// Validate and convert into a typed result
    ///
    /// A nonzero error code yields the matching [`ConverterError`]. On
    /// success every buffer must agree with its declared length.
    pub fn into_result(self) -> Result<ConversionResult, ConverterError> {
        if self.error_code != ERROR_SUCCESS {
            let message = checked_field("error_message", self.error_message, self.error_len)?
                .map(|m| String::from_utf8_lossy(&m).into_owned())
                .unwrap_or_default();
            let err = match ConverterError::from_code(self.error_code, message) {
                Some(err) => err,
                None => ConverterError::Internal("inconsistent error code".to_string()),
            };
            return Err(err);
        }

        let markdown = checked_field("markdown", self.markdown, self.markdown_len)?;
        let etag = checked_field("etag", self.etag, self.etag_len)?;

        Ok(ConversionResult {
            markdown: Bytes::from(markdown.unwrap_or_default()),
            etag: etag.filter(|e| !e.is_empty()).map(Bytes::from),
            token_estimate: self.token_estimate,
        })
    }
}
