//! Transparent decompression of upstream bodies
//!
//! Upstreams may answer with a compressed body even when the client asked
//! for Markdown. Before conversion the buffered body is decoded according to
//! its `Content-Encoding`:
//!
//! - `gzip` (RFC 1952)
//! - `deflate`, the zlib wrapper of RFC 1950 as sent by HTTP servers
//! - `br` (RFC 7932), when built with the `brotli` feature
//!
//! Output is bounded by its own ceiling. Decoding stops one byte past the
//! ceiling, so a decompression bomb costs at most `max_size + 1` bytes of
//! memory before it is rejected.
//!
//! Encodings outside that set are [`DecompressError::Unsupported`]: the
//! caller forwards the original bytes and does not count a failure.

use std::fmt;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use thiserror::Error;

use crate::error::ErrorCategory;

/// Output estimate multiplier applied to the compressed size
const EXPANSION_FACTOR: usize = 10;

/// Content coding of an upstream body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    None,
    Gzip,
    Deflate,
    Brotli,
    /// Any coding this filter does not decode, including coding lists
    Unknown,
}

impl CompressionKind {
    /// Classify a `Content-Encoding` value
    ///
    /// Matching is exact and case-insensitive. A missing or empty value is
    /// [`CompressionKind::None`].
    pub fn detect(content_encoding: Option<&[u8]>) -> Self {
        let Some(value) = content_encoding else {
            return CompressionKind::None;
        };
        if value.is_empty() {
            CompressionKind::None
        } else if value.eq_ignore_ascii_case(b"gzip") {
            CompressionKind::Gzip
        } else if value.eq_ignore_ascii_case(b"deflate") {
            CompressionKind::Deflate
        } else if value.eq_ignore_ascii_case(b"br") {
            CompressionKind::Brotli
        } else {
            CompressionKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Deflate => "deflate",
            CompressionKind::Brotli => "br",
            CompressionKind::Unknown => "unknown",
        }
    }

    /// Whether the body has to be decoded before conversion
    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionKind::None)
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request decompression bookkeeping
///
/// `needed` is decided once from the response headers. `done` only moves
/// from false to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionState {
    pub kind: CompressionKind,
    pub needed: bool,
    pub done: bool,
    pub compressed_size: usize,
    pub decompressed_size: usize,
}

impl CompressionState {
    pub fn new(kind: CompressionKind) -> Self {
        Self {
            kind,
            needed: kind.is_compressed(),
            done: false,
            compressed_size: 0,
            decompressed_size: 0,
        }
    }

    /// State for an uncompressed body
    pub fn none() -> Self {
        Self::new(CompressionKind::None)
    }

    /// Whether decoding still has to run
    pub fn pending(&self) -> bool {
        self.needed && !self.done
    }

    pub fn mark_done(&mut self, compressed_size: usize, decompressed_size: usize) {
        self.done = true;
        self.compressed_size = compressed_size;
        self.decompressed_size = decompressed_size;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompressError {
    /// Coding not decoded by this build; forward the original bytes
    #[error("unsupported content encoding: {0}")]
    Unsupported(CompressionKind),
    /// The stream is not valid for its declared coding
    #[error("corrupt {kind} stream: {message}")]
    Corrupt {
        kind: CompressionKind,
        message: String,
    },
    /// Decoded output is larger than the configured ceiling
    #[error("decompressed size exceeds limit of {max_size} bytes")]
    SizeLimitExceeded { max_size: usize },
    #[error("decompression system failure: {0}")]
    SystemFailure(String),
}

impl DecompressError {
    /// Failure category, or `None` for expected degradation
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            DecompressError::Unsupported(_) => None,
            DecompressError::Corrupt { .. } => Some(ErrorCategory::Conversion),
            DecompressError::SizeLimitExceeded { .. } => Some(ErrorCategory::ResourceLimit),
            DecompressError::SystemFailure(_) => Some(ErrorCategory::System),
        }
    }
}

/// Initial output allocation for a compressed input of `input_size` bytes
///
/// `min(10 * input_size, max_size)` without overflow. Returns `None` when
/// the estimate is zero.
pub fn estimate_output_size(input_size: usize, max_size: usize) -> Option<usize> {
    let estimate = input_size
        .checked_mul(EXPANSION_FACTOR)
        .map_or(max_size, |n| n.min(max_size));
    (estimate > 0).then_some(estimate)
}

/// Decoder for buffered response bodies
#[derive(Debug, Clone, Copy)]
pub struct DecompressionEngine {
    max_size: usize,
}

impl DecompressionEngine {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether this build can decode `kind`
    pub fn supports(kind: CompressionKind) -> bool {
        match kind {
            CompressionKind::Gzip | CompressionKind::Deflate => true,
            CompressionKind::Brotli => cfg!(feature = "brotli"),
            CompressionKind::None | CompressionKind::Unknown => false,
        }
    }

    /// Decode a complete body
    pub fn decompress(
        &self,
        kind: CompressionKind,
        input: &[u8],
    ) -> Result<Vec<u8>, DecompressError> {
        if !Self::supports(kind) {
            return Err(DecompressError::Unsupported(kind));
        }
        if input.is_empty() {
            return Err(DecompressError::Corrupt {
                kind,
                message: "empty input".to_string(),
            });
        }
        let Some(estimate) = estimate_output_size(input.len(), self.max_size) else {
            let message = "output size estimate is zero".to_string();
            return Err(DecompressError::SystemFailure(message));
        };

        tracing::debug!(encoding = %kind, compressed = input.len(), estimate, "decompressing body");

        match kind {
            CompressionKind::Gzip => self.read_bounded(kind, GzDecoder::new(input), estimate),
            CompressionKind::Deflate => self.read_bounded(kind, ZlibDecoder::new(input), estimate),
            #[cfg(feature = "brotli")]
            CompressionKind::Brotli => {
                let decoder = brotli::Decompressor::new(input, 4096);
                self.read_bounded(kind, decoder, estimate)
            }
            _ => Err(DecompressError::Unsupported(kind)),
        }
    }

    fn read_bounded<R: Read>(
        &self,
        kind: CompressionKind,
        decoder: R,
        estimate: usize,
    ) -> Result<Vec<u8>, DecompressError> {
        let mut output = Vec::new();
        if output.try_reserve_exact(estimate).is_err() {
            let message = format!("failed to allocate {} bytes", estimate);
            return Err(DecompressError::SystemFailure(message));
        }

        let limit = (self.max_size as u64).saturating_add(1);
        decoder
            .take(limit)
            .read_to_end(&mut output)
            .map_err(|e| DecompressError::Corrupt {
                kind,
                message: e.to_string(),
            })?;

        if output.len() > self.max_size {
            return Err(DecompressError::SizeLimitExceeded {
                max_size: self.max_size,
            });
        }
        Ok(output)
    }
}
