//! Error taxonomy for the response filter
//!
//! Every fallible step reports an error that can be placed in exactly one
//! [`ErrorCategory`]. The pipeline is the single place that turns a
//! categorized error into fail-open or fail-closed behavior.
//!
//! Unsupported content encodings are deliberately absent from this module:
//! they are expected degradation and never reach the failure counters.

use http::StatusCode;
use thiserror::Error;

/// Converter error code: success
pub const ERROR_SUCCESS: u32 = 0;

/// Converter error code: HTML parsing failed
pub const ERROR_PARSE: u32 = 1;

/// Converter error code: character encoding error
pub const ERROR_ENCODING: u32 = 2;

/// Converter error code: conversion timeout exceeded
pub const ERROR_TIMEOUT: u32 = 3;

/// Converter error code: memory limit exceeded during conversion
pub const ERROR_MEMORY_LIMIT: u32 = 4;

/// Converter error code: invalid input data or parameters
pub const ERROR_INVALID_INPUT: u32 = 5;

/// Converter error code: internal error (unexpected condition, panic caught)
pub const ERROR_INTERNAL: u32 = 99;

/// Failure classification used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input, encoding errors, invalid parameters
    Conversion,
    /// Timeout, memory or size limit
    ResourceLimit,
    /// Allocation failure, converter unavailable, broken invariants
    System,
}

impl ErrorCategory {
    /// Map a converter error code to its category
    ///
    /// Unknown codes are treated as system errors.
    pub fn classify(code: u32) -> Self {
        match code {
            ERROR_PARSE | ERROR_ENCODING | ERROR_INVALID_INPUT => ErrorCategory::Conversion,
            ERROR_TIMEOUT | ERROR_MEMORY_LIMIT => ErrorCategory::ResourceLimit,
            _ => ErrorCategory::System,
        }
    }

    /// Stable name used in log fields and metrics output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Conversion => "conversion",
            ErrorCategory::ResourceLimit => "resource_limit",
            ErrorCategory::System => "system",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a [`Converter`](crate::converter::Converter)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConverterError {
    /// HTML parsing failed
    #[error("parse error: {0}")]
    Parse(String),
    /// Character encoding error
    #[error("encoding error: {0}")]
    Encoding(String),
    /// Conversion exceeded the configured timeout
    #[error("conversion timeout exceeded")]
    Timeout,
    /// Memory limit exceeded
    #[error("memory limit exceeded")]
    MemoryLimit,
    /// Invalid input data
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Internal converter failure
    #[error("internal error: {0}")]
    Internal(String),
    /// The raw result violated the pointer/length contract
    #[error("invalid converter result: {0}")]
    InvariantViolation(String),
    /// Error code not known to this crate
    #[error("unknown converter error code {code}: {message}")]
    Unknown { code: u32, message: String },
}

impl ConverterError {
    /// Build an error from a numeric code and message
    ///
    /// Returns `None` for [`ERROR_SUCCESS`].
    pub fn from_code(code: u32, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        let err = match code {
            ERROR_SUCCESS => return None,
            ERROR_PARSE => ConverterError::Parse(message),
            ERROR_ENCODING => ConverterError::Encoding(message),
            ERROR_TIMEOUT => ConverterError::Timeout,
            ERROR_MEMORY_LIMIT => ConverterError::MemoryLimit,
            ERROR_INVALID_INPUT => ConverterError::InvalidInput(message),
            ERROR_INTERNAL => ConverterError::Internal(message),
            code => ConverterError::Unknown { code, message },
        };
        Some(err)
    }

    /// Numeric error code
    pub fn code(&self) -> u32 {
        match self {
            ConverterError::Parse(_) => ERROR_PARSE,
            ConverterError::Encoding(_) => ERROR_ENCODING,
            ConverterError::Timeout => ERROR_TIMEOUT,
            ConverterError::MemoryLimit => ERROR_MEMORY_LIMIT,
            ConverterError::InvalidInput(_) => ERROR_INVALID_INPUT,
            ConverterError::Internal(_) | ConverterError::InvariantViolation(_) => ERROR_INTERNAL,
            ConverterError::Unknown { code, .. } => *code,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::classify(self.code())
    }
}

/// Terminal pipeline error returned to the transport layer
///
/// Only produced under the `reject` failure policy. The category is kept for
/// the caller's own bookkeeping; nothing from it should be sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Fail-closed: abort the request with an upstream error status
    #[error("markdown conversion rejected ({category})")]
    Rejected { category: ErrorCategory },
}

impl FilterError {
    /// Status the transport should answer with
    pub fn status(&self) -> StatusCode {
        match self {
            FilterError::Rejected { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FilterError::Rejected { category } => *category,
        }
    }
}
