//! Filter configuration surface
//!
//! Directive parsing and inheritance happen outside this crate. What arrives
//! here is an already merged [`FilterConfig`], shared read-only across all
//! requests of a worker. The enum types accept the directive words through
//! [`FromStr`] so the loader can stay thin.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default body size limit (10 MiB)
pub const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024;

/// Default conversion timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value \"{value}\" for {directive}")]
    InvalidValue {
        directive: &'static str,
        value: String,
    },
    #[error("max_size must be greater than zero")]
    ZeroMaxSize,
    #[error("empty pattern in {0}")]
    EmptyPattern(&'static str),
}

/// Behavior when conversion fails after the filter engaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Fail-open: forward the original response
    #[default]
    Pass,
    /// Fail-closed: answer 502
    Reject,
}

/// Markdown dialect requested from the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkdownFlavor {
    #[default]
    CommonMark,
    /// GitHub Flavored Markdown
    Gfm,
}

/// Whether authenticated requests may be converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPolicy {
    #[default]
    Allow,
    Deny,
}

/// How conditional requests for the Markdown variant are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionalMode {
    /// Convert to obtain the variant ETag and evaluate If-None-Match
    #[default]
    FullSupport,
    /// Leave freshness to Last-Modified handling outside the filter
    IfModifiedSinceOnly,
    Disabled,
}

fn parse_word<T: Copy>(
    directive: &'static str,
    value: &str,
    table: &[(&str, T)],
) -> Result<T, ConfigError> {
    table
        .iter()
        .find(|(word, _)| word.eq_ignore_ascii_case(value.trim()))
        .map(|(_, v)| *v)
        .ok_or_else(|| ConfigError::InvalidValue {
            directive,
            value: value.to_string(),
        })
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_word(
            "markdown_on_error",
            s,
            &[("pass", Self::Pass), ("reject", Self::Reject)],
        )
    }
}

impl FromStr for MarkdownFlavor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_word(
            "markdown_flavor",
            s,
            &[("commonmark", Self::CommonMark), ("gfm", Self::Gfm)],
        )
    }
}

impl FromStr for AuthPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_word(
            "markdown_auth_policy",
            s,
            &[("allow", Self::Allow), ("deny", Self::Deny)],
        )
    }
}

impl FromStr for ConditionalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_word(
            "markdown_conditional_requests",
            s,
            &[
                ("full_support", Self::FullSupport),
                ("if_modified_since_only", Self::IfModifiedSinceOnly),
                ("disabled", Self::Disabled),
            ],
        )
    }
}

/// Merged filter configuration
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Upper bound for buffered and decompressed bodies, in bytes
    pub max_size: usize,
    /// Budget handed to the converter for one conversion
    pub timeout: Duration,
    pub on_error: FailurePolicy,
    pub flavor: MarkdownFlavor,
    /// Emit `X-Markdown-Tokens`
    pub token_estimate: bool,
    pub front_matter: bool,
    /// Let `*/*` and `text/*` select the Markdown variant
    pub on_wildcard: bool,
    pub auth_policy: AuthPolicy,
    /// Cookie name patterns marking a request as authenticated; empty means
    /// the built-in defaults
    pub auth_cookies: Vec<String>,
    pub generate_etag: bool,
    pub conditional_requests: ConditionalMode,
    /// Convert responses without a Content-Length
    pub buffer_chunked: bool,
    /// Additional Content-Type prefixes treated as unbounded streams
    pub stream_types: Vec<String>,
    pub auto_decompress: bool,
    /// Host used for the converter base URL when the request has none
    pub server_name: Option<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: DEFAULT_MAX_SIZE,
            timeout: DEFAULT_TIMEOUT,
            on_error: FailurePolicy::Pass,
            flavor: MarkdownFlavor::CommonMark,
            token_estimate: false,
            front_matter: false,
            on_wildcard: false,
            auth_policy: AuthPolicy::Allow,
            auth_cookies: Vec::new(),
            generate_etag: true,
            conditional_requests: ConditionalMode::FullSupport,
            buffer_chunked: true,
            stream_types: Vec::new(),
            auto_decompress: true,
            server_name: None,
        }
    }
}

impl FilterConfig {
    /// Default configuration with the filter switched on
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.stream_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyPattern("markdown_stream_types"));
        }
        if self.auth_cookies.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::EmptyPattern("markdown_auth_cookies"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let conf = FilterConfig::default();
        assert!(!conf.enabled);
        assert_eq!(conf.max_size, 10 * 1024 * 1024);
        assert_eq!(conf.timeout, Duration::from_secs(5));
        assert_eq!(conf.on_error, FailurePolicy::Pass);
        assert_eq!(conf.flavor, MarkdownFlavor::CommonMark);
        assert!(conf.generate_etag);
        assert!(conf.buffer_chunked);
        assert!(conf.auto_decompress);
        assert!(!conf.on_wildcard);
        assert_eq!(conf.conditional_requests, ConditionalMode::FullSupport);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_parse_directive_words() {
        assert_eq!("reject".parse::<FailurePolicy>(), Ok(FailurePolicy::Reject));
        assert_eq!("PASS".parse::<FailurePolicy>(), Ok(FailurePolicy::Pass));
        assert_eq!("gfm".parse::<MarkdownFlavor>(), Ok(MarkdownFlavor::Gfm));
        assert_eq!("deny".parse::<AuthPolicy>(), Ok(AuthPolicy::Deny));
        assert_eq!(
            "if_modified_since_only".parse::<ConditionalMode>(),
            Ok(ConditionalMode::IfModifiedSinceOnly)
        );
        assert_eq!(
            "disabled".parse::<ConditionalMode>(),
            Ok(ConditionalMode::Disabled)
        );
    }

    #[test]
    fn test_parse_rejects_unknown_words() {
        let err = "maybe".parse::<FailurePolicy>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                directive: "markdown_on_error",
                value: "maybe".to_string()
            }
        );
        assert!("markdown".parse::<MarkdownFlavor>().is_err());
        assert!("".parse::<ConditionalMode>().is_err());
    }

    #[test]
    fn test_validate() {
        let conf = FilterConfig {
            max_size: 0,
            ..FilterConfig::enabled()
        };
        assert_eq!(conf.validate(), Err(ConfigError::ZeroMaxSize));

        let conf = FilterConfig {
            stream_types: vec!["  ".to_string()],
            ..FilterConfig::enabled()
        };
        assert!(conf.validate().is_err());

        let conf = FilterConfig {
            auth_cookies: vec![String::new()],
            ..FilterConfig::enabled()
        };
        assert!(conf.validate().is_err());
    }
}
