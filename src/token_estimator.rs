//! Rough token counts for `X-Markdown-Tokens`
//!
//! Agents use the header to budget context windows before downloading a
//! body. The estimate is characters divided by a fixed ratio, rounded up.

/// Characters per token assumed for English-like text
pub const DEFAULT_CHARS_PER_TOKEN: f32 = 4.0;

#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    chars_per_token: f32,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::with_chars_per_token(DEFAULT_CHARS_PER_TOKEN)
    }

    /// Non-positive or non-finite ratios fall back to the default
    pub fn with_chars_per_token(chars_per_token: f32) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn estimate(&self, markdown: &str) -> u32 {
        self.from_char_count(markdown.chars().count())
    }

    /// Estimate for UTF-8 bytes without validating them
    ///
    /// Counts every byte that is not a continuation byte, which equals the
    /// character count for valid UTF-8.
    pub fn estimate_utf8(&self, markdown: &[u8]) -> u32 {
        let chars = markdown.iter().filter(|&&b| b & 0xC0 != 0x80).count();
        self.from_char_count(chars)
    }

    fn from_char_count(&self, chars: usize) -> u32 {
        let tokens = (chars as f64 / f64::from(self.chars_per_token)).ceil();
        if tokens >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            tokens as u32
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}
