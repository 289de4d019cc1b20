//! Validators for converted Markdown
//!
//! The ETag of a Markdown variant is derived from the Markdown bytes only,
//! so two conversions producing identical output share a validator no
//! matter what the upstream HTML or its ETag looked like.
//!
//! Format: the first 128 bits of the BLAKE3 digest, lowercase hex, wrapped
//! in double quotes (a strong entity-tag, 34 bytes in total).
//!
//! ```
//! use nginx_markdown_filter::etag_generator::ETagGenerator;
//!
//! let etag = ETagGenerator::new().generate(b"# Title\n");
//! assert_eq!(etag.len(), 34);
//! assert!(etag.starts_with('"') && etag.ends_with('"'));
//! ```

use bytes::Bytes;

/// Digest bytes kept in the entity-tag
const DIGEST_PREFIX_LEN: usize = 16;

/// Stateless BLAKE3 entity-tag builder
#[derive(Debug, Clone, Copy, Default)]
pub struct ETagGenerator;

impl ETagGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Strong entity-tag for `markdown`
    pub fn generate(&self, markdown: &[u8]) -> String {
        let digest = blake3::hash(markdown);
        let prefix = &digest.as_bytes()[..DIGEST_PREFIX_LEN];
        format!("\"{}\"", hex::encode(prefix))
    }

    /// Same tag as [`generate`](Self::generate), as header-ready bytes
    pub fn generate_bytes(&self, markdown: &[u8]) -> Bytes {
        Bytes::from(self.generate(markdown))
    }
}
