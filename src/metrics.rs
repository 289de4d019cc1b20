//! Process-wide filter counters
//!
//! One [`FilterMetrics`] is created at worker start and shared by every
//! pipeline as `Arc<FilterMetrics>`. Counters only grow; readers take a
//! [`MetricsSnapshot`] and render it as text or JSON.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::decompression::CompressionKind;
use crate::error::ErrorCategory;

#[derive(Debug, Default)]
pub struct FilterMetrics {
    conversions_attempted: AtomicU64,
    conversions_succeeded: AtomicU64,
    conversions_failed: AtomicU64,
    conversions_bypassed: AtomicU64,

    failures_conversion: AtomicU64,
    failures_resource_limit: AtomicU64,
    failures_system: AtomicU64,

    conversion_time_sum_ms: AtomicU64,
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,

    decompressions_attempted: AtomicU64,
    decompressions_succeeded: AtomicU64,
    decompressions_failed: AtomicU64,
    decompressions_gzip: AtomicU64,
    decompressions_deflate: AtomicU64,
    decompressions_brotli: AtomicU64,
}

fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl FilterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attempted(&self) {
        add(&self.conversions_attempted, 1);
    }

    pub fn add_bypassed(&self) {
        add(&self.conversions_bypassed, 1);
    }

    /// A conversion that produced Markdown
    pub fn add_succeeded(&self, input_bytes: usize, output_bytes: usize, elapsed: Duration) {
        add(&self.conversions_succeeded, 1);
        add(&self.input_bytes, input_bytes as u64);
        add(&self.output_bytes, output_bytes as u64);
        add(
            &self.conversion_time_sum_ms,
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        );
    }

    pub fn add_failed(&self, category: ErrorCategory) {
        add(&self.conversions_failed, 1);
        let counter = match category {
            ErrorCategory::Conversion => &self.failures_conversion,
            ErrorCategory::ResourceLimit => &self.failures_resource_limit,
            ErrorCategory::System => &self.failures_system,
        };
        add(counter, 1);
    }

    pub fn add_decompression_attempted(&self) {
        add(&self.decompressions_attempted, 1);
    }

    pub fn add_decompression_succeeded(&self, kind: CompressionKind) {
        add(&self.decompressions_succeeded, 1);
        match kind {
            CompressionKind::Gzip => add(&self.decompressions_gzip, 1),
            CompressionKind::Deflate => add(&self.decompressions_deflate, 1),
            CompressionKind::Brotli => add(&self.decompressions_brotli, 1),
            CompressionKind::None | CompressionKind::Unknown => {}
        }
    }

    pub fn add_decompression_failed(&self) {
        add(&self.decompressions_failed, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            conversions_attempted: load(&self.conversions_attempted),
            conversions_succeeded: load(&self.conversions_succeeded),
            conversions_failed: load(&self.conversions_failed),
            conversions_bypassed: load(&self.conversions_bypassed),
            failures_conversion: load(&self.failures_conversion),
            failures_resource_limit: load(&self.failures_resource_limit),
            failures_system: load(&self.failures_system),
            conversion_time_sum_ms: load(&self.conversion_time_sum_ms),
            input_bytes: load(&self.input_bytes),
            output_bytes: load(&self.output_bytes),
            decompressions_attempted: load(&self.decompressions_attempted),
            decompressions_succeeded: load(&self.decompressions_succeeded),
            decompressions_failed: load(&self.decompressions_failed),
            decompressions_gzip: load(&self.decompressions_gzip),
            decompressions_deflate: load(&self.decompressions_deflate),
            decompressions_brotli: load(&self.decompressions_brotli),
        }
    }
}

/// Point-in-time copy of the counters
///
/// Fields are read one by one, so a snapshot taken while requests are in
/// flight may be off by a few between related counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub conversions_attempted: u64,
    pub conversions_succeeded: u64,
    pub conversions_failed: u64,
    pub conversions_bypassed: u64,
    pub failures_conversion: u64,
    pub failures_resource_limit: u64,
    pub failures_system: u64,
    pub conversion_time_sum_ms: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub decompressions_attempted: u64,
    pub decompressions_succeeded: u64,
    pub decompressions_failed: u64,
    pub decompressions_gzip: u64,
    pub decompressions_deflate: u64,
    pub decompressions_brotli: u64,
}

impl MetricsSnapshot {
    /// JSON is served when the Accept header mentions `application/json`
    pub fn prefers_json(accept: Option<&str>) -> bool {
        accept.is_some_and(|a| a.contains("application/json"))
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::with_capacity(768);
        // Writing to a String cannot fail
        let _ = write!(
            out,
            "Markdown Filter Metrics\n\
             =======================\n\
             Conversions Attempted: {}\n\
             Conversions Succeeded: {}\n\
             Conversions Failed: {}\n\
             Conversions Bypassed: {}\n\
             \n\
             Failure Breakdown:\n\
             - Conversion Errors: {}\n\
             - Resource Limit Exceeded: {}\n\
             - System Errors: {}\n\
             \n\
             Performance:\n\
             - Total Conversion Time: {} ms\n\
             - Total Input Bytes: {}\n\
             - Total Output Bytes: {}\n\
             \n\
             Decompression Statistics:\n\
             - Decompressions Attempted: {}\n\
             - Decompressions Succeeded: {}\n\
             - Decompressions Failed: {}\n\
             - Gzip Decompressions: {}\n\
             - Deflate Decompressions: {}\n\
             - Brotli Decompressions: {}\n",
            self.conversions_attempted,
            self.conversions_succeeded,
            self.conversions_failed,
            self.conversions_bypassed,
            self.failures_conversion,
            self.failures_resource_limit,
            self.failures_system,
            self.conversion_time_sum_ms,
            self.input_bytes,
            self.output_bytes,
            self.decompressions_attempted,
            self.decompressions_succeeded,
            self.decompressions_failed,
            self.decompressions_gzip,
            self.decompressions_deflate,
            self.decompressions_brotli,
        );
        out
    }
}
