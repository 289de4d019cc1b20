//! Per-request orchestration
//!
//! A [`ResponsePipeline`] lives as long as a worker and owns that worker's
//! converter. Each request gets its own [`RequestContext`], created by
//! [`ResponsePipeline::on_headers`] and then fed body chunks through
//! [`ResponsePipeline::on_body`] as the transport delivers them.
//!
//! ```text
//! Gating -> Buffering -> [Decompressing] -> [ConditionalCheck] -> Converting -> Finalizing -> Done
//!              |               |                                      |
//!              +---------------+------------> ErrorRecovery <--------+
//! ```
//!
//! Headers of an eligible response are held back until the body is complete,
//! since conversion changes them. Every failure goes through one recovery
//! path: under `on_error = reject` the request is aborted with
//! [`FilterError::Rejected`], otherwise the original headers and bytes are
//! forwarded exactly as received.
//!
//! Body data arriving after the final chunk is forwarded when the client is
//! getting the upstream body. Once the filter has sent its own final body
//! (Markdown or a 304), such data is discarded with a warning.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::accept;
use crate::auth;
use crate::buffer::{BoundedBuffer, RESERVE_CEILING};
use crate::conditional::{ConditionalEvaluator, ConditionalMatch};
use crate::config::{FailurePolicy, FilterConfig};
use crate::converter::{ConversionOptions, ConversionResult, Converter};
use crate::decompression::{CompressionKind, CompressionState, DecompressionEngine};
use crate::eligibility::{self, Eligibility};
use crate::error::{ErrorCategory, FilterError};
use crate::headers;
use crate::metrics::FilterMetrics;
use crate::request::{RequestMeta, ResponseHead};

/// A piece of the upstream body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub data: Bytes,
    /// Final chunk of the body
    pub last: bool,
}

impl BodyChunk {
    pub fn new(data: impl Into<Bytes>, last: bool) -> Self {
        Self {
            data: data.into(),
            last,
        }
    }

    pub fn data(data: impl Into<Bytes>) -> Self {
        Self::new(data, false)
    }

    pub fn last(data: impl Into<Bytes>) -> Self {
        Self::new(data, true)
    }
}

/// Output handed back to the transport, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    Headers(ResponseHead),
    Body { data: Bytes, last: bool },
}

impl Emit {
    fn body(chunk: BodyChunk) -> Self {
        Emit::Body {
            data: chunk.data,
            last: chunk.last,
        }
    }

    fn final_body(data: Bytes) -> Self {
        Emit::Body { data, last: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Gating,
    Buffering,
    Decompressing,
    ConditionalCheck,
    Converting,
    Finalizing,
    Done,
    ErrorRecovery,
}

/// State of one request
#[derive(Debug)]
pub struct RequestContext {
    state: State,
    request: RequestMeta,
    /// Upstream head as received, replayed on fail-open
    upstream: ResponseHead,
    buffer: BoundedBuffer,
    buffer_initialized: bool,
    compression: CompressionState,
    authenticated: bool,
    conversion_attempted: bool,
    headers_forwarded: bool,
    /// The filter sent its own final body instead of the upstream one
    body_replaced: bool,
}

impl RequestContext {
    fn new(request: RequestMeta, upstream: ResponseHead, max_size: usize) -> Self {
        Self {
            state: State::Gating,
            request,
            upstream,
            buffer: BoundedBuffer::new(max_size),
            buffer_initialized: false,
            compression: CompressionState::none(),
            authenticated: false,
            conversion_attempted: false,
            headers_forwarded: false,
            body_replaced: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn request(&self) -> &RequestMeta {
        &self.request
    }

    pub fn compression(&self) -> &CompressionState {
        &self.compression
    }

    pub fn conversion_attempted(&self) -> bool {
        self.conversion_attempted
    }

    pub fn headers_forwarded(&self) -> bool {
        self.headers_forwarded
    }

    /// Bytes currently held back from the client
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Queue `head` unless headers already went out
    fn forward_headers(&mut self, head: ResponseHead, out: &mut Vec<Emit>) {
        if self.headers_forwarded {
            return;
        }
        self.headers_forwarded = true;
        out.push(Emit::Headers(head));
    }

    fn forward_original_headers(&mut self, out: &mut Vec<Emit>) {
        let head = self.upstream.clone();
        self.forward_headers(head, out);
    }

    /// Give up on conversion and pass the response through from here on
    fn pass_through(&mut self, out: &mut Vec<Emit>) {
        self.forward_original_headers(out);
        self.buffer.release();
        self.state = State::Done;
    }

    /// Chunks delivered once the request is finished
    fn forward_late(&self, chunks: Vec<BodyChunk>) -> Vec<Emit> {
        if !self.body_replaced {
            return chunks.into_iter().map(Emit::body).collect();
        }
        let bytes: usize = chunks.iter().map(|c| c.data.len()).sum();
        if bytes > 0 || chunks.len() > 1 {
            tracing::warn!(
                chunks = chunks.len(),
                bytes,
                "discarding body data received after the final chunk"
            );
        }
        Vec::new()
    }
}

/// Response filter for one worker
pub struct ResponsePipeline<C> {
    config: Arc<FilterConfig>,
    converter: C,
    metrics: Arc<FilterMetrics>,
}

impl<C: Converter> ResponsePipeline<C> {
    pub fn new(config: Arc<FilterConfig>, converter: C, metrics: Arc<FilterMetrics>) -> Self {
        Self {
            config,
            converter,
            metrics,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<FilterMetrics> {
        &self.metrics
    }

    pub fn converter_mut(&mut self) -> &mut C {
        &mut self.converter
    }

    /// Gate a response once its upstream headers are known
    ///
    /// Ineligible responses get their headers back immediately and the
    /// returned context passes every body chunk through. Eligible responses
    /// return no output: headers are deferred until the body is complete.
    pub fn on_headers(
        &self,
        request: RequestMeta,
        upstream: ResponseHead,
    ) -> (RequestContext, Vec<Emit>) {
        let config = &*self.config;
        let mut ctx = RequestContext::new(request, upstream, config.max_size);
        let mut out = Vec::new();

        if !config.enabled {
            ctx.pass_through(&mut out);
            return (ctx, out);
        }

        let wants_markdown = ctx
            .request
            .accept()
            .is_some_and(|a| accept::resolve(&a, config.on_wildcard));
        if !wants_markdown {
            tracing::debug!("client did not ask for markdown");
            ctx.pass_through(&mut out);
            return (ctx, out);
        }

        let eligibility = eligibility::check(config, &ctx.request, &ctx.upstream);
        if let Eligibility::Ineligible(reason) = eligibility {
            tracing::debug!(%reason, "response not eligible");
            ctx.pass_through(&mut out);
            return (ctx, out);
        }

        let kind = CompressionKind::detect(ctx.upstream.content_encoding());
        if kind.is_compressed() {
            if !config.auto_decompress {
                tracing::debug!(
                    encoding = %kind,
                    "compressed body and auto_decompress off, passing through"
                );
                self.metrics.add_bypassed();
                ctx.pass_through(&mut out);
                return (ctx, out);
            }
            // Never a failure: the original is forwarded whatever on_error says
            if !DecompressionEngine::supports(kind) {
                tracing::warn!(
                    encoding = %kind,
                    "unsupported content encoding, returning original content"
                );
                self.metrics.add_bypassed();
                ctx.pass_through(&mut out);
                return (ctx, out);
            }
            tracing::debug!(encoding = %kind, "body will be decompressed");
            ctx.compression = CompressionState::new(kind);
        }

        ctx.authenticated = auth::is_authenticated(&ctx.request.headers, &config.auth_cookies);
        ctx.state = State::Buffering;
        tracing::debug!("response eligible for conversion");
        (ctx, out)
    }

    /// Feed body chunks
    ///
    /// Returns what should be sent downstream now, possibly nothing while
    /// the body is still being buffered. An error means the request must be
    /// aborted with [`FilterError::status`].
    pub fn on_body(
        &mut self,
        ctx: &mut RequestContext,
        chunks: Vec<BodyChunk>,
    ) -> Result<Vec<Emit>, FilterError> {
        match ctx.state {
            State::Buffering => {}
            State::Done => return Ok(ctx.forward_late(chunks)),
            state => {
                tracing::error!(?state, "body delivered in unexpected state, category=system");
                return self.recover(ctx, ErrorCategory::System, chunks);
            }
        }

        if !ctx.buffer_initialized {
            self.init_buffer(ctx);
        }

        let mut trailing = None;
        let mut chunks = chunks.into_iter();
        while let Some(chunk) = chunks.next() {
            if let Err(e) = ctx.buffer.append(&chunk.data) {
                tracing::warn!(error = %e, category = %e.category(), "response exceeds size limit");
                let mut rest = vec![chunk];
                rest.extend(chunks);
                return self.recover(ctx, e.category(), rest);
            }
            if chunk.last {
                trailing = Some(chunks.collect::<Vec<_>>());
                break;
            }
        }

        let Some(trailing) = trailing else {
            return Ok(Vec::new());
        };

        tracing::debug!(size = ctx.buffer.len(), "buffered complete response");
        let original = ctx.buffer.take_bytes();
        let mut out = self.complete(ctx, original)?;
        out.extend(ctx.forward_late(trailing));
        Ok(out)
    }

    fn init_buffer(&self, ctx: &mut RequestContext) {
        ctx.buffer_initialized = true;
        let Some(len) = ctx.upstream.content_length() else {
            return;
        };
        if len == 0 || len > self.config.max_size as u64 {
            return;
        }
        let hint = usize::try_from(len)
            .unwrap_or(RESERVE_CEILING)
            .min(RESERVE_CEILING);
        if let Err(e) = ctx.buffer.reserve(hint) {
            tracing::warn!(error = %e, hint, "failed to pre-reserve buffer capacity");
        }
    }

    /// Everything after the final chunk: decode, convert, finalize
    fn complete(
        &mut self,
        ctx: &mut RequestContext,
        original: Bytes,
    ) -> Result<Vec<Emit>, FilterError> {
        let html = if ctx.compression.pending() {
            ctx.state = State::Decompressing;
            match self.decompress(ctx, &original) {
                Ok(html) => html,
                Err(category) => return self.recover_with_original(ctx, category, original),
            }
        } else {
            original.clone()
        };

        let if_none_match = ctx.request.if_none_match().map(<[u8]>::to_vec);
        let evaluator = ConditionalEvaluator::new(
            self.config.conditional_requests,
            self.config.generate_etag,
        );
        if evaluator.applies(if_none_match.as_deref()) {
            ctx.state = State::ConditionalCheck;
        }

        let result = match self.convert(ctx, &html) {
            Ok(result) => result,
            Err(category) => return self.recover_with_original(ctx, category, original),
        };

        let mut out = Vec::new();
        let matched = evaluator.evaluate(if_none_match.as_deref(), result.etag_bytes());
        if matched == ConditionalMatch::Match {
            tracing::debug!("If-None-Match matched, sending 304");
            let head = headers::not_modified(&ctx.upstream, &result, ctx.authenticated);
            ctx.forward_headers(head, &mut out);
            out.push(Emit::final_body(Bytes::new()));
            ctx.body_replaced = true;
            ctx.state = State::Done;
            return Ok(out);
        }

        ctx.state = State::Finalizing;
        let mut head = ctx.upstream.clone();
        headers::apply_markdown_headers(&mut head, &result, &self.config, ctx.authenticated);
        ctx.forward_headers(head, &mut out);

        let body = if ctx.request.is_head() {
            tracing::debug!("HEAD request, omitting body");
            Bytes::new()
        } else {
            result.markdown
        };
        out.push(Emit::final_body(body));
        ctx.body_replaced = true;
        ctx.state = State::Done;
        Ok(out)
    }

    fn decompress(
        &self,
        ctx: &mut RequestContext,
        original: &[u8],
    ) -> Result<Bytes, ErrorCategory> {
        let kind = ctx.compression.kind;
        let engine = DecompressionEngine::new(self.config.max_size);
        self.metrics.add_decompression_attempted();

        match engine.decompress(kind, original) {
            Ok(decoded) => {
                ctx.compression.mark_done(original.len(), decoded.len());
                self.metrics.add_decompression_succeeded(kind);
                let ratio = decoded.len() as f64 / original.len().max(1) as f64;
                tracing::info!(
                    encoding = %kind,
                    compressed = original.len(),
                    decompressed = decoded.len(),
                    ratio,
                    "decompression succeeded"
                );
                Ok(Bytes::from(decoded))
            }
            Err(e) => {
                self.metrics.add_decompression_failed();
                // Unsupported kinds are bypassed in on_headers and never get here
                let category = e.category().unwrap_or(ErrorCategory::System);
                if category == ErrorCategory::System {
                    tracing::error!(
                        encoding = %kind,
                        error = %e,
                        %category,
                        "decompression failed"
                    );
                } else {
                    tracing::warn!(
                        encoding = %kind,
                        error = %e,
                        %category,
                        "decompression failed"
                    );
                }
                Err(category)
            }
        }
    }

    /// The single converter call of a request
    fn convert(
        &mut self,
        ctx: &mut RequestContext,
        html: &[u8],
    ) -> Result<ConversionResult, ErrorCategory> {
        if ctx.conversion_attempted {
            tracing::error!("conversion already attempted for this request, category=system");
            return Err(ErrorCategory::System);
        }
        ctx.conversion_attempted = true;
        if ctx.state != State::ConditionalCheck {
            ctx.state = State::Converting;
        }
        self.metrics.add_attempted();

        let mut options = ConversionOptions::from_config(&self.config);
        options.content_type = ctx
            .upstream
            .content_type()
            .map(|ct| String::from_utf8_lossy(ct).into_owned());
        options.base_url = ctx.request.base_url(self.config.server_name.as_deref());
        if options.base_url.is_none() {
            tracing::debug!("continuing conversion without base_url");
        }

        let started = Instant::now();
        let outcome = self.converter.convert(html, &options);
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => {
                self.metrics
                    .add_succeeded(html.len(), result.markdown.len(), elapsed);
                tracing::debug!(
                    input = html.len(),
                    output = result.markdown.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "conversion succeeded"
                );
                Ok(result)
            }
            Err(e) => {
                let category = e.category();
                self.metrics.add_failed(category);
                if category == ErrorCategory::System {
                    tracing::error!(code = e.code(), %category, error = %e, "conversion failed");
                } else {
                    tracing::warn!(code = e.code(), %category, error = %e, "conversion failed");
                }
                Err(category)
            }
        }
    }

    fn recover_with_original(
        &mut self,
        ctx: &mut RequestContext,
        category: ErrorCategory,
        original: Bytes,
    ) -> Result<Vec<Emit>, FilterError> {
        self.recover(ctx, category, vec![BodyChunk::last(original)])
    }

    /// Single exit for every failure point
    ///
    /// `rest` is the input not yet accepted into the buffer; it follows
    /// whatever the buffer still holds.
    fn recover(
        &mut self,
        ctx: &mut RequestContext,
        category: ErrorCategory,
        rest: Vec<BodyChunk>,
    ) -> Result<Vec<Emit>, FilterError> {
        ctx.state = State::ErrorRecovery;

        if self.config.on_error == FailurePolicy::Reject {
            tracing::debug!(%category, "reject policy, aborting request");
            ctx.buffer.release();
            ctx.state = State::Done;
            return Err(FilterError::Rejected { category });
        }
        tracing::debug!(%category, "fail-open, returning original response");

        let mut out = Vec::new();
        ctx.forward_original_headers(&mut out);
        if !ctx.buffer.is_empty() {
            let prefix = ctx.buffer.take_bytes();
            out.push(Emit::Body {
                data: prefix,
                last: false,
            });
        }
        out.extend(rest.into_iter().map(Emit::body));
        ctx.buffer.release();
        ctx.state = State::Done;
        Ok(out)
    }
}
