//! Serve orchestration.
//!
//! One synchronous pass per request: validate the sources, negotiate encoding and
//! conditional GET, then either stream the stored artifact or build, store and
//! send it. Normal mode writes to a [`ResponseSink`]; quiet mode returns a
//! [`ServeOutput`] value and never touches a transport.

use std::{io, sync::Arc, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    cache::{ArtifactKey, ArtifactStore, BuildLocks},
    domain::encoding::ContentEncoding,
};

use super::{
    combine::{CacheArtifact, combine},
    context::RequestContext,
    encoding::{encode, select_encoding, variants},
    error::ServeError,
    fingerprint::{fingerprint, last_modified},
    negotiate::{CacheMetadata, ClientHeaders, Negotiation, negotiate},
    source::Source,
};

/// Transport seam for normal mode.
pub trait ResponseSink {
    fn status(&mut self, status: u16);
    fn header(&mut self, name: &str, value: &str);
    fn body(&mut self) -> &mut dyn io::Write;
}

/// Sink that keeps everything in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl ResponseSink for BufferedResponse {
    fn status(&mut self, status: u16) {
        self.status = status;
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn body(&mut self) -> &mut dyn io::Write {
        &mut self.body
    }
}

/// Quiet-mode result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOutput {
    pub success: bool,
    pub status: u16,
    pub content: Bytes,
    pub headers: Vec<(String, String)>,
}

impl ServeOutput {
    fn failure(status: u16) -> Self {
        Self {
            success: false,
            status,
            content: Bytes::new(),
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// What a normal-mode call put on the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    Sent { status: u16, bytes: u64 },
    Quiet(ServeOutput),
}

enum Body {
    Empty,
    Inline(Bytes),
    Stored {
        store: Arc<dyn ArtifactStore>,
        key: ArtifactKey,
        size: u64,
    },
}

impl Body {
    fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Inline(bytes) => bytes.len() as u64,
            Body::Stored { size, .. } => *size,
        }
    }
}

struct Prepared {
    negotiation: Negotiation,
    body: Body,
    outcome: &'static str,
    encoding: ContentEncoding,
}

/// Entry point of the combine/serve pipeline.
///
/// Holds the optional artifact store and the per-fingerprint build locks; cheap to
/// clone and share between request threads.
#[derive(Clone, Default)]
pub struct AssetService {
    store: Option<Arc<dyn ArtifactStore>>,
    builds: BuildLocks,
}

impl AssetService {
    pub fn new(store: Option<Arc<dyn ArtifactStore>>) -> Self {
        Self {
            store,
            builds: BuildLocks::new(),
        }
    }

    pub fn with_store(store: Arc<dyn ArtifactStore>) -> Self {
        Self::new(Some(store))
    }

    pub fn uncached() -> Self {
        Self::new(None)
    }

    pub fn store(&self) -> Option<&Arc<dyn ArtifactStore>> {
        self.store.as_ref()
    }

    /// Serve `sources` the way `ctx.quiet` asks for.
    ///
    /// Quiet mode never errors and leaves `sink` alone. Normal mode writes status,
    /// headers and body to `sink`; on failure the sink receives the error page and
    /// the error is returned for the caller to report.
    pub fn serve(
        &self,
        sources: &[Source],
        ctx: &RequestContext,
        client: &ClientHeaders,
        sink: &mut dyn ResponseSink,
    ) -> Result<Served, ServeError> {
        if ctx.quiet {
            return Ok(Served::Quiet(self.serve_quiet(sources, ctx, client)));
        }

        let started_at = Instant::now();
        let prepared = match self.prepare(sources, ctx, client) {
            Ok(prepared) => prepared,
            Err(err) => {
                log_failure(&err, sources.len(), started_at);
                write_error_page(&err, &ctx.docs_url, sink);
                return Err(err);
            }
        };

        let status = prepared.negotiation.status;
        let result = emit(&prepared.body, &prepared.negotiation, sink);
        match result {
            Ok(bytes) => {
                log_success(&prepared, sources.len(), bytes, started_at);
                Ok(Served::Sent { status, bytes })
            }
            Err(err) => {
                // Headers are already on the sink; no error page at this point.
                log_failure(&err, sources.len(), started_at);
                Err(err)
            }
        }
    }

    /// Quiet mode: the same decision and headers, returned as data.
    pub fn serve_quiet(
        &self,
        sources: &[Source],
        ctx: &RequestContext,
        client: &ClientHeaders,
    ) -> ServeOutput {
        let started_at = Instant::now();
        let result = self.prepare(sources, ctx, client).and_then(|prepared| {
            let content = materialize(&prepared.body)?;
            log_success(&prepared, sources.len(), content.len() as u64, started_at);
            Ok(ServeOutput {
                success: true,
                status: prepared.negotiation.status,
                content,
                headers: prepared.negotiation.headers,
            })
        });

        result.unwrap_or_else(|err| {
            log_failure(&err, sources.len(), started_at);
            ServeOutput::failure(err.status_code().as_u16())
        })
    }

    fn prepare(
        &self,
        sources: &[Source],
        ctx: &RequestContext,
        client: &ClientHeaders,
    ) -> Result<Prepared, ServeError> {
        validate(sources, ctx)?;

        let choice = select_encoding(
            ctx,
            client.accept_encoding.as_deref(),
            client.user_agent.as_deref(),
        );
        let fingerprint = fingerprint(sources, ctx);
        let modified = last_modified(sources, ctx);
        let metadata = CacheMetadata::new(ctx, &fingerprint, modified, choice.encoding);
        let mut negotiation = negotiate(
            ctx,
            &metadata,
            client,
            choice.encoding,
            choice.send_vary,
            OffsetDateTime::now_utc(),
        );

        if negotiation.is_not_modified() {
            counter!("tessera_not_modified_total").increment(1);
            return Ok(Prepared {
                negotiation,
                body: Body::Empty,
                outcome: "not_modified",
                encoding: choice.encoding,
            });
        }

        let (body, outcome) = match self.store.as_ref().filter(|_| !ctx.debug) {
            Some(store) => {
                let base = ArtifactKey::base(fingerprint);
                self.stored_body(store, &base, sources, ctx, modified, choice.encoding)?
            }
            None => {
                let artifact = combine(sources, ctx)?;
                let content = encode_variant(&artifact.content, choice.encoding, ctx)?;
                (Body::Inline(content), "uncached")
            }
        };

        negotiation.push_header("Content-Length", body.len().to_string());
        Ok(Prepared {
            negotiation,
            body,
            outcome,
            encoding: choice.encoding,
        })
    }

    fn stored_body(
        &self,
        store: &Arc<dyn ArtifactStore>,
        base: &ArtifactKey,
        sources: &[Source],
        ctx: &RequestContext,
        modified: OffsetDateTime,
        encoding: ContentEncoding,
    ) -> Result<(Body, &'static str), ServeError> {
        let key = base.variant(encoding);
        if store.is_valid(key.as_str(), modified) {
            return stored_hit(store, key);
        }

        let slot = self.builds.slot(base.as_str());
        let _building = slot.lock();
        if store.is_valid(key.as_str(), modified) {
            return stored_hit(store, key);
        }

        let started_at = Instant::now();
        let artifact = combine(sources, ctx)?;
        store.store(base.as_str(), &artifact)?;

        let mut selected = encoding.is_identity().then(|| artifact.content.clone());
        for variant in variants(ctx) {
            let encoded = encode(&artifact.content, variant, ctx.encode_level)
                .map_err(ServeError::Encoding)?;
            let stored = CacheArtifact::new(encoded, artifact.original_length);
            store.store(base.variant(variant).as_str(), &stored)?;
            if variant == encoding {
                selected = Some(stored.content);
            }
        }
        let content = match selected {
            Some(content) => content,
            None => encode_variant(&artifact.content, encoding, ctx)?,
        };

        histogram!("tessera_build_ms").record(started_at.elapsed().as_secs_f64() * 1000.0);
        counter!("tessera_artifact_miss_total").increment(1);
        Ok((Body::Inline(content), "cache_miss"))
    }
}

fn stored_hit(
    store: &Arc<dyn ArtifactStore>,
    key: ArtifactKey,
) -> Result<(Body, &'static str), ServeError> {
    let size = store.get_size(key.as_str())?;
    counter!("tessera_artifact_hit_total").increment(1);
    Ok((
        Body::Stored {
            store: Arc::clone(store),
            key,
            size,
        },
        "cache_hit",
    ))
}

fn validate(sources: &[Source], ctx: &RequestContext) -> Result<(), ServeError> {
    if sources.is_empty() {
        return Err(ServeError::bad_request("no sources given"));
    }
    let mismatch = sources.iter().find(|source| {
        source
            .content_type()
            .is_some_and(|content_type| content_type != ctx.content_type)
    });
    if let Some(source) = mismatch {
        return Err(ServeError::bad_request(format!(
            "`{}` is not {}",
            source.id(),
            ctx.content_type
        )));
    }
    Ok(())
}

fn encode_variant(
    content: &Bytes,
    encoding: ContentEncoding,
    ctx: &RequestContext,
) -> Result<Bytes, ServeError> {
    if encoding.is_identity() {
        return Ok(content.clone());
    }
    encode(content, encoding, ctx.encode_level).map_err(ServeError::Encoding)
}

fn materialize(body: &Body) -> Result<Bytes, ServeError> {
    match body {
        Body::Empty => Ok(Bytes::new()),
        Body::Inline(bytes) => Ok(bytes.clone()),
        Body::Stored { store, key, .. } => Ok(store.fetch(key.as_str())?.content),
    }
}

fn emit(
    body: &Body,
    negotiation: &Negotiation,
    sink: &mut dyn ResponseSink,
) -> Result<u64, ServeError> {
    sink.status(negotiation.status);
    for (name, value) in &negotiation.headers {
        sink.header(name, value);
    }
    match body {
        Body::Empty => Ok(0),
        Body::Inline(bytes) => {
            sink.body().write_all(bytes).map_err(ServeError::Output)?;
            Ok(bytes.len() as u64)
        }
        Body::Stored { store, key, .. } if store.supports_display() => {
            Ok(store.display(key.as_str(), sink.body())?)
        }
        Body::Stored { store, key, .. } => {
            let artifact = store.fetch(key.as_str())?;
            sink.body()
                .write_all(&artifact.content)
                .map_err(ServeError::Output)?;
            Ok(artifact.content.len() as u64)
        }
    }
}

/// Status, headers and HTML page for a failed request.
pub fn write_error_page(err: &ServeError, docs_url: &str, sink: &mut dyn ResponseSink) {
    let page = err.page(docs_url);
    sink.status(err.status_code().as_u16());
    sink.header("Content-Type", "text/html; charset=utf-8");
    sink.header("Content-Length", &page.len().to_string());
    if let Err(write_err) = sink.body().write_all(page.as_bytes()) {
        warn!(
            target = "tessera::serve",
            op = "error_page",
            error = %write_err,
            "Failed to write error page"
        );
    }
}

fn log_success(prepared: &Prepared, sources: usize, bytes: u64, started_at: Instant) {
    info!(
        target = "tessera::serve",
        op = "serve",
        result = prepared.outcome,
        status = prepared.negotiation.status,
        encoding = prepared.encoding.as_str(),
        sources,
        bytes,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Artifact served"
    );
}

fn log_failure(err: &ServeError, sources: usize, started_at: Instant) {
    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    if err.is_client_error() {
        warn!(
            target = "tessera::serve",
            op = "serve",
            result = "rejected",
            status = err.status_code().as_u16(),
            sources,
            elapsed_ms,
            error = %err,
            "Request rejected"
        );
    } else {
        error!(
            target = "tessera::serve",
            op = "serve",
            result = "failed",
            status = err.status_code().as_u16(),
            sources,
            elapsed_ms,
            error = %err,
            "Artifact could not be served"
        );
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
