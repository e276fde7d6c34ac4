//! Cache fingerprint of a combine request.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{content_type::ContentType, options::MinifyOptions};

use super::{context::RequestContext, source::Source};

#[derive(Serialize)]
struct SourceEntry<'a> {
    id: &'a str,
    mtime: i64,
    minifier: Option<String>,
    options: &'a MinifyOptions,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    content_type: ContentType,
    sources: Vec<SourceEntry<'a>>,
    minifiers: BTreeMap<ContentType, String>,
    minifier_options: &'a BTreeMap<ContentType, MinifyOptions>,
    post_processor: Option<&'a str>,
    filters: Vec<&'a str>,
    bubble_css_imports: bool,
    process_css_imports: bool,
    debug: bool,
}

/// Hex sha256 over everything that can change the combined output.
///
/// Pure: reads the modification times captured when the sources were built.
/// Source order matters. `RequestContext::cache_id` replaces the computed value.
pub fn fingerprint(sources: &[Source], ctx: &RequestContext) -> String {
    if let Some(cache_id) = ctx.cache_id.as_deref().filter(|id| !id.is_empty()) {
        return cache_id.to_string();
    }

    let input = FingerprintInput {
        content_type: ctx.content_type,
        sources: sources
            .iter()
            .map(|source| SourceEntry {
                id: source.id(),
                mtime: source.unix_mtime(),
                minifier: source.minifier().map(|minifier| minifier.identity()),
                options: source.minify_options(),
            })
            .collect(),
        minifiers: ctx
            .minifiers
            .iter()
            .map(|(content_type, minifier)| (content_type, minifier.identity()))
            .collect(),
        minifier_options: &ctx.minifier_options,
        post_processor: ctx.post_processor.as_ref().map(|p| p.name()),
        filters: ctx.filters.iter().map(|filter| filter.name()).collect(),
        bubble_css_imports: ctx.bubble_css_imports,
        process_css_imports: ctx.process_css_imports,
        debug: ctx.debug,
    };

    let mut hasher = Sha256::new();
    // Serializing plain structs and ordered maps cannot fail.
    if let Ok(encoded) = serde_json::to_vec(&input) {
        hasher.update(&encoded);
    }
    hex::encode(hasher.finalize())
}

/// Latest source modification time, or the caller-supplied override.
pub fn last_modified(sources: &[Source], ctx: &RequestContext) -> time::OffsetDateTime {
    ctx.last_modified.unwrap_or_else(|| {
        sources
            .iter()
            .map(Source::last_modified)
            .max()
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
    })
}
