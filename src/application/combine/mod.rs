//! Grouping, minification and concatenation of sources.

pub mod css_imports;

use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::domain::{content_type::ContentType, options::MinifyOptions};

use super::{
    context::RequestContext,
    minify::{Minifier, MinifyError},
    source::{Source, SourceError},
};

#[derive(Debug, Error)]
pub enum CombineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Minifier(#[from] MinifyError),
}

/// Combined, minified and not yet encoded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheArtifact {
    pub content: Bytes,
    /// Sum of the raw source lengths, for reporting.
    pub original_length: usize,
}

impl CacheArtifact {
    pub fn new(content: impl Into<Bytes>, original_length: usize) -> Self {
        Self {
            content: content.into(),
            original_length,
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

struct Group<'a> {
    minifier: &'a Minifier,
    options: MinifyOptions,
    parts: Vec<String>,
}

/// Combine `sources` into one artifact.
///
/// Consecutive sources sharing minifier and options are joined and minified in one
/// call. Stylesheets are always minified one file at a time.
pub fn combine(sources: &[Source], ctx: &RequestContext) -> Result<CacheArtifact, CombineError> {
    let started_at = Instant::now();
    let content_type = ctx.content_type;
    let separator = content_type.separator();
    let default_minifier = ctx.minifiers.get(content_type);
    let default_options = ctx.options_for(content_type);

    let mut chunks = Vec::new();
    let mut original_length = 0;
    let mut pending: Option<Group<'_>> = None;
    let mut minify_calls = 0usize;

    for source in sources {
        let text = read_source(source, ctx)?;
        original_length += text.len();

        if ctx.debug {
            chunks.push(annotate(source, content_type, &text));
            continue;
        }

        let minifier = source.minifier().unwrap_or(default_minifier);
        let options = merge_options(&default_options, source.minify_options());

        let joins_pending = content_type != ContentType::Css
            && pending.as_ref().is_some_and(|group| {
                group.minifier.identity() == minifier.identity() && group.options == options
            });
        if joins_pending {
            if let Some(group) = pending.as_mut() {
                group.parts.push(text);
            }
            continue;
        }
        if let Some(group) = pending.take() {
            chunks.push(flush(group, separator)?);
            minify_calls += 1;
        }
        pending = Some(Group {
            minifier,
            options,
            parts: vec![text],
        });
    }
    if let Some(group) = pending.take() {
        chunks.push(flush(group, separator)?);
        minify_calls += 1;
    }

    let mut content = chunks.join(separator);
    if content_type == ContentType::Css {
        content = css_imports::handle_imports(content, ctx.bubble_css_imports);
    }
    for filter in ctx.filters.iter().filter(|f| f.applies_to(content_type)) {
        content = filter.apply(&content);
    }
    if let Some(post_processor) = &ctx.post_processor {
        content = post_processor.apply(&content, content_type);
    }

    debug!(
        target = "tessera::combine",
        op = "combine",
        content_type = content_type.as_str(),
        sources = sources.len(),
        minify_calls,
        original_bytes = original_length,
        output_bytes = content.len(),
        debug_mode = ctx.debug,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Sources combined"
    );

    Ok(CacheArtifact::new(content, original_length))
}

fn read_source(source: &Source, ctx: &RequestContext) -> Result<String, SourceError> {
    match source.path() {
        Some(path) if ctx.process_css_imports && ctx.content_type == ContentType::Css => {
            css_imports::inline_imports(path)
        }
        _ => source.content(),
    }
}

fn merge_options(defaults: &MinifyOptions, overrides: &MinifyOptions) -> MinifyOptions {
    if overrides.is_empty() {
        return defaults.clone();
    }
    let mut merged = defaults.clone();
    for (key, value) in overrides.iter() {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn flush(group: Group<'_>, separator: &str) -> Result<String, MinifyError> {
    let joined = group.parts.join(separator);
    group.minifier.minify(&joined, &group.options)
}

fn annotate(source: &Source, content_type: ContentType, text: &str) -> String {
    let label = source.label().replace("*/", "* /").replace("--", "- -");
    match content_type {
        ContentType::Html => format!("<!-- {label} -->\n{text}"),
        ContentType::Css | ContentType::Js => format!("/* {label} */\n{text}"),
    }
}
