//! Per-request configuration.

use std::{collections::BTreeMap, fmt, sync::Arc};

use time::OffsetDateTime;

use crate::{
    config::MinifySettings,
    domain::{content_type::ContentType, encoding::ContentEncoding, options::MinifyOptions},
};

use super::minify::MinifierRegistry;

pub const DEFAULT_DOCS_URL: &str = "https://docs.rs/tessera";

type PostProcessFn = dyn Fn(&str, ContentType) -> String + Send + Sync;
type FilterFn = dyn Fn(&str) -> String + Send + Sync;

/// Last transformation applied to every combined artifact.
#[derive(Clone)]
pub struct PostProcessor {
    name: String,
    func: Arc<PostProcessFn>,
}

impl PostProcessor {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&str, ContentType) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, content: &str, content_type: ContentType) -> String {
        (self.func)(content, content_type)
    }
}

impl fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Hook over minified CSS or JS, run in registration order.
#[derive(Clone)]
pub struct ContentFilter {
    name: String,
    content_type: ContentType,
    func: Arc<FilterFn>,
}

impl ContentFilter {
    pub fn new(
        name: impl Into<String>,
        content_type: ContentType,
        func: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            content_type,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filters only ever see scripts and stylesheets.
    pub fn applies_to(&self, content_type: ContentType) -> bool {
        self.content_type == content_type
            && matches!(content_type, ContentType::Css | ContentType::Js)
    }

    pub fn apply(&self, content: &str) -> String {
        (self.func)(content)
    }
}

impl fmt::Debug for ContentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFilter")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Everything one serve call needs to know, resolved before any work starts and
/// never changed afterwards.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub content_type: ContentType,
    pub minifiers: MinifierRegistry,
    pub minifier_options: BTreeMap<ContentType, MinifyOptions>,
    /// Seconds; zero sends `max-age=0, must-revalidate`.
    pub max_age: u64,
    pub public: bool,
    pub encode: bool,
    pub allowed_encodings: Vec<ContentEncoding>,
    pub forced_encoding: Option<ContentEncoding>,
    /// gzip/deflate level, 0 to 9.
    pub encode_level: u32,
    pub debug: bool,
    pub post_processor: Option<PostProcessor>,
    pub filters: Vec<ContentFilter>,
    pub bubble_css_imports: bool,
    pub process_css_imports: bool,
    pub quiet: bool,
    pub charset: Option<String>,
    pub disable_304: bool,
    pub last_modified: Option<OffsetDateTime>,
    pub cache_id: Option<String>,
    pub docs_url: String,
}

impl RequestContext {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            minifiers: MinifierRegistry::default(),
            minifier_options: BTreeMap::new(),
            max_age: 1800,
            public: true,
            encode: true,
            allowed_encodings: vec![
                ContentEncoding::Br,
                ContentEncoding::Gzip,
                ContentEncoding::Deflate,
            ],
            forced_encoding: None,
            encode_level: 9,
            debug: false,
            post_processor: None,
            filters: Vec::new(),
            bubble_css_imports: false,
            process_css_imports: false,
            quiet: false,
            charset: Some("utf-8".to_string()),
            disable_304: false,
            last_modified: None,
            cache_id: None,
            docs_url: DEFAULT_DOCS_URL.to_string(),
        }
    }

    /// Context for one request of `content_type` under the configured defaults.
    pub fn from_settings(
        content_type: ContentType,
        settings: &MinifySettings,
        minifiers: MinifierRegistry,
    ) -> Self {
        Self {
            minifiers,
            max_age: settings.max_age,
            public: settings.public,
            encode: settings.encode,
            allowed_encodings: settings.encodings.clone(),
            forced_encoding: settings.forced_encoding,
            encode_level: settings.encode_level,
            debug: settings.debug,
            bubble_css_imports: settings.bubble_css_imports,
            process_css_imports: settings.process_css_imports,
            charset: settings.charset.clone(),
            disable_304: settings.disable_304,
            docs_url: settings.docs_url.clone(),
            ..Self::new(content_type)
        }
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_filter(mut self, filter: ContentFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_post_processor(mut self, post_processor: PostProcessor) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    /// Options handed to the default minifier of `content_type`.
    pub fn options_for(&self, content_type: ContentType) -> MinifyOptions {
        self.minifier_options
            .get(&content_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Max age after debug mode has had its say.
    pub fn effective_max_age(&self) -> u64 {
        if self.debug { 0 } else { self.max_age }
    }

    pub fn content_type_header(&self) -> String {
        match &self.charset {
            Some(charset) if !charset.is_empty() => {
                format!("{}; charset={charset}", self.content_type.mime())
            }
            _ => self.content_type.mime().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_zeroes_max_age() {
        let ctx = RequestContext::new(ContentType::Js).debug(true);
        assert_eq!(ctx.effective_max_age(), 0);
        assert_eq!(RequestContext::new(ContentType::Js).effective_max_age(), 1800);
    }

    #[test]
    fn content_type_header_carries_charset() {
        let mut ctx = RequestContext::new(ContentType::Css);
        assert_eq!(ctx.content_type_header(), "text/css; charset=utf-8");
        ctx.charset = None;
        assert_eq!(ctx.content_type_header(), "text/css");
    }

    #[test]
    fn filters_only_apply_to_scripts_and_styles() {
        let css = ContentFilter::new("banner", ContentType::Css, |s| format!("/*b*/{s}"));
        let html = ContentFilter::new("noop", ContentType::Html, str::to_string);
        assert!(css.applies_to(ContentType::Css));
        assert!(!css.applies_to(ContentType::Js));
        assert!(!html.applies_to(ContentType::Html));
        assert_eq!(css.apply("a{}"), "/*b*/a{}");
    }
}
