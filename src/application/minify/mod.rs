//! Minifier registry.
//!
//! A minifier is a black box from text to text. The combiner only needs two things
//! from it: `minify` and a stable `identity` that goes into the cache fingerprint and
//! decides which sources may share a group.

pub mod external;
pub mod html;

use std::{collections::BTreeMap, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    config::{HtmlSettings, MinifySettings},
    domain::{content_type::ContentType, options::MinifyOptions},
};

pub use self::{
    external::{ExternalMinifier, ExternalMinifierError},
    html::{EmbeddedKind, HtmlMinifier, HtmlOptions},
};

#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("external minifier `{program}` failed: {source}")]
    External {
        program: String,
        #[source]
        source: ExternalMinifierError,
    },
    #[error("minifier `{name}` failed: {message}")]
    Callback { name: String, message: String },
}

type MinifyFn = dyn Fn(&str, &MinifyOptions) -> Result<String, String> + Send + Sync;

/// Named in-process minifier. The name is its identity, so two callbacks with the
/// same name are assumed to produce the same output.
#[derive(Clone)]
pub struct CallbackMinifier {
    name: String,
    func: Arc<MinifyFn>,
}

impl CallbackMinifier {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&str, &MinifyOptions) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CallbackMinifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackMinifier")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Minifier {
    PassThrough,
    Html(HtmlMinifier),
    External(ExternalMinifier),
    Callback(CallbackMinifier),
}

impl Minifier {
    pub fn callback(
        name: impl Into<String>,
        func: impl Fn(&str, &MinifyOptions) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Minifier::Callback(CallbackMinifier::new(name, func))
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Minifier::PassThrough)
    }

    pub fn identity(&self) -> String {
        match self {
            Minifier::PassThrough => "pass-through".to_string(),
            Minifier::Html(html) => html.identity(),
            Minifier::External(external) => format!("external:{}", external.identity()),
            Minifier::Callback(callback) => format!("callback:{}", callback.name),
        }
    }

    pub fn minify(&self, text: &str, options: &MinifyOptions) -> Result<String, MinifyError> {
        match self {
            Minifier::PassThrough => Ok(text.to_string()),
            Minifier::Html(html) => Ok(html.minify_with(text, options)),
            Minifier::External(external) => {
                external
                    .minify(text, options)
                    .map_err(|source| MinifyError::External {
                        program: external.program.display().to_string(),
                        source,
                    })
            }
            Minifier::Callback(callback) => {
                (callback.func)(text, options).map_err(|message| MinifyError::Callback {
                    name: callback.name.clone(),
                    message,
                })
            }
        }
    }
}

static PASS_THROUGH: Minifier = Minifier::PassThrough;

/// Default minifier per content type. Types without an entry pass through.
#[derive(Debug, Clone)]
pub struct MinifierRegistry {
    minifiers: BTreeMap<ContentType, Minifier>,
}

impl Default for MinifierRegistry {
    fn default() -> Self {
        let mut minifiers = BTreeMap::new();
        minifiers.insert(ContentType::Css, Minifier::PassThrough);
        minifiers.insert(ContentType::Js, Minifier::PassThrough);
        minifiers.insert(ContentType::Html, Minifier::Html(HtmlMinifier::default()));
        Self { minifiers }
    }
}

impl MinifierRegistry {
    pub fn empty() -> Self {
        Self {
            minifiers: BTreeMap::new(),
        }
    }

    pub fn with(mut self, content_type: ContentType, minifier: Minifier) -> Self {
        self.register(content_type, minifier);
        self
    }

    pub fn register(&mut self, content_type: ContentType, minifier: Minifier) {
        self.minifiers.insert(content_type, minifier);
    }

    pub fn get(&self, content_type: ContentType) -> &Minifier {
        self.minifiers.get(&content_type).unwrap_or(&PASS_THROUGH)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContentType, &Minifier)> {
        self.minifiers.iter().map(|(ty, minifier)| (*ty, minifier))
    }

    /// Registry described by configuration: external commands where configured,
    /// pass-through otherwise, and an HTML minifier that reuses the CSS and JS
    /// minifiers for embedded blocks.
    pub fn from_settings(minify: &MinifySettings, html: &HtmlSettings) -> Self {
        let external = |content_type: ContentType| {
            minify
                .external
                .get(&content_type)
                .map(|command| Minifier::External(ExternalMinifier::from_settings(command)))
        };

        let mut html_minifier = HtmlMinifier::new(HtmlOptions::from(html));
        let css = external(ContentType::Css);
        let js = external(ContentType::Js);
        if let Some(css) = css.clone() {
            html_minifier = html_minifier.with_css_minifier(css);
        }
        if let Some(js) = js.clone() {
            html_minifier = html_minifier.with_js_minifier(js);
        }
        let html_minifier = external(ContentType::Html).unwrap_or(Minifier::Html(html_minifier));

        Self::empty()
            .with(ContentType::Css, css.unwrap_or(Minifier::PassThrough))
            .with(ContentType::Js, js.unwrap_or(Minifier::PassThrough))
            .with(ContentType::Html, html_minifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_scripts_and_styles_through() {
        let registry = MinifierRegistry::default();
        assert!(registry.get(ContentType::Css).is_pass_through());
        assert!(registry.get(ContentType::Js).is_pass_through());
        assert!(matches!(registry.get(ContentType::Html), Minifier::Html(_)));
        assert!(MinifierRegistry::empty().get(ContentType::Html).is_pass_through());
    }

    #[test]
    fn callback_errors_carry_the_name() {
        let minifier = Minifier::callback("strict", |_: &str, _: &MinifyOptions| {
            Err("unexpected token".to_string())
        });
        let err = minifier
            .minify("x", &MinifyOptions::new())
            .expect_err("callback fails");
        assert_eq!(err.to_string(), "minifier `strict` failed: unexpected token");
    }

    #[test]
    fn identities_distinguish_variants() {
        let ids = [
            Minifier::PassThrough.identity(),
            Minifier::External(ExternalMinifier::new("csso", Vec::new())).identity(),
            Minifier::callback("upper", |t: &str, _: &MinifyOptions| Ok(t.to_uppercase()))
                .identity(),
        ];
        assert_eq!(ids[0], "pass-through");
        assert_eq!(ids[1], "external:csso");
        assert_eq!(ids[2], "callback:upper");
    }

    #[test]
    fn callbacks_see_options() {
        let minifier = Minifier::callback("suffix", |t: &str, options: &MinifyOptions| {
            Ok(format!("{t}{}", options.get_str("suffix").unwrap_or_default()))
        });
        let options = MinifyOptions::new().with("suffix", "!");
        assert_eq!(minifier.minify("hi", &options).expect("minified"), "hi!");
    }

    #[test]
    fn registry_from_settings_uses_configured_commands() {
        let minify = MinifySettings {
            max_age: 0,
            public: true,
            encode: false,
            encodings: Vec::new(),
            forced_encoding: None,
            encode_level: 9,
            debug: false,
            bubble_css_imports: false,
            process_css_imports: false,
            disable_304: false,
            charset: None,
            docs_url: "https://docs.rs/tessera".to_string(),
            external: BTreeMap::from([(
                ContentType::Js,
                crate::config::ExternalCommand {
                    program: "terser".into(),
                    args: vec!["-c".to_string()],
                },
            )]),
        };
        let html = HtmlSettings {
            strip_crlf: true,
            break_before_attributes: false,
            ignored_comments: Vec::new(),
            template_script_types: Vec::new(),
            dynamic_tags: Vec::new(),
        };

        let registry = MinifierRegistry::from_settings(&minify, &html);
        assert!(registry.get(ContentType::Css).is_pass_through());
        assert_eq!(registry.get(ContentType::Js).identity(), "external:terser -c");
        match registry.get(ContentType::Html) {
            Minifier::Html(minifier) => {
                assert!(minifier.options().strip_crlf);
                assert!(minifier.identity().contains("js=external:terser -c"));
            }
            other => panic!("expected html minifier, got {other:?}"),
        }
    }
}
