//! Regex-driven HTML minifier.
//!
//! The document is treated as token soup rather than a DOM: protected regions
//! (`<script>`, `<style>`, `<pre>`, `<textarea>`, dynamic include blocks) are swapped
//! for opaque placeholders, whitespace and comment rules run over what is left, and
//! the placeholders are restored at the end. Malformed fragments pass through.
//!
//! The minifier never fails. A stage that cannot run logs a warning and hands its
//! input to the next stage unchanged.

mod placeholders;
mod steps;
mod tags;

use std::{fmt, sync::Arc, time::Instant};

use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{config::HtmlSettings, domain::options::MinifyOptions};

use self::{placeholders::Placeholders, steps::StepError};

use super::Minifier;

const DEFAULT_TEMPLATE_TYPES: [&str; 2] = ["text/template", "text/x-handlebars-template"];
const DEFAULT_DYNAMIC_TAGS: [&str; 2] = ["mfunc", "mclude"];

/// Tunables for [`HtmlMinifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlOptions {
    /// Force XHTML handling; `None` sniffs the DOCTYPE.
    pub xhtml: Option<bool>,
    /// Force HTML5 handling; `None` sniffs the DOCTYPE.
    pub html5: Option<bool>,
    /// Collapse line breaks to a single space instead of a single newline.
    pub strip_crlf: bool,
    /// Put a line break before the first attribute of every open tag.
    pub break_before_attributes: bool,
    /// Comments containing any of these substrings survive.
    pub ignored_comments: Vec<String>,
    /// `<script type>` values whose bodies are kept verbatim.
    pub template_script_types: Vec<String>,
    /// Marker words of dynamic include blocks (`<!-- mfunc -->...<!-- /mfunc -->`).
    pub dynamic_tags: Vec<String>,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            xhtml: None,
            html5: None,
            strip_crlf: false,
            break_before_attributes: true,
            ignored_comments: Vec::new(),
            template_script_types: DEFAULT_TEMPLATE_TYPES.map(String::from).to_vec(),
            dynamic_tags: DEFAULT_DYNAMIC_TAGS.map(String::from).to_vec(),
        }
    }
}

impl From<&HtmlSettings> for HtmlOptions {
    fn from(settings: &HtmlSettings) -> Self {
        Self {
            xhtml: None,
            html5: None,
            strip_crlf: settings.strip_crlf,
            break_before_attributes: settings.break_before_attributes,
            ignored_comments: settings.ignored_comments.clone(),
            template_script_types: settings.template_script_types.clone(),
            dynamic_tags: settings.dynamic_tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedKind {
    Script,
    Style,
}

/// Decides whether an embedded block is left verbatim: `(kind, open_tag, body)`.
pub type SkipFilter = dyn Fn(EmbeddedKind, &str, &str) -> bool + Send + Sync;

#[derive(Clone)]
pub struct HtmlMinifier {
    options: HtmlOptions,
    css: Option<Arc<Minifier>>,
    js: Option<Arc<Minifier>>,
    skip: Option<Arc<SkipFilter>>,
    dynamic: Option<Result<Regex, regex::Error>>,
}

impl Default for HtmlMinifier {
    fn default() -> Self {
        Self::new(HtmlOptions::default())
    }
}

impl fmt::Debug for HtmlMinifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlMinifier")
            .field("options", &self.options)
            .field("css", &self.css)
            .field("js", &self.js)
            .field("skip", &self.skip.as_ref().map(|_| "<filter>"))
            .finish()
    }
}

impl HtmlMinifier {
    pub fn new(options: HtmlOptions) -> Self {
        let dynamic = dynamic_pattern(&options.dynamic_tags);
        Self {
            options,
            css: None,
            js: None,
            skip: None,
            dynamic,
        }
    }

    pub fn options(&self) -> &HtmlOptions {
        &self.options
    }

    /// Minifier for `<style>` bodies; without one, bodies are trimmed.
    pub fn with_css_minifier(mut self, minifier: Minifier) -> Self {
        self.css = Some(Arc::new(minifier));
        self
    }

    /// Minifier for `<script>` bodies; without one, bodies are trimmed.
    pub fn with_js_minifier(mut self, minifier: Minifier) -> Self {
        self.js = Some(Arc::new(minifier));
        self
    }

    pub fn with_skip_filter(
        mut self,
        filter: impl Fn(EmbeddedKind, &str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Arc::new(filter));
        self
    }

    /// Stable description of everything that changes this minifier's output.
    pub fn identity(&self) -> String {
        let options = serde_json::to_string(&self.options).unwrap_or_default();
        let css = self.css.as_ref().map(|m| m.identity()).unwrap_or_default();
        let js = self.js.as_ref().map(|m| m.identity()).unwrap_or_default();
        let skip = if self.skip.is_some() { "skip" } else { "" };
        format!("html{options}[css={css};js={js};{skip}]")
    }

    pub fn minify(&self, html: &str) -> String {
        self.minify_with(html, &MinifyOptions::new())
    }

    /// Minify with per-call overrides (`xhtml`, `html5`, `strip_crlf`).
    pub fn minify_with(&self, html: &str, overrides: &MinifyOptions) -> String {
        let started_at = Instant::now();
        let xhtml = overrides.get_bool("xhtml").or(self.options.xhtml);
        let html5 = overrides.get_bool("html5").or(self.options.html5);
        let strip_crlf = overrides
            .get_bool("strip_crlf")
            .unwrap_or(self.options.strip_crlf);

        let text = steps::normalize_line_endings(html);
        let doc = steps::detect_document(&text, xhtml, html5);
        let mut table = Placeholders::for_document(&text);

        let mut text = text;
        if let Some(dynamic) = &self.dynamic {
            text = run_step("protect_dynamic", text, |t| {
                steps::protect_dynamic(t, dynamic, &mut table)
            });
        }
        text = run_step("protect_scripts", text, |t| {
            steps::protect_scripts(t, &mut table, self, doc.xhtml)
        });
        text = run_step("protect_styles", text, |t| {
            steps::protect_styles(t, &mut table, self, doc.xhtml)
        });
        text = run_step("protect_pre", text, |t| steps::protect_pre(t, &mut table));
        text = run_step("protect_textarea", text, |t| {
            steps::protect_textarea(t, &mut table)
        });
        text = run_step("strip_comments", text, |t| {
            steps::strip_comments(t, &self.options.ignored_comments)
        });
        text = run_step("trim_lines", text, steps::trim_lines);
        text = run_step(
            "collapse_block_whitespace",
            text,
            steps::collapse_block_whitespace,
        );
        text = run_step("collapse_text_runs", text, steps::collapse_text_runs);
        text = run_step("normalize_void_tags", text, |t| {
            steps::normalize_void_tags(t, doc.xhtml)
        });
        if self.options.break_before_attributes {
            text = run_step(
                "break_before_attributes",
                text,
                steps::break_before_attributes,
            );
        }
        text = run_step("collapse_newlines", text, |t| {
            steps::collapse_newlines(t, strip_crlf)
        });

        let mut text = table.restore(&text);
        if doc.html5 {
            text = run_step(
                "drop_default_type_attrs",
                text,
                steps::drop_default_type_attrs,
            );
        }
        if !doc.xhtml {
            text = run_step("unquote_attributes", text, steps::unquote_attributes);
        }

        debug!(
            target = "tessera::minify::html",
            op = "html::minify",
            input_bytes = html.len(),
            output_bytes = text.len(),
            placeholders = table.len(),
            xhtml = doc.xhtml,
            html5 = doc.html5,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "HTML minified"
        );
        text
    }

    pub(crate) fn is_template_type(&self, script_type: &str) -> bool {
        self.options
            .template_script_types
            .iter()
            .any(|known| known.eq_ignore_ascii_case(script_type))
    }

    pub(crate) fn skips(&self, kind: EmbeddedKind, open_tag: &str, body: &str) -> bool {
        self.skip
            .as_ref()
            .is_some_and(|filter| filter(kind, open_tag, body))
    }

    pub(crate) fn minify_embedded(&self, kind: EmbeddedKind, body: &str) -> String {
        let trimmed = body.trim_matches(|c: char| c.is_ascii_whitespace());
        let minifier = match kind {
            EmbeddedKind::Script => self.js.as_ref(),
            EmbeddedKind::Style => self.css.as_ref(),
        };
        let Some(minifier) = minifier else {
            return trimmed.to_string();
        };
        match minifier.minify(trimmed, &MinifyOptions::new()) {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    target = "tessera::minify::html",
                    op = "html::minify_embedded",
                    kind = ?kind,
                    result = "embedded_fallback",
                    error = %err,
                    "Embedded minifier failed; keeping trimmed source"
                );
                counter!("tessera_minify_fallback_total").increment(1);
                trimmed.to_string()
            }
        }
    }
}

fn run_step(
    step: &'static str,
    text: String,
    apply: impl FnOnce(&str) -> Result<String, StepError>,
) -> String {
    match apply(&text) {
        Ok(next) => next,
        Err(err) => {
            warn!(
                target = "tessera::minify::html",
                op = "html::minify",
                step,
                result = "step_skipped",
                error = %err,
                "HTML minifier step failed; keeping previous output"
            );
            counter!("tessera_minify_fallback_total").increment(1);
            text
        }
    }
}

fn dynamic_pattern(tags: &[String]) -> Option<Result<Regex, regex::Error>> {
    let words: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(regex::escape)
        .collect();
    if words.is_empty() {
        return None;
    }
    let alternatives = words.join("|");
    Some(Regex::new(&format!(
        r"(?is)<!--\s*(?:{alternatives})\b.*?<!--\s*/(?:{alternatives})\b.*?-->"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact() -> HtmlMinifier {
        HtmlMinifier::new(HtmlOptions {
            break_before_attributes: false,
            ..HtmlOptions::default()
        })
    }

    #[test]
    fn script_literal_whitespace_is_preserved() {
        let html = "<script>var x=\"  a   b  \";</script>";
        assert_eq!(HtmlMinifier::default().minify(html), html);
    }

    #[test]
    fn meta_keeps_quotes_but_div_loses_them() {
        let minifier = compact();
        assert_eq!(
            minifier.minify("<meta charset=\"utf-8\">"),
            "<meta charset=\"utf-8\">"
        );
        assert_eq!(minifier.minify("<div class=\"x\">"), "<div class=x>");

        let broken = HtmlMinifier::default().minify("<div class=\"x\">");
        assert_eq!(broken, "<div\nclass=x>");
    }

    #[test]
    fn minifying_twice_changes_nothing() {
        let html = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title> Demo </title>
    <link rel="stylesheet" href="site.css" />
    <style type="text/css">
      body { color: red; }
    </style>
  </head>
  <body>
    <!-- navigation -->
    <p class="lead">Hello <b>world</b> and <i>friends</i></p>
    <pre>  keep
   this </pre>
    <img src="a.png" alt="" />
    <textarea name="t">  raw  </textarea>
    <script type="text/javascript">
      var s = "a  b";
    </script>
  </body>
</html>
"#;
        for minifier in [HtmlMinifier::default(), compact()] {
            let once = minifier.minify(html);
            let twice = minifier.minify(&once);
            assert_eq!(once, twice);
            assert!(once.contains("<pre>  keep\n   this </pre>"));
            assert!(once.contains("var s = \"a  b\";"));
            assert!(!once.contains("navigation"));
            assert!(once.contains("<textarea"));
            assert!(once.contains(">  raw  </textarea>"));
        }
    }

    #[test]
    fn html5_documents_drop_redundant_markup() {
        let out = compact().minify(
            "<!DOCTYPE html>\n<link rel=\"stylesheet\" href=\"a.css\" />\n<script type=\"text/javascript\" src=\"a.js\"></script>",
        );
        insta::assert_snapshot!(
            out,
            @r#"<!DOCTYPE html>
<link rel=stylesheet href=a.css> <script src=a.js></script>"#
        );
    }

    #[test]
    fn xhtml_documents_keep_quotes_and_slashes() {
        let out = compact().minify(
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Strict//EN\" \"x\">\n<br />\n<p class=\"a\">x</p>",
        );
        assert!(out.contains("<br/>"));
        assert!(out.contains("<p class=\"a\">"));
    }

    #[test]
    fn xhtml_scripts_settle_after_one_pass() {
        let html = "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Strict//EN\" \"x\">\n\
                    <script>if (a < b) go();</script>\n\
                    <script>//<![CDATA[\nvar t = a && b;\n//]]></script>";
        let minifier = compact();

        let once = minifier.minify(html);
        assert!(once.contains("<script>if (a < b) go();</script>"));
        assert!(once.contains("<script>/*<![CDATA[*/var t = a && b;/*]]>*/</script>"));
        assert_eq!(minifier.minify(&once), once);
    }

    #[test]
    fn fragments_drop_void_slashes() {
        assert_eq!(HtmlMinifier::default().minify("<p>a<br />b</p>"), "<p>a<br>b</p>");
    }

    #[test]
    fn conditional_comments_survive() {
        let out = compact().minify("<p>a</p>\n<!--[if lt IE 9]><script src=\"h.js\"></script><![endif]-->\n<!-- gone -->");
        assert!(out.contains("<!--[if lt IE 9]><script src=\"h.js\"></script><![endif]-->"));
        assert!(!out.contains("gone"));
    }

    #[test]
    fn dynamic_blocks_are_untouched() {
        let html = "<div>\n  <!-- mfunc secret -->  echo   1; <!-- /mfunc secret -->\n</div>";
        let out = compact().minify(html);
        assert!(out.contains("<!-- mfunc secret -->  echo   1; <!-- /mfunc secret -->"));
    }

    #[test]
    fn strip_crlf_joins_lines_with_spaces() {
        let minifier = HtmlMinifier::new(HtmlOptions {
            strip_crlf: true,
            ..HtmlOptions::default()
        });
        assert_eq!(
            minifier.minify("<div>\n  <p>a</p>\n</div>"),
            "<div> <p>a</p> </div>"
        );
    }

    #[test]
    fn embedded_minifiers_and_skip_filter_apply() {
        let minifier = compact()
            .with_js_minifier(Minifier::callback("upper", |text: &str, _: &MinifyOptions| {
                Ok(text.to_uppercase())
            }))
            .with_skip_filter(|kind, open, _| {
                kind == EmbeddedKind::Script && open.contains("data-raw")
            });

        let out = minifier.minify("<script>a()</script><script data-raw>b()</script>");
        assert_eq!(out, "<script>A()</script><script data-raw>b()</script>");
    }

    #[test]
    fn failing_embedded_minifier_keeps_source() {
        let minifier = compact().with_css_minifier(Minifier::callback(
            "broken",
            |_: &str, _: &MinifyOptions| Err("boom".to_string()),
        ));
        assert_eq!(
            minifier.minify("<style>\n p { x: y }\n</style>"),
            "<style>p { x: y }</style>"
        );
    }

    #[test]
    fn identity_tracks_options() {
        let a = HtmlMinifier::default().identity();
        let b = compact().identity();
        assert_ne!(a, b);
        assert_eq!(a, HtmlMinifier::default().identity());
    }
}
