//! Individual stages of the HTML minifier.
//!
//! Every stage is a plain function over the document text so it can be exercised
//! on its own. Stages that depend on a pattern return `StepError` when the pattern
//! is unavailable; the pipeline then keeps the previous text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use super::{
    EmbeddedKind, HtmlMinifier,
    placeholders::Placeholders,
    tags::{OpenTag, Quote},
};

type Pattern = Lazy<Result<Regex, regex::Error>>;

/// ASCII whitespace only: a literal no-break space is content.
const WS: &str = r"[ \t\n\r\x0C]";

const BLOCK_TAGS: &str = "area|article|aside|base(?:font)?|blockquote|body|canvas|caption|center\
|col(?:group)?|dd|dir|div|dl|dt|fieldset|figcaption|figure|footer|form|frame(?:set)?|h[1-6]\
|head|header|hgroup|hr|html|legend|li|link|main|map|menu|meta|nav|ol|opt(?:group|ion)|output\
|p|param|section|t(?:able|body|head|d|h|r|foot|itle)|ul|video";

const XHTML_DOCTYPE: &str = "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML";

static HTML5_DOCTYPE: Pattern = Lazy::new(|| Regex::new(&format!(r"(?i)<!DOCTYPE{WS}+html{WS}*>")));
static SCRIPT: Pattern = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)({WS}*)<script(\b[^>]*?>)((?s:.)*?)</script>({WS}*)"
    ))
});
static SCRIPT_TYPE: Pattern =
    Lazy::new(|| Regex::new(&format!(r#"(?i)\btype{WS}*={WS}*["']?([^"' \t\n\r\x0C>]+)"#)));
static SCRIPT_WRAPPER: Pattern =
    Lazy::new(|| Regex::new(&format!(r"^{WS}*<!--{WS}*|{WS}*(?://)?{WS}*-->{WS}*$")));
static STYLE: Pattern = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i){WS}*<style(\b[^>]*>)((?s:.)*?)</style>{WS}*"
    ))
});
static STYLE_WRAPPER: Pattern = Lazy::new(|| Regex::new(&format!(r"^{WS}*<!--|-->{WS}*$")));
static PRE: Pattern =
    Lazy::new(|| Regex::new(&format!(r"(?i){WS}*<pre(\b[^>]*?>(?s:.)*?</pre>){WS}*")));
static TEXTAREA: Pattern = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i){WS}*<textarea(\b[^>]*?>(?s:.)*?</textarea>){WS}*"
    ))
});
static COMMENT: Pattern = Lazy::new(|| Regex::new(r"(?s)<!--(.*?)-->"));
static LINE_EDGES: Pattern = Lazy::new(|| Regex::new(r"(?m)^[ \t\x0C]+|[ \t\x0C]+$"));
static BLOCK_EDGES: Pattern = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)({WS}*)(</?(?:{BLOCK_TAGS})\b[^>]*>)({WS}*)"
    ))
});
static TEXT_RUN: Pattern = Lazy::new(|| Regex::new(r">([^<]+)<"));
static OPEN_TAG: Pattern = Lazy::new(|| {
    Regex::new(r#"<([A-Za-z][A-Za-z0-9:-]*)((?:[^<>"']|"[^"]*"|'[^']*')*)>"#)
});
static ATTR_BREAK: Pattern =
    Lazy::new(|| Regex::new(&format!(r"(?i)(<[a-z-]+){WS}+([^>]+>)")));
static NEWLINES: Pattern = Lazy::new(|| Regex::new(r"[\r\n]+"));
static RAW_TEXT_OPEN: Pattern = Lazy::new(|| {
    Regex::new(r#"(?i)<!--|<(script|style|textarea)\b(?:[^<>"']|"[^"]*"|'[^']*')*>"#)
});
static SCRIPT_CLOSE: Pattern = Lazy::new(|| Regex::new(r"(?i)</script"));
static STYLE_CLOSE: Pattern = Lazy::new(|| Regex::new(r"(?i)</style"));
static TEXTAREA_CLOSE: Pattern = Lazy::new(|| Regex::new(r"(?i)</textarea"));
static CDATA_OPEN_COMMENT: Pattern =
    Lazy::new(|| Regex::new(r"/\*\s*<!\[CDATA\[\s*\*/"));
static CDATA_CLOSE_COMMENT: Pattern = Lazy::new(|| Regex::new(r"/\*\s*\]\]>\s*\*/"));

const DEFAULT_SCRIPT_TYPES: [&str; 3] = [
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
];

#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error("pattern for `{step}` is unavailable: {source}")]
    Pattern {
        step: &'static str,
        #[source]
        source: regex::Error,
    },
}

fn pattern(step: &'static str, cell: &'static Pattern) -> Result<&'static Regex, StepError> {
    Lazy::force(cell)
        .as_ref()
        .map_err(|err| StepError::Pattern {
            step,
            source: err.clone(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DocumentKind {
    pub(crate) xhtml: bool,
    pub(crate) html5: bool,
}

pub(crate) fn normalize_line_endings(html: &str) -> String {
    html.replace("\r\n", "\n").replace('\r', "\n")
}

/// Sniff the DOCTYPE; explicit settings win over what the document claims.
pub(crate) fn detect_document(
    html: &str,
    xhtml: Option<bool>,
    html5: Option<bool>,
) -> DocumentKind {
    let xhtml = xhtml.unwrap_or_else(|| html.contains(XHTML_DOCTYPE));
    let html5 = html5.unwrap_or_else(|| {
        !xhtml
            && pattern("detect_document", &HTML5_DOCTYPE)
                .map(|re| re.is_match(html))
                .unwrap_or(false)
    });
    DocumentKind { xhtml, html5 }
}

pub(crate) fn protect_dynamic(
    html: &str,
    dynamic: &Result<Regex, regex::Error>,
    table: &mut Placeholders,
) -> Result<String, StepError> {
    let re = dynamic.as_ref().map_err(|err| StepError::Pattern {
        step: "protect_dynamic",
        source: err.clone(),
    })?;
    Ok(re
        .replace_all(html, |caps: &Captures<'_>| table.reserve(caps[0].to_string()))
        .into_owned())
}

pub(crate) fn protect_scripts(
    html: &str,
    table: &mut Placeholders,
    minifier: &HtmlMinifier,
    xhtml: bool,
) -> Result<String, StepError> {
    let re = pattern("protect_scripts", &SCRIPT)?;
    let type_re = pattern("protect_scripts", &SCRIPT_TYPE)?;
    let wrapper = pattern("protect_scripts", &SCRIPT_WRAPPER)?;
    let markers = CdataMarkers::load("protect_scripts")?;

    Ok(re
        .replace_all(html, |caps: &Captures<'_>| {
            let space_before = if caps[1].is_empty() { "" } else { " " };
            let space_after = if caps[4].is_empty() { "" } else { " " };
            let open = format!("<script{}", &caps[2]);
            let body = &caps[3];

            let is_template = type_re
                .captures(&caps[2])
                .is_some_and(|found| minifier.is_template_type(&found[1]));
            let fragment = if is_template || minifier.skips(EmbeddedKind::Script, &open, body) {
                format!("{space_before}{open}{body}</script>{space_after}")
            } else {
                let (cleaned, had_cdata) = strip_cdata(&wrapper.replace_all(body, ""), &markers);
                let script = minifier.minify_embedded(EmbeddedKind::Script, &cleaned);
                // Scripts only get markers back if they came with them.
                if had_cdata && xhtml && needs_cdata(&script) {
                    format!(
                        "{space_before}{open}/*<![CDATA[*/{script}/*]]>*/</script>{space_after}"
                    )
                } else {
                    format!("{space_before}{open}{script}</script>{space_after}")
                }
            };
            table.reserve(fragment)
        })
        .into_owned())
}

pub(crate) fn protect_styles(
    html: &str,
    table: &mut Placeholders,
    minifier: &HtmlMinifier,
    xhtml: bool,
) -> Result<String, StepError> {
    let re = pattern("protect_styles", &STYLE)?;
    let wrapper = pattern("protect_styles", &STYLE_WRAPPER)?;
    let markers = CdataMarkers::load("protect_styles")?;

    Ok(re
        .replace_all(html, |caps: &Captures<'_>| {
            let open = format!("<style{}", &caps[1]);
            let body = &caps[2];
            let fragment = if minifier.skips(EmbeddedKind::Style, &open, body) {
                format!("{open}{body}</style>")
            } else {
                let (cleaned, _) = strip_cdata(&wrapper.replace_all(body, ""), &markers);
                let css = minifier.minify_embedded(EmbeddedKind::Style, &cleaned);
                if xhtml && needs_cdata(&css) {
                    format!("{open}/*<![CDATA[*/{css}/*]]>*/</style>")
                } else {
                    format!("{open}{css}</style>")
                }
            };
            table.reserve(fragment)
        })
        .into_owned())
}

pub(crate) fn protect_pre(html: &str, table: &mut Placeholders) -> Result<String, StepError> {
    let re = pattern("protect_pre", &PRE)?;
    Ok(protect_verbatim(html, re, "pre", table))
}

pub(crate) fn protect_textarea(
    html: &str,
    table: &mut Placeholders,
) -> Result<String, StepError> {
    let re = pattern("protect_textarea", &TEXTAREA)?;
    Ok(protect_verbatim(html, re, "textarea", table))
}

fn protect_verbatim(html: &str, re: &Regex, tag: &str, table: &mut Placeholders) -> String {
    re.replace_all(html, |caps: &Captures<'_>| {
        table.reserve(format!("<{tag}{}", &caps[1]))
    })
    .into_owned()
}

/// Drop comments, keeping conditional comments and anything matching `ignored`.
pub(crate) fn strip_comments(html: &str, ignored: &[String]) -> Result<String, StepError> {
    let re = pattern("strip_comments", &COMMENT)?;
    Ok(re
        .replace_all(html, |caps: &Captures<'_>| {
            let inner = &caps[1];
            let keep = inner.starts_with('[')
                || inner.contains("<![")
                || ignored
                    .iter()
                    .any(|needle| !needle.is_empty() && inner.contains(needle.as_str()));
            if keep {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned())
}

pub(crate) fn trim_lines(html: &str) -> Result<String, StepError> {
    let re = pattern("trim_lines", &LINE_EDGES)?;
    let trimmed = re.replace_all(html, "");
    Ok(trimmed
        .trim_matches(|c: char| c.is_ascii_whitespace())
        .to_string())
}

/// Whitespace next to block-level tags becomes a single line break.
pub(crate) fn collapse_block_whitespace(html: &str) -> Result<String, StepError> {
    let re = pattern("collapse_block_whitespace", &BLOCK_EDGES)?;
    Ok(re
        .replace_all(html, |caps: &Captures<'_>| {
            let before = if caps[1].is_empty() { "" } else { "\n" };
            let after = if caps[3].is_empty() { "" } else { "\n" };
            format!("{before}{}{after}", &caps[2])
        })
        .into_owned())
}

/// Text between tags keeps only the first character of its leading and trailing
/// whitespace runs.
pub(crate) fn collapse_text_runs(html: &str) -> Result<String, StepError> {
    let re = pattern("collapse_text_runs", &TEXT_RUN)?;
    Ok(re
        .replace_all(html, |caps: &Captures<'_>| {
            format!(">{}<", squeeze_edges(&caps[1]))
        })
        .into_owned())
}

fn squeeze_edges(text: &str) -> String {
    let is_ws = |c: char| c.is_ascii_whitespace();
    let without_lead = text.trim_start_matches(is_ws);
    if without_lead.is_empty() {
        return text.chars().next().map(String::from).unwrap_or_default();
    }
    let lead = &text[..text.len() - without_lead.len()];
    let core = without_lead.trim_end_matches(is_ws);
    let trail = &without_lead[core.len()..];

    let mut out = String::with_capacity(core.len() + 2);
    out.extend(lead.chars().next());
    out.push_str(core);
    out.extend(trail.chars().next());
    out
}

/// Tighten `/>` and, outside XHTML, drop the slash on void elements.
pub(crate) fn normalize_void_tags(html: &str, xhtml: bool) -> Result<String, StepError> {
    rewrite_tags(html, |tag| {
        if !tag.self_closing {
            return false;
        }
        if !xhtml && tag.is_void() {
            tag.self_closing = false;
            tag.trailing = if tag.needs_guard_space() { " " } else { "" };
            return true;
        }
        let last_is_bare = tag.attrs.last().is_some_and(|attr| attr.is_bare());
        if !tag.trailing.is_empty() && !last_is_bare {
            tag.trailing = "";
            return true;
        }
        false
    })
}

pub(crate) fn break_before_attributes(html: &str) -> Result<String, StepError> {
    let re = pattern("break_before_attributes", &ATTR_BREAK)?;
    Ok(re.replace_all(html, "${1}\n${2}").into_owned())
}

pub(crate) fn collapse_newlines(html: &str, strip_crlf: bool) -> Result<String, StepError> {
    let re = pattern("collapse_newlines", &NEWLINES)?;
    let replacement = if strip_crlf { " " } else { "\n" };
    Ok(re.replace_all(html, replacement).into_owned())
}

/// Remove `type` attributes that restate the HTML5 default on `<script>`/`<style>`.
pub(crate) fn drop_default_type_attrs(html: &str) -> Result<String, StepError> {
    map_markup(html, |segment| {
        rewrite_tags(segment, |tag| {
            let is_default: fn(&str) -> bool = if tag.is_named("script") {
                |value| {
                    DEFAULT_SCRIPT_TYPES
                        .iter()
                        .any(|known| value.eq_ignore_ascii_case(known))
                }
            } else if tag.is_named("style") {
                |value| value.eq_ignore_ascii_case("text/css")
            } else {
                return false;
            };
            let before = tag.attrs.len();
            tag.attrs.retain(|attr| {
                !(attr.name.eq_ignore_ascii_case("type")
                    && attr
                        .value
                        .as_ref()
                        .is_some_and(|value| is_default(value.text.trim())))
            });
            tag.attrs.len() != before
        })
    })
}

/// Drop quotes around attribute values that do not need them; empty values
/// leave the bare attribute name.
pub(crate) fn unquote_attributes(html: &str) -> Result<String, StepError> {
    map_markup(html, |segment| {
        rewrite_tags(segment, |tag| {
            if tag.is_named("meta") {
                return false;
            }
            let mut changed = false;
            for attr in &mut tag.attrs {
                let Some(value) = attr.value.as_mut() else {
                    continue;
                };
                if value.quote == Quote::Bare {
                    continue;
                }
                if value.text.is_empty() {
                    attr.value = None;
                    changed = true;
                } else if is_unquotable(value.text) {
                    value.quote = Quote::Bare;
                    changed = true;
                }
            }
            if changed && tag.trailing.is_empty() && tag.needs_guard_space() {
                tag.trailing = " ";
            }
            changed
        })
    })
}

fn is_unquotable(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    '-' | '_' | '.' | ':' | '/' | '?' | '#' | '&' | ';' | ',' | '%' | '+' | '@'
                        | '!' | '~' | '*' | '(' | ')'
                )
        })
}

/// Run `edit` over every open tag in `html`; tags it declines to change, or that do
/// not tokenize cleanly, are copied through untouched.
fn rewrite_tags(
    html: &str,
    mut edit: impl FnMut(&mut OpenTag<'_>) -> bool,
) -> Result<String, StepError> {
    let re = pattern("rewrite_tags", &OPEN_TAG)?;
    Ok(re
        .replace_all(html, |caps: &Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            let rest = caps.get(2).map_or("", |m| m.as_str());
            match OpenTag::parse(name, rest) {
                Some(mut tag) => {
                    if edit(&mut tag) {
                        tag.render()
                    } else {
                        caps[0].to_string()
                    }
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned())
}

/// Apply `apply` to markup only, copying comments and the bodies of
/// `<script>`, `<style>` and `<textarea>` through verbatim.
fn map_markup(
    html: &str,
    mut apply: impl FnMut(&str) -> Result<String, StepError>,
) -> Result<String, StepError> {
    let re = pattern("map_markup", &RAW_TEXT_OPEN)?;
    let script_close = pattern("map_markup", &SCRIPT_CLOSE)?;
    let style_close = pattern("map_markup", &STYLE_CLOSE)?;
    let textarea_close = pattern("map_markup", &TEXTAREA_CLOSE)?;
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(caps) = re.captures_at(html, cursor) {
        let Some(found) = caps.get(0) else { break };
        match caps.get(1) {
            None => {
                out.push_str(&apply(&html[cursor..found.start()])?);
                let end = html[found.end()..]
                    .find("-->")
                    .map_or(html.len(), |offset| found.end() + offset + 3);
                out.push_str(&html[found.start()..end]);
                cursor = end;
            }
            Some(element) => {
                out.push_str(&apply(&html[cursor..found.end()])?);
                let closing = if element.as_str().eq_ignore_ascii_case("script") {
                    script_close
                } else if element.as_str().eq_ignore_ascii_case("style") {
                    style_close
                } else {
                    textarea_close
                };
                let body_end = closing
                    .find_at(html, found.end())
                    .map_or(html.len(), |end| end.start());
                out.push_str(&html[found.end()..body_end]);
                cursor = body_end;
            }
        }
    }
    out.push_str(&apply(&html[cursor..])?);
    Ok(out)
}

/// Remove CDATA markers along with the `//` or `/* */` comments that hide them.
/// The flag is set only when the text had markers to remove.
fn strip_cdata(text: &str, markers: &CdataMarkers) -> (String, bool) {
    if !text.contains("<![CDATA[") {
        return (text.to_string(), false);
    }
    let text = text.replace("//<![CDATA[", "");
    let text = markers.open.replace_all(&text, "").replace("<![CDATA[", "");
    let text = text.replace("//]]>", "");
    let text = markers.close.replace_all(&text, "").replace("]]>", "");
    (text, true)
}

/// Compiled `/* <![CDATA[ */` and `/* ]]> */` patterns.
struct CdataMarkers {
    open: &'static Regex,
    close: &'static Regex,
}

impl CdataMarkers {
    fn load(step: &'static str) -> Result<Self, StepError> {
        Ok(Self {
            open: pattern(step, &CDATA_OPEN_COMMENT)?,
            close: pattern(step, &CDATA_CLOSE_COMMENT)?,
        })
    }
}

fn needs_cdata(text: &str) -> bool {
    text.contains('<') || text.contains('&') || text.contains("--") || text.contains("]]>")
}
