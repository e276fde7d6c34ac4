//! Lossless open-tag tokenizer used by the attribute-level steps.
//!
//! A parsed tag renders back to exactly the bytes it was parsed from; the steps
//! only touch the pieces they mean to change.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quote {
    Double,
    Single,
    Bare,
}

impl Quote {
    fn as_str(self) -> &'static str {
        match self {
            Quote::Double => "\"",
            Quote::Single => "'",
            Quote::Bare => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrValue<'a> {
    /// Raw text between `name` and the value, e.g. `=` or ` = `.
    pub(crate) equals: &'a str,
    pub(crate) quote: Quote,
    pub(crate) text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attr<'a> {
    pub(crate) leading: &'a str,
    pub(crate) name: &'a str,
    pub(crate) value: Option<AttrValue<'a>>,
}

impl Attr<'_> {
    pub(crate) fn is_bare(&self) -> bool {
        matches!(&self.value, Some(value) if value.quote == Quote::Bare)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenTag<'a> {
    pub(crate) name: &'a str,
    pub(crate) attrs: Vec<Attr<'a>>,
    /// Whitespace between the last attribute and `/>` or `>`.
    pub(crate) trailing: &'a str,
    pub(crate) self_closing: bool,
}

pub(crate) const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

impl<'a> OpenTag<'a> {
    /// Parse the text between the tag name and the closing `>`.
    ///
    /// Returns `None` for anything the tokenizer does not fully understand; callers
    /// leave such tags untouched.
    pub(crate) fn parse(name: &'a str, rest: &'a str) -> Option<Self> {
        let mut attrs = Vec::new();
        let mut cursor = rest;
        loop {
            let leading_len = ws_len(cursor);
            let leading = &cursor[..leading_len];
            let after_ws = &cursor[leading_len..];

            if after_ws.is_empty() {
                return Some(Self {
                    name,
                    attrs,
                    trailing: leading,
                    self_closing: false,
                });
            }
            if after_ws == "/" {
                return Some(Self {
                    name,
                    attrs,
                    trailing: leading,
                    self_closing: true,
                });
            }
            if !attrs.is_empty() && leading.is_empty() {
                return None;
            }

            let name_len = after_ws
                .find(|c: char| c.is_ascii_whitespace() || matches!(c, '=' | '/' | '"' | '\'' | '<'))
                .unwrap_or(after_ws.len());
            if name_len == 0 {
                return None;
            }
            let attr_name = &after_ws[..name_len];
            let after_name = &after_ws[name_len..];

            let gap = ws_len(after_name);
            if !after_name[gap..].starts_with('=') {
                attrs.push(Attr {
                    leading,
                    name: attr_name,
                    value: None,
                });
                cursor = after_name;
                continue;
            }

            let post_eq = &after_name[gap + 1..];
            let equals_len = gap + 1 + ws_len(post_eq);
            let equals = &after_name[..equals_len];
            let value_src = &after_name[equals_len..];

            let (quote, text, consumed) = match value_src.chars().next() {
                Some('"') => {
                    let end = value_src[1..].find('"')?;
                    (Quote::Double, &value_src[1..1 + end], end + 2)
                }
                Some('\'') => {
                    let end = value_src[1..].find('\'')?;
                    (Quote::Single, &value_src[1..1 + end], end + 2)
                }
                Some(_) => {
                    let end = value_src
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(value_src.len());
                    (Quote::Bare, &value_src[..end], end)
                }
                None => return None,
            };

            attrs.push(Attr {
                leading,
                name: attr_name,
                value: Some(AttrValue {
                    equals,
                    quote,
                    text,
                }),
            });
            cursor = &value_src[consumed..];
        }
    }

    pub(crate) fn is_void(&self) -> bool {
        VOID_ELEMENTS
            .iter()
            .any(|void| self.name.eq_ignore_ascii_case(void))
    }

    pub(crate) fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// The last attribute is bare and a `/` or `/>` right after it would read as part
    /// of its value.
    pub(crate) fn needs_guard_space(&self) -> bool {
        match self.attrs.last() {
            Some(attr) if attr.is_bare() => {
                let ends_with_slash = attr
                    .value
                    .as_ref()
                    .is_some_and(|value| value.text.ends_with('/'));
                self.self_closing || ends_with_slash
            }
            _ => false,
        }
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 2 + self.attrs.len() * 16);
        out.push('<');
        out.push_str(self.name);
        for attr in &self.attrs {
            out.push_str(attr.leading);
            out.push_str(attr.name);
            if let Some(value) = &attr.value {
                out.push_str(value.equals);
                out.push_str(value.quote.as_str());
                out.push_str(value.text);
                out.push_str(value.quote.as_str());
            }
        }
        out.push_str(self.trailing);
        if self.self_closing {
            out.push('/');
        }
        out.push('>');
        out
    }
}

fn ws_len(text: &str) -> usize {
    text.len() - text.trim_start_matches(|c: char| c.is_ascii_whitespace()).len()
}
