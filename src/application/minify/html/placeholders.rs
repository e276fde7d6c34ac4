//! Opaque tokens standing in for protected HTML regions.

use sha2::{Digest, Sha256};

const PREFIX_HEX_LEN: usize = 12;

/// Table of protected fragments keyed by `%<hash><n>%` tokens.
///
/// The hash is derived from the input document, so minifying the same input twice
/// produces the same intermediate tokens.
#[derive(Debug)]
pub(crate) struct Placeholders {
    marker: String,
    entries: Vec<String>,
}

impl Placeholders {
    pub(crate) fn for_document(html: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(html.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self {
            marker: format!("%TSR{}", &digest[..PREFIX_HEX_LEN]),
            entries: Vec::new(),
        }
    }

    /// Store `content` and return the token that replaces it in the document.
    pub(crate) fn reserve(&mut self, content: String) -> String {
        let token = format!("{}{}%", self.marker, self.entries.len());
        self.entries.push(content);
        token
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Substitute every token with its fragment. Runs twice: a fragment can carry
    /// a token of its own (a `<script>` captured inside a `<textarea>`).
    pub(crate) fn restore(&self, html: &str) -> String {
        if self.entries.is_empty() {
            return html.to_string();
        }
        let first = self.substitute(html);
        self.substitute(&first)
    }

    fn substitute(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut rest = html;
        while let Some(pos) = rest.find(self.marker.as_str()) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + self.marker.len()..];
            let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
            let closed = after.as_bytes().get(digits) == Some(&b'%');
            let entry = (digits > 0 && closed)
                .then(|| after[..digits].parse::<usize>().ok())
                .flatten()
                .and_then(|index| self.entries.get(index));
            match entry {
                Some(content) => {
                    out.push_str(content);
                    rest = &after[digits + 1..];
                }
                None => {
                    out.push_str(&self.marker);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
