//! Store keys for artifacts and their encoded variants.

use std::fmt;

use crate::domain::encoding::ContentEncoding;

/// Key of a stored artifact: the fingerprint, or `fingerprint_<encoding>` for a
/// pre-compressed variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn base(fingerprint: impl Into<String>) -> Self {
        Self(fingerprint.into())
    }

    /// Key of the `encoding` variant of this artifact; identity is the base key.
    pub fn variant(&self, encoding: ContentEncoding) -> Self {
        if encoding.is_identity() {
            self.clone()
        } else {
            Self(format!("{}_{}", self.0, encoding.as_str()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_append_the_encoding() {
        let base = ArtifactKey::base("abc123");
        assert_eq!(base.variant(ContentEncoding::Gzip).as_str(), "abc123_gzip");
        assert_eq!(base.variant(ContentEncoding::Br).as_str(), "abc123_br");
        assert_eq!(base.variant(ContentEncoding::Identity), base);
    }
}
