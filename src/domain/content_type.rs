//! Content types understood by the combine pipeline.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Text asset type; decides the minifier slot, the join separator and the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Css,
    Js,
    Html,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Css, ContentType::Js, ContentType::Html];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Css => "css",
            ContentType::Js => "js",
            ContentType::Html => "html",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Css => "text/css",
            ContentType::Js => "application/javascript",
            ContentType::Html => "text/html",
        }
    }

    /// Separator placed between joined chunks. Scripts get `"\n;"` so a missing
    /// trailing semicolon in one file cannot merge statements with the next.
    pub fn separator(self) -> &'static str {
        match self {
            ContentType::Js => "\n;",
            ContentType::Css | ContentType::Html => "",
        }
    }

    /// Guess the type from a file extension (`.css`, `.js`/`.mjs`, `.html`/`.htm`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "css" => Some(ContentType::Css),
            "js" | "mjs" => Some(ContentType::Js),
            "html" | "htm" => Some(ContentType::Html),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "css" | "text/css" => Ok(ContentType::Css),
            "js" | "javascript" | "application/javascript" | "application/x-javascript" => {
                Ok(ContentType::Js)
            }
            "html" | "text/html" => Ok(ContentType::Html),
            other => Err(DomainError::unsupported_content_type(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_type_from_extension() {
        assert_eq!(
            ContentType::from_path(Path::new("a/b/site.CSS")),
            Some(ContentType::Css)
        );
        assert_eq!(
            ContentType::from_path(Path::new("app.mjs")),
            Some(ContentType::Js)
        );
        assert_eq!(
            ContentType::from_path(Path::new("index.htm")),
            Some(ContentType::Html)
        );
        assert_eq!(ContentType::from_path(Path::new("logo.png")), None);
        assert_eq!(ContentType::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn only_scripts_use_statement_separator() {
        assert_eq!(ContentType::Js.separator(), "\n;");
        assert_eq!(ContentType::Css.separator(), "");
        assert_eq!(ContentType::Html.separator(), "");
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("text/css".parse::<ContentType>(), Ok(ContentType::Css));
        assert_eq!(
            "application/x-javascript".parse::<ContentType>(),
            Ok(ContentType::Js)
        );
        assert!("image/png".parse::<ContentType>().is_err());
    }
}
