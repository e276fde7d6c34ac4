//! Inputs to the combine pipeline.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::{content_type::ContentType, options::MinifyOptions};

use super::minify::Minifier;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to stat `{path}`: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SourceError {
    pub fn path(&self) -> &Path {
        match self {
            SourceError::Stat { path, .. } | SourceError::Read { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourceBody {
    File(PathBuf),
    Inline(String),
}

/// One file or inline text taking part in a combine.
///
/// The modification time is captured once when the source is built; the
/// fingerprint and the conditional-GET metadata both read that snapshot.
#[derive(Debug, Clone)]
pub struct Source {
    id: String,
    body: SourceBody,
    last_modified: OffsetDateTime,
    minifier: Option<Minifier>,
    minify_options: MinifyOptions,
    content_type: Option<ContentType>,
}

impl Source {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let metadata = fs::metadata(&path).map_err(|source| SourceError::Stat {
            path: path.clone(),
            source,
        })?;
        let modified = metadata.modified().map_err(|source| SourceError::Stat {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            id: path.display().to_string(),
            content_type: ContentType::from_path(&path),
            body: SourceBody::File(path),
            last_modified: OffsetDateTime::from(modified),
            minifier: None,
            minify_options: MinifyOptions::new(),
        })
    }

    pub fn inline(
        id: impl Into<String>,
        text: impl Into<String>,
        last_modified: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            body: SourceBody::Inline(text.into()),
            last_modified,
            minifier: None,
            minify_options: MinifyOptions::new(),
            content_type: None,
        }
    }

    /// Minifier used for this source instead of the per-type default.
    pub fn with_minifier(mut self, minifier: Minifier) -> Self {
        self.minifier = Some(minifier);
        self
    }

    /// Options merged over the per-type defaults; keys set here win.
    pub fn with_options(mut self, options: MinifyOptions) -> Self {
        self.minify_options = options;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &SourceBody {
        &self.body
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.body {
            SourceBody::File(path) => Some(path),
            SourceBody::Inline(_) => None,
        }
    }

    pub fn last_modified(&self) -> OffsetDateTime {
        self.last_modified
    }

    pub fn unix_mtime(&self) -> i64 {
        self.last_modified.unix_timestamp()
    }

    pub fn minifier(&self) -> Option<&Minifier> {
        self.minifier.as_ref()
    }

    pub fn minify_options(&self) -> &MinifyOptions {
        &self.minify_options
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    /// Short label for debug annotations: the file name for files, the id otherwise.
    pub fn label(&self) -> String {
        self.path()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn content(&self) -> Result<String, SourceError> {
        match &self.body {
            SourceBody::File(path) => {
                fs::read_to_string(path).map_err(|source| SourceError::Read {
                    path: path.clone(),
                    source,
                })
            }
            SourceBody::Inline(text) => Ok(text.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_sources_capture_type_and_mtime() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("site.css");
        fs::write(&path, "body{}").expect("write");

        let source = Source::from_path(&path).expect("source");
        assert_eq!(source.content_type(), Some(ContentType::Css));
        assert_eq!(source.label(), "site.css");
        assert_eq!(source.content().expect("content"), "body{}");
        assert!(source.unix_mtime() > 0);
    }

    #[test]
    fn missing_files_fail_at_construction() {
        let dir = TempDir::new().expect("temp dir");
        let err = Source::from_path(dir.path().join("gone.js")).expect_err("missing file");
        assert!(matches!(err, SourceError::Stat { .. }));
        assert!(err.path().ends_with("gone.js"));
    }

    #[test]
    fn inline_sources_use_their_id() {
        let source = Source::inline("banner", "/* hi */", OffsetDateTime::UNIX_EPOCH)
            .with_content_type(ContentType::Css);
        assert_eq!(source.label(), "banner");
        assert_eq!(source.unix_mtime(), 0);
        assert!(source.path().is_none());
    }
}
