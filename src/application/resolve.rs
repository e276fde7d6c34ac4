//! Turns request parameters into sources confined to the asset root.

use std::{
    collections::BTreeMap,
    fs,
    path::{Component, Path, PathBuf},
};

use tracing::debug;

use crate::domain::content_type::ContentType;

use super::{error::ServeError, source::Source};

#[derive(Debug, Clone)]
pub struct SourceResolver {
    root: PathBuf,
    max_files: usize,
    allowed_extensions: Vec<String>,
    groups: BTreeMap<String, Vec<String>>,
}

/// Sources of one request plus their common content type.
#[derive(Debug, Clone)]
pub struct ResolvedSources {
    pub content_type: ContentType,
    pub sources: Vec<Source>,
}

impl SourceResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        max_files: usize,
        allowed_extensions: Vec<String>,
        groups: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            root: root.into(),
            max_files,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            groups,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Resolve a comma separated `files` list, each entry prefixed with `base`.
    pub fn resolve_files(
        &self,
        base: Option<&str>,
        files: &str,
    ) -> Result<ResolvedSources, ServeError> {
        let base = base.map(str::trim).filter(|base| !base.is_empty());
        let entries: Vec<String> = files
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match base {
                Some(base) => format!("{}/{entry}", base.trim_end_matches('/')),
                None => entry.to_string(),
            })
            .collect();
        self.resolve(&entries)
    }

    /// Resolve a named group from configuration. `Ok(None)` for unknown names.
    pub fn resolve_group(&self, name: &str) -> Result<Option<ResolvedSources>, ServeError> {
        match self.groups.get(name) {
            Some(entries) => self.resolve(entries).map(Some),
            None => Ok(None),
        }
    }

    fn resolve(&self, entries: &[String]) -> Result<ResolvedSources, ServeError> {
        if entries.is_empty() {
            return Err(ServeError::bad_request("no sources requested"));
        }
        if entries.len() > self.max_files {
            return Err(ServeError::bad_request(format!(
                "{} files requested, at most {} allowed",
                entries.len(),
                self.max_files
            )));
        }

        let root = fs::canonicalize(&self.root).map_err(|err| {
            ServeError::bad_request(format!(
                "asset root `{}` is unavailable: {err}",
                self.root.display()
            ))
        })?;

        let mut content_type = None;
        let mut sources = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = self.confine(&root, entry)?;
            let entry_type = ContentType::from_path(&path).ok_or_else(|| {
                ServeError::bad_request(format!("`{entry}` has no supported content type"))
            })?;
            match content_type {
                None => content_type = Some(entry_type),
                Some(previous) if previous != entry_type => {
                    return Err(ServeError::bad_request(format!(
                        "mixed content types: {previous} and {entry_type}"
                    )));
                }
                Some(_) => {}
            }
            sources.push(Source::from_path(path)?);
        }

        let content_type =
            content_type.ok_or_else(|| ServeError::bad_request("no sources requested"))?;
        debug!(
            target = "tessera::resolve",
            op = "resolve",
            content_type = content_type.as_str(),
            sources = sources.len(),
            "Request sources resolved"
        );
        Ok(ResolvedSources {
            content_type,
            sources,
        })
    }

    fn confine(&self, root: &Path, entry: &str) -> Result<PathBuf, ServeError> {
        let relative = Path::new(entry.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ServeError::bad_request(format!(
                "`{entry}` points outside the asset root"
            )));
        }

        let extension = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(ServeError::bad_request(format!(
                "`{entry}` does not have an allowed extension"
            )));
        }

        let resolved = fs::canonicalize(root.join(relative))
            .map_err(|_| ServeError::bad_request(format!("`{entry}` does not exist")))?;
        if !resolved.starts_with(root) || !resolved.is_file() {
            return Err(ServeError::bad_request(format!(
                "`{entry}` points outside the asset root"
            )));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> SourceResolver {
        let mut groups = BTreeMap::new();
        groups.insert(
            "site".to_string(),
            vec!["css/a.css".to_string(), "css/b.css".to_string()],
        );
        SourceResolver::new(
            dir.path(),
            3,
            vec!["css".into(), ".js".into()],
            groups,
        )
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join("css")).expect("mkdir");
        fs::write(dir.path().join("css/a.css"), "a{}").expect("write");
        fs::write(dir.path().join("css/b.css"), "b{}").expect("write");
        fs::write(dir.path().join("app.js"), "go()").expect("write");
        fs::write(dir.path().join("notes.txt"), "x").expect("write");
        dir
    }

    #[test]
    fn resolves_files_under_a_base() {
        let dir = fixture();
        let resolved = resolver(&dir)
            .resolve_files(Some("css"), "a.css, b.css")
            .expect("resolved");
        assert_eq!(resolved.content_type, ContentType::Css);
        let labels: Vec<_> = resolved.sources.iter().map(Source::label).collect();
        assert_eq!(labels, vec!["a.css", "b.css"]);
    }

    #[test]
    fn resolves_named_groups() {
        let dir = fixture();
        let resolver = resolver(&dir);
        let group = resolver.resolve_group("site").expect("resolved").expect("known");
        assert_eq!(group.sources.len(), 2);
        assert!(resolver.resolve_group("other").expect("resolved").is_none());
    }

    #[test]
    fn rejects_bad_requests() {
        let dir = fixture();
        let resolver = resolver(&dir);
        for (base, files) in [
            (None, ""),
            (None, "../secret.css"),
            (None, "notes.txt"),
            (None, "missing.css"),
            (None, "css/a.css,app.js"),
            (None, "css/a.css,css/a.css,css/b.css,css/b.css"),
        ] {
            let err = resolver
                .resolve_files(base, files)
                .expect_err("bad request");
            assert!(err.is_client_error(), "{files}: {err}");
        }
    }
}
