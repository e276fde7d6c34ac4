//! `@import` handling for combined stylesheets.
//!
//! Browsers ignore an `@import` that follows any other rule, so after several files
//! are concatenated the imports of the later ones stop working. Two remedies: move
//! every import to the top, or warn in the output. Local imports can also be
//! inlined up front so they never reach that point.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::application::source::SourceError;

/// Prepended when an `@import` follows the first rule and bubbling is off.
pub const IMPORT_WARNING: &str =
    "/* tessera: @import after the first rule is ignored by browsers; enable css import bubbling or move it to the top */\n";

static IMPORT_STATEMENT: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\s*@import\b[^;]*;"));
static IMPORT_TARGET: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(
        r#"@import\s+(?:url\(\s*['"]?([^'")\s]+)['"]?\s*\)|['"]([^'"]+)['"])\s*([^;]*);"#,
    )
});
static COMMENT: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"/\*[\s\S]*?\*/"));

fn cached(cell: &'static Lazy<Result<Regex, regex::Error>>) -> Option<&'static Regex> {
    match Lazy::force(cell) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!(
                target = "tessera::combine::css_imports",
                result = "pattern_unavailable",
                error = %err,
                "CSS import pattern failed to compile; leaving CSS untouched"
            );
            None
        }
    }
}

/// Bubble or warn; CSS without `@import` is returned unchanged.
pub fn handle_imports(css: String, bubble: bool) -> String {
    if !css.contains("@import") {
        return css;
    }
    if bubble {
        bubble_imports(&css)
    } else {
        warn_misplaced_imports(css)
    }
}

/// Move every `@import` statement to the front, keeping their relative order.
pub fn bubble_imports(css: &str) -> String {
    let Some(re) = cached(&IMPORT_STATEMENT) else {
        return css.to_string();
    };
    let mut imports = String::new();
    for found in re.find_iter(css) {
        imports.push_str(found.as_str().trim_start());
    }
    let rest = re.replace_all(css, "");
    imports + rest.as_ref()
}

fn warn_misplaced_imports(css: String) -> String {
    let Some(comment) = cached(&COMMENT) else {
        return css;
    };
    let stripped = comment.replace_all(&css, "");
    let misplaced = match (stripped.rfind("@import"), stripped.find('{')) {
        (Some(last_import), Some(first_block)) => first_block < last_import,
        _ => false,
    };
    if misplaced {
        format!("{IMPORT_WARNING}{css}")
    } else {
        css
    }
}

/// Read `path` and inline its local, unqualified `@import`s recursively.
///
/// Imports are resolved against the importing file and must stay inside the
/// directory of `path`. Remote URLs, media-qualified imports, missing files and
/// anything escaping that directory are left in place. A file already on the
/// import chain is dropped to break cycles.
pub fn inline_imports(path: &Path) -> Result<String, SourceError> {
    let root = path
        .parent()
        .and_then(|dir| fs::canonicalize(dir).ok())
        .unwrap_or_default();
    let mut chain = HashSet::new();
    inline_file(path, &root, &mut chain)
}

fn inline_file(
    path: &Path,
    root: &Path,
    chain: &mut HashSet<PathBuf>,
) -> Result<String, SourceError> {
    let css = fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(re) = cached(&IMPORT_TARGET) else {
        return Ok(css);
    };
    if let Ok(canonical) = fs::canonicalize(path) {
        chain.insert(canonical);
    }

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut failure = None;
    let out = re.replace_all(&css, |caps: &Captures<'_>| {
        let statement = caps[0].to_string();
        let target = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        let media = caps.get(3).map_or("", |m| m.as_str().trim());
        if failure.is_some() || !media.is_empty() || is_remote(target) {
            return statement;
        }
        let Some(resolved) = resolve(base, target, root) else {
            warn!(
                target = "tessera::combine::css_imports",
                op = "css_imports::inline",
                result = "skipped",
                importer = %path.display(),
                import = target,
                "CSS import not found inside the stylesheet root; left in place"
            );
            return statement;
        };
        if chain.contains(&resolved) {
            debug!(
                target = "tessera::combine::css_imports",
                op = "css_imports::inline",
                result = "cycle",
                importer = %path.display(),
                import = target,
                "Dropping cyclic CSS import"
            );
            return String::new();
        }
        match inline_file(&resolved, root, chain) {
            Ok(inlined) => inlined,
            Err(err) => {
                failure = Some(err);
                statement
            }
        }
    });
    let out = out.into_owned();
    if let Ok(canonical) = fs::canonicalize(path) {
        chain.remove(&canonical);
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

fn is_remote(target: &str) -> bool {
    target.starts_with("//") || target.starts_with("data:") || target.contains("://")
}

fn resolve(base: &Path, target: &str, root: &Path) -> Option<PathBuf> {
    let target = target.split(['?', '#']).next().unwrap_or(target);
    if target.is_empty() || target.starts_with('/') {
        return None;
    }
    let resolved = fs::canonicalize(base.join(target)).ok()?;
    (resolved.starts_with(root) && resolved.is_file()).then_some(resolved)
}
