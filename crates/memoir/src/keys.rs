use std::path::{Component, Path, PathBuf};

use crate::error::MemoirError;

/// Map a dotted key to its relative Markdown path: `a.b.c` → `a/b/c.md`.
/// Segments must be non-empty, must not be `..`, and must not contain path
/// separators.
pub fn key_to_rel_path(key: &str) -> Result<String, MemoirError> {
    let segments = validate_key(key)?;
    Ok(format!("{}.md", segments.join("/")))
}

/// Inverse of [`key_to_rel_path`]: `a/b/c.md` → `a.b.c`. Returns `None` for
/// paths that are not Markdown files.
pub fn rel_path_to_key(rel_path: &str) -> Option<String> {
    let normalized = rel_path.replace('\\', "/");
    let stripped = normalized.strip_suffix(".md")?;
    if stripped.is_empty() {
        return None;
    }

    Some(
        stripped
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("."),
    )
}

pub(crate) fn validate_key(key: &str) -> Result<Vec<&str>, MemoirError> {
    if key.trim().is_empty() {
        return Err(invalid(key, "key must not be empty"));
    }

    let segments: Vec<&str> = key.split('.').collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err(invalid(key, "empty segment"));
        }
        if *segment == ".." {
            return Err(invalid(key, "'..' segment"));
        }
        if segment.contains('/') || segment.contains('\\') {
            return Err(invalid(key, "segment contains a path separator"));
        }
    }

    Ok(segments)
}

fn invalid(key: &str, reason: &str) -> MemoirError {
    MemoirError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Join `rel_path` under `root` and reject any result that would resolve
/// outside the root.
pub(crate) fn resolve_under_root(root: &Path, rel_path: &str) -> Result<PathBuf, MemoirError> {
    let joined = root.join(rel_path);

    for component in Path::new(rel_path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(MemoirError::PathEscape(joined.display().to_string())),
        }
    }

    Ok(joined)
}
