use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use walkdir::{DirEntry, WalkDir};

/// Convenience holder for absolute + relative path of a Markdown source file.
#[derive(Debug, Clone)]
pub struct MarkdownFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
}

impl MarkdownFile {
    pub fn from_root_and_abs_path(root: &Path, abs_path: &Path) -> Result<Self> {
        let rel_path = abs_path.strip_prefix(root).with_context(|| {
            format!("Failed to compute relative path for {}", abs_path.display())
        })?;

        Ok(Self {
            abs_path: abs_path.to_path_buf(),
            rel_path: normalize_rel_path(rel_path),
        })
    }
}

/// Recursively collect `*.md` files under `root`, skipping dot-directories.
/// The default `**/*.md` glob is the only pattern in use; a full glob engine
/// is intentionally not part of the walk.
pub fn collect_markdown_files(root: &Path) -> Result<Vec<MarkdownFile>> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| should_descend(entry, root));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to traverse {}", root.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }

        if !is_markdown(entry.path()) {
            continue;
        }

        files.push(MarkdownFile::from_root_and_abs_path(root, entry.path())?);
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn should_descend(entry: &DirEntry, root: &Path) -> bool {
    if entry.path() == root {
        return true;
    }

    !entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_markdown(path: &Path) -> bool {
    matches!(path.extension().and_then(OsStr::to_str), Some(ext) if ext.eq_ignore_ascii_case("md"))
}

pub(crate) fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::tests::test_support::TempDir;

    use super::collect_markdown_files;

    #[test]
    fn collects_only_markdown_with_relative_paths() {
        let dir = TempDir::new("files-collect");
        fs::create_dir_all(dir.path().join("nested")).expect("failed to create nested dir");
        fs::write(dir.path().join("a.md"), "# a").expect("write failed");
        fs::write(dir.path().join("nested/b.md"), "# b").expect("write failed");
        fs::write(dir.path().join("c.txt"), "not markdown").expect("write failed");

        let files = collect_markdown_files(dir.path()).expect("walk failed");
        let paths: Vec<&str> = files.iter().map(|file| file.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "nested/b.md"]);
    }

    #[test]
    fn skips_dot_directories() {
        let dir = TempDir::new("files-dotdir");
        fs::create_dir_all(dir.path().join(".state")).expect("failed to create state dir");
        fs::write(dir.path().join(".state/hidden.md"), "# hidden").expect("write failed");
        fs::write(dir.path().join("visible.md"), "# visible").expect("write failed");

        let files = collect_markdown_files(dir.path()).expect("walk failed");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "visible.md");
    }
}
