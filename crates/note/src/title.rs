use std::path::Path;

use serde_json::Value as JsonValue;

/// Derive a document title: front-matter `title`, else the first `#` heading,
/// else the file stem.
pub fn derive_title(frontmatter: &JsonValue, body: &str, rel_path: &str) -> String {
    if let Some(title) = frontmatter.get("title").and_then(JsonValue::as_str) {
        let trimmed = title.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
        if !trimmed.is_empty() {
            break;
        }
    }

    file_stem(rel_path)
}

pub(crate) fn file_stem(rel_path: &str) -> String {
    Path::new(rel_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel_path.to_string())
}
