use std::{
    collections::BTreeMap,
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use crate::keys::rel_path_to_key;

const DEFAULT_NOTE_TYPE: &str = "archival";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNodeKind {
    Folder,
    File,
}

/// One node of the nested memory tree. Children are ordered folders-first,
/// then alphabetically.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub key: String,
    pub name: String,
    pub kind: TreeNodeKind,
    pub title: Option<String>,
    pub note_type: Option<String>,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone)]
pub(crate) struct FileEntry {
    pub(crate) key: String,
    pub(crate) title: String,
    pub(crate) note_type: String,
}

fn read_file_entry(root: &Path, rel_path: &str) -> Option<FileEntry> {
    let key = rel_path_to_key(rel_path)?;
    let source = fs::read_to_string(root.join(rel_path)).ok()?;
    let parsed = note::parse_document(&source);
    let title = note::derive_title(&parsed.frontmatter, &parsed.body, rel_path);
    let note_type = parsed
        .frontmatter
        .get("type")
        .and_then(JsonValue::as_str)
        .unwrap_or(DEFAULT_NOTE_TYPE)
        .to_string();

    Some(FileEntry {
        key,
        title,
        note_type,
    })
}

/// Every memory file under `root`, sorted by key.
pub(crate) fn collect_file_entries(root: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for file in indexing::collect_markdown_files(root)? {
        if let Some(entry) = read_file_entry(root, &file.rel_path) {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

/// Flat `key → node` map covering folders and files.
pub(crate) fn list_flat(root: &Path) -> Result<BTreeMap<String, JsonValue>> {
    let mut flat = BTreeMap::new();
    for node in list_tree(root)? {
        insert_flat(&node, &mut flat);
    }
    Ok(flat)
}

fn insert_flat(node: &TreeNode, flat: &mut BTreeMap<String, JsonValue>) {
    let mut object = Map::new();
    object.insert(
        "_type".to_string(),
        json!(match node.kind {
            TreeNodeKind::Folder => "folder",
            TreeNodeKind::File => "file",
        }),
    );
    if let Some(title) = &node.title {
        object.insert("title".to_string(), json!(title));
    }
    if let Some(note_type) = &node.note_type {
        object.insert("type".to_string(), json!(note_type));
    }
    flat.insert(node.key.clone(), JsonValue::Object(object));

    for child in &node.children {
        insert_flat(child, flat);
    }
}

/// Nested ordered tree: folders before files, then alphabetical.
pub(crate) fn list_tree(root: &Path) -> Result<Vec<TreeNode>> {
    build_dir(root, root, "")
}

fn build_dir(root: &Path, dir: &Path, key_prefix: &str) -> Result<Vec<TreeNode>> {
    let mut folders = Vec::new();
    let mut files = Vec::new();

    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        if path.is_dir() {
            let key = join_key(key_prefix, &name);
            let children = build_dir(root, &path, &key)?;
            folders.push(TreeNode {
                key,
                name,
                kind: TreeNodeKind::Folder,
                title: None,
                note_type: None,
                children,
            });
        } else if name.to_lowercase().ends_with(".md") {
            let stem = name.trim_end_matches(".md").trim_end_matches(".MD");
            let key = join_key(key_prefix, stem);
            let rel_path = path
                .strip_prefix(root)
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| name.clone());
            let entry = read_file_entry(root, &rel_path);
            files.push(TreeNode {
                key,
                name: stem.to_string(),
                kind: TreeNodeKind::File,
                title: entry.as_ref().map(|entry| entry.title.clone()),
                note_type: entry.as_ref().map(|entry| entry.note_type.clone()),
                children: Vec::new(),
            });
        }
    }

    folders.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    folders.extend(files);
    Ok(folders)
}

fn join_key(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Markdown outline rendered for prompt injection. The format is part of
/// the contract: `### <root>` headers with `- <key>: <title> [<type>]`
/// lines beneath them.
pub(crate) fn tree_for_prompt(root: &Path, prefix: Option<&str>) -> Result<String> {
    let entries = collect_file_entries(root)?;
    let mut output = String::new();

    match prefix {
        Some(prefix) => {
            let matching: Vec<&FileEntry> = entries
                .iter()
                .filter(|entry| {
                    entry.key == prefix || entry.key.starts_with(&format!("{prefix}."))
                })
                .collect();
            if matching.is_empty() {
                return Ok(output);
            }

            output.push_str(&format!("### {prefix}\n"));
            for entry in matching {
                output.push_str(&format!(
                    "- {}: {} [{}]\n",
                    entry.key, entry.title, entry.note_type
                ));
            }
        }
        None => {
            let mut groups: BTreeMap<String, Vec<&FileEntry>> = BTreeMap::new();
            for entry in &entries {
                let root_segment = entry
                    .key
                    .split('.')
                    .next()
                    .unwrap_or(entry.key.as_str())
                    .to_string();
                groups.entry(root_segment).or_default().push(entry);
            }

            for (group, members) in groups {
                output.push_str(&format!("### {group}\n"));
                for entry in members {
                    output.push_str(&format!(
                        "- {}: {} [{}]\n",
                        entry.key, entry.title, entry.note_type
                    ));
                }
                output.push('\n');
            }
        }
    }

    Ok(output.trim_end().to_string())
}

/// Keys with exactly `level` segments, optionally restricted to a prefix.
pub(crate) fn entries_by_level(
    root: &Path,
    level: usize,
    prefix: Option<&str>,
) -> Result<Vec<FileEntry>> {
    let entries = collect_file_entries(root)?;
    Ok(entries
        .into_iter()
        .filter(|entry| {
            if entry.key.split('.').count() != level {
                return false;
            }
            match prefix {
                Some(prefix) => {
                    entry.key == prefix || entry.key.starts_with(&format!("{prefix}."))
                }
                None => true,
            }
        })
        .collect())
}

/// Minimal nested rendering: folders become objects, files map to their
/// titles.
pub(crate) fn simple_tree(root: &Path, prefix: Option<&str>) -> Result<JsonValue> {
    let nodes = list_tree(root)?;
    let nodes = match prefix {
        Some(prefix) => descend_to_prefix(nodes, prefix),
        None => nodes,
    };

    Ok(nodes_to_simple(&nodes))
}

fn descend_to_prefix(nodes: Vec<TreeNode>, prefix: &str) -> Vec<TreeNode> {
    let mut current = nodes;
    let mut accumulated = String::new();
    for segment in prefix.split('.') {
        accumulated = join_key(&accumulated, segment);
        let Some(node) = current.into_iter().find(|node| node.key == accumulated) else {
            return Vec::new();
        };
        current = node.children;
    }
    current
}

fn nodes_to_simple(nodes: &[TreeNode]) -> JsonValue {
    let mut object = Map::new();
    for node in nodes {
        match node.kind {
            TreeNodeKind::Folder => {
                object.insert(node.name.clone(), nodes_to_simple(&node.children));
            }
            TreeNodeKind::File => {
                // A name that is both a note and a folder keeps the subtree.
                if !object.contains_key(&node.name) {
                    object.insert(
                        node.name.clone(),
                        json!(node.title.clone().unwrap_or_else(|| node.name.clone())),
                    );
                }
            }
        }
    }
    JsonValue::Object(object)
}
