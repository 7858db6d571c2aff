use std::{collections::HashSet, fs, path::Path};

use anyhow::{anyhow, Context, Result};
use doc_store::{Collection, Store, UpsertInput};
use serde::Serialize;
use tracing::{debug, warn};

use crate::files::{collect_markdown_files, MarkdownFile};

/// Human readable summary of what happened during an indexing run.
#[derive(Debug, Default, Serialize)]
pub struct IndexSummary {
    /// Files whose content reached the store as new or changed rows.
    pub indexed: usize,
    /// Files observed but already indexed with identical content.
    pub skipped: usize,
    /// Files that could not be read or parsed; never aborts the run.
    pub failed: usize,
    /// Documents soft-deleted because their file disappeared.
    pub deactivated: usize,
    /// Detailed per-file errors.
    pub failures: Vec<String>,
}

impl IndexSummary {
    fn absorb(&mut self, other: IndexSummary) {
        self.indexed += other.indexed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.deactivated += other.deactivated;
        self.failures.extend(other.failures);
    }
}

/// Result of indexing one file in isolation (watcher events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    Unchanged,
    /// File no longer on disk; the document row was soft-deleted.
    Missing,
}

/// Walk one collection root and bring the store in line with the files on
/// disk. `incremental` only affects accounting: a full run counts unchanged
/// files as indexed, an incremental run reports them as skipped.
pub fn reindex_collection(
    store: &Store,
    collection: &Collection,
    incremental: bool,
) -> Result<IndexSummary> {
    let root = Path::new(&collection.root);
    if !root.exists() {
        return Err(anyhow!(
            "Collection root does not exist: {}",
            root.display()
        ));
    }

    let files = collect_markdown_files(root)?;
    let mut summary = IndexSummary::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(files.len());

    for file in &files {
        seen.insert(file.rel_path.clone());
        match upsert_file(store, collection, file) {
            Ok(changed) => {
                if changed || !incremental {
                    summary.indexed += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            Err(error) => {
                warn!(path = %file.rel_path, %error, "failed to index file");
                summary.failed += 1;
                summary
                    .failures
                    .push(format!("{}: {error}", file.abs_path.display()));
            }
        }
    }

    summary.deactivated = store.deactivate_missing(collection.id, &seen)?;

    debug!(
        collection = %collection.name,
        indexed = summary.indexed,
        skipped = summary.skipped,
        failed = summary.failed,
        deactivated = summary.deactivated,
        "collection reindexed"
    );

    Ok(summary)
}

/// Reindex every registered collection. Per-collection failures are counted
/// and logged, never fatal for the whole pass.
pub fn reindex_all(store: &Store, incremental: bool) -> Result<IndexSummary> {
    let mut summary = IndexSummary::default();

    for collection in store.list_collections()? {
        match reindex_collection(store, &collection, incremental) {
            Ok(collection_summary) => summary.absorb(collection_summary),
            Err(error) => {
                warn!(collection = %collection.name, %error, "failed to reindex collection");
                summary.failed += 1;
                summary
                    .failures
                    .push(format!("{}: {error}", collection.name));
            }
        }
    }

    Ok(summary)
}

/// Index a single file inside a collection, used by the watcher so one event
/// does not trigger a full walk. A missing file soft-deletes its row.
pub fn index_file(store: &Store, collection: &Collection, rel_path: &str) -> Result<IndexOutcome> {
    let abs_path = Path::new(&collection.root).join(rel_path);
    if !abs_path.exists() {
        store.deactivate_document(collection.id, rel_path)?;
        return Ok(IndexOutcome::Missing);
    }

    let file = MarkdownFile {
        abs_path,
        rel_path: rel_path.to_string(),
    };
    let changed = upsert_file(store, collection, &file)?;
    Ok(if changed {
        IndexOutcome::Indexed
    } else {
        IndexOutcome::Unchanged
    })
}

fn upsert_file(store: &Store, collection: &Collection, file: &MarkdownFile) -> Result<bool> {
    let source = fs::read_to_string(&file.abs_path)
        .with_context(|| format!("Failed to read {}", file.abs_path.display()))?;

    let parsed = note::parse_document(&source);
    let title = note::derive_title(&parsed.frontmatter, &parsed.body, &file.rel_path);

    let outcome = store.upsert(UpsertInput {
        collection_id: collection.id,
        path: &file.rel_path,
        title: &title,
        body: &parsed.body,
        frontmatter: &parsed.frontmatter,
    })?;

    Ok(outcome.changed)
}
