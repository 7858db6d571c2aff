use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::{store::Store, types::Collection};

const DEFAULT_GLOB: &str = "**/*.md";

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collection root does not exist: {0}")]
    PathMissing(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Store {
    /// Register a collection root. Re-adding an existing name updates its
    /// root and glob in place, so `add` behaves as upsert-by-name.
    pub fn add_collection(
        &self,
        name: &str,
        root: &Path,
        glob: Option<&str>,
    ) -> Result<Collection, CollectionError> {
        if !root.exists() {
            return Err(CollectionError::PathMissing(root.display().to_string()));
        }

        let canonical = std::fs::canonicalize(root)
            .with_context(|| format!("Failed to canonicalize collection root {}", root.display()))
            .map_err(CollectionError::Internal)?;
        let root_key = canonical.to_string_lossy().replace('\\', "/");
        let glob = glob.unwrap_or(DEFAULT_GLOB);

        self.run_write(|conn| {
            conn.execute(
                "INSERT INTO collections (name, root, glob) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(name) DO UPDATE SET root = excluded.root, glob = excluded.glob",
                params![name, root_key, glob],
            )
            .context("Failed to upsert collection")?;
            Ok(())
        })?;

        let collection = self
            .get_collection(name)
            .map_err(CollectionError::Internal)?
            .context("collection row missing after insert")
            .map_err(CollectionError::Internal)?;

        info!(name, root = %root_key, "collection registered");
        Ok(collection)
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, root, glob, created_at FROM collections ORDER BY name",
            )
            .context("Failed to prepare collection list")?;

        let rows = stmt
            .query_map([], row_to_collection)
            .context("Failed to list collections")?;

        let mut collections = Vec::new();
        for row in rows {
            collections.push(row?);
        }
        Ok(collections)
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<Collection>> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT id, name, root, glob, created_at FROM collections WHERE name = ?1",
            params![name],
            row_to_collection,
        )
        .optional()
        .context("Failed to load collection")
    }

    /// Remove a collection and every document under it. FTS rows are cleared
    /// explicitly (the virtual table has no foreign keys) and content rows
    /// no longer referenced by any document are garbage collected together
    /// with their vectors. Returns false when the name is unknown.
    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        self.run_write(|conn| {
            let tx = conn
                .transaction()
                .context("Failed to start collection removal")?;

            let collection_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM collections WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to resolve collection")?;
            let Some(collection_id) = collection_id else {
                return Ok(false);
            };

            let (rowids, hashes): (Vec<i64>, Vec<String>) = {
                let mut stmt = tx
                    .prepare(
                        "SELECT rowid, content_hash FROM documents WHERE collection_id = ?1",
                    )
                    .context("Failed to prepare document scan")?;
                let rows = stmt
                    .query_map(params![collection_id], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })
                    .context("Failed to scan collection documents")?;

                let mut rowids = Vec::new();
                let mut hashes = Vec::new();
                for row in rows {
                    let (rowid, hash) = row?;
                    rowids.push(rowid);
                    hashes.push(hash);
                }
                (rowids, hashes)
            };

            for rowid in &rowids {
                tx.execute("DELETE FROM documents_fts WHERE rowid = ?1", params![rowid])
                    .context("Failed to clear FTS row")?;
            }

            tx.execute(
                "DELETE FROM collections WHERE id = ?1",
                params![collection_id],
            )
            .context("Failed to delete collection")?;

            for hash in &hashes {
                let remaining: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM documents WHERE content_hash = ?1",
                        params![hash],
                        |row| row.get(0),
                    )
                    .context("Failed to count remaining references")?;
                if remaining == 0 {
                    crate::store::remove_content_rows(&tx, hash, self.vector_enabled())?;
                }
            }

            tx.commit().context("Failed to commit collection removal")?;
            info!(name, "collection removed");
            Ok(true)
        })
    }
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        root: row.get(2)?,
        glob: row.get(3)?,
        created_at: row.get(4)?,
    })
}
