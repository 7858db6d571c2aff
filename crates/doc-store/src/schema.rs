use std::sync::OnceLock;

use anyhow::{Context, Result};
use rusqlite::{
    ffi::{sqlite3_auto_extension, SQLITE_OK},
    params, Connection, OptionalExtension,
};
use sqlite_vec::sqlite3_vec_init;
use tracing::{info, warn};

pub(crate) const VECTOR_TABLE: &str = "vectors_vec";
const DIMENSION_META_KEY: &str = "vector_dimension";

/// Register sqlite-vec as an auto extension so every later connection gains
/// the vec0 virtual table. Returns false when registration fails, in which
/// case vector search degrades to empty results. Safe to call repeatedly;
/// the outcome is decided once per process.
pub(crate) fn register_vector_extension() -> bool {
    static REGISTERED: OnceLock<bool> = OnceLock::new();

    *REGISTERED.get_or_init(|| {
        let rc = unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())))
        };
        if rc == SQLITE_OK {
            true
        } else {
            warn!(rc, "failed to register sqlite-vec extension, semantic search disabled");
            false
        }
    })
}

pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS collections ( \
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             name TEXT NOT NULL UNIQUE, \
             root TEXT NOT NULL, \
             glob TEXT NOT NULL DEFAULT '**/*.md', \
             created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         ); \
         CREATE TABLE IF NOT EXISTS documents ( \
             id TEXT NOT NULL, \
             collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE, \
             path TEXT NOT NULL, \
             title TEXT NOT NULL, \
             content_hash TEXT NOT NULL, \
             frontmatter TEXT, \
             active INTEGER NOT NULL DEFAULT 1, \
             created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')), \
             updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')), \
             UNIQUE (collection_id, path) \
         ); \
         CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash); \
         CREATE INDEX IF NOT EXISTS idx_documents_active ON documents(active); \
         CREATE TABLE IF NOT EXISTS content ( \
             content_hash TEXT PRIMARY KEY, \
             body TEXT NOT NULL, \
             title TEXT NOT NULL, \
             updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         ); \
         CREATE TABLE IF NOT EXISTS content_vectors ( \
             content_hash TEXT NOT NULL, \
             seq INTEGER NOT NULL DEFAULT 0, \
             pos INTEGER NOT NULL DEFAULT 0, \
             model_name TEXT NOT NULL, \
             embedded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')), \
             PRIMARY KEY (content_hash, seq) \
         ); \
         CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5( \
             title, doc, \
             content='', contentless_delete=1, \
             tokenize='unicode61' \
         ); \
         CREATE TABLE IF NOT EXISTS store_meta ( \
             key TEXT PRIMARY KEY, \
             value TEXT NOT NULL \
         );",
    )
    .context("Failed to initialize store schema")?;

    Ok(())
}

pub(crate) fn vector_table_exists(conn: &Connection) -> Result<bool> {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![VECTOR_TABLE],
            |row| row.get(0),
        )
        .context("Failed to check vector table existence")?;

    Ok(exists != 0)
}

fn stored_dimension(conn: &Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![DIMENSION_META_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read stored vector dimension")?;

    Ok(value.and_then(|value| value.parse().ok()))
}

fn create_vector_table(conn: &Connection, dimension: usize) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {VECTOR_TABLE} USING vec0( \
             hash_seq TEXT PRIMARY KEY, \
             embedding float[{dimension}] distance_metric=cosine \
         );"
    ))
    .with_context(|| format!("Failed to create vector table at dimension {dimension}"))?;

    Ok(())
}

/// Drop and recreate the vector table empty at `dimension`.
pub(crate) fn recreate_vector_table(conn: &Connection, dimension: usize) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {VECTOR_TABLE};"))
        .context("Failed to drop vector table")?;
    create_vector_table(conn, dimension)
}

/// Make the vector table match `dimension`. A mismatch drops the table and
/// all chunk metadata; vectors are regenerable, lexical data stays intact.
/// Returns true when the table was (re)created empty.
pub(crate) fn ensure_vector_table(conn: &Connection, dimension: usize) -> Result<bool> {
    let stored = stored_dimension(conn)?;
    let exists = vector_table_exists(conn)?;

    if exists && stored == Some(dimension) {
        return Ok(false);
    }

    if exists {
        info!(
            stored = ?stored,
            requested = dimension,
            "vector dimension changed, rebuilding vector table"
        );
        conn.execute_batch(&format!("DROP TABLE {VECTOR_TABLE};"))
            .context("Failed to drop vector table for dimension change")?;
        conn.execute("DELETE FROM content_vectors", [])
            .context("Failed to clear chunk metadata for dimension change")?;
    }

    create_vector_table(conn, dimension)?;
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![DIMENSION_META_KEY, dimension.to_string()],
    )
    .context("Failed to record vector dimension")?;

    Ok(true)
}
