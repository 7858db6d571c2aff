use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    fts::{build_match_query, fts_text, normalize_bm25},
    schema,
    types::{
        CollectionStats, Document, EmbeddingStatus, LexicalHit, PendingEmbedding, StoreStats,
        VectorHit,
    },
};

const DB_FILE_NAME: &str = "index.sqlite";
const DOC_ID_LEN: usize = 12;
const BUSY_RETRIES: usize = 3;
const BUSY_BACKOFF_MS: u64 = 50;
/// ANN over-fetch factor so per-document dedup still fills the requested k.
const VEC_OVERFETCH: usize = 3;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub dimension: usize,
}

/// One row of work for [`Store::upsert`].
#[derive(Debug)]
pub struct UpsertInput<'a> {
    pub collection_id: i64,
    pub path: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub frontmatter: &'a JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub doc_id: String,
    pub content_hash: String,
    /// False when the document already existed with identical content.
    pub changed: bool,
}

/// The embedded database. One write connection guarded by a mutex; read
/// paths open short-lived connections so WAL readers run concurrently.
pub struct Store {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    vector_enabled: bool,
    dimension: AtomicUsize,
}

impl Store {
    /// Open (creating if necessary) the store under `data_dir`. A sqlite-vec
    /// registration failure degrades vector search to empty results instead
    /// of failing the open.
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!(
                "Failed to create store directory at {}",
                config.data_dir.display()
            )
        })?;

        let vector_enabled = schema::register_vector_extension();

        let db_path = config.data_dir.join(DB_FILE_NAME);
        let conn = open_connection(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL journal mode")?;

        schema::init_schema(&conn)?;

        let vector_enabled = if vector_enabled {
            match schema::ensure_vector_table(&conn, config.dimension) {
                Ok(_) => true,
                Err(error) => {
                    warn!(%error, "vector table unavailable, semantic search disabled");
                    false
                }
            }
        } else {
            false
        };

        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
            vector_enabled,
            dimension: AtomicUsize::new(config.dimension),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn dimension(&self) -> usize {
        self.dimension.load(Ordering::SeqCst)
    }

    pub fn vector_enabled(&self) -> bool {
        self.vector_enabled
    }

    /// Open a read-only view for search queries.
    pub(crate) fn read_conn(&self) -> Result<Connection> {
        open_connection(&self.db_path)
    }

    /// Run `op` against the write connection, retrying on SQLITE_BUSY with
    /// linear backoff.
    pub(crate) fn run_write<T>(&self, op: impl Fn(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("store write lock poisoned"))?;

        let mut attempt = 0;
        loop {
            match op(&mut conn) {
                Ok(value) => return Ok(value),
                Err(error) if is_busy(&error) && attempt + 1 < BUSY_RETRIES => {
                    attempt += 1;
                    debug!(attempt, "database busy, retrying write");
                    std::thread::sleep(Duration::from_millis(BUSY_BACKOFF_MS * attempt as u64));
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Insert or update one document, keeping content, FTS, and vector rows
    /// coherent. When the body changes and no other active document shares
    /// the old hash, the old content row and its vectors are removed within
    /// the same transaction.
    pub fn upsert(&self, input: UpsertInput<'_>) -> Result<UpsertOutcome> {
        let hash = content_hash(input.body);
        let doc_id = derive_doc_id(&hash, input.path);
        let frontmatter = serde_json::to_string(input.frontmatter)
            .context("Failed to serialize frontmatter")?;

        self.run_write(|conn| {
            let tx = conn
                .transaction()
                .context("Failed to start upsert transaction")?;

            let existing: Option<(i64, String)> = tx
                .query_row(
                    "SELECT rowid, content_hash FROM documents \
                     WHERE collection_id = ?1 AND path = ?2",
                    params![input.collection_id, input.path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("Failed to look up existing document")?;

            if let Some((rowid, old_hash)) = &existing {
                if *old_hash != hash {
                    let other_refs: i64 = tx
                        .query_row(
                            "SELECT COUNT(*) FROM documents \
                             WHERE content_hash = ?1 AND active = 1 AND rowid <> ?2",
                            params![old_hash, rowid],
                            |row| row.get(0),
                        )
                        .context("Failed to count content references")?;

                    if other_refs == 0 {
                        remove_content_rows(&tx, old_hash, self.vector_enabled)?;
                    }
                }
            }

            let rowid = match &existing {
                Some((rowid, _)) => {
                    tx.execute(
                        "UPDATE documents \
                         SET id = ?1, title = ?2, content_hash = ?3, frontmatter = ?4, \
                             active = 1, \
                             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                         WHERE rowid = ?5",
                        params![doc_id, input.title, hash, frontmatter, rowid],
                    )
                    .context("Failed to update document row")?;
                    *rowid
                }
                None => {
                    tx.execute(
                        "INSERT INTO documents (id, collection_id, path, title, content_hash, frontmatter) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            doc_id,
                            input.collection_id,
                            input.path,
                            input.title,
                            hash,
                            frontmatter
                        ],
                    )
                    .context("Failed to insert document row")?;
                    tx.last_insert_rowid()
                }
            };

            tx.execute(
                "INSERT INTO content (content_hash, body, title) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(content_hash) DO UPDATE SET \
                     title = excluded.title, \
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![hash, input.body, input.title],
            )
            .context("Failed to upsert content row")?;

            // Explicit FTS resync for the affected rowid; triggers are not
            // relied upon so bulk operations cannot desynchronize the index.
            tx.execute("DELETE FROM documents_fts WHERE rowid = ?1", params![rowid])
                .context("Failed to clear FTS row")?;
            tx.execute(
                "INSERT INTO documents_fts (rowid, title, doc) VALUES (?1, ?2, ?3)",
                params![rowid, fts_text(input.title), fts_text(input.body)],
            )
            .context("Failed to write FTS row")?;

            tx.commit().context("Failed to commit upsert")?;

            let changed = match &existing {
                Some((_, old_hash)) => *old_hash != hash,
                None => true,
            };

            Ok(UpsertOutcome {
                doc_id: doc_id.clone(),
                content_hash: hash.clone(),
                changed,
            })
        })
    }

    /// Soft-delete documents of `collection_id` whose path was not observed
    /// in the latest walk. Rows are kept so a reappearing file restores by
    /// path. Returns the number of documents deactivated.
    pub fn deactivate_missing(
        &self,
        collection_id: i64,
        seen_paths: &HashSet<String>,
    ) -> Result<usize> {
        self.run_write(|conn| {
            let tx = conn
                .transaction()
                .context("Failed to start deactivation transaction")?;

            let missing: Vec<(i64, String)> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT rowid, path, content_hash FROM documents \
                         WHERE collection_id = ?1 AND active = 1",
                    )
                    .context("Failed to prepare active document scan")?;
                let rows = stmt
                    .query_map(params![collection_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })
                    .context("Failed to scan active documents")?;

                let mut missing = Vec::new();
                for row in rows {
                    let (rowid, path, hash) = row?;
                    if !seen_paths.contains(&path) {
                        missing.push((rowid, hash));
                    }
                }
                missing
            };

            let deactivated = missing.len();
            for (rowid, _) in &missing {
                tx.execute(
                    "UPDATE documents \
                     SET active = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                     WHERE rowid = ?1",
                    params![rowid],
                )
                .context("Failed to deactivate document")?;
            }

            // Content rows stay only while an active reference or a vector
            // row still needs them.
            let hashes: HashSet<String> = missing.into_iter().map(|(_, hash)| hash).collect();
            for hash in &hashes {
                let active_refs: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM documents WHERE content_hash = ?1 AND active = 1",
                        params![hash],
                        |row| row.get(0),
                    )
                    .context("Failed to count active references")?;
                let vector_rows: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM content_vectors WHERE content_hash = ?1",
                        params![hash],
                        |row| row.get(0),
                    )
                    .context("Failed to count vector rows")?;

                if active_refs == 0 && vector_rows == 0 {
                    tx.execute("DELETE FROM content WHERE content_hash = ?1", params![hash])
                        .context("Failed to remove unreferenced content")?;
                }
            }

            tx.commit().context("Failed to commit deactivation")?;
            Ok(deactivated)
        })
    }

    /// Soft-delete a single document by path, for watcher unlink events.
    /// Returns true when a row was deactivated.
    pub fn deactivate_document(&self, collection_id: i64, path: &str) -> Result<bool> {
        self.run_write(|conn| {
            let changed = conn
                .execute(
                    "UPDATE documents \
                     SET active = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                     WHERE collection_id = ?1 AND path = ?2 AND active = 1",
                    params![collection_id, path],
                )
                .context("Failed to deactivate document")?;
            Ok(changed > 0)
        })
    }

    /// BM25 query over active documents. Raw scores are normalized to (0, 1)
    /// so results are comparable across queries.
    pub fn bm25_search(
        &self,
        query: &str,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        let Some(match_query) = build_match_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.read_conn()?;
        let mut sql = String::from(
            "SELECT c.name, d.path, d.title, d.content_hash, bm25(documents_fts) \
             FROM documents_fts \
             JOIN documents d ON d.rowid = documents_fts.rowid \
             JOIN collections c ON c.id = d.collection_id \
             WHERE documents_fts MATCH ?1 AND d.active = 1",
        );
        let mut bindings: Vec<&dyn ToSql> = vec![&match_query];
        if let Some(collection) = &collection {
            sql.push_str(" AND c.name = ?2");
            bindings.push(collection);
        }
        sql.push_str(" ORDER BY bm25(documents_fts) LIMIT ");
        sql.push_str(&limit.to_string());

        let mut stmt = conn.prepare(&sql).context("Failed to prepare BM25 query")?;
        let rows = stmt
            .query_map(bindings.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })
            .context("Failed to run BM25 query")?;

        let mut hits = Vec::new();
        for row in rows {
            let (collection, path, title, content_hash, raw) = row?;
            if !raw.is_finite() {
                continue;
            }
            hits.push(LexicalHit {
                collection,
                path,
                title,
                content_hash,
                score: normalize_bm25(raw),
            });
        }

        Ok(hits)
    }

    /// K-NN query over the vector table, deduplicated per document with the
    /// minimum distance kept. Absent extension or a dimension mismatch
    /// degrades to an empty list, never an error.
    pub fn vector_search(
        &self,
        embedding: &[f32],
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        if !self.vector_enabled || limit == 0 {
            return Ok(Vec::new());
        }
        if embedding.len() != self.dimension() {
            debug!(
                query_dim = embedding.len(),
                store_dim = self.dimension(),
                "query embedding dimension mismatch, skipping vector search"
            );
            return Ok(Vec::new());
        }

        let conn = self.read_conn()?;
        let k = limit * VEC_OVERFETCH;
        let blob = f32s_to_bytes(embedding);

        let knn: Result<Vec<(String, f64)>> = (|| {
            let mut stmt = conn.prepare(
                "SELECT hash_seq, distance FROM vectors_vec \
                 WHERE embedding MATCH vec_f32(?1) AND k = ?2 \
                 ORDER BY distance",
            )?;
            let rows = stmt.query_map(params![blob, k as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })();

        let knn = match knn {
            Ok(rows) => rows,
            Err(error) => {
                warn!(%error, "vector query failed, degrading to empty result");
                return Ok(Vec::new());
            }
        };

        let mut best_by_hash: HashMap<String, f64> = HashMap::new();
        for (hash_seq, distance) in knn {
            let Some((hash, _seq)) = hash_seq.rsplit_once('_') else {
                continue;
            };
            best_by_hash
                .entry(hash.to_string())
                .and_modify(|best| *best = best.min(distance))
                .or_insert(distance);
        }

        let mut sql = String::from(
            "SELECT c.name, d.path, d.title FROM documents d \
             JOIN collections c ON c.id = d.collection_id \
             WHERE d.content_hash = ?1 AND d.active = 1",
        );
        if collection.is_some() {
            sql.push_str(" AND c.name = ?2");
        }
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare vector hit lookup")?;

        let mut best: HashMap<(String, String), VectorHit> = HashMap::new();
        for (hash, distance) in best_by_hash {
            let mut bindings: Vec<&dyn ToSql> = vec![&hash];
            if let Some(collection) = &collection {
                bindings.push(collection);
            }
            let rows = stmt
                .query_map(bindings.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .context("Failed to resolve vector hits")?;

            for row in rows {
                let (collection, path, title) = row?;
                let score = 1.0 - distance;
                let key = (collection.clone(), path.clone());
                match best.get(&key) {
                    Some(existing) if existing.score >= score => {}
                    _ => {
                        best.insert(
                            key,
                            VectorHit {
                                collection,
                                path,
                                title,
                                content_hash: hash.clone(),
                                score,
                            },
                        );
                    }
                }
            }
        }

        let mut hits: Vec<VectorHit> = best.into_values().collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Content hashes with an active document but no `seq=0` vector row.
    pub fn hashes_for_embedding(&self) -> Result<Vec<PendingEmbedding>> {
        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT d.content_hash, MIN(d.path) FROM documents d \
                 WHERE d.active = 1 AND NOT EXISTS ( \
                     SELECT 1 FROM content_vectors v \
                     WHERE v.content_hash = d.content_hash AND v.seq = 0 \
                 ) \
                 GROUP BY d.content_hash \
                 ORDER BY MIN(d.path)",
            )
            .context("Failed to prepare pending embedding scan")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(PendingEmbedding {
                    content_hash: row.get(0)?,
                    probe_path: row.get(1)?,
                })
            })
            .context("Failed to scan pending embeddings")?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        Ok(pending)
    }

    /// Write one chunk vector and its metadata in a single transaction.
    pub fn insert_embedding(
        &self,
        content_hash: &str,
        seq: i64,
        pos: i64,
        model_name: &str,
        embedding: &[f32],
    ) -> Result<()> {
        if !self.vector_enabled {
            return Err(anyhow!("vector extension unavailable, cannot store embeddings"));
        }
        if embedding.len() != self.dimension() {
            return Err(anyhow!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimension()
            ));
        }

        let blob = f32s_to_bytes(embedding);
        let vec_key = format!("{content_hash}_{seq}");

        self.run_write(|conn| {
            let tx = conn
                .transaction()
                .context("Failed to start embedding transaction")?;

            tx.execute(
                "INSERT OR REPLACE INTO vectors_vec (hash_seq, embedding) \
                 VALUES (?1, vec_f32(?2))",
                params![vec_key, blob],
            )
            .context("Failed to write vector row")?;
            tx.execute(
                "INSERT OR REPLACE INTO content_vectors (content_hash, seq, pos, model_name) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![content_hash, seq, pos, model_name],
            )
            .context("Failed to write chunk metadata")?;

            tx.commit().context("Failed to commit embedding")
        })
    }

    /// Drop every stored vector and its metadata, recreating the vector
    /// table empty at the current dimension.
    pub fn clear_all_embeddings(&self) -> Result<()> {
        let dimension = self.dimension();
        self.run_write(|conn| {
            let tx = conn
                .transaction()
                .context("Failed to start embedding clear transaction")?;

            tx.execute("DELETE FROM content_vectors", [])
                .context("Failed to clear chunk metadata")?;
            if self.vector_enabled {
                schema::recreate_vector_table(&tx, dimension)?;
            }

            tx.commit().context("Failed to commit embedding clear")
        })
    }

    pub fn embedding_status(&self) -> Result<EmbeddingStatus> {
        let conn = self.read_conn()?;
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT content_hash) FROM documents WHERE active = 1",
                [],
                |row| row.get(0),
            )
            .context("Failed to count active content")?;
        let embedded: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT d.content_hash) FROM documents d \
                 JOIN content_vectors v ON v.content_hash = d.content_hash AND v.seq = 0 \
                 WHERE d.active = 1",
                [],
                |row| row.get(0),
            )
            .context("Failed to count embedded content")?;

        Ok(EmbeddingStatus {
            total: total as usize,
            embedded: embedded as usize,
            pending: (total - embedded).max(0) as usize,
        })
    }

    /// Change the vector dimension; a mismatch rebuilds the vector table.
    pub fn set_dimension(&self, dimension: usize) -> Result<()> {
        if self.vector_enabled {
            self.run_write(|conn| {
                schema::ensure_vector_table(conn, dimension)?;
                Ok(())
            })?;
        }
        self.dimension.store(dimension, Ordering::SeqCst);
        Ok(())
    }

    /// The stored whole-document vector for `content_hash`, if any.
    pub fn seq0_vector(&self, content_hash: &str) -> Result<Option<Vec<f32>>> {
        if !self.vector_enabled {
            return Ok(None);
        }

        let conn = self.read_conn()?;
        let vec_key = format!("{content_hash}_0");
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM vectors_vec WHERE hash_seq = ?1",
                params![vec_key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read stored vector")?;

        Ok(blob.map(|blob| bytes_to_f32s(&blob)))
    }

    pub fn content_for_hash(&self, content_hash: &str) -> Result<Option<(String, String)>> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT title, body FROM content WHERE content_hash = ?1",
            params![content_hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("Failed to read content row")
    }

    /// Look up one document by collection name and relative path.
    pub fn document(&self, collection: &str, path: &str) -> Result<Option<Document>> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT d.id, c.name, d.path, d.title, ct.body, d.content_hash, d.frontmatter, \
                    d.active, d.created_at, d.updated_at \
             FROM documents d \
             JOIN collections c ON c.id = d.collection_id \
             LEFT JOIN content ct ON ct.content_hash = d.content_hash \
             WHERE c.name = ?1 AND d.path = ?2",
            params![collection, path],
            row_to_document,
        )
        .optional()
        .context("Failed to load document")
    }

    /// Resolve `collection/relative/path.md` identifiers, falling back to a
    /// bare relative path matched across all collections.
    pub fn resolve_document(&self, identifier: &str) -> Result<Option<Document>> {
        if let Some((collection, rest)) = identifier.split_once('/') {
            if let Some(doc) = self.document(collection, rest)? {
                return Ok(Some(doc));
            }
        }

        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT d.id, c.name, d.path, d.title, ct.body, d.content_hash, d.frontmatter, \
                        d.active, d.created_at, d.updated_at \
                 FROM documents d \
                 JOIN collections c ON c.id = d.collection_id \
                 LEFT JOIN content ct ON ct.content_hash = d.content_hash \
                 WHERE d.path = ?1 \
                 ORDER BY c.name \
                 LIMIT 1",
            )
            .context("Failed to prepare document lookup")?;

        stmt.query_row(params![identifier], row_to_document)
            .optional()
            .context("Failed to resolve document")
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.name, COUNT(d.rowid) FROM collections c \
                 LEFT JOIN documents d ON d.collection_id = c.id AND d.active = 1 \
                 GROUP BY c.id ORDER BY c.name",
            )
            .context("Failed to prepare stats query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CollectionStats {
                    name: row.get(0)?,
                    documents: row.get::<_, i64>(1)? as usize,
                })
            })
            .context("Failed to read collection stats")?;

        let mut collections = Vec::new();
        let mut documents = 0;
        for row in rows {
            let stats = row?;
            documents += stats.documents;
            collections.push(stats);
        }

        Ok(StoreStats {
            collections,
            documents,
            embedding: self.embedding_status()?,
        })
    }

    /// Flush the WAL; called from the engine's close path.
    pub fn close(&self) -> Result<()> {
        self.run_write(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
                .context("Failed to checkpoint WAL")
        })
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    conn.pragma_update(None, "foreign_keys", 1)
        .context("Failed to enable foreign keys")?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .context("Failed to set busy timeout")?;

    Ok(conn)
}

/// Delete the content row for `hash` together with its chunk metadata and
/// vector rows. LIKE wildcards inside the hash are escaped so the prefix
/// match stays literal.
pub(crate) fn remove_content_rows(conn: &Connection, hash: &str, vector_enabled: bool) -> Result<()> {
    conn.execute(
        "DELETE FROM content_vectors WHERE content_hash = ?1",
        params![hash],
    )
    .context("Failed to remove chunk metadata")?;

    if vector_enabled && schema::vector_table_exists(conn)? {
        let pattern = format!("{}\\_%", escape_like(hash));
        conn.execute(
            "DELETE FROM vectors_vec WHERE hash_seq LIKE ?1 ESCAPE '\\'",
            params![pattern],
        )
        .context("Failed to remove vector rows")?;
    }

    conn.execute("DELETE FROM content WHERE content_hash = ?1", params![hash])
        .context("Failed to remove content row")?;

    Ok(())
}

pub(crate) fn content_hash(body: &str) -> String {
    format!("{:x}", md5::compute(body.as_bytes()))
}

pub(crate) fn derive_doc_id(content_hash: &str, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(DOC_ID_LEN);
    for byte in digest.iter() {
        id.push_str(&format!("{byte:02x}"));
        if id.len() >= DOC_ID_LEN {
            break;
        }
    }
    id.truncate(DOC_ID_LEN);
    id
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub(crate) fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * std::mem::size_of::<f32>());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn bytes_to_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn is_busy(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(inner, _))
                if inner.code == rusqlite::ErrorCode::DatabaseBusy
                    || inner.code == rusqlite::ErrorCode::DatabaseLocked
        )
    })
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let frontmatter: Option<String> = row.get(6)?;
    Ok(Document {
        id: row.get(0)?,
        collection: row.get(1)?,
        path: row.get(2)?,
        title: row.get(3)?,
        body: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        content_hash: row.get(5)?,
        frontmatter: frontmatter
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(JsonValue::Object(Default::default())),
        active: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
