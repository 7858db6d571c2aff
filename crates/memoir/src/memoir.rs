use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context as _;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::{
    config::MemoirConfig,
    decay::{decay_factor, half_life_from_frontmatter},
    engine::{Engine, QueryRequest},
    error::MemoirError,
    keyed_lock::KeyedLock,
    keys::{key_to_rel_path, rel_path_to_key, resolve_under_root, validate_key},
    tree,
    zones::{matching_zone, Zone, ZoneStats},
};

const DEFAULT_NOTE_TYPE: &str = "archival";

/// One memory document read back from disk.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryNote {
    pub key: String,
    pub path: String,
    pub content: String,
    pub frontmatter: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetOutcome {
    pub key: String,
    pub path: String,
    pub created: bool,
}

/// A search result translated back into key space, with half-life decay
/// applied.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySearchHit {
    pub key: Option<String>,
    pub path: String,
    pub title: String,
    pub score: f64,
    pub content: Option<String>,
    pub source: indexing::SearchSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub key: String,
    pub title: String,
    pub note_type: String,
}

/// Tree-structured memory facade over the engine: dotted keys mapped onto
/// Markdown files under a single collection root.
pub struct Memoir {
    engine: Arc<Engine>,
    root: PathBuf,
    collection: String,
    zones: Mutex<Vec<Zone>>,
    locks: KeyedLock,
}

impl Memoir {
    /// Register the memory root as a collection and build the facade. The
    /// engine must be initialized first.
    pub async fn attach(engine: Arc<Engine>, config: MemoirConfig) -> Result<Self, MemoirError> {
        fs::create_dir_all(&config.root)
            .with_context(|| {
                format!("Failed to create memory root at {}", config.root.display())
            })
            .map_err(MemoirError::Internal)?;

        let collection = engine
            .add_collection(&config.collection, &config.root, None)
            .await?;

        Ok(Self {
            engine,
            root: PathBuf::from(collection.root),
            collection: config.collection,
            zones: Mutex::new(Vec::new()),
            locks: KeyedLock::default(),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    // ---- zones -----------------------------------------------------------

    /// Register (or replace) a zone by name.
    pub fn define_zone(&self, zone: Zone) {
        let mut zones = self.zones.lock().expect("zone lock poisoned");
        zones.retain(|existing| existing.name != zone.name);
        zones.push(zone);
    }

    pub fn zone_stats(&self) -> Vec<ZoneStats> {
        let zones = self.zones.lock().expect("zone lock poisoned");
        zones
            .iter()
            .map(|zone| ZoneStats {
                name: zone.name.clone(),
                key_prefix: zone.key_prefix.clone(),
                items: self.count_items_under(&zone.key_prefix),
                max_items: zone.max_items,
                max_depth: zone.max_depth,
            })
            .collect()
    }

    fn count_items_under(&self, key_prefix: &str) -> usize {
        let dir = self.root.join(key_prefix.replace('.', "/"));
        if !dir.is_dir() {
            return 0;
        }
        indexing::collect_markdown_files(&dir)
            .map(|files| files.len())
            .unwrap_or(0)
    }

    // ---- writes ----------------------------------------------------------

    /// Write one memory document. Writers racing on the same key serialize
    /// by arrival order; zone violations abort before anything touches disk.
    pub async fn set(
        &self,
        key: &str,
        body: &str,
        meta: JsonValue,
    ) -> Result<SetOutcome, MemoirError> {
        validate_key(key)?;
        let rel_path = key_to_rel_path(key)?;
        let abs_path = resolve_under_root(&self.root, &rel_path)?;

        let _guard = self.locks.acquire(key).await;

        let is_new = !abs_path.exists();
        let zone_defaults = self.enforce_zones(key, is_new)?;

        let existing_frontmatter = if is_new {
            JsonValue::Object(Map::new())
        } else {
            fs::read_to_string(&abs_path)
                .ok()
                .map(|source| note::parse_document(&source).frontmatter)
                .unwrap_or_else(|| JsonValue::Object(Map::new()))
        };

        let frontmatter = merge_frontmatter(
            key,
            &existing_frontmatter,
            &meta,
            is_new,
            zone_defaults,
        );

        let rendered = note::render_document(&frontmatter, body);
        atomic_write(&abs_path, &rendered).map_err(MemoirError::Internal)?;

        self.engine.index_path(&self.collection, &rel_path).await?;
        self.opportunistic_embed(&rel_path).await;

        Ok(SetOutcome {
            key: key.to_string(),
            path: rel_path,
            created: is_new,
        })
    }

    fn enforce_zones(
        &self,
        key: &str,
        is_new: bool,
    ) -> Result<(Option<String>, Option<f64>), MemoirError> {
        let zones = self.zones.lock().expect("zone lock poisoned");
        let Some(zone) = matching_zone(&zones, key) else {
            return Ok((None, None));
        };

        if let Some(max_depth) = zone.max_depth {
            if key.split('.').count() > max_depth {
                return Err(MemoirError::ZoneDepthExceeded {
                    zone: zone.name.clone(),
                    max_depth,
                    key: key.to_string(),
                });
            }
        }

        if is_new {
            if let Some(max_items) = zone.max_items {
                if self.count_items_under(&zone.key_prefix) >= max_items {
                    return Err(MemoirError::ZoneQuotaExceeded {
                        zone: zone.name.clone(),
                        max_items,
                    });
                }
            }
        }

        Ok((zone.default_type.clone(), zone.default_half_life_days))
    }

    /// Best-effort whole-document embed after a write; only when the model
    /// is already loaded, so a write never waits on a model load.
    async fn opportunistic_embed(&self, rel_path: &str) {
        if !self.engine.is_embedding_model_loaded().await {
            return;
        }

        let identifier = format!("{}/{}", self.collection, rel_path);
        let document = match self.engine.get(&identifier).await {
            Ok(Some(document)) => document,
            Ok(None) => return,
            Err(error) => {
                debug!(rel_path, %error, "skipping opportunistic embed");
                return;
            }
        };

        match self.engine.embed_document(&document.body).await {
            Ok(vector) => {
                if let Err(error) = self
                    .engine
                    .insert_embedding(&document.content_hash, 0, 0, vector)
                    .await
                {
                    warn!(rel_path, %error, "failed to store opportunistic embedding");
                }
            }
            Err(error) => debug!(rel_path, %error, "opportunistic embed failed"),
        }
    }

    // ---- reads -----------------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<MemoryNote>, MemoirError> {
        let rel_path = key_to_rel_path(key)?;
        let abs_path = resolve_under_root(&self.root, &rel_path)?;

        let Ok(source) = fs::read_to_string(&abs_path) else {
            return Ok(None);
        };
        let parsed = note::parse_document(&source);

        Ok(Some(MemoryNote {
            key: key.to_string(),
            path: rel_path,
            content: parsed.body,
            frontmatter: parsed.frontmatter,
        }))
    }

    /// Delete a memory document. The standard all-dots-are-separators path
    /// is tried first; keys with dots in the leaf segment fall back to
    /// literal-dot variants and finally a parent-directory scan.
    pub async fn delete(&self, key: &str) -> Result<bool, MemoirError> {
        validate_key(key)?;
        let _guard = self.locks.acquire(key).await;

        let Some(rel_path) = self.find_existing_rel_path(key)? else {
            return Ok(false);
        };
        let abs_path = resolve_under_root(&self.root, &rel_path)?;

        fs::remove_file(&abs_path)
            .with_context(|| format!("Failed to delete {}", abs_path.display()))
            .map_err(MemoirError::Internal)?;

        self.engine.index_path(&self.collection, &rel_path).await?;
        Ok(true)
    }

    fn find_existing_rel_path(&self, key: &str) -> Result<Option<String>, MemoirError> {
        // Standard mapping.
        let standard = key_to_rel_path(key)?;
        if resolve_under_root(&self.root, &standard)?.exists() {
            return Ok(Some(standard));
        }

        // Trailing dots as literal filename characters: peel separators off
        // the right, so `a.b.c` also tries `a/b.c.md` and `a.b.c.md`.
        let segments: Vec<&str> = key.split('.').collect();
        for separators in (0..segments.len() - 1).rev() {
            let candidate = if separators == 0 {
                format!("{}.md", segments.join("."))
            } else {
                format!(
                    "{}/{}.md",
                    segments[..separators].join("/"),
                    segments[separators..].join(".")
                )
            };
            if resolve_under_root(&self.root, &candidate)?.exists() {
                return Ok(Some(candidate));
            }
        }

        // Parent-directory scan for prefix/contains matches.
        let leaf = segments.last().unwrap_or(&"");
        let parent_rel = segments[..segments.len() - 1].join("/");
        let parent_abs = self.root.join(&parent_rel);
        if parent_abs.is_dir() {
            let mut names: Vec<String> = fs::read_dir(&parent_abs)
                .map_err(|error| {
                    MemoirError::Internal(anyhow::anyhow!(
                        "Failed to scan {}: {error}",
                        parent_abs.display()
                    ))
                })?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str().map(|name| name.to_string()))
                .filter(|name| name.to_lowercase().ends_with(".md"))
                .collect();
            names.sort();

            for name in &names {
                let stem = name.trim_end_matches(".md");
                if stem.starts_with(leaf) || stem.contains(leaf) {
                    let rel = if parent_rel.is_empty() {
                        name.clone()
                    } else {
                        format!("{parent_rel}/{name}")
                    };
                    return Ok(Some(rel));
                }
            }
        }

        Ok(None)
    }

    // ---- tree enumeration ------------------------------------------------

    pub fn list(&self) -> Result<BTreeMap<String, JsonValue>, MemoirError> {
        tree::list_flat(&self.root).map_err(MemoirError::Internal)
    }

    pub fn list_tree(&self) -> Result<Vec<crate::tree::TreeNode>, MemoirError> {
        tree::list_tree(&self.root).map_err(MemoirError::Internal)
    }

    pub fn tree_for_prompt(&self, prefix: Option<&str>) -> Result<String, MemoirError> {
        tree::tree_for_prompt(&self.root, prefix).map_err(MemoirError::Internal)
    }

    pub fn memories_by_level(
        &self,
        level: usize,
        prefix: Option<&str>,
    ) -> Result<Vec<MemorySummary>, MemoirError> {
        Ok(tree::entries_by_level(&self.root, level, prefix)
            .map_err(MemoirError::Internal)?
            .into_iter()
            .map(|entry| MemorySummary {
                key: entry.key,
                title: entry.title,
                note_type: entry.note_type,
            })
            .collect())
    }

    pub fn simple_tree(&self, prefix: Option<&str>) -> Result<JsonValue, MemoirError> {
        tree::simple_tree(&self.root, prefix).map_err(MemoirError::Internal)
    }

    // ---- search ----------------------------------------------------------

    /// Search restricted to the memory collection, with per-hit half-life
    /// decay applied and keys mapped back from paths.
    pub async fn search(
        &self,
        query: &str,
        request: QueryRequest,
    ) -> Result<Vec<MemorySearchHit>, MemoirError> {
        let request = QueryRequest {
            collection: Some(self.collection.clone()),
            ..request
        };
        let results = self.engine.query(query, None, request).await?;

        let now = Utc::now();
        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            let mut score = result.score;

            let identifier = format!("{}/{}", self.collection, result.path);
            if let Ok(Some(document)) = self.engine.get(&identifier).await {
                if let Some(half_life) = half_life_from_frontmatter(&document.frontmatter) {
                    let updated_at = document
                        .frontmatter
                        .get("updated_at")
                        .and_then(JsonValue::as_str)
                        .unwrap_or(&document.updated_at)
                        .to_string();
                    score *= decay_factor(half_life, &updated_at, now);
                }
            }

            hits.push(MemorySearchHit {
                key: rel_path_to_key(&result.path),
                path: result.path,
                title: result.title,
                score,
                content: result.content,
                source: result.source,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hits)
    }
}

/// Merge order: `{id, key, type}` ← existing ← cleaned new ← zone defaults
/// for new documents ← `{updated_at: now}`. Null values in the incoming
/// metadata are stripped before the merge.
fn merge_frontmatter(
    key: &str,
    existing: &JsonValue,
    incoming: &JsonValue,
    is_new: bool,
    zone_defaults: (Option<String>, Option<f64>),
) -> JsonValue {
    let mut merged = Map::new();
    merged.insert("id".to_string(), json!(key));
    merged.insert("key".to_string(), json!(key));
    merged.insert("type".to_string(), json!(DEFAULT_NOTE_TYPE));

    if let JsonValue::Object(existing) = existing {
        for (name, value) in existing {
            merged.insert(name.clone(), value.clone());
        }
    }

    let incoming_keys: Vec<String> = match incoming {
        JsonValue::Object(incoming) => {
            for (name, value) in incoming {
                if value.is_null() {
                    continue;
                }
                merged.insert(name.clone(), value.clone());
            }
            incoming
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(name, _)| name.clone())
                .collect()
        }
        _ => Vec::new(),
    };

    if is_new {
        let (default_type, default_half_life) = zone_defaults;
        if let Some(default_type) = default_type {
            if !incoming_keys.iter().any(|name| name == "type") {
                merged.insert("type".to_string(), json!(default_type));
            }
        }
        if let Some(default_half_life) = default_half_life {
            if !incoming_keys.iter().any(|name| name == "half_life_days") {
                merged.insert("half_life_days".to_string(), json!(default_half_life));
            }
        }
        if !merged.contains_key("created_at") {
            merged.insert("created_at".to_string(), json!(now_iso()));
        }
    }

    merged.insert("updated_at".to_string(), json!(now_iso()));
    JsonValue::Object(merged)
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write via a temp file in the same directory plus rename, so readers never
/// observe a half-written document.
fn atomic_write(abs_path: &std::path::Path, contents: &str) -> anyhow::Result<()> {
    let parent = abs_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", abs_path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(
        ".{}.tmp-{nanos}",
        abs_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory".to_string())
    ));

    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, abs_path)
        .with_context(|| format!("Failed to move {} into place", tmp_path.display()))?;
    Ok(())
}
