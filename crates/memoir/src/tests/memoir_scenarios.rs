use std::fs;

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::json;

use crate::{engine::QueryRequest, error::MemoirError, zones::Zone};

use super::test_support::Harness;

fn zone(name: &str, prefix: &str, max_items: Option<usize>, max_depth: Option<usize>) -> Zone {
    Zone {
        name: name.to_string(),
        key_prefix: prefix.to_string(),
        max_items,
        max_depth,
        default_type: None,
        default_half_life_days: None,
    }
}

#[tokio::test]
async fn set_get_and_tree_render_round_trip() {
    let harness = Harness::new("memoir-roundtrip").await;
    let memoir = harness.memoir().await;

    memoir
        .set("life.work.project_a", "note A", json!({"type": "archival"}))
        .await
        .expect("set failed");

    let note = memoir
        .get("life.work.project_a")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert_eq!(note.content, "note A");
    assert_eq!(note.frontmatter["key"], "life.work.project_a");
    assert_eq!(note.frontmatter["id"], "life.work.project_a");
    assert_eq!(note.frontmatter["type"], "archival");
    assert!(note.frontmatter["updated_at"].is_string());

    let flat = memoir.list().expect("list failed");
    assert_eq!(flat["life.work.project_a"]["_type"], "file");
    assert_eq!(flat["life"]["_type"], "folder");
    assert_eq!(flat["life.work"]["_type"], "folder");

    let prompt = memoir.tree_for_prompt(None).expect("render failed");
    assert!(prompt.contains("### life"));
    assert!(prompt.contains("- life.work.project_a: project_a [archival]"));
}

#[tokio::test]
async fn repeated_set_overwrites_one_file() {
    let harness = Harness::new("memoir-overwrite").await;
    let memoir = harness.memoir().await;

    let first = memoir.set("k", "v1", json!({})).await.expect("set failed");
    assert!(first.created);
    let second = memoir.set("k", "v2", json!({})).await.expect("set failed");
    assert!(!second.created);

    let note = memoir
        .get("k")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert_eq!(note.content, "v2");

    let files: Vec<_> = fs::read_dir(memoir.root())
        .expect("read_dir failed")
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .ends_with(".md")
        })
        .collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn metadata_survives_updates_that_omit_it() {
    let harness = Harness::new("memoir-meta-merge").await;
    let memoir = harness.memoir().await;

    memoir
        .set("prefs.editor", "vim", json!({"half_life_days": 30, "tags": ["tools"]}))
        .await
        .expect("set failed");
    memoir
        .set("prefs.editor", "neovim", json!({}))
        .await
        .expect("set failed");

    let note = memoir
        .get("prefs.editor")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert_eq!(note.content, "neovim");
    assert_eq!(note.frontmatter["half_life_days"], 30);
    assert_eq!(note.frontmatter["tags"], json!(["tools"]));

    // Null metadata values are stripped, not persisted.
    memoir
        .set("prefs.editor", "helix", json!({"tags": null}))
        .await
        .expect("set failed");
    let note = memoir
        .get("prefs.editor")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert_eq!(note.frontmatter["tags"], json!(["tools"]));
}

#[tokio::test]
async fn zone_quota_and_depth_are_enforced() {
    let harness = Harness::new("memoir-zones").await;
    let memoir = harness.memoir().await;
    memoir.define_zone(zone("core", "core", Some(5), Some(2)));

    for index in 0..5 {
        memoir
            .set(&format!("core.x_{index}"), "body", json!({}))
            .await
            .expect("set inside quota failed");
    }

    let result = memoir.set("core.x_5", "body", json!({})).await;
    assert!(matches!(result, Err(MemoirError::ZoneQuotaExceeded { .. })));

    let result = memoir.set("core.a.b.c", "body", json!({})).await;
    assert!(matches!(result, Err(MemoirError::ZoneDepthExceeded { .. })));

    // Updates to existing keys bypass the item quota.
    memoir
        .set("core.x_0", "updated body", json!({}))
        .await
        .expect("update inside full zone failed");

    let stats = memoir.zone_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].items, 5);
    assert_eq!(stats[0].max_items, Some(5));
}

#[tokio::test]
async fn zone_defaults_apply_only_when_caller_omits_them() {
    let harness = Harness::new("memoir-zone-defaults").await;
    let memoir = harness.memoir().await;
    memoir.define_zone(Zone {
        name: "scratch".to_string(),
        key_prefix: "scratch".to_string(),
        max_items: None,
        max_depth: None,
        default_type: Some("working".to_string()),
        default_half_life_days: Some(7.0),
    });

    memoir
        .set("scratch.auto", "body", json!({}))
        .await
        .expect("set failed");
    let note = memoir
        .get("scratch.auto")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert_eq!(note.frontmatter["type"], "working");
    assert_eq!(note.frontmatter["half_life_days"], 7.0);

    memoir
        .set("scratch.manual", "body", json!({"type": "archival", "half_life_days": 90}))
        .await
        .expect("set failed");
    let note = memoir
        .get("scratch.manual")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert_eq!(note.frontmatter["type"], "archival");
    assert_eq!(note.frontmatter["half_life_days"], 90);
}

#[tokio::test]
async fn invalid_keys_are_rejected_before_touching_disk() {
    let harness = Harness::new("memoir-invalid-keys").await;
    let memoir = harness.memoir().await;

    for key in ["", "a..b", "a.b/c", "a.b\\c", "..", "a."] {
        let result = memoir.set(key, "body", json!({})).await;
        assert!(
            matches!(result, Err(MemoirError::InvalidKey { .. })),
            "key {key:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn concurrent_writers_on_one_key_serialize() {
    let harness = Harness::new("memoir-concurrent").await;
    let memoir = std::sync::Arc::new(harness.memoir().await);

    let mut handles = Vec::new();
    for index in 0..10 {
        let memoir = std::sync::Arc::clone(&memoir);
        handles.push(tokio::spawn(async move {
            memoir
                .set("contended", &format!("body {index}"), json!({"round": index}))
                .await
                .expect("set failed");
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    let note = memoir
        .get("contended")
        .await
        .expect("get failed")
        .expect("note should exist");
    assert!(note.content.starts_with("body "));
    assert_eq!(note.frontmatter["key"], "contended");
}

#[tokio::test]
async fn delete_uses_standard_path_then_lenient_fallbacks() {
    let harness = Harness::new("memoir-delete").await;
    let memoir = harness.memoir().await;

    memoir
        .set("plain.note", "standard", json!({}))
        .await
        .expect("set failed");
    assert!(memoir.delete("plain.note").await.expect("delete failed"));
    assert!(memoir.get("plain.note").await.expect("get failed").is_none());
    assert!(!memoir.delete("plain.note").await.expect("delete failed"));

    // A leaf that keeps its dots literally: stored as `a/b.c.md`.
    let literal_dir = memoir.root().join("a");
    fs::create_dir_all(&literal_dir).expect("failed to create dir");
    fs::write(literal_dir.join("b.c.md"), "literal leaf").expect("write failed");
    assert!(memoir.delete("a.b.c").await.expect("delete failed"));
    assert!(!literal_dir.join("b.c.md").exists());

    // Parent-directory scan matches by prefix when nothing else does.
    fs::write(literal_dir.join("report-2024.md"), "scan me").expect("write failed");
    assert!(memoir.delete("a.report").await.expect("delete failed"));
    assert!(!literal_dir.join("report-2024.md").exists());
}

#[tokio::test]
async fn half_life_decay_reorders_equal_base_scores() {
    let harness = Harness::new("memoir-decay").await;
    let memoir = harness.memoir().await;

    let body = "quarterly planning notes with decay markers";
    memoir
        .set("fresh", body, json!({}))
        .await
        .expect("set failed");

    // Same body, but 14 days old with a 7-day half-life: written directly so
    // the crafted updated_at survives.
    let stale_at = (Utc::now() - Duration::days(14)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let stale = format!(
        "---\nid: stale\nkey: stale\ntype: archival\nhalf_life_days: 7\nupdated_at: \"{stale_at}\"\n---\n{body}"
    );
    fs::write(memoir.root().join("stale.md"), stale).expect("write failed");
    harness.engine.reindex(true).await.expect("reindex failed");

    let hits = memoir
        .search("quarterly planning", QueryRequest::default())
        .await
        .expect("search failed");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].key.as_deref(), Some("fresh"));
    assert_eq!(hits[1].key.as_deref(), Some("stale"));
    // Two half-lives: the decayed score is a quarter of the fresh one.
    assert!(hits[1].score < hits[0].score * 0.3);
}

#[tokio::test]
async fn memories_by_level_and_simple_tree() {
    let harness = Harness::new("memoir-levels").await;
    let memoir = harness.memoir().await;

    memoir.set("top", "body", json!({})).await.expect("set failed");
    memoir
        .set("life.work", "body", json!({}))
        .await
        .expect("set failed");
    memoir
        .set("life.work.deep", "body", json!({}))
        .await
        .expect("set failed");

    let level_one = memoir.memories_by_level(1, None).expect("level query failed");
    assert_eq!(level_one.len(), 1);
    assert_eq!(level_one[0].key, "top");

    let level_two = memoir.memories_by_level(2, None).expect("level query failed");
    assert_eq!(level_two.len(), 1);
    assert_eq!(level_two[0].key, "life.work");

    let under_life = memoir
        .memories_by_level(3, Some("life"))
        .expect("level query failed");
    assert_eq!(under_life.len(), 1);
    assert_eq!(under_life[0].key, "life.work.deep");

    let tree = memoir.simple_tree(None).expect("simple tree failed");
    assert!(tree["life"]["work"].is_object());
    assert_eq!(tree["top"], "top");

    let subtree = memoir.simple_tree(Some("life")).expect("simple tree failed");
    assert!(subtree["work"].is_object());
}

#[tokio::test]
async fn search_maps_paths_back_to_keys() {
    let harness = Harness::new("memoir-search-keys").await;
    let memoir = harness.memoir().await;

    memoir
        .set("projects.search_engine", "hybrid retrieval engine notes", json!({}))
        .await
        .expect("set failed");

    let hits = memoir
        .search("hybrid retrieval", QueryRequest::default())
        .await
        .expect("search failed");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key.as_deref(), Some("projects.search_engine"));
}
