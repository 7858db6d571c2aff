use crate::{index_file, reindex_all, reindex_collection, IndexOutcome};

use super::test_support::Harness;

#[test]
fn given_two_collections_when_reindexing_then_all_files_are_indexed() {
    let harness = Harness::new("reindex-two-collections");
    harness.collection_with_files(
        "alpha",
        &[
            ("one.md", "# One\nfirst note"),
            ("two.md", "# Two\nsecond note"),
            ("nested/three.md", "# Three\nthird note"),
        ],
    );
    harness.collection_with_files(
        "beta",
        &[("four.md", "# Four\nfourth"), ("five.md", "# Five\nfifth")],
    );

    let summary = reindex_all(&harness.store, false).expect("reindex failed");
    assert_eq!(summary.indexed, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        harness
            .store
            .list_collections()
            .expect("list failed")
            .len(),
        2
    );

    assert!(harness
        .store
        .remove_collection("beta")
        .expect("remove failed"));
    assert_eq!(
        harness
            .store
            .list_collections()
            .expect("list failed")
            .len(),
        1
    );
    assert!(harness
        .store
        .bm25_search("fourth", Some("beta"), 10)
        .expect("search failed")
        .is_empty());
}

#[test]
fn incremental_reindex_reports_unchanged_files_as_skipped() {
    let harness = Harness::new("reindex-incremental");
    let collection = harness.collection_with_files("notes", &[("a.md", "stable body")]);

    let first = reindex_collection(&harness.store, &collection, true).expect("reindex failed");
    assert_eq!(first.indexed, 1);
    assert_eq!(first.skipped, 0);

    let second = reindex_collection(&harness.store, &collection, true).expect("reindex failed");
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 1);
}

#[test]
fn deleted_files_are_soft_deleted_and_restored_on_reappearance() {
    let harness = Harness::new("reindex-soft-delete");
    let collection =
        harness.collection_with_files("notes", &[("keep.md", "keeper"), ("gone.md", "goner")]);

    reindex_collection(&harness.store, &collection, true).expect("reindex failed");
    harness.remove_file("notes", "gone.md");

    let summary = reindex_collection(&harness.store, &collection, true).expect("reindex failed");
    assert_eq!(summary.deactivated, 1);
    assert!(harness
        .store
        .bm25_search("goner", None, 10)
        .expect("search failed")
        .is_empty());

    harness.write_file("notes", "gone.md", "goner");
    reindex_collection(&harness.store, &collection, true).expect("reindex failed");
    assert_eq!(
        harness
            .store
            .bm25_search("goner", None, 10)
            .expect("search failed")
            .len(),
        1
    );
}

#[test]
fn title_prefers_frontmatter_over_heading_and_stem() {
    let harness = Harness::new("reindex-title");
    let collection = harness.collection_with_files(
        "notes",
        &[
            ("meta.md", "---\ntitle: Meta Title\n---\nbody"),
            ("heading.md", "# Heading Title\nbody"),
            ("stem.md", "plain body"),
        ],
    );

    reindex_collection(&harness.store, &collection, true).expect("reindex failed");

    let by_path = |path: &str| {
        harness
            .store
            .document("notes", path)
            .expect("lookup failed")
            .expect("document should exist")
            .title
    };
    assert_eq!(by_path("meta.md"), "Meta Title");
    assert_eq!(by_path("heading.md"), "Heading Title");
    assert_eq!(by_path("stem.md"), "stem");
}

#[test]
fn index_file_handles_change_and_removal() {
    let harness = Harness::new("reindex-single");
    let collection = harness.collection_with_files("notes", &[("a.md", "original")]);
    reindex_collection(&harness.store, &collection, true).expect("reindex failed");

    assert_eq!(
        index_file(&harness.store, &collection, "a.md").expect("index failed"),
        IndexOutcome::Unchanged
    );

    harness.write_file("notes", "a.md", "updated body");
    assert_eq!(
        index_file(&harness.store, &collection, "a.md").expect("index failed"),
        IndexOutcome::Indexed
    );

    harness.remove_file("notes", "a.md");
    assert_eq!(
        index_file(&harness.store, &collection, "a.md").expect("index failed"),
        IndexOutcome::Missing
    );
    assert!(harness
        .store
        .bm25_search("updated", None, 10)
        .expect("search failed")
        .is_empty());
}
