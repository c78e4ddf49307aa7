//! Unit tests for the memory store.

use super::*;
use pretty_assertions::assert_eq;

fn store() -> MemoryStore {
    MemoryStore::new("s-1")
}

fn remember(store: &mut MemoryStore, content: &str, tags: &[&str], importance: f64) -> String {
    store
        .store_memory(NewMemory {
            content: content.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            importance,
            ..Default::default()
        })
        .unwrap()
}

fn decision(title: &str, context: &str, dependencies: &[&str]) -> NewDecision {
    NewDecision {
        title: title.to_string(),
        context: context.to_string(),
        options: vec!["a".into(), "b".into()],
        chosen_option: "a".into(),
        rationale: "simplest".into(),
        consequences: "none yet".into(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
    }
}

// ============================================================================
// store_memory / query_memories
// ============================================================================

#[test]
fn test_store_memory_defaults_and_normalizes_tags() {
    let mut s = store();
    let id = remember(&mut s, "Use JWT", &[" Auth ", "JWT", ""], 1.4);

    let memory = s.memory(&id).unwrap();
    assert_eq!(memory.importance, 1.0);
    assert_eq!(memory.confidence, 0.8);
    assert_eq!(
        memory.tags.iter().cloned().collect::<Vec<_>>(),
        vec!["auth".to_string(), "jwt".to_string()]
    );
}

#[test]
fn test_query_tags_use_and_semantics() {
    let mut s = store();
    let auth = remember(&mut s, "tokens", &["auth", "jwt"], 0.5);
    remember(&mut s, "indexes", &["db"], 0.9);

    let ids: Vec<&str> = s
        .query_memories(MemoryFilter {
            tags: vec!["auth".into()],
            ..Default::default()
        })
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids, vec![auth.as_str()]);

    let none = s
        .query_memories(MemoryFilter {
            tags: vec!["auth".into(), "db".into()],
            ..Default::default()
        })
        .count();
    assert_eq!(none, 0);
}

#[test]
fn test_query_orders_by_importance_then_recency() {
    let mut s = store();
    let low = remember(&mut s, "low", &[], 0.2);
    let old_high = remember(&mut s, "old high", &[], 0.9);
    let new_high = remember(&mut s, "new high", &[], 0.9);

    let ids: Vec<String> = s
        .query_memories(MemoryFilter::default())
        .map(|m| m.id.clone())
        .collect();
    assert_eq!(ids, vec![new_high, old_high, low]);
}

#[test]
fn test_query_substring_is_case_insensitive_and_min_importance_applies() {
    let mut s = store();
    let hit = remember(&mut s, "Connection POOL sizing", &[], 0.6);
    remember(&mut s, "pool of workers", &[], 0.1);
    remember(&mut s, "unrelated", &[], 0.9);

    let ids: Vec<&str> = s
        .query_memories(MemoryFilter {
            content_contains: Some("pool".into()),
            min_importance: Some(0.5),
            ..Default::default()
        })
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids, vec![hit.as_str()]);
}

#[test]
fn test_query_is_restartable() {
    let mut s = store();
    remember(&mut s, "a", &["x"], 0.5);
    remember(&mut s, "b", &["x"], 0.4);

    let query = s.query_memories(MemoryFilter {
        tags: vec!["X".into()],
        ..Default::default()
    });
    let first: Vec<&str> = query.clone().map(|m| m.content.as_str()).collect();
    let second: Vec<&str> = query.map(|m| m.content.as_str()).collect();
    assert_eq!(first, vec!["a", "b"]);
    assert_eq!(first, second);
}

#[test]
fn test_store_memory_into_unknown_collection_fails_before_mutation() {
    let mut s = store();
    let err = s
        .store_memory(NewMemory {
            content: "x".into(),
            collection_id: Some("c-missing".into()),
            ..Default::default()
        })
        .unwrap_err();

    assert!(matches!(err, ThinkingError::NotFound { entity: "Collection", .. }));
    assert_eq!(s.memory_count(), 0);
}

#[test]
fn test_revise_memory_keeps_id_and_reorders() {
    let mut s = store();
    let a = remember(&mut s, "first", &[], 0.9);
    let b = remember(&mut s, "second", &[], 0.5);

    s.revise_memory(&b, Some("second, revised".into()), Some(1.0))
        .unwrap();

    let memory = s.memory(&b).unwrap();
    assert_eq!(memory.content, "second, revised");
    assert_eq!(memory.revisions.len(), 1);
    assert_eq!(memory.revisions[0].content, "second");

    let ids: Vec<String> = s.memories().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec![b, a]);

    assert!(matches!(
        s.revise_memory("ghost", Some("x".into()), None),
        Err(ThinkingError::NotFound { .. })
    ));
}

// ============================================================================
// Collections
// ============================================================================

#[test]
fn test_collections_union_idempotently() {
    let mut s = store();
    let m1 = remember(&mut s, "one", &[], 0.5);
    let m2 = remember(&mut s, "two", &[], 0.5);
    let a = s.create_collection("a", "first", Some(&m1)).unwrap();
    let b = s.create_collection("b", "second", Some(&m2)).unwrap();
    s.add_to_collection(&b, &m1).unwrap();

    assert_eq!(s.merge_collection(&a, &b).unwrap(), 1);
    assert_eq!(s.merge_collection(&a, &b).unwrap(), 0);

    let members: Vec<&String> = s.collection(&a).unwrap().memory_ids.iter().collect();
    assert_eq!(members.len(), 2);
    assert_eq!(s.collection(&b).unwrap().memory_ids.len(), 2);

    assert!(!s.add_to_collection(&a, &m1).unwrap());
}

#[test]
fn test_collection_errors() {
    let mut s = store();
    assert!(matches!(
        s.create_collection("a", "p", Some("ghost")),
        Err(ThinkingError::NotFound { entity: "Memory", .. })
    ));

    let a = s.create_collection("a", "p", None).unwrap();
    assert!(matches!(
        s.merge_collection(&a, "ghost"),
        Err(ThinkingError::NotFound { entity: "Collection", .. })
    ));
    assert!(matches!(
        s.add_to_collection(&a, "ghost"),
        Err(ThinkingError::NotFound { entity: "Memory", .. })
    ));
}

#[test]
fn test_store_memory_joins_collection() {
    let mut s = store();
    let c = s.create_collection("c", "p", None).unwrap();
    let id = s
        .store_memory(NewMemory {
            content: "member".into(),
            importance: 0.5,
            collection_id: Some(c.clone()),
            ..Default::default()
        })
        .unwrap();

    assert!(s.collection(&c).unwrap().memory_ids.contains(&id));
}

// ============================================================================
// Decisions
// ============================================================================

#[test]
fn test_query_decisions_by_keyword_overlap() {
    let mut s = store();
    s.record_decision(decision("Use Postgres", "Need a relational store", &["sqlx"]))
        .unwrap();
    s.record_decision(decision("Cache with Redis", "Hot reads", &[]))
        .unwrap();

    let hits = s.query_decisions(Some("postgres relational"), &[], None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].decision.title, "Use Postgres");
    assert_eq!(hits[0].similarity, 1.0);

    let by_tag = s.query_decisions(None, &["SQLX".to_string()], None);
    assert_eq!(by_tag.len(), 1);

    let partial = s.query_decisions(Some("postgres mongodb"), &[], Some(0.5));
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].similarity, 0.5);
    assert!(s.query_decisions(Some("postgres mongodb"), &[], None).is_empty());
}

#[test]
fn test_empty_decision_query_matches_all_most_recent_first() {
    let mut s = store();
    s.record_decision(decision("first", "", &[])).unwrap();
    s.record_decision(decision("second", "", &[])).unwrap();

    let titles: Vec<String> = s
        .query_decisions(None, &[], None)
        .into_iter()
        .map(|d| d.decision.title)
        .collect();
    assert_eq!(titles, vec!["second".to_string(), "first".to_string()]);
}

#[test]
fn test_record_decision_requires_title() {
    let mut s = store();
    assert!(matches!(
        s.record_decision(decision("  ", "", &[])),
        Err(ThinkingError::InvalidState { .. })
    ));
}

#[test]
fn test_restore_rebuilds_equal_store() {
    let mut s = store();
    let m = remember(&mut s, "one", &["t"], 0.4);
    remember(&mut s, "two", &[], 0.7);
    s.create_collection("c", "p", Some(&m)).unwrap();
    s.record_decision(decision("d", "", &[])).unwrap();

    let restored = MemoryStore::restore(
        "s-1",
        s.memories().cloned().collect(),
        s.collections().cloned().collect(),
        s.decisions().to_vec(),
    )
    .unwrap();
    assert_eq!(restored, s);
}

#[test]
fn test_restore_rejects_duplicate_ids() {
    let mut s = store();
    let m = remember(&mut s, "one", &[], 0.4);
    s.create_collection("c", "p", Some(&m)).unwrap();
    s.record_decision(decision("d", "", &[])).unwrap();

    let memory = s.memory(&m).unwrap().clone();
    let collection = s.collections().next().unwrap().clone();
    let decided = s.decisions()[0].clone();

    let dup_memory = MemoryStore::restore(
        "s-1",
        vec![memory.clone(), memory.clone()],
        vec![],
        vec![],
    );
    let dup_collection = MemoryStore::restore(
        "s-1",
        vec![memory.clone()],
        vec![collection.clone(), collection],
        vec![],
    );
    let dup_decision =
        MemoryStore::restore("s-1", vec![memory], vec![], vec![decided.clone(), decided]);

    for result in [dup_memory, dup_collection, dup_decision] {
        assert!(matches!(result, Err(ThinkingError::InvalidState { .. })));
    }
}

#[test]
fn test_code_pattern_is_a_tagged_memory() {
    let mut s = store();
    let id = s
        .store_code_pattern(NewCodePattern {
            pattern_type: "repository".into(),
            code_snippet: "trait Storage { async fn put(&self); }".into(),
            description: "Storage behind a trait".into(),
            language: Some("rust".into()),
            file_path: Some("src/storage/mod.rs".into()),
            tags: vec!["Storage".into()],
            importance: 0.6,
        })
        .unwrap();

    let memory = s.memory(&id).unwrap();
    assert_eq!(memory.content, "Storage behind a trait (src/storage/mod.rs)");
    assert_eq!(memory.pattern.as_deref(), Some("repository"));
    assert_eq!(memory.language.as_deref(), Some("rust"));
    assert!(memory.tags.contains("storage"));
    assert!(memory.tags.contains(CODE_PATTERN_TAG));

    let found: Vec<_> = s
        .query_memories(MemoryFilter {
            tags: vec![CODE_PATTERN_TAG.into()],
            ..Default::default()
        })
        .collect();
    assert_eq!(found.len(), 1);
}

#[test]
fn test_code_pattern_requires_type_and_snippet() {
    let mut s = store();
    let missing_snippet = s.store_code_pattern(NewCodePattern {
        pattern_type: "builder".into(),
        ..Default::default()
    });
    let missing_type = s.store_code_pattern(NewCodePattern {
        code_snippet: "fn build() {}".into(),
        ..Default::default()
    });

    for result in [missing_snippet, missing_type] {
        assert!(matches!(result, Err(ThinkingError::InvalidState { .. })));
    }
    assert_eq!(s.memory_count(), 0);
}
