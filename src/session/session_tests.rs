//! Unit tests for session state, handles and writers.

use super::*;
use crate::error::StorageError;
use crate::graph::NewThought;
use crate::memory::{NewDecision, NewMemory};
use crate::storage::{SqliteStorage, StoredRecord};
use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;

mock! {
    pub Store {}

    #[async_trait]
    impl Storage for Store {
        async fn put(&self, record: &StoredRecord) -> StorageResult<()>;
        async fn get(&self, kind: RecordKind, id: &str) -> StorageResult<Option<StoredRecord>>;
        async fn list(&self, kind: RecordKind, filter: &RecordFilter) -> StorageResult<Vec<StoredRecord>>;
        async fn delete(&self, kind: RecordKind, id: &str) -> StorageResult<()>;
    }
}

fn state() -> SessionState {
    SessionState::new(NewSession::new("Ship the importer").into_session())
}

async fn memory_storage() -> Arc<dyn Storage> {
    Arc::new(SqliteStorage::new_in_memory().await.unwrap())
}

#[tokio::test]
async fn test_apply_persists_and_publishes() {
    let handle = SessionHandle::new(state());
    let storage = memory_storage().await;

    let id = {
        let mut writer = handle.try_write(storage.clone()).unwrap();
        writer
            .apply(|s| s.graph.add_thought(NewThought::new("first", 0.9)))
            .await
            .unwrap()
    };

    assert!(handle.snapshot().graph.thought(&id).is_some());
    let stored: Option<Thought> = get_entity(storage.as_ref(), &id).await.unwrap();
    assert_eq!(stored.unwrap().content, "first");
}

#[tokio::test]
async fn test_failed_put_leaves_snapshot_unchanged() {
    let handle = SessionHandle::new(state());
    let before = handle.snapshot();

    let mut store = MockStore::new();
    store.expect_put().returning(|_| {
        Err(StorageError::Query {
            message: "disk full".into(),
        })
    });
    let storage: Arc<dyn Storage> = Arc::new(store);

    let mut writer = handle.try_write(storage).unwrap();
    let result = writer
        .apply(|s| s.graph.add_thought(NewThought::new("lost", 0.5)))
        .await;

    assert!(matches!(result, Err(ThinkingError::Storage(_))));
    assert_eq!(*handle.snapshot(), *before);
    assert!(handle.snapshot().graph.is_empty());
}

#[tokio::test]
async fn test_failed_operation_writes_nothing() {
    let handle = SessionHandle::new(state());

    let mut store = MockStore::new();
    store.expect_put().never();
    let storage: Arc<dyn Storage> = Arc::new(store);

    let mut writer = handle.try_write(storage).unwrap();
    let result = writer
        .apply(|s| {
            s.graph
                .add_thought(NewThought::new("x", 0.5).with_dependencies(vec!["ghost".into()]))
        })
        .await;

    assert!(matches!(result, Err(ThinkingError::NotFound { .. })));
    assert!(handle.snapshot().graph.is_empty());
}

#[tokio::test]
async fn test_apply_writes_only_changed_records() {
    let handle = SessionHandle::new(state());
    let storage = memory_storage().await;
    let mut writer = handle.try_write(storage).unwrap();
    writer
        .apply(|s| s.graph.add_thought(NewThought::new("first", 0.9)))
        .await
        .unwrap();
    drop(writer);

    // Session header plus the new thought.
    let mut store = MockStore::new();
    store.expect_put().times(2).returning(|_| Ok(()));
    let mut writer = handle.try_write(Arc::new(store)).unwrap();
    writer
        .apply(|s| s.graph.add_thought(NewThought::new("second", 0.9)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_second_writer_is_busy() {
    let handle = SessionHandle::new(state());
    let storage = memory_storage().await;

    let _writer = handle.try_write(storage.clone()).unwrap();
    let err = handle.try_write(storage).err().unwrap();

    assert!(matches!(err, ThinkingError::Busy { ref session_id } if session_id == handle.id()));
}

#[tokio::test]
async fn test_snapshot_does_not_block_on_writer() {
    let handle = SessionHandle::new(state());
    let storage = memory_storage().await;

    let _writer = handle.try_write(storage).unwrap();
    assert_eq!(handle.snapshot().id(), handle.id());
}

#[tokio::test]
async fn test_load_round_trip() {
    let storage = memory_storage().await;
    let mut original = state();
    let root = original
        .graph
        .add_thought(NewThought::new("root", 0.8))
        .unwrap();
    original
        .graph
        .create_branch("alt", &root, "try another way")
        .unwrap();
    original
        .memory
        .store_memory(NewMemory {
            content: "keep".into(),
            tags: vec!["Rust".into()],
            importance: 0.6,
            ..Default::default()
        })
        .unwrap();
    original
        .memory
        .record_decision(NewDecision {
            title: "Use SQLite".into(),
            ..Default::default()
        })
        .unwrap();
    original.persist_all(storage.as_ref()).await.unwrap();

    let loaded = SessionState::load(storage.as_ref(), original.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, original);

    assert!(SessionState::load(storage.as_ref(), "missing")
        .await
        .unwrap()
        .is_none());
}

#[test]
fn test_analyze_counts() {
    let mut s = state();
    let a = s.graph.add_thought(NewThought::new("a", 0.6)).unwrap();
    s.graph
        .revise_thought(&a, Some("a, revised".into()), Some(0.8))
        .unwrap();
    let branch = s.graph.create_branch("b", &a, "").unwrap();
    s.graph
        .add_thought(NewThought::new("on branch", 0.4).on_branch(&branch))
        .unwrap();
    let abandoned = s.graph.create_branch("c", &a, "").unwrap();
    s.graph.abandon_branch(&abandoned).unwrap();

    let analysis = s.analyze(&ChunkerConfig::default());

    assert_eq!(analysis.total_thoughts, 2);
    assert_eq!(analysis.main_line_thoughts, 1);
    assert_eq!(analysis.revised_thoughts, 1);
    assert_eq!(analysis.total_branches, 2);
    assert_eq!(analysis.open_branches, 1);
    assert_eq!(analysis.abandoned_branches, 1);
    assert_eq!(analysis.total_memories, 0);
    assert!((analysis.mean_confidence.unwrap() - 0.6).abs() < 1e-9);
    assert!(!analysis.needs_chunking);
}

#[test]
fn test_export_rejects_foreign_entities() {
    let mut s = state();
    s.graph.add_thought(NewThought::new("a", 0.6)).unwrap();
    let mut export = SessionExport::from_state(&s);
    export.thoughts[0].session_id = "someone-else".into();

    assert!(matches!(
        export.into_state(),
        Err(ThinkingError::InvalidState { .. })
    ));
}

#[test]
fn test_export_rejects_duplicate_thought_ids() {
    let mut s = state();
    s.graph.add_thought(NewThought::new("original", 0.6)).unwrap();
    let mut export = SessionExport::from_state(&s);
    let mut copy = export.thoughts[0].clone();
    copy.content = "imposter".into();
    copy.sequence = 99;
    export.thoughts.push(copy);

    assert!(matches!(
        export.into_state(),
        Err(ThinkingError::InvalidState { .. })
    ));
}

#[test]
fn test_export_rejects_newer_format() {
    let mut export = SessionExport::from_state(&state());
    export.format_version = EXPORT_FORMAT_VERSION + 1;
    assert!(export.into_state().is_err());
}

#[test]
fn test_record_packages_keeps_highest_relevance() {
    let mut session = NewSession::new("p").into_session();
    let package = |name: &str, relevance_score: f64| PackageSuggestion {
        name: name.to_string(),
        relevance_score,
    };

    session.record_packages(vec![package("sqlx", 0.5), package("tokio", 0.8)]);
    session.record_packages(vec![package("sqlx", 0.8), package("tokio", 0.5)]);

    assert_eq!(
        session.discovered_packages,
        vec![package("sqlx", 0.8), package("tokio", 0.8)]
    );
}

#[test]
fn test_session_type_parse() {
    assert_eq!("Coding".parse::<SessionType>().unwrap(), SessionType::Coding);
    assert!("poetry".parse::<SessionType>().is_err());
}
