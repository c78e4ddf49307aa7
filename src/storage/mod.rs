//! Storage port for session persistence.
//!
//! The core only sees self-describing records: a kind, an id, the owning
//! session, a schema version and a JSON body. [`SqliteStorage`] is the
//! production implementation; anything implementing [`Storage`] can stand in.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Newest record schema this binary reads and writes.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Kind of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Session header.
    Session,
    /// Reasoning thought.
    Thought,
    /// Reasoning branch.
    Branch,
    /// Durable memory.
    Memory,
    /// Named set of memories.
    Collection,
    /// Architecture decision.
    Decision,
    /// Process-wide pointers (e.g. the active session).
    Pointer,
}

impl RecordKind {
    /// Kinds owned by a session, in the order they must be restored.
    pub const SESSION_SCOPED: [RecordKind; 5] = [
        RecordKind::Thought,
        RecordKind::Branch,
        RecordKind::Memory,
        RecordKind::Collection,
        RecordKind::Decision,
    ];

    /// Stable string form used as the storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Session => "session",
            RecordKind::Thought => "thought",
            RecordKind::Branch => "branch",
            RecordKind::Memory => "memory",
            RecordKind::Collection => "collection",
            RecordKind::Decision => "decision",
            RecordKind::Pointer => "pointer",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session" => Ok(RecordKind::Session),
            "thought" => Ok(RecordKind::Thought),
            "branch" => Ok(RecordKind::Branch),
            "memory" => Ok(RecordKind::Memory),
            "collection" => Ok(RecordKind::Collection),
            "decision" => Ok(RecordKind::Decision),
            "pointer" => Ok(RecordKind::Pointer),
            _ => Err(format!("Unknown record kind: {}", s)),
        }
    }
}

/// A self-describing persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record kind.
    pub kind: RecordKind,
    /// Record identifier, unique per kind.
    pub id: String,
    /// Owning session, if the record is session-scoped.
    pub session_id: Option<String>,
    /// Schema version of `body`.
    pub schema_version: i64,
    /// Serialized entity.
    pub body: serde_json::Value,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Wrap a typed entity into a record at the current schema version.
    pub fn encode<R: Record>(entity: &R) -> StorageResult<Self> {
        let body = serde_json::to_value(entity).map_err(|e| StorageError::Decode {
            kind: R::KIND.to_string(),
            id: entity.record_id().to_string(),
            message: e.to_string(),
        })?;
        let now = Utc::now();

        Ok(Self {
            kind: R::KIND,
            id: entity.record_id().to_string(),
            session_id: entity.owner_session().map(str::to_string),
            schema_version: CURRENT_SCHEMA_VERSION,
            body,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decode the body into a typed entity.
    ///
    /// Records written by a newer binary are rejected rather than guessed at.
    pub fn decode<R: Record>(&self) -> StorageResult<R> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                kind: self.kind.to_string(),
                id: self.id.clone(),
                found: self.schema_version,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }

        serde_json::from_value(self.body.clone()).map_err(|e| StorageError::Decode {
            kind: self.kind.to_string(),
            id: self.id.clone(),
            message: e.to_string(),
        })
    }
}

/// Filter for [`Storage::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only records owned by this session.
    pub session_id: Option<String>,
}

impl RecordFilter {
    /// Match every record of a kind.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match records owned by a session.
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

/// A typed entity that can be persisted as a [`StoredRecord`].
pub trait Record: Serialize + DeserializeOwned {
    /// Record kind used as part of the key.
    const KIND: RecordKind;

    /// Identifier of this entity.
    fn record_id(&self) -> &str;

    /// Owning session, if any.
    fn owner_session(&self) -> Option<&str>;
}

/// Storage port.
///
/// Every call is atomic for a single record; there are no cross-record
/// transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace a record. `created_at` of an existing record is kept.
    async fn put(&self, record: &StoredRecord) -> StorageResult<()>;

    /// Get a record by kind and id.
    async fn get(&self, kind: RecordKind, id: &str) -> StorageResult<Option<StoredRecord>>;

    /// List records of a kind, oldest first.
    async fn list(&self, kind: RecordKind, filter: &RecordFilter)
        -> StorageResult<Vec<StoredRecord>>;

    /// Delete a record. Fails with [`StorageError::RecordNotFound`] if absent.
    async fn delete(&self, kind: RecordKind, id: &str) -> StorageResult<()>;
}

/// Persist a typed entity.
pub async fn put_entity<R: Record + Sync>(storage: &dyn Storage, entity: &R) -> StorageResult<()> {
    let record = StoredRecord::encode(entity)?;
    storage.put(&record).await
}

/// Load a typed entity by id.
pub async fn get_entity<R: Record>(storage: &dyn Storage, id: &str) -> StorageResult<Option<R>> {
    match storage.get(R::KIND, id).await? {
        Some(record) => record.decode().map(Some),
        None => Ok(None),
    }
}

/// Load every typed entity matching a filter, oldest first.
pub async fn list_entities<R: Record>(
    storage: &dyn Storage,
    filter: &RecordFilter,
) -> StorageResult<Vec<R>> {
    storage
        .list(R::KIND, filter)
        .await?
        .iter()
        .map(StoredRecord::decode)
        .collect()
}
