//! Sessions: the aggregate that owns one reasoning graph and one memory
//! store, plus the machinery that keeps readers and writers apart.
//!
//! Readers take an immutable [`SessionState`] snapshot. A writer holds the
//! session's mutation guard, mutates a private copy, persists the records
//! that changed and only then publishes the copy.

mod export;
mod manager;

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;

pub use export::{SessionExport, EXPORT_FORMAT_VERSION};
pub use manager::{SessionManager, SessionSummary};

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::chunker::{estimated_tokens, memory_text};
use crate::config::ChunkerConfig;
use crate::error::{StorageResult, ThinkingError, ThinkingResult};
use crate::graph::{Branch, BranchStatus, ReasoningGraph, Thought};
use crate::memory::{ArchitectureDecision, Collection, Memory, MemoryStore};
use crate::packages::PackageSuggestion;
use crate::storage::{get_entity, list_entities, put_entity, Record, RecordFilter, RecordKind, Storage};

/// Kind of session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// General problem solving.
    #[default]
    General,
    /// Software work; enables package discovery.
    Coding,
    /// Mostly memory curation.
    Memory,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionType::General => write!(f, "general"),
            SessionType::Coding => write!(f, "coding"),
            SessionType::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(SessionType::General),
            "coding" => Ok(SessionType::Coding),
            "memory" => Ok(SessionType::Memory),
            _ => Err(format!("Unknown session type: {}", s)),
        }
    }
}

/// Session header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub id: String,
    /// Problem being worked on.
    pub problem_statement: String,
    /// What a good outcome looks like.
    pub success_criteria: String,
    /// Known limitations.
    pub constraints: String,
    /// Session kind.
    pub session_type: SessionType,
    /// Free-text description of the codebase, for coding sessions.
    pub codebase_context: Option<String>,
    /// Whether the auto-cycle should look for packages.
    pub package_exploration_required: bool,
    /// Packages found relevant so far, by name.
    #[serde(default)]
    pub discovered_packages: Vec<PackageSuggestion>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Keep newly discovered packages. A package seen again keeps its
    /// highest relevance.
    pub fn record_packages(&mut self, found: impl IntoIterator<Item = PackageSuggestion>) {
        for package in found {
            match self
                .discovered_packages
                .iter_mut()
                .find(|p| p.name == package.name)
            {
                Some(known) => {
                    known.relevance_score = known.relevance_score.max(package.relevance_score)
                }
                None => self.discovered_packages.push(package),
            }
        }
    }
}

impl Record for Session {
    const KIND: RecordKind = RecordKind::Session;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        None
    }
}

/// Input for creating a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Problem being worked on.
    pub problem_statement: String,
    /// What a good outcome looks like.
    pub success_criteria: String,
    /// Known limitations.
    pub constraints: String,
    /// Session kind.
    pub session_type: SessionType,
    /// Codebase description.
    pub codebase_context: Option<String>,
    /// Whether the auto-cycle should look for packages.
    pub package_exploration_required: bool,
}

impl NewSession {
    /// A general session for a problem.
    pub fn new(problem_statement: impl Into<String>) -> Self {
        Self {
            problem_statement: problem_statement.into(),
            success_criteria: String::new(),
            constraints: String::new(),
            session_type: SessionType::General,
            codebase_context: None,
            package_exploration_required: true,
        }
    }

    /// Set success criteria.
    pub fn with_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.success_criteria = criteria.into();
        self
    }

    /// Set constraints.
    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = constraints.into();
        self
    }

    /// Set the session type.
    pub fn with_type(mut self, session_type: SessionType) -> Self {
        self.session_type = session_type;
        self
    }

    /// Set the codebase context.
    pub fn with_codebase_context(mut self, context: impl Into<String>) -> Self {
        self.codebase_context = Some(context.into());
        self
    }

    pub(crate) fn into_session(self) -> Session {
        let now = Utc::now();
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            problem_statement: self.problem_statement,
            success_criteria: self.success_criteria,
            constraints: self.constraints,
            session_type: self.session_type,
            codebase_context: self.codebase_context,
            package_exploration_required: self.package_exploration_required,
            discovered_packages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Pointer record naming the active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ActivePointer {
    pub id: String,
    pub session_id: String,
}

impl ActivePointer {
    pub const ID: &'static str = "active_session";

    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: Self::ID.to_string(),
            session_id: session_id.into(),
        }
    }
}

impl Record for ActivePointer {
    const KIND: RecordKind = RecordKind::Pointer;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        None
    }
}

/// Everything a session owns.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Session header.
    pub session: Session,
    /// Thoughts and branches.
    pub graph: ReasoningGraph,
    /// Memories, collections and decisions.
    pub memory: MemoryStore,
}

/// Counts and health figures for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAnalysis {
    /// Session ID.
    pub session_id: String,
    /// Session kind.
    pub session_type: SessionType,
    /// All thoughts.
    pub total_thoughts: usize,
    /// Thoughts on the main line.
    pub main_line_thoughts: usize,
    /// Thoughts that have been revised at least once.
    pub revised_thoughts: usize,
    /// All branches.
    pub total_branches: usize,
    /// Open branches.
    pub open_branches: usize,
    /// Merged branches.
    pub merged_branches: usize,
    /// Abandoned branches.
    pub abandoned_branches: usize,
    /// Memories.
    pub total_memories: usize,
    /// Collections.
    pub total_collections: usize,
    /// Architecture decisions.
    pub architecture_decisions: usize,
    /// Mean thought confidence, if there are thoughts.
    pub mean_confidence: Option<f64>,
    /// Estimated tokens of the whole session.
    pub estimated_tokens: usize,
    /// Whether the session exceeds the default context budget.
    pub needs_chunking: bool,
}

impl SessionState {
    /// Fresh state for a new session.
    pub fn new(session: Session) -> Self {
        Self {
            graph: ReasoningGraph::new(&session.id),
            memory: MemoryStore::new(&session.id),
            session,
        }
    }

    /// Session ID.
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Load a session and everything it owns.
    pub async fn load(storage: &dyn Storage, session_id: &str) -> ThinkingResult<Option<Self>> {
        let Some(session) = get_entity::<Session>(storage, session_id).await? else {
            return Ok(None);
        };

        let filter = RecordFilter::session(session_id);
        let thoughts: Vec<Thought> = list_entities(storage, &filter).await?;
        let branches: Vec<Branch> = list_entities(storage, &filter).await?;
        let memories: Vec<Memory> = list_entities(storage, &filter).await?;
        let collections: Vec<Collection> = list_entities(storage, &filter).await?;
        let decisions: Vec<ArchitectureDecision> = list_entities(storage, &filter).await?;

        let graph = ReasoningGraph::restore(session_id, thoughts, branches)?;
        let memory = MemoryStore::restore(session_id, memories, collections, decisions)?;

        Ok(Some(Self {
            session,
            graph,
            memory,
        }))
    }

    /// Write every record of the state. The header goes last so a concurrent
    /// load sees either nothing or the whole session.
    pub(crate) async fn persist_all(&self, storage: &dyn Storage) -> StorageResult<()> {
        for thought in self.graph.thoughts() {
            put_entity(storage, thought).await?;
        }
        for branch in self.graph.branches() {
            put_entity(storage, branch).await?;
        }
        for memory in self.memory.memories() {
            put_entity(storage, memory).await?;
        }
        for collection in self.memory.collections() {
            put_entity(storage, collection).await?;
        }
        for decision in self.memory.decisions() {
            put_entity(storage, decision).await?;
        }
        put_entity(storage, &self.session).await
    }

    /// Summarize the session.
    pub fn analyze(&self, chunker: &ChunkerConfig) -> SessionAnalysis {
        let thoughts = self.graph.thoughts();
        let branches: Vec<&Branch> = self.graph.branches().collect();
        let count_status =
            |status: BranchStatus| branches.iter().filter(|b| b.status == status).count();

        let overhead = chunker.unit_overhead;
        let estimated = estimated_tokens(&self.session.problem_statement, overhead)
            + thoughts
                .iter()
                .map(|t| estimated_tokens(&t.content, overhead))
                .sum::<usize>()
            + self
                .memory
                .memories()
                .map(|m| estimated_tokens(&memory_text(m), overhead))
                .sum::<usize>()
            + self
                .memory
                .decisions()
                .iter()
                .map(|d| estimated_tokens(&d.text_block(), overhead))
                .sum::<usize>();

        SessionAnalysis {
            session_id: self.session.id.clone(),
            session_type: self.session.session_type,
            total_thoughts: thoughts.len(),
            main_line_thoughts: self.graph.main_line().count(),
            revised_thoughts: thoughts.iter().filter(|t| !t.revisions.is_empty()).count(),
            total_branches: branches.len(),
            open_branches: count_status(BranchStatus::Open),
            merged_branches: count_status(BranchStatus::Merged),
            abandoned_branches: count_status(BranchStatus::Abandoned),
            total_memories: self.memory.memory_count(),
            total_collections: self.memory.collections().count(),
            architecture_decisions: self.memory.decisions().len(),
            mean_confidence: mean_confidence(&thoughts),
            estimated_tokens: estimated,
            needs_chunking: estimated > chunker.token_budget,
        }
    }
}

/// Mean confidence of some thoughts, `None` when there are none.
pub fn mean_confidence(thoughts: &[&Thought]) -> Option<f64> {
    if thoughts.is_empty() {
        return None;
    }
    Some(thoughts.iter().map(|t| t.confidence).sum::<f64>() / thoughts.len() as f64)
}

/// A loaded session: its mutation guard and its published snapshot.
pub struct SessionHandle {
    id: String,
    guard: Mutex<()>,
    published: RwLock<Arc<SessionState>>,
}

impl SessionHandle {
    /// Wrap a state.
    pub fn new(state: SessionState) -> Self {
        Self {
            id: state.session.id.clone(),
            guard: Mutex::new(()),
            published: RwLock::new(Arc::new(state)),
        }
    }

    /// Session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The latest published state. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take the mutation guard, failing with `Busy` if another writer holds it.
    pub fn try_write(&self, storage: Arc<dyn Storage>) -> ThinkingResult<SessionWriter<'_>> {
        let guard = self.guard.try_lock().map_err(|_| ThinkingError::Busy {
            session_id: self.id.clone(),
        })?;

        Ok(SessionWriter {
            handle: self,
            storage,
            _guard: guard,
        })
    }

    fn publish(&self, state: Arc<SessionState>) {
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Exclusive writer for one session.
pub struct SessionWriter<'a> {
    handle: &'a SessionHandle,
    storage: Arc<dyn Storage>,
    _guard: MutexGuard<'a, ()>,
}

impl SessionWriter<'_> {
    /// Session ID.
    pub fn session_id(&self) -> &str {
        self.handle.id()
    }

    /// The latest published state.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.handle.snapshot()
    }

    /// Storage the writer persists to.
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Replace the published state with a fresh read from storage.
    pub async fn reload(&mut self) -> ThinkingResult<Arc<SessionState>> {
        let state = SessionState::load(self.storage.as_ref(), self.handle.id())
            .await?
            .ok_or_else(|| ThinkingError::not_found("Session", self.handle.id()))?;
        let state = Arc::new(state);
        self.handle.publish(state.clone());

        debug!(session_id = %self.handle.id(), "Session reloaded");
        Ok(state)
    }

    /// Run a mutation on a private copy, persist what changed, then publish.
    ///
    /// If the mutation or a storage write fails the copy is dropped and the
    /// published state stays as it was.
    pub async fn apply<T, F>(&mut self, op: F) -> ThinkingResult<T>
    where
        F: FnOnce(&mut SessionState) -> ThinkingResult<T> + Send,
        T: Send,
    {
        let published = self.handle.snapshot();
        let mut working = SessionState::clone(&published);
        let output = op(&mut working)?;

        if working == *published {
            return Ok(output);
        }
        working.session.updated_at = Utc::now();

        let written = persist_changes(self.storage.as_ref(), &published, &working).await?;
        self.handle.publish(Arc::new(working));

        debug!(session_id = %self.handle.id(), records = written, "Session changes published");
        Ok(output)
    }
}

/// Write the records that differ between two states. Returns how many.
async fn persist_changes(
    storage: &dyn Storage,
    before: &SessionState,
    after: &SessionState,
) -> StorageResult<usize> {
    let mut written = 0;

    if before.session != after.session {
        put_entity(storage, &after.session).await?;
        written += 1;
    }
    for thought in after.graph.thoughts() {
        if before.graph.thought(&thought.id) != Some(thought) {
            put_entity(storage, thought).await?;
            written += 1;
        }
    }
    for branch in after.graph.branches() {
        if before.graph.branch(&branch.id) != Some(branch) {
            put_entity(storage, branch).await?;
            written += 1;
        }
    }
    for memory in after.memory.memories() {
        if before.memory.memory(&memory.id) != Some(memory) {
            put_entity(storage, memory).await?;
            written += 1;
        }
    }
    for collection in after.memory.collections() {
        if before.memory.collection(&collection.id) != Some(collection) {
            put_entity(storage, collection).await?;
            written += 1;
        }
    }
    for decision in after.memory.decisions() {
        if !before.memory.decisions().contains(decision) {
            put_entity(storage, decision).await?;
            written += 1;
        }
    }

    Ok(written)
}
