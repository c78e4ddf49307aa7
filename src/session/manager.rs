use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{
    ActivePointer, NewSession, Session, SessionAnalysis, SessionExport, SessionHandle,
    SessionState, SessionType,
};
use crate::chunker::{select_context, ChunkRequest, ContextSelection, UnitKind};
use crate::config::{AutoCycleConfig, ChunkerConfig};
use crate::cycle::{AutoCycle, AutoCycleRun, CycleContext, CycleOptions};
use crate::error::{StorageError, ThinkingError, ThinkingResult};
use crate::graph::{Branch, NewThought, Thought};
use crate::memory::{
    ArchitectureDecision, Collection, Memory, MemoryFilter, NewCodePattern, NewDecision, NewMemory,
    ScoredDecision,
};
use crate::packages::{
    detect_reinvention, PackageLookup, PackageSuggestion, ReinventionReport,
    DEFAULT_REINVENTION_THRESHOLD,
};
use crate::storage::{get_entity, list_entities, put_entity, RecordFilter, RecordKind, Storage};

/// A row of the session listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Session ID.
    pub id: String,
    /// Problem being worked on.
    pub problem_statement: String,
    /// Session kind.
    pub session_type: SessionType,
    /// Whether this is the active session.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Owns loaded sessions and the process-wide active-session reference.
///
/// Every operation takes an optional session ID; `None` targets the active
/// session.
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    packages: Arc<dyn PackageLookup>,
    chunker: ChunkerConfig,
    auto_cycle: AutoCycleConfig,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    active: RwLock<Option<String>>,
}

impl SessionManager {
    /// Create a manager with no session loaded.
    pub fn new(
        storage: Arc<dyn Storage>,
        packages: Arc<dyn PackageLookup>,
        chunker: ChunkerConfig,
        auto_cycle: AutoCycleConfig,
    ) -> Self {
        Self {
            storage,
            packages,
            chunker,
            auto_cycle,
            sessions: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        }
    }

    /// Chunker settings in effect.
    pub fn chunker_config(&self) -> &ChunkerConfig {
        &self.chunker
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Restore the most recently active session, if the pointer names one
    /// that still exists.
    pub async fn restore_active(&self) -> ThinkingResult<Option<String>> {
        let Some(pointer) =
            get_entity::<ActivePointer>(self.storage.as_ref(), ActivePointer::ID).await?
        else {
            return Ok(None);
        };

        match self.load_handle(&pointer.session_id).await {
            Ok(_) => {
                *self.active.write().await = Some(pointer.session_id.clone());
                info!(session_id = %pointer.session_id, "Active session restored");
                Ok(Some(pointer.session_id))
            }
            Err(ThinkingError::NotFound { .. }) => {
                warn!(session_id = %pointer.session_id, "Active session pointer is stale, clearing");
                self.clear_pointer().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the in-memory active reference. The pointer record stays so the
    /// next start can restore it.
    pub async fn shutdown(&self) {
        let previous = self.active.write().await.take();
        self.sessions.write().await.clear();
        info!(session_id = ?previous, "Session manager shut down");
    }

    /// ID of the active session.
    pub async fn active_session_id(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Snapshot of the active session.
    pub async fn active_session(&self) -> ThinkingResult<Arc<SessionState>> {
        Ok(self.handle(None).await?.snapshot())
    }

    /// Create, persist and activate a session.
    pub async fn create_session(&self, new: NewSession) -> ThinkingResult<Session> {
        let session = new.into_session();
        put_entity(self.storage.as_ref(), &session).await?;

        let handle = Arc::new(SessionHandle::new(SessionState::new(session.clone())));
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), handle);
        self.set_active(&session.id).await?;

        info!(session_id = %session.id, session_type = %session.session_type, "Session created");
        Ok(session)
    }

    /// Activate a session, loading it from storage if needed.
    pub async fn switch_session(&self, session_id: &str) -> ThinkingResult<Session> {
        let handle = self.handle(Some(session_id)).await?;
        self.set_active(session_id).await?;

        info!(session_id = %session_id, "Switched active session");
        Ok(handle.snapshot().session.clone())
    }

    /// Re-read a session from storage into its loaded copy and activate it.
    ///
    /// Fails with `Busy` while the session is being mutated.
    pub async fn load_session(&self, session_id: &str) -> ThinkingResult<Session> {
        let handle = self.handle(Some(session_id)).await?;
        let session = {
            let mut writer = handle.try_write(self.storage.clone())?;
            writer.reload().await?.session.clone()
        };
        self.set_active(session_id).await?;

        info!(session_id = %session_id, "Session loaded from storage");
        Ok(session)
    }

    /// Every persisted session, oldest first.
    pub async fn list_sessions(&self) -> ThinkingResult<Vec<SessionSummary>> {
        let sessions: Vec<Session> =
            list_entities(self.storage.as_ref(), &RecordFilter::all()).await?;
        let active = self.active_session_id().await;

        Ok(sessions
            .into_iter()
            .map(|s| SessionSummary {
                active: active.as_deref() == Some(s.id.as_str()),
                id: s.id,
                problem_statement: s.problem_statement,
                session_type: s.session_type,
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect())
    }

    /// Delete a session and everything it owns.
    pub async fn delete_session(&self, session_id: &str) -> ThinkingResult<()> {
        let handle = self.handle(Some(session_id)).await?;
        let _writer = handle.try_write(self.storage.clone())?;

        let filter = RecordFilter::session(session_id);
        let mut removed = 0usize;
        for kind in RecordKind::SESSION_SCOPED {
            for record in self.storage.list(kind, &filter).await? {
                self.storage.delete(kind, &record.id).await?;
                removed += 1;
            }
        }
        self.storage.delete(RecordKind::Session, session_id).await?;
        self.sessions.write().await.remove(session_id);

        let mut active = self.active.write().await;
        if active.as_deref() == Some(session_id) {
            *active = None;
            drop(active);
            self.clear_pointer().await?;
        }

        info!(session_id = %session_id, records = removed, "Session deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reasoning graph
    // ------------------------------------------------------------------

    /// Add a thought.
    pub async fn add_thought(
        &self,
        session_id: Option<&str>,
        new: NewThought,
    ) -> ThinkingResult<Thought> {
        self.mutate(session_id, move |state| {
            let id = state.graph.add_thought(new)?;
            cloned(state.graph.thought(&id), "Thought", &id)
        })
        .await
    }

    /// Revise a thought.
    pub async fn revise_thought(
        &self,
        session_id: Option<&str>,
        thought_id: &str,
        content: Option<String>,
        confidence: Option<f64>,
    ) -> ThinkingResult<Thought> {
        self.mutate(session_id, move |state| {
            state.graph.revise_thought(thought_id, content, confidence)?;
            cloned(state.graph.thought(thought_id), "Thought", thought_id)
        })
        .await
    }

    /// Fork a branch from a thought.
    pub async fn create_branch(
        &self,
        session_id: Option<&str>,
        name: &str,
        from_thought: &str,
        purpose: &str,
    ) -> ThinkingResult<Branch> {
        self.mutate(session_id, move |state| {
            let id = state.graph.create_branch(name, from_thought, purpose)?;
            cloned(state.graph.branch(&id), "Branch", &id)
        })
        .await
    }

    /// Merge a branch onto a target thought's line.
    pub async fn merge_branch(
        &self,
        session_id: Option<&str>,
        branch_id: &str,
        target_thought: &str,
    ) -> ThinkingResult<Branch> {
        self.mutate(session_id, move |state| {
            state.graph.merge_branch(branch_id, target_thought)?;
            cloned(state.graph.branch(branch_id), "Branch", branch_id)
        })
        .await
    }

    /// Abandon a branch.
    pub async fn abandon_branch(
        &self,
        session_id: Option<&str>,
        branch_id: &str,
    ) -> ThinkingResult<Branch> {
        self.mutate(session_id, move |state| {
            state.graph.abandon_branch(branch_id)?;
            cloned(state.graph.branch(branch_id), "Branch", branch_id)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Memory store
    // ------------------------------------------------------------------

    /// Store a memory.
    pub async fn store_memory(
        &self,
        session_id: Option<&str>,
        new: NewMemory,
    ) -> ThinkingResult<Memory> {
        self.mutate(session_id, move |state| {
            let id = state.memory.store_memory(new)?;
            cloned(state.memory.memory(&id), "Memory", &id)
        })
        .await
    }

    /// Revise a memory.
    pub async fn revise_memory(
        &self,
        session_id: Option<&str>,
        memory_id: &str,
        content: Option<String>,
        importance: Option<f64>,
    ) -> ThinkingResult<Memory> {
        self.mutate(session_id, move |state| {
            state.memory.revise_memory(memory_id, content, importance)?;
            cloned(state.memory.memory(memory_id), "Memory", memory_id)
        })
        .await
    }

    /// Query memories. `limit` caps how many are materialized.
    pub async fn query_memories(
        &self,
        session_id: Option<&str>,
        filter: MemoryFilter,
        limit: Option<usize>,
    ) -> ThinkingResult<Vec<Memory>> {
        let snapshot = self.handle(session_id).await?.snapshot();
        let query = snapshot.memory.query_memories(filter);

        Ok(match limit {
            Some(limit) => query.take(limit).cloned().collect(),
            None => query.cloned().collect(),
        })
    }

    /// Create a collection.
    pub async fn create_collection(
        &self,
        session_id: Option<&str>,
        name: &str,
        purpose: &str,
        seed_memory: Option<&str>,
    ) -> ThinkingResult<Collection> {
        self.mutate(session_id, move |state| {
            let id = state.memory.create_collection(name, purpose, seed_memory)?;
            cloned(state.memory.collection(&id), "Collection", &id)
        })
        .await
    }

    /// Union one collection into another.
    pub async fn merge_collection(
        &self,
        session_id: Option<&str>,
        target: &str,
        source: &str,
    ) -> ThinkingResult<Collection> {
        self.mutate(session_id, move |state| {
            state.memory.merge_collection(target, source)?;
            cloned(state.memory.collection(target), "Collection", target)
        })
        .await
    }

    /// Add a memory to a collection.
    pub async fn add_to_collection(
        &self,
        session_id: Option<&str>,
        collection_id: &str,
        memory_id: &str,
    ) -> ThinkingResult<Collection> {
        self.mutate(session_id, move |state| {
            state.memory.add_to_collection(collection_id, memory_id)?;
            cloned(state.memory.collection(collection_id), "Collection", collection_id)
        })
        .await
    }

    /// Record an architecture decision.
    pub async fn record_decision(
        &self,
        session_id: Option<&str>,
        new: NewDecision,
    ) -> ThinkingResult<ArchitectureDecision> {
        self.mutate(session_id, move |state| {
            let id = state.memory.record_decision(new)?;
            cloned(
                state.memory.decisions().iter().find(|d| d.id == id),
                "Decision",
                &id,
            )
        })
        .await
    }

    /// Query decisions by keyword and tag overlap.
    pub async fn query_decisions(
        &self,
        session_id: Option<&str>,
        pattern: Option<&str>,
        tags: &[String],
        threshold: Option<f64>,
    ) -> ThinkingResult<Vec<ScoredDecision>> {
        let snapshot = self.handle(session_id).await?.snapshot();
        Ok(snapshot.memory.query_decisions(pattern, tags, threshold))
    }

    // ------------------------------------------------------------------
    // Reads over a whole session
    // ------------------------------------------------------------------

    /// Select a budgeted context for the session.
    pub async fn context_chunk(
        &self,
        session_id: Option<&str>,
        budget: Option<usize>,
        required_kinds: Vec<UnitKind>,
    ) -> ThinkingResult<ContextSelection> {
        let snapshot = self.handle(session_id).await?.snapshot();
        let request = ChunkRequest::from_config(&self.chunker)
            .with_budget(budget.unwrap_or(self.chunker.token_budget))
            .with_required_kinds(required_kinds);

        Ok(select_context(&snapshot.graph, &snapshot.memory, &request))
    }

    /// Counts and health figures.
    pub async fn analyze_session(&self, session_id: Option<&str>) -> ThinkingResult<SessionAnalysis> {
        let snapshot = self.handle(session_id).await?.snapshot();
        Ok(snapshot.analyze(&self.chunker))
    }

    /// Export a session as a structured document.
    pub async fn export_session(&self, session_id: Option<&str>) -> ThinkingResult<SessionExport> {
        let snapshot = self.handle(session_id).await?.snapshot();
        Ok(SessionExport::from_state(&snapshot))
    }

    /// Import an exported session under its original IDs.
    ///
    /// An existing session with the same ID is replaced only when
    /// `overwrite` is set. The imported session is not activated.
    pub async fn import_session(
        &self,
        export: SessionExport,
        overwrite: bool,
    ) -> ThinkingResult<Session> {
        let state = export.into_state()?;
        let session_id = state.session.id.clone();

        let exists = self.sessions.read().await.contains_key(&session_id)
            || self
                .storage
                .get(RecordKind::Session, &session_id)
                .await?
                .is_some();
        if exists {
            if !overwrite {
                return Err(ThinkingError::invalid_state(format!(
                    "session {} already exists",
                    session_id
                )));
            }
            self.delete_session(&session_id).await?;
        }
        self.ensure_ids_free(&state).await?;

        state.persist_all(self.storage.as_ref()).await?;
        let session = state.session.clone();
        self.sessions
            .write()
            .await
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(SessionHandle::new(state)));

        info!(session_id = %session_id, "Session imported");
        Ok(session)
    }

    /// Suggest packages for a task description.
    pub async fn suggest_packages(&self, query: &str) -> ThinkingResult<Vec<PackageSuggestion>> {
        self.packages.suggest(query).await
    }

    /// Look up packages for a task and keep the relevant ones on the session.
    pub async fn explore_packages(
        &self,
        session_id: Option<&str>,
        task: &str,
    ) -> ThinkingResult<Vec<PackageSuggestion>> {
        let handle = self.handle(session_id).await?;
        let mut writer = handle.try_write(self.storage.clone())?;

        let found = self.relevant_packages(task).await?;
        let kept = found.clone();
        writer
            .apply(move |state| {
                state.session.record_packages(kept);
                Ok(())
            })
            .await?;

        info!(session_id = %writer.session_id(), found = found.len(), "Packages explored");
        Ok(found)
    }

    /// Score proposed code against the packages the session already knows.
    pub async fn detect_reinvention(
        &self,
        session_id: Option<&str>,
        proposal: &str,
        threshold: Option<f64>,
    ) -> ThinkingResult<ReinventionReport> {
        let snapshot = self.handle(session_id).await?.snapshot();
        Ok(detect_reinvention(
            &snapshot.session.discovered_packages,
            proposal,
            reinvention_threshold(threshold),
        ))
    }

    /// Explore packages for a proposal first, then score it.
    pub async fn check_reinvention(
        &self,
        session_id: Option<&str>,
        proposal: &str,
        threshold: Option<f64>,
    ) -> ThinkingResult<ReinventionReport> {
        let handle = self.handle(session_id).await?;
        let mut writer = handle.try_write(self.storage.clone())?;

        let found = self.relevant_packages(proposal).await?;
        writer
            .apply(move |state| {
                state.session.record_packages(found);
                Ok(())
            })
            .await?;

        let snapshot = writer.snapshot();
        let report = detect_reinvention(
            &snapshot.session.discovered_packages,
            proposal,
            reinvention_threshold(threshold),
        );
        if report.reinvention_detected {
            warn!(
                session_id = %writer.session_id(),
                packages = ?report.matching_packages,
                "Proposal duplicates known packages"
            );
        }
        Ok(report)
    }

    /// Store a code pattern as a tagged memory.
    pub async fn store_code_pattern(
        &self,
        session_id: Option<&str>,
        new: NewCodePattern,
    ) -> ThinkingResult<Memory> {
        self.mutate(session_id, move |state| {
            let id = state.memory.store_code_pattern(new)?;
            cloned(state.memory.memory(&id), "Memory", &id)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Auto-cycle
    // ------------------------------------------------------------------

    /// Run the automated thinking cycle, holding the session for its whole
    /// duration.
    pub async fn run_auto_cycle(
        &self,
        session_id: Option<&str>,
        options: &CycleOptions,
    ) -> ThinkingResult<AutoCycleRun> {
        let handle = self.handle(session_id).await?;
        let writer = handle.try_write(self.storage.clone())?;
        let (config, skip) = options.resolve(&self.auto_cycle);

        let start = Instant::now();
        let mut context =
            CycleContext::new(writer, self.packages.clone(), config, self.chunker.clone());
        let run = AutoCycle::standard().run(&mut context, &skip).await;

        info!(
            session_id = %run.session_id,
            run_id = %run.run_id,
            completed = run.completed,
            score = ?run.score,
            latency_ms = start.elapsed().as_millis() as u64,
            "Auto-cycle finished"
        );
        Ok(run)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn mutate<T, F>(&self, session_id: Option<&str>, op: F) -> ThinkingResult<T>
    where
        F: FnOnce(&mut SessionState) -> ThinkingResult<T> + Send,
        T: Send,
    {
        let handle = self.handle(session_id).await?;
        let mut writer = handle.try_write(self.storage.clone())?;
        writer.apply(op).await
    }

    async fn relevant_packages(&self, query: &str) -> ThinkingResult<Vec<PackageSuggestion>> {
        let threshold = self.auto_cycle.package_relevance_threshold;
        Ok(self
            .packages
            .suggest(query)
            .await?
            .into_iter()
            .filter(|p| p.relevance_score > threshold)
            .collect())
    }

    /// Resolve a session ID (or the active session) to a loaded handle.
    async fn handle(&self, session_id: Option<&str>) -> ThinkingResult<Arc<SessionHandle>> {
        let id = match session_id {
            Some(id) => id.to_string(),
            None => self
                .active
                .read()
                .await
                .clone()
                .ok_or(ThinkingError::NoActiveSession)?,
        };

        if let Some(handle) = self.sessions.read().await.get(&id) {
            return Ok(handle.clone());
        }
        self.load_handle(&id).await
    }

    async fn load_handle(&self, session_id: &str) -> ThinkingResult<Arc<SessionHandle>> {
        let state = SessionState::load(self.storage.as_ref(), session_id)
            .await?
            .ok_or_else(|| ThinkingError::not_found("Session", session_id))?;

        // A concurrent loader may have won; its handle owns the guard.
        let loaded = Arc::new(SessionHandle::new(state));
        let handle = self
            .sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert(loaded)
            .clone();
        Ok(handle)
    }

    async fn set_active(&self, session_id: &str) -> ThinkingResult<()> {
        put_entity(self.storage.as_ref(), &ActivePointer::new(session_id)).await?;
        *self.active.write().await = Some(session_id.to_string());
        Ok(())
    }

    async fn clear_pointer(&self) -> ThinkingResult<()> {
        match self
            .storage
            .delete(RecordKind::Pointer, ActivePointer::ID)
            .await
        {
            Ok(()) | Err(StorageError::RecordNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Entity IDs are unique per kind across sessions.
    async fn ensure_ids_free(&self, state: &SessionState) -> ThinkingResult<()> {
        let keys = state
            .graph
            .thoughts()
            .into_iter()
            .map(|t| (RecordKind::Thought, t.id.as_str()))
            .chain(state.graph.branches().map(|b| (RecordKind::Branch, b.id.as_str())))
            .chain(state.memory.memories().map(|m| (RecordKind::Memory, m.id.as_str())))
            .chain(
                state
                    .memory
                    .collections()
                    .map(|c| (RecordKind::Collection, c.id.as_str())),
            )
            .chain(
                state
                    .memory
                    .decisions()
                    .iter()
                    .map(|d| (RecordKind::Decision, d.id.as_str())),
            );

        for (kind, id) in keys {
            if self.storage.get(kind, id).await?.is_some() {
                return Err(ThinkingError::invalid_state(format!(
                    "{} {} already belongs to another session",
                    kind, id
                )));
            }
        }
        Ok(())
    }
}

fn reinvention_threshold(threshold: Option<f64>) -> f64 {
    threshold
        .unwrap_or(DEFAULT_REINVENTION_THRESHOLD)
        .clamp(0.0, 1.0)
}

fn cloned<T: Clone>(entity: Option<&T>, kind: &'static str, id: &str) -> ThinkingResult<T> {
    entity
        .cloned()
        .ok_or_else(|| ThinkingError::not_found(kind, id))
}
