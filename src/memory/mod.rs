//! Memory store: durable insights, collections of them, and architecture
//! decisions recorded during a session.

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ThinkingError, ThinkingResult};
use crate::storage::{Record, RecordKind};

/// Default similarity a decision needs to match a query.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// A prior state of a memory, kept when it is revised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRevision {
    /// Content before the revision.
    pub content: String,
    /// Importance before the revision.
    pub importance: f64,
    /// When the revision happened.
    pub revised_at: DateTime<Utc>,
}

/// A durable insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique memory ID.
    pub id: String,
    /// Owning session ID.
    pub session_id: String,
    /// Content.
    pub content: String,
    /// Lower-cased tags.
    pub tags: BTreeSet<String>,
    /// Importance, 0.0-1.0.
    pub importance: f64,
    /// Confidence, 0.0-1.0.
    pub confidence: f64,
    /// Optional code snippet.
    pub code_snippet: Option<String>,
    /// Language of the snippet.
    pub language: Option<String>,
    /// Pattern label, e.g. `auto_generated`.
    pub pattern: Option<String>,
    /// Position in the session, strictly increasing.
    pub sequence: u64,
    /// Revision log, oldest first.
    #[serde(default)]
    pub revisions: Vec<MemoryRevision>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Record for Memory {
    const KIND: RecordKind = RecordKind::Memory;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

/// A named set of memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Unique collection ID.
    pub id: String,
    /// Owning session ID.
    pub session_id: String,
    /// Display name.
    pub name: String,
    /// What the collection gathers.
    pub purpose: String,
    /// Member memory IDs.
    pub memory_ids: BTreeSet<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Record for Collection {
    const KIND: RecordKind = RecordKind::Collection;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

/// A recorded technical choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDecision {
    /// Unique decision ID.
    pub id: String,
    /// Owning session ID.
    pub session_id: String,
    /// Short title.
    pub title: String,
    /// Situation that forced the decision.
    pub context: String,
    /// Options considered, in order.
    pub options: Vec<String>,
    /// The option taken.
    pub chosen_option: String,
    /// Why it was taken.
    pub rationale: String,
    /// Expected consequences.
    pub consequences: String,
    /// Packages or components the decision relies on.
    pub dependencies: Vec<String>,
    /// Position in the session, strictly increasing.
    pub sequence: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ArchitectureDecision {
    /// All text fields joined, as used for matching and token estimates.
    pub fn text_block(&self) -> String {
        let mut block = format!(
            "{}\n{}\nOptions: {}\nChosen: {}\nRationale: {}\nConsequences: {}",
            self.title,
            self.context,
            self.options.join("; "),
            self.chosen_option,
            self.rationale,
            self.consequences
        );
        if !self.dependencies.is_empty() {
            block.push_str("\nDependencies: ");
            block.push_str(&self.dependencies.join(", "));
        }
        block
    }
}

impl Record for ArchitectureDecision {
    const KIND: RecordKind = RecordKind::Decision;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

/// Input for [`MemoryStore::store_memory`].
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    /// Content.
    pub content: String,
    /// Tags; normalized to lower case.
    pub tags: Vec<String>,
    /// Importance, clamped to 0.0-1.0.
    pub importance: f64,
    /// Confidence, clamped to 0.0-1.0. Defaults to 0.8.
    pub confidence: Option<f64>,
    /// Optional code snippet.
    pub code_snippet: Option<String>,
    /// Language of the snippet.
    pub language: Option<String>,
    /// Pattern label.
    pub pattern: Option<String>,
    /// Collection to join.
    pub collection_id: Option<String>,
}

/// Tag carried by every stored code pattern.
pub const CODE_PATTERN_TAG: &str = "code-pattern";

/// Input for [`MemoryStore::store_code_pattern`].
///
/// Code patterns are memories: the snippet, language and pattern label ride
/// on the memory, so the chunker and queries treat them like any other.
#[derive(Debug, Clone, Default)]
pub struct NewCodePattern {
    /// Kind of pattern, e.g. `repository` or `error-handling`.
    pub pattern_type: String,
    /// The code itself.
    pub code_snippet: String,
    /// What the pattern is for.
    pub description: String,
    /// Language of the snippet.
    pub language: Option<String>,
    /// Where the pattern lives.
    pub file_path: Option<String>,
    /// Extra tags.
    pub tags: Vec<String>,
    /// Importance, clamped to 0.0-1.0.
    pub importance: f64,
}

impl NewCodePattern {
    fn into_memory(self) -> NewMemory {
        let mut content = if self.description.trim().is_empty() {
            format!("{} pattern", self.pattern_type)
        } else {
            self.description
        };
        if let Some(path) = self.file_path.as_deref().filter(|p| !p.is_empty()) {
            content = format!("{} ({})", content, path);
        }

        let mut tags = self.tags;
        tags.push(CODE_PATTERN_TAG.to_string());

        NewMemory {
            content,
            tags,
            importance: self.importance,
            code_snippet: Some(self.code_snippet),
            language: self.language,
            pattern: Some(self.pattern_type),
            ..Default::default()
        }
    }
}

/// Input for [`MemoryStore::record_decision`].
#[derive(Debug, Clone, Default)]
pub struct NewDecision {
    /// Short title.
    pub title: String,
    /// Situation that forced the decision.
    pub context: String,
    /// Options considered.
    pub options: Vec<String>,
    /// The option taken.
    pub chosen_option: String,
    /// Why it was taken.
    pub rationale: String,
    /// Expected consequences.
    pub consequences: String,
    /// Dependencies of the decision.
    pub dependencies: Vec<String>,
}

/// Filter for [`MemoryStore::query_memories`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    /// Memories must carry all of these tags.
    pub tags: Vec<String>,
    /// Case-insensitive substring of the content.
    pub content_contains: Option<String>,
    /// Minimum importance.
    pub min_importance: Option<f64>,
}

impl MemoryFilter {
    fn normalized(self) -> Self {
        Self {
            tags: self.tags.iter().map(|t| normalize_tag(t)).collect(),
            content_contains: self.content_contains.map(|s| s.to_lowercase()),
            min_importance: self.min_importance,
        }
    }

    fn matches(&self, memory: &Memory) -> bool {
        if !self.tags.iter().all(|t| memory.tags.contains(t)) {
            return false;
        }
        if let Some(needle) = &self.content_contains {
            if !memory.content.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        self.min_importance
            .map_or(true, |min| memory.importance >= min)
    }
}

/// Lazy result of a memory query.
///
/// Walks the store's maintained order on demand. Clone it to restart.
#[derive(Debug, Clone)]
pub struct MemoryQuery<'a> {
    store: &'a MemoryStore,
    filter: MemoryFilter,
    position: usize,
}

impl<'a> Iterator for MemoryQuery<'a> {
    type Item = &'a Memory;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.store.order.get(self.position) {
            self.position += 1;
            if let Some(memory) = self.store.memories.get(id) {
                if self.filter.matches(memory) {
                    return Some(memory);
                }
            }
        }
        None
    }
}

/// A decision with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDecision {
    /// Fraction of query terms found in the decision.
    pub similarity: f64,
    /// The decision.
    pub decision: ArchitectureDecision,
}

/// Memories, collections and decisions of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStore {
    session_id: String,
    memories: HashMap<String, Memory>,
    // importance descending, then most recent first
    order: Vec<String>,
    collections: HashMap<String, Collection>,
    collection_order: Vec<String>,
    decisions: Vec<ArchitectureDecision>,
    next_sequence: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            memories: HashMap::new(),
            order: Vec::new(),
            collections: HashMap::new(),
            collection_order: Vec::new(),
            decisions: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Rebuild a store from persisted entities.
    ///
    /// Fails on duplicate IDs or if a collection names a memory that does
    /// not exist.
    pub fn restore(
        session_id: impl Into<String>,
        memories: Vec<Memory>,
        collections: Vec<Collection>,
        decisions: Vec<ArchitectureDecision>,
    ) -> ThinkingResult<Self> {
        let mut store = Self::new(session_id);

        for memory in memories {
            if store.memories.contains_key(&memory.id) {
                return Err(duplicate("memory", &memory.id));
            }
            store.next_sequence = store.next_sequence.max(memory.sequence + 1);
            store.insert_ordered(memory);
        }

        let mut collections = collections;
        collections.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for collection in collections {
            if let Some(missing) = collection
                .memory_ids
                .iter()
                .find(|id| !store.memories.contains_key(*id))
            {
                return Err(ThinkingError::not_found("Memory", missing.clone()));
            }
            if store.collections.contains_key(&collection.id) {
                return Err(duplicate("collection", &collection.id));
            }
            store.collection_order.push(collection.id.clone());
            store.collections.insert(collection.id.clone(), collection);
        }

        let mut decisions = decisions;
        decisions.sort_by_key(|d| d.sequence);
        {
            let mut seen = HashSet::new();
            if let Some(dup) = decisions.iter().find(|d| !seen.insert(d.id.as_str())) {
                return Err(duplicate("decision", &dup.id));
            }
        }
        if let Some(last) = decisions.last() {
            store.next_sequence = store.next_sequence.max(last.sequence + 1);
        }
        store.decisions = decisions;

        Ok(store)
    }

    /// Owning session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Look up a memory.
    pub fn memory(&self, id: &str) -> Option<&Memory> {
        self.memories.get(id)
    }

    /// Look up a collection.
    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.collections.get(id)
    }

    /// Memories by importance descending, most recent first on ties.
    pub fn memories(&self) -> impl Iterator<Item = &Memory> + '_ {
        self.order.iter().filter_map(|id| self.memories.get(id))
    }

    /// Collections in creation order.
    pub fn collections(&self) -> impl Iterator<Item = &Collection> + '_ {
        self.collection_order
            .iter()
            .filter_map(|id| self.collections.get(id))
    }

    /// Decisions, oldest first.
    pub fn decisions(&self) -> &[ArchitectureDecision] {
        &self.decisions
    }

    /// Number of memories.
    pub fn memory_count(&self) -> usize {
        self.memories.len()
    }

    /// Store a code pattern as a tagged memory.
    pub fn store_code_pattern(&mut self, new: NewCodePattern) -> ThinkingResult<String> {
        if new.pattern_type.trim().is_empty() {
            return Err(ThinkingError::invalid_state("pattern type must not be empty"));
        }
        if new.code_snippet.trim().is_empty() {
            return Err(ThinkingError::invalid_state("code snippet must not be empty"));
        }
        self.store_memory(new.into_memory())
    }

    /// Store a new memory, optionally joining a collection.
    pub fn store_memory(&mut self, new: NewMemory) -> ThinkingResult<String> {
        if let Some(collection_id) = &new.collection_id {
            if !self.collections.contains_key(collection_id) {
                return Err(ThinkingError::not_found("Collection", collection_id.clone()));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let memory = Memory {
            id: id.clone(),
            session_id: self.session_id.clone(),
            content: new.content,
            tags: new.tags.iter().map(|t| normalize_tag(t)).filter(|t| !t.is_empty()).collect(),
            importance: new.importance.clamp(0.0, 1.0),
            confidence: new.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
            code_snippet: new.code_snippet,
            language: new.language,
            pattern: new.pattern,
            sequence: self.take_sequence(),
            revisions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.insert_ordered(memory);

        if let Some(collection) = new
            .collection_id
            .as_ref()
            .and_then(|cid| self.collections.get_mut(cid))
        {
            collection.memory_ids.insert(id.clone());
        }

        debug!(memory_id = %id, session_id = %self.session_id, "Memory stored");
        Ok(id)
    }

    /// Revise a memory in place, logging its previous state.
    pub fn revise_memory(
        &mut self,
        id: &str,
        content: Option<String>,
        importance: Option<f64>,
    ) -> ThinkingResult<()> {
        if content.is_none() && importance.is_none() {
            return Err(ThinkingError::invalid_state(
                "a revision needs new content or a new importance",
            ));
        }

        let mut memory = self
            .memories
            .remove(id)
            .ok_or_else(|| ThinkingError::not_found("Memory", id))?;
        self.order.retain(|m| m != id);

        let now = Utc::now();
        memory.revisions.push(MemoryRevision {
            content: memory.content.clone(),
            importance: memory.importance,
            revised_at: now,
        });
        if let Some(content) = content {
            memory.content = content;
        }
        if let Some(importance) = importance {
            memory.importance = importance.clamp(0.0, 1.0);
        }
        memory.updated_at = now;
        self.insert_ordered(memory);

        Ok(())
    }

    /// Query memories lazily.
    ///
    /// A memory matches when it carries every requested tag, contains the
    /// substring (ignoring case) and meets the minimum importance.
    pub fn query_memories(&self, filter: MemoryFilter) -> MemoryQuery<'_> {
        MemoryQuery {
            store: self,
            filter: filter.normalized(),
            position: 0,
        }
    }

    /// Create a collection, optionally seeded with one memory.
    pub fn create_collection(
        &mut self,
        name: impl Into<String>,
        purpose: impl Into<String>,
        seed_memory: Option<&str>,
    ) -> ThinkingResult<String> {
        let mut memory_ids = BTreeSet::new();
        if let Some(seed) = seed_memory {
            if !self.memories.contains_key(seed) {
                return Err(ThinkingError::not_found("Memory", seed));
            }
            memory_ids.insert(seed.to_string());
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.collections.insert(
            id.clone(),
            Collection {
                id: id.clone(),
                session_id: self.session_id.clone(),
                name: name.into(),
                purpose: purpose.into(),
                memory_ids,
                created_at: Utc::now(),
            },
        );
        self.collection_order.push(id.clone());

        Ok(id)
    }

    /// Union `source`'s members into `target`. `source` is left as is.
    ///
    /// Returns the number of newly added members.
    pub fn merge_collection(&mut self, target: &str, source: &str) -> ThinkingResult<usize> {
        let members = self
            .collections
            .get(source)
            .ok_or_else(|| ThinkingError::not_found("Collection", source))?
            .memory_ids
            .clone();
        let target = self
            .collections
            .get_mut(target)
            .ok_or_else(|| ThinkingError::not_found("Collection", target))?;

        let before = target.memory_ids.len();
        target.memory_ids.extend(members);
        Ok(target.memory_ids.len() - before)
    }

    /// Add one memory to a collection. Returns whether it was new.
    pub fn add_to_collection(&mut self, collection: &str, memory: &str) -> ThinkingResult<bool> {
        if !self.memories.contains_key(memory) {
            return Err(ThinkingError::not_found("Memory", memory));
        }
        let collection = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| ThinkingError::not_found("Collection", collection))?;

        Ok(collection.memory_ids.insert(memory.to_string()))
    }

    /// Record an architecture decision.
    pub fn record_decision(&mut self, new: NewDecision) -> ThinkingResult<String> {
        if new.title.trim().is_empty() {
            return Err(ThinkingError::invalid_state("a decision needs a title"));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let decision = ArchitectureDecision {
            id: id.clone(),
            session_id: self.session_id.clone(),
            title: new.title,
            context: new.context,
            options: new.options,
            chosen_option: new.chosen_option,
            rationale: new.rationale,
            consequences: new.consequences,
            dependencies: new.dependencies,
            sequence: self.take_sequence(),
            created_at: Utc::now(),
        };
        self.decisions.push(decision);

        debug!(decision_id = %id, session_id = %self.session_id, "Decision recorded");
        Ok(id)
    }

    /// Find decisions by keyword and tag overlap.
    ///
    /// Query terms are the lower-cased words of `pattern` plus the tags. A
    /// decision's similarity is the fraction of terms found in its text or
    /// dependencies. An empty query matches everything with similarity 1.0.
    pub fn query_decisions(
        &self,
        pattern: Option<&str>,
        tags: &[String],
        threshold: Option<f64>,
    ) -> Vec<ScoredDecision> {
        let threshold = threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);

        let mut terms: Vec<String> = Vec::new();
        let words = pattern.map(tokenize).unwrap_or_default();
        for term in words.into_iter().chain(tags.iter().map(|t| normalize_tag(t))) {
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }

        let mut scored: Vec<ScoredDecision> = self
            .decisions
            .iter()
            .filter_map(|decision| {
                let similarity = if terms.is_empty() {
                    1.0
                } else {
                    let haystack = decision.text_block().to_lowercase();
                    let found = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                    found as f64 / terms.len() as f64
                };
                (similarity >= threshold).then(|| ScoredDecision {
                    similarity,
                    decision: decision.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.decision.sequence.cmp(&a.decision.sequence))
        });
        scored
    }

    fn insert_ordered(&mut self, memory: Memory) {
        let position = self
            .order
            .iter()
            .position(|id| {
                self.memories
                    .get(id)
                    .is_some_and(|other| rank(&memory, other) == Ordering::Less)
            })
            .unwrap_or(self.order.len());
        self.order.insert(position, memory.id.clone());
        self.memories.insert(memory.id.clone(), memory);
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// Ordering of memories: importance descending, then most recent first.
fn rank(a: &Memory, b: &Memory) -> Ordering {
    b.importance
        .total_cmp(&a.importance)
        .then_with(|| b.sequence.cmp(&a.sequence))
}

fn duplicate(kind: &str, id: &str) -> ThinkingError {
    ThinkingError::invalid_state(format!("duplicate {} id {}", kind, id))
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Lower-cased alphanumeric words of a text.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
