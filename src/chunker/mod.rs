//! Context chunker: picks the most valuable part of a session that fits a
//! token budget without leaving dangling thought dependencies.
//!
//! The chunker is a pure function of a graph, a memory store and a request.


use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ChunkerConfig;
use crate::error::ThinkingError;
use crate::graph::ReasoningGraph;
use crate::memory::{Memory, MemoryStore};

/// Kind of a selectable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Architecture decision.
    Decision,
    /// Thought.
    Thought,
    /// Memory.
    Memory,
}

impl std::str::FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "decision" | "decisions" => Ok(UnitKind::Decision),
            "thought" | "thoughts" => Ok(UnitKind::Thought),
            "memory" | "memories" => Ok(UnitKind::Memory),
            _ => Err(format!("Unknown unit kind: {}", s)),
        }
    }
}

/// Parameters of one selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    /// Token budget.
    pub budget: usize,
    /// Fixed overhead added to each unit's estimate.
    pub unit_overhead: usize,
    /// Confidence at or above which a thought is high priority.
    pub high_confidence_threshold: f64,
    /// Kinds attempted before all others.
    pub required_kinds: Vec<UnitKind>,
}

impl ChunkRequest {
    /// Request with the configured defaults.
    pub fn from_config(config: &ChunkerConfig) -> Self {
        Self {
            budget: config.token_budget,
            unit_overhead: config.unit_overhead,
            high_confidence_threshold: config.high_confidence_threshold,
            required_kinds: Vec::new(),
        }
    }

    /// Override the budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Attempt these kinds first.
    pub fn with_required_kinds(mut self, kinds: Vec<UnitKind>) -> Self {
        self.required_kinds = kinds;
        self
    }
}

impl Default for ChunkRequest {
    fn default() -> Self {
        Self::from_config(&ChunkerConfig::default())
    }
}

/// One entry of a selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEntry {
    /// A selected unit.
    Unit {
        /// Unit kind.
        kind: UnitKind,
        /// Entity ID.
        id: String,
        /// Text handed to the consumer.
        content: String,
        /// Estimated tokens.
        tokens: usize,
        /// Dependencies, for thoughts.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dependencies: Vec<String>,
    },
    /// Marks a thought that a selected thought depends on but that did not fit.
    Omitted {
        /// ID of the omitted thought.
        id: String,
    },
}

impl ContextEntry {
    /// Entity ID of the entry.
    pub fn id(&self) -> &str {
        match self {
            ContextEntry::Unit { id, .. } | ContextEntry::Omitted { id } => id,
        }
    }

    /// Whether the entry is an omission stub.
    pub fn is_stub(&self) -> bool {
        matches!(self, ContextEntry::Omitted { .. })
    }
}

/// Result of a selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSelection {
    /// Decisions, then thoughts with stubs, then memories.
    pub entries: Vec<ContextEntry>,
    /// Sum of the selected units' estimates.
    pub total_tokens: usize,
    /// Candidate units left out.
    pub omitted_count: usize,
    /// Budget the selection was made for.
    pub budget: usize,
    /// Set when not even the top-priority unit fits.
    pub budget_exceeded: bool,
    /// Why the selection is empty, when `budget_exceeded` is set.
    pub advisory: Option<String>,
}

/// Overview of a selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionSummary {
    /// Selected units, stubs excluded.
    pub unit_count: usize,
    /// Omission stubs emitted.
    pub stub_count: usize,
    /// Sum of estimates.
    pub total_tokens: usize,
    /// Budget.
    pub budget: usize,
    /// `total_tokens / budget`, 0 for a zero budget.
    pub utilization: f64,
    /// Units per kind.
    pub distribution: BTreeMap<UnitKind, usize>,
}

impl ContextSelection {
    /// Selected units, stubs excluded.
    pub fn units(&self) -> impl Iterator<Item = &ContextEntry> + '_ {
        self.entries.iter().filter(|e| !e.is_stub())
    }

    /// Summarize the selection.
    pub fn summary(&self) -> SelectionSummary {
        let mut distribution = BTreeMap::new();
        for entry in &self.entries {
            if let ContextEntry::Unit { kind, .. } = entry {
                *distribution.entry(*kind).or_insert(0) += 1;
            }
        }

        SelectionSummary {
            unit_count: distribution.values().sum(),
            stub_count: self.entries.iter().filter(|e| e.is_stub()).count(),
            total_tokens: self.total_tokens,
            budget: self.budget,
            utilization: if self.budget == 0 {
                0.0
            } else {
                self.total_tokens as f64 / self.budget as f64
            },
            distribution,
        }
    }
}

/// Estimated tokens of a text unit: a quarter of its characters, rounded
/// up, plus a fixed overhead.
pub fn estimated_tokens(text: &str, overhead: usize) -> usize {
    text.chars().count().div_ceil(4) + overhead
}

/// Text of a memory as handed to the consumer.
pub fn memory_text(memory: &Memory) -> String {
    match &memory.code_snippet {
        Some(snippet) if !snippet.is_empty() => format!("{}\n{}", memory.content, snippet),
        _ => memory.content.clone(),
    }
}

struct Candidate<'a> {
    kind: UnitKind,
    id: &'a str,
    dependencies: &'a [String],
    content: String,
    tokens: usize,
    tier: u8,
    key: f64,
    sequence: u64,
}

impl Candidate<'_> {
    fn into_entry(self) -> ContextEntry {
        ContextEntry::Unit {
            kind: self.kind,
            id: self.id.to_string(),
            content: self.content,
            tokens: self.tokens,
            dependencies: self.dependencies.to_vec(),
        }
    }
}

/// Select the units of a session that fit the request's budget.
///
/// Units are tried best first; one that does not fit is skipped and the
/// next one is still tried. If the best unit alone exceeds the budget the
/// selection is empty and flagged.
pub fn select_context(
    graph: &ReasoningGraph,
    store: &MemoryStore,
    request: &ChunkRequest,
) -> ContextSelection {
    let candidates = prioritized_candidates(graph, store, request);
    let total_candidates = candidates.len();

    let empty = |advisory: Option<String>| ContextSelection {
        entries: Vec::new(),
        total_tokens: 0,
        omitted_count: total_candidates,
        budget: request.budget,
        budget_exceeded: advisory.is_some(),
        advisory,
    };

    match candidates.first() {
        None => return empty(None),
        Some(top) if top.tokens > request.budget => {
            let exceeded = ThinkingError::BudgetExceeded {
                budget: request.budget,
                required: top.tokens,
            };
            return empty(Some(exceeded.to_string()));
        }
        Some(_) => {}
    }

    let mut total = 0usize;
    let mut decisions = Vec::new();
    let mut thoughts = Vec::new();
    let mut memories = Vec::new();
    for candidate in candidates {
        if total + candidate.tokens > request.budget {
            continue;
        }
        total += candidate.tokens;
        match candidate.kind {
            UnitKind::Decision => decisions.push(candidate),
            UnitKind::Thought => thoughts.push(candidate),
            UnitKind::Memory => memories.push(candidate),
        }
    }

    let selected_count = decisions.len() + thoughts.len() + memories.len();
    let mut entries = Vec::with_capacity(selected_count);
    entries.extend(decisions.into_iter().map(Candidate::into_entry));
    entries.extend(ordered_thoughts(graph, thoughts));
    entries.extend(memories.into_iter().map(Candidate::into_entry));

    ContextSelection {
        entries,
        total_tokens: total,
        omitted_count: total_candidates - selected_count,
        budget: request.budget,
        budget_exceeded: false,
        advisory: None,
    }
}

/// Every unit of the session, best first.
fn prioritized_candidates<'a>(
    graph: &'a ReasoningGraph,
    store: &'a MemoryStore,
    request: &ChunkRequest,
) -> Vec<Candidate<'a>> {
    let overhead = request.unit_overhead;
    let mut candidates = Vec::new();

    for decision in store.decisions() {
        let content = decision.text_block();
        candidates.push(Candidate {
            kind: UnitKind::Decision,
            id: &decision.id,
            dependencies: &[],
            tokens: estimated_tokens(&content, overhead),
            content,
            tier: 0,
            key: 0.0,
            sequence: decision.sequence,
        });
    }
    for thought in graph.thoughts() {
        candidates.push(Candidate {
            kind: UnitKind::Thought,
            id: &thought.id,
            dependencies: &thought.dependencies,
            content: thought.content.clone(),
            tokens: estimated_tokens(&thought.content, overhead),
            tier: if thought.confidence >= request.high_confidence_threshold {
                1
            } else {
                2
            },
            key: thought.confidence,
            sequence: thought.sequence,
        });
    }
    for memory in store.memories() {
        let content = memory_text(memory);
        candidates.push(Candidate {
            kind: UnitKind::Memory,
            id: &memory.id,
            dependencies: &[],
            tokens: estimated_tokens(&content, overhead),
            content,
            tier: 3,
            key: memory.importance,
            sequence: memory.sequence,
        });
    }

    let required = |kind: UnitKind| {
        request
            .required_kinds
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(usize::MAX)
    };

    candidates.sort_by(|a, b| {
        required(a.kind)
            .cmp(&required(b.kind))
            .then_with(|| a.tier.cmp(&b.tier))
            .then_with(|| b.key.total_cmp(&a.key))
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
    candidates
}

/// Selected thoughts in dependency order, each preceded by stubs for the
/// dependencies that were left out.
fn ordered_thoughts(graph: &ReasoningGraph, thoughts: Vec<Candidate<'_>>) -> Vec<ContextEntry> {
    let ids: Vec<String> = thoughts.iter().map(|c| c.id.to_string()).collect();
    let selected: HashSet<&str> = thoughts.iter().map(|c| c.id).collect();
    let order = graph.topological_order(&ids);

    let mut by_id: HashMap<&str, Candidate<'_>> = thoughts.into_iter().map(|c| (c.id, c)).collect();

    let mut entries = Vec::with_capacity(order.len());
    let mut stubbed: HashSet<&str> = HashSet::new();
    for id in &order {
        let Some(candidate) = by_id.remove(id.as_str()) else {
            continue;
        };
        for dep in candidate.dependencies {
            if !selected.contains(dep.as_str()) && stubbed.insert(dep.as_str()) {
                entries.push(ContextEntry::Omitted { id: dep.clone() });
            }
        }
        entries.push(candidate.into_entry());
    }

    entries
}
