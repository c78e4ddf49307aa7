//! Reasoning graph: thoughts, branches and the acyclic dependency relation
//! between them.
//!
//! Thoughts live in an id-keyed map and reference each other by id, so the
//! graph never owns a cycle of values. Every insertion runs a reachability
//! search before anything is mutated.


use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ThinkingError, ThinkingResult};
use crate::storage::{Record, RecordKind};

/// The line of reasoning a thought belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "branch_id", rename_all = "snake_case")]
pub enum Line {
    /// The session's main line.
    Main,
    /// An alternative line created by a fork.
    Branch(String),
}

/// A prior state of a thought, kept when it is revised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtRevision {
    /// Content before the revision.
    pub content: String,
    /// Confidence before the revision.
    pub confidence: f64,
    /// When the revision happened.
    pub revised_at: DateTime<Utc>,
}

/// A single reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique thought ID.
    pub id: String,
    /// Owning session ID.
    pub session_id: String,
    /// Current content.
    pub content: String,
    /// Current confidence, 0.0-1.0.
    pub confidence: f64,
    /// Thoughts this one depends on, in insertion order.
    pub dependencies: Vec<String>,
    /// Line the thought lives on.
    pub line: Line,
    /// Position in the session, strictly increasing.
    pub sequence: u64,
    /// Packages suggested while this thought was generated.
    #[serde(default)]
    pub suggested_packages: Vec<String>,
    /// Revision log, oldest first.
    #[serde(default)]
    pub revisions: Vec<ThoughtRevision>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Record for Thought {
    const KIND: RecordKind = RecordKind::Thought;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

/// Lifecycle of a branch. Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Accepting thoughts.
    Open,
    /// Folded into another line.
    Merged,
    /// Given up.
    Abandoned,
}

impl BranchStatus {
    /// Whether the branch can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BranchStatus::Open)
    }
}

/// An alternative line of reasoning forked from a thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique branch ID.
    pub id: String,
    /// Owning session ID.
    pub session_id: String,
    /// Display name.
    pub name: String,
    /// Why the branch exists.
    pub purpose: String,
    /// Thought the branch was forked from.
    pub fork_point: String,
    /// Thoughts added to the branch, in order.
    pub thoughts: Vec<String>,
    /// Lifecycle state.
    pub status: BranchStatus,
    /// Merge target, once merged.
    pub merged_into: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the branch was merged or abandoned.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Record for Branch {
    const KIND: RecordKind = RecordKind::Branch;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn owner_session(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

/// Input for [`ReasoningGraph::add_thought`].
#[derive(Debug, Clone)]
pub struct NewThought {
    /// Caller-chosen ID, used when replaying history.
    pub id: Option<String>,
    /// Content.
    pub content: String,
    /// Confidence, clamped to 0.0-1.0.
    pub confidence: f64,
    /// Dependencies; duplicates are collapsed.
    pub dependencies: Vec<String>,
    /// Target line.
    pub line: Line,
    /// Suggested packages to attach.
    pub suggested_packages: Vec<String>,
}

impl NewThought {
    /// A main-line thought with no dependencies.
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: None,
            content: content.into(),
            confidence,
            dependencies: Vec::new(),
            line: Line::Main,
            suggested_packages: Vec::new(),
        }
    }

    /// Set dependencies.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Place the thought on a branch.
    pub fn on_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.line = Line::Branch(branch_id.into());
        self
    }

    /// Use a caller-chosen ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach suggested packages.
    pub fn with_suggested_packages(mut self, packages: Vec<String>) -> Self {
        self.suggested_packages = packages;
        self
    }
}

/// Thoughts and branches of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningGraph {
    session_id: String,
    thoughts: HashMap<String, Thought>,
    main_line: Vec<String>,
    branches: HashMap<String, Branch>,
    branch_order: Vec<String>,
    next_sequence: u64,
}

impl ReasoningGraph {
    /// Create an empty graph.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            thoughts: HashMap::new(),
            main_line: Vec::new(),
            branches: HashMap::new(),
            branch_order: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Rebuild a graph from persisted thoughts and branches.
    ///
    /// Fails on duplicate IDs, dangling edges or fork points, and cycles.
    pub fn restore(
        session_id: impl Into<String>,
        thoughts: Vec<Thought>,
        branches: Vec<Branch>,
    ) -> ThinkingResult<Self> {
        let mut graph = Self::new(session_id);

        for branch in branches {
            let id = branch.id.clone();
            if graph.branches.insert(id.clone(), branch).is_some() {
                return Err(ThinkingError::invalid_state(format!(
                    "duplicate branch id {}",
                    id
                )));
            }
            graph.branch_order.push(id);
        }
        graph.branch_order.sort_by(|a, b| {
            let (a, b) = (&graph.branches[a], &graph.branches[b]);
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });

        let mut ordered = thoughts;
        ordered.sort_by_key(|t| t.sequence);
        for thought in ordered {
            if graph.thoughts.contains_key(&thought.id) {
                return Err(ThinkingError::invalid_state(format!(
                    "duplicate thought id {}",
                    thought.id
                )));
            }
            if thought.line == Line::Main {
                graph.main_line.push(thought.id.clone());
            }
            graph.next_sequence = graph.next_sequence.max(thought.sequence + 1);
            graph.thoughts.insert(thought.id.clone(), thought);
        }

        for thought in graph.thoughts.values() {
            for dep in &thought.dependencies {
                if !graph.thoughts.contains_key(dep) {
                    return Err(ThinkingError::not_found("Thought", dep.clone()));
                }
            }
            if let Line::Branch(branch_id) = &thought.line {
                if !graph.branches.contains_key(branch_id) {
                    return Err(ThinkingError::not_found("Branch", branch_id.clone()));
                }
            }
        }

        for branch in graph.branches.values() {
            if !graph.thoughts.contains_key(&branch.fork_point) {
                return Err(ThinkingError::not_found("Thought", branch.fork_point.clone()));
            }
            if let Some(missing) = branch
                .thoughts
                .iter()
                .find(|id| !graph.thoughts.contains_key(*id))
            {
                return Err(ThinkingError::not_found("Thought", missing.clone()));
            }
        }

        let all: Vec<String> = graph.thoughts.keys().cloned().collect();
        let order = graph.topological_order(&all);
        if order.len() != all.len() {
            let stuck = all
                .iter()
                .find(|id| !order.contains(id))
                .cloned()
                .unwrap_or_default();
            return Err(ThinkingError::Cycle {
                thought_id: stuck.clone(),
                via: stuck,
            });
        }

        Ok(graph)
    }

    /// Owning session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Look up a thought.
    pub fn thought(&self, id: &str) -> Option<&Thought> {
        self.thoughts.get(id)
    }

    /// Look up a branch.
    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.get(id)
    }

    /// Number of thoughts.
    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    /// Whether the graph has no thoughts.
    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    /// Main-line thoughts in order.
    pub fn main_line(&self) -> impl Iterator<Item = &Thought> + '_ {
        self.main_line.iter().filter_map(|id| self.thoughts.get(id))
    }

    /// Branches in creation order.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> + '_ {
        self.branch_order.iter().filter_map(|id| self.branches.get(id))
    }

    /// Every thought ordered by sequence.
    pub fn thoughts(&self) -> Vec<&Thought> {
        let mut all: Vec<&Thought> = self.thoughts.values().collect();
        all.sort_by_key(|t| t.sequence);
        all
    }

    /// Add a thought after validating its line and dependencies.
    ///
    /// Returns the new thought's ID. Nothing changes on error.
    pub fn add_thought(&mut self, new: NewThought) -> ThinkingResult<String> {
        let id = match new.id {
            Some(id) if self.thoughts.contains_key(&id) => {
                return Err(ThinkingError::invalid_state(format!(
                    "thought {} already exists",
                    id
                )));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        if let Line::Branch(branch_id) = &new.line {
            let branch = self
                .branches
                .get(branch_id)
                .ok_or_else(|| ThinkingError::not_found("Branch", branch_id.clone()))?;
            if branch.status.is_terminal() {
                return Err(ThinkingError::invalid_state(format!(
                    "branch {} is {:?} and accepts no thoughts",
                    branch_id, branch.status
                )));
            }
        }

        let mut dependencies: Vec<String> = Vec::with_capacity(new.dependencies.len());
        for dep in new.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        for dep in &dependencies {
            if *dep == id {
                return Err(ThinkingError::Cycle {
                    thought_id: id.clone(),
                    via: dep.clone(),
                });
            }
            let target = self
                .thoughts
                .get(dep)
                .ok_or_else(|| ThinkingError::not_found("Thought", dep.clone()))?;
            self.check_visible(&new.line, target)?;
            if self.reaches(dep, &id, &[]) {
                return Err(ThinkingError::Cycle {
                    thought_id: id.clone(),
                    via: dep.clone(),
                });
            }
        }

        let now = Utc::now();
        let thought = Thought {
            id: id.clone(),
            session_id: self.session_id.clone(),
            content: new.content,
            confidence: new.confidence.clamp(0.0, 1.0),
            dependencies,
            line: new.line.clone(),
            sequence: self.take_sequence(),
            suggested_packages: new.suggested_packages,
            revisions: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        match &new.line {
            Line::Main => self.main_line.push(id.clone()),
            Line::Branch(branch_id) => {
                if let Some(branch) = self.branches.get_mut(branch_id) {
                    branch.thoughts.push(id.clone());
                }
            }
        }
        self.thoughts.insert(id.clone(), thought);

        debug!(thought_id = %id, session_id = %self.session_id, "Thought added");
        Ok(id)
    }

    /// Revise a thought in place, logging its previous state.
    pub fn revise_thought(
        &mut self,
        id: &str,
        content: Option<String>,
        confidence: Option<f64>,
    ) -> ThinkingResult<()> {
        if content.is_none() && confidence.is_none() {
            return Err(ThinkingError::invalid_state(
                "a revision needs new content or a new confidence",
            ));
        }

        let thought = self
            .thoughts
            .get_mut(id)
            .ok_or_else(|| ThinkingError::not_found("Thought", id))?;

        let now = Utc::now();
        thought.revisions.push(ThoughtRevision {
            content: thought.content.clone(),
            confidence: thought.confidence,
            revised_at: now,
        });
        if let Some(content) = content {
            thought.content = content;
        }
        if let Some(confidence) = confidence {
            thought.confidence = confidence.clamp(0.0, 1.0);
        }
        thought.updated_at = now;

        Ok(())
    }

    /// Fork an empty open branch from a thought.
    pub fn create_branch(
        &mut self,
        name: impl Into<String>,
        from_thought: &str,
        purpose: impl Into<String>,
    ) -> ThinkingResult<String> {
        let fork = self
            .thoughts
            .get(from_thought)
            .ok_or_else(|| ThinkingError::not_found("Thought", from_thought))?;

        if let Line::Branch(branch_id) = &fork.line {
            if self
                .branches
                .get(branch_id)
                .is_some_and(|b| b.status.is_terminal())
            {
                return Err(ThinkingError::invalid_state(format!(
                    "cannot fork from thought {} on closed branch {}",
                    from_thought, branch_id
                )));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let branch = Branch {
            id: id.clone(),
            session_id: self.session_id.clone(),
            name: name.into(),
            purpose: purpose.into(),
            fork_point: from_thought.to_string(),
            thoughts: Vec::new(),
            status: BranchStatus::Open,
            merged_into: None,
            created_at: Utc::now(),
            closed_at: None,
        };

        self.branches.insert(id.clone(), branch);
        self.branch_order.push(id.clone());

        debug!(branch_id = %id, fork_point = %from_thought, "Branch created");
        Ok(id)
    }

    /// Merge an open branch onto the line of `target_thought`.
    ///
    /// The branch's first thought gains an edge onto the fork point and the
    /// target gains an edge onto the branch's last thought.
    pub fn merge_branch(&mut self, branch_id: &str, target_thought: &str) -> ThinkingResult<()> {
        let branch = self
            .branches
            .get(branch_id)
            .ok_or_else(|| ThinkingError::not_found("Branch", branch_id))?;
        if branch.status.is_terminal() {
            return Err(ThinkingError::invalid_state(format!(
                "branch {} is already {:?}",
                branch_id, branch.status
            )));
        }
        let (Some(first), Some(last)) = (branch.thoughts.first(), branch.thoughts.last()) else {
            return Err(ThinkingError::invalid_state(format!(
                "branch {} has no thoughts to merge",
                branch_id
            )));
        };
        let (first, last) = (first.clone(), last.clone());
        let fork_point = branch.fork_point.clone();

        let target = self
            .thoughts
            .get(target_thought)
            .ok_or_else(|| ThinkingError::not_found("Thought", target_thought))?;
        let target_line = target.line.clone();
        match &target_line {
            Line::Branch(id) if id == branch_id => {
                return Err(ThinkingError::invalid_state(format!(
                    "cannot merge branch {} into its own thought {}",
                    branch_id, target_thought
                )));
            }
            Line::Branch(id) => {
                if self.branches.get(id).is_some_and(|b| b.status.is_terminal()) {
                    return Err(ThinkingError::invalid_state(format!(
                        "merge target {} lies on closed branch {}",
                        target_thought, id
                    )));
                }
            }
            Line::Main => {}
        }

        // The merged branch descends from its fork point, so the fork point or
        // anything it depends on cannot also depend on the branch.
        if target_thought == fork_point || self.reaches(&fork_point, target_thought, &[]) {
            return Err(ThinkingError::Cycle {
                thought_id: target_thought.to_string(),
                via: fork_point,
            });
        }
        if self.reaches(&fork_point, &first, &[])
            || self.reaches(&last, target_thought, &[(first.as_str(), fork_point.as_str())])
        {
            return Err(ThinkingError::Cycle {
                thought_id: target_thought.to_string(),
                via: last,
            });
        }

        let moved = branch.thoughts.clone();
        let now = Utc::now();
        for id in &moved {
            let sequence = self.take_sequence();
            if let Some(thought) = self.thoughts.get_mut(id) {
                thought.line = target_line.clone();
                thought.sequence = sequence;
                thought.updated_at = now;
            }
        }
        match &target_line {
            Line::Main => self.main_line.extend(moved.iter().cloned()),
            Line::Branch(id) => {
                if let Some(target_branch) = self.branches.get_mut(id) {
                    target_branch.thoughts.extend(moved.iter().cloned());
                }
            }
        }

        if let Some(thought) = self.thoughts.get_mut(&first) {
            if !thought.dependencies.contains(&fork_point) {
                thought.dependencies.push(fork_point);
            }
        }
        if let Some(thought) = self.thoughts.get_mut(target_thought) {
            if !thought.dependencies.contains(&last) {
                thought.dependencies.push(last);
                thought.updated_at = now;
            }
        }

        if let Some(branch) = self.branches.get_mut(branch_id) {
            branch.status = BranchStatus::Merged;
            branch.merged_into = Some(target_thought.to_string());
            branch.closed_at = Some(now);
        }

        debug!(branch_id = %branch_id, target = %target_thought, moved = moved.len(), "Branch merged");
        Ok(())
    }

    /// Abandon an open branch. Its thoughts stay in the graph.
    pub fn abandon_branch(&mut self, branch_id: &str) -> ThinkingResult<()> {
        let branch = self
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| ThinkingError::not_found("Branch", branch_id))?;
        if branch.status.is_terminal() {
            return Err(ThinkingError::invalid_state(format!(
                "branch {} is already {:?}",
                branch_id, branch.status
            )));
        }

        branch.status = BranchStatus::Abandoned;
        branch.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Order a subset of thoughts so every thought follows its dependencies.
    ///
    /// Only edges inside the subset count. Ties go to the lower sequence.
    /// Unknown IDs are dropped; IDs on a cycle never appear.
    pub fn topological_order(&self, ids: &[String]) -> Vec<String> {
        let subset: HashSet<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| self.thoughts.contains_key(*id))
            .collect();

        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for &id in &subset {
            let thought = &self.thoughts[id];
            let inside: Vec<&str> = thought
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| subset.contains(dep))
                .collect();
            pending.insert(id, inside.len());
            for dep in inside {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: BinaryHeap<Reverse<(u64, &str)>> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| Reverse((self.thoughts[*id].sequence, *id)))
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((self.thoughts[*dependent].sequence, *dependent)));
                    }
                }
            }
        }

        order
    }

    /// Whether `from` transitively depends on `to`, optionally with extra
    /// `(from, to)` edges that are not in the graph yet.
    fn reaches(&self, from: &str, to: &str, extra: &[(&str, &str)]) -> bool {
        let mut stack = vec![from];
        let mut seen: HashSet<&str> = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(thought) = self.thoughts.get(current) {
                stack.extend(thought.dependencies.iter().map(String::as_str));
            }
            stack.extend(
                extra
                    .iter()
                    .filter(|(edge_from, _)| *edge_from == current)
                    .map(|(_, edge_to)| *edge_to),
            );
        }

        false
    }

    fn check_visible(&self, line: &Line, dependency: &Thought) -> ThinkingResult<()> {
        let visible = match line {
            Line::Main => dependency.line == Line::Main,
            Line::Branch(branch_id) => {
                dependency.line == *line
                    || self
                        .branches
                        .get(branch_id)
                        .is_some_and(|b| b.fork_point == dependency.id)
            }
        };

        if visible {
            Ok(())
        } else {
            Err(ThinkingError::invalid_state(format!(
                "thought {} is not visible from line {:?}",
                dependency.id, line
            )))
        }
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}
