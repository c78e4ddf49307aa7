use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Session, SessionState};
use crate::error::{ThinkingError, ThinkingResult};
use crate::graph::{Branch, ReasoningGraph, Thought};
use crate::memory::{ArchitectureDecision, Collection, Memory, MemoryStore};

/// Version of the export document layout.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// A whole session as one JSON-serializable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    /// Layout version of this document.
    pub format_version: u32,
    /// When the export was taken.
    pub exported_at: DateTime<Utc>,
    /// Session header.
    pub session: Session,
    /// Thoughts ordered by sequence.
    pub thoughts: Vec<Thought>,
    /// Branches in creation order.
    pub branches: Vec<Branch>,
    /// Memories by importance.
    pub memories: Vec<Memory>,
    /// Collections in creation order.
    pub collections: Vec<Collection>,
    /// Decisions, oldest first.
    pub decisions: Vec<ArchitectureDecision>,
}

impl SessionExport {
    /// Capture a snapshot.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now(),
            session: state.session.clone(),
            thoughts: state.graph.thoughts().into_iter().cloned().collect(),
            branches: state.graph.branches().cloned().collect(),
            memories: state.memory.memories().cloned().collect(),
            collections: state.memory.collections().cloned().collect(),
            decisions: state.memory.decisions().to_vec(),
        }
    }

    /// Rebuild the session state, validating every reference and edge.
    pub fn into_state(self) -> ThinkingResult<SessionState> {
        if self.format_version > EXPORT_FORMAT_VERSION {
            return Err(ThinkingError::invalid_state(format!(
                "export format {} is newer than supported format {}",
                self.format_version, EXPORT_FORMAT_VERSION
            )));
        }

        let session_id = self.session.id.clone();
        let foreign = self
            .thoughts
            .iter()
            .map(|t| &t.session_id)
            .chain(self.branches.iter().map(|b| &b.session_id))
            .chain(self.memories.iter().map(|m| &m.session_id))
            .chain(self.collections.iter().map(|c| &c.session_id))
            .chain(self.decisions.iter().map(|d| &d.session_id))
            .any(|owner| *owner != session_id);
        if foreign {
            return Err(ThinkingError::invalid_state(format!(
                "export contains entities that do not belong to session {}",
                session_id
            )));
        }

        let graph = ReasoningGraph::restore(&session_id, self.thoughts, self.branches)?;
        let memory = MemoryStore::restore(
            &session_id,
            self.memories,
            self.collections,
            self.decisions,
        )?;

        Ok(SessionState {
            session: self.session,
            graph,
            memory,
        })
    }
}
