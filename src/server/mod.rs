//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers routed to the session manager
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::packages::{KeywordPackageLookup, PackageLookup};
use crate::session::SessionManager;
use crate::storage::{SqliteStorage, Storage};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Owner of every loaded session and the active-session reference.
    pub manager: Arc<SessionManager>,
}

impl AppState {
    /// Create the state over SQLite storage and the keyword package lookup.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        Self::with_collaborators(config, Arc::new(storage), Arc::new(KeywordPackageLookup::new()))
    }

    /// Create the state over arbitrary collaborators.
    pub fn with_collaborators(
        config: Config,
        storage: Arc<dyn Storage>,
        packages: Arc<dyn PackageLookup>,
    ) -> Self {
        tracing::info!(
            token_budget = config.chunker.token_budget,
            pass_threshold = config.auto_cycle.pass_threshold,
            skip_steps = ?config.auto_cycle.skip_steps,
            "AppState initializing"
        );

        let manager = Arc::new(SessionManager::new(
            storage,
            packages,
            config.chunker.clone(),
            config.auto_cycle.clone(),
        ));

        Self { config, manager }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NewSession;

    #[tokio::test]
    async fn test_app_state_new() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(Config::default(), storage);

        assert_eq!(state.config.chunker.token_budget, 25_000);
        assert!(state.manager.active_session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_app_state_clone_shares_manager() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state1 = AppState::new(Config::default(), storage);
        let state2 = state1.clone();

        let session = state1
            .manager
            .create_session(NewSession::new("shared"))
            .await
            .unwrap();

        assert_eq!(
            state2.manager.active_session_id().await.as_deref(),
            Some(session.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let shared: SharedState = Arc::new(AppState::new(Config::default(), storage));

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
