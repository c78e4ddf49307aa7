//! # MCP Sequential Thinking Server
//!
//! A Model Context Protocol (MCP) server for structured sequential thinking:
//! chains of thoughts that fork and merge, durable memories and architecture
//! decisions, and a token-budgeted view over all of it.
//!
//! ## Features
//!
//! - **Reasoning Graph**: Acyclic thought dependencies with branching and merging
//! - **Memory Store**: Tagged memories, collections and recorded decisions
//! - **Context Chunker**: Greedy, budget-bounded context selection with omission stubs
//! - **Auto-Cycle**: Five-step automated workflow with skip and halt semantics
//! - **Sessions**: One active session, restored on restart, exportable as JSON
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → SessionManager → Graph / Memory / Chunker / Cycle
//!                                          ↓
//!                                    SQLite (records)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_sequential_thinking::{Config, AppState, McpServer};
//! use mcp_sequential_thinking::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage));
//!     state.manager.restore_active().await?;
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Context selection under a token budget.
pub mod chunker;
/// Command-line interface.
pub mod cli;
/// Configuration management for the MCP server.
pub mod config;
/// The automated thinking cycle.
pub mod cycle;
/// Error types and result aliases for the application.
pub mod error;
/// Thoughts, branches and the acyclic dependency graph.
pub mod graph;
/// Memories, collections and architecture decisions.
pub mod memory;
/// Package suggestion lookup.
pub mod packages;
/// MCP server implementation and request handling.
pub mod server;
/// Sessions, the active-session reference and per-session write exclusion.
pub mod session;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
