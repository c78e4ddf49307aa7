//! Command-line interface.
//!
//! Without a subcommand the binary serves MCP over stdio. The `sessions`
//! subcommands inspect and move sessions without starting the server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::session::{SessionExport, SessionManager};

/// Top-level arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-sequential-thinking", version, about)]
pub struct Cli {
    /// SQLite database file; overrides DATABASE_PATH
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Log filter; overrides LOG_LEVEL
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Command to run; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Apply command-line overrides on top of the environment configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(path) = &self.database {
            config.database.path = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve MCP over stdio
    Serve,

    /// Inspect and move sessions
    #[command(subcommand)]
    Sessions(SessionCommands),
}

/// Session maintenance subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// List stored sessions
    List,

    /// Show the analysis of a session
    Show {
        /// Session ID
        session_id: String,
    },

    /// Export a session as JSON
    Export {
        /// Session ID
        session_id: String,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Import a session from an export file
    Import {
        /// Export file
        file: PathBuf,

        /// Replace an existing session with the same ID
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete a session and everything it owns
    Delete {
        /// Session ID
        session_id: String,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a session subcommand.
pub async fn execute_command(command: SessionCommands, manager: &SessionManager) -> CliResult {
    match command {
        SessionCommands::List => execute_list(manager).await,
        SessionCommands::Show { session_id } => execute_show(manager, &session_id).await,
        SessionCommands::Export { session_id, output } => {
            execute_export(manager, &session_id, output).await
        }
        SessionCommands::Import { file, overwrite } => {
            execute_import(manager, &file, overwrite).await
        }
        SessionCommands::Delete { session_id } => execute_delete(manager, &session_id).await,
    }
}

async fn execute_list(manager: &SessionManager) -> CliResult {
    let sessions = match manager.list_sessions().await {
        Ok(s) => s,
        Err(e) => return CliResult::error(format!("Failed to list sessions: {}", e)),
    };

    if sessions.is_empty() {
        return CliResult::success("No sessions stored.");
    }

    let mut output = String::new();
    for session in sessions {
        let marker = if session.active { "*" } else { " " };
        output.push_str(&format!(
            "{} {}  {:<8} {}  {}\n",
            marker,
            session.id,
            session.session_type.to_string(),
            session.updated_at.format("%Y-%m-%d %H:%M"),
            truncate(&session.problem_statement, 60)
        ));
    }
    CliResult::success(output.trim_end().to_string())
}

async fn execute_show(manager: &SessionManager, session_id: &str) -> CliResult {
    match manager.analyze_session(Some(session_id)).await {
        Ok(analysis) => match serde_json::to_string_pretty(&analysis) {
            Ok(json) => CliResult::success(json),
            Err(e) => CliResult::error(format!("Failed to serialize analysis: {}", e)),
        },
        Err(e) => CliResult::error(format!("Failed to analyze session: {}", e)),
    }
}

async fn execute_export(
    manager: &SessionManager,
    session_id: &str,
    output: Option<PathBuf>,
) -> CliResult {
    let export = match manager.export_session(Some(session_id)).await {
        Ok(e) => e,
        Err(e) => return CliResult::error(format!("Failed to export session: {}", e)),
    };
    let json = match serde_json::to_string_pretty(&export) {
        Ok(j) => j,
        Err(e) => return CliResult::error(format!("Failed to serialize export: {}", e)),
    };

    match output {
        Some(path) => match tokio::fs::write(&path, json).await {
            Ok(()) => CliResult::success(format!(
                "Exported session {} to {}",
                session_id,
                path.display()
            )),
            Err(e) => CliResult::error(format!("Failed to write {}: {}", path.display(), e)),
        },
        None => CliResult::success(json),
    }
}

async fn execute_import(manager: &SessionManager, file: &PathBuf, overwrite: bool) -> CliResult {
    let raw = match tokio::fs::read_to_string(file).await {
        Ok(r) => r,
        Err(e) => return CliResult::error(format!("Failed to read {}: {}", file.display(), e)),
    };
    let export: SessionExport = match serde_json::from_str(&raw) {
        Ok(e) => e,
        Err(e) => return CliResult::error(format!("Invalid export file: {}", e)),
    };

    match manager.import_session(export, overwrite).await {
        Ok(session) => CliResult::success(format!("Imported session {}", session.id)),
        Err(e) => CliResult::error(format!("Failed to import session: {}", e)),
    }
}

async fn execute_delete(manager: &SessionManager, session_id: &str) -> CliResult {
    match manager.delete_session(session_id).await {
        Ok(()) => CliResult::success(format!("Deleted session {}", session_id)),
        Err(e) => CliResult::error(format!("Failed to delete session: {}", e)),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
