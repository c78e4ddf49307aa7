use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Thinking error: {0}")]
    Thinking(#[from] ThinkingError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Record not found: {kind}/{id}")]
    RecordNotFound { kind: String, id: String },

    #[error("Record {kind}/{id} could not be decoded: {message}")]
    Decode {
        kind: String,
        id: String,
        message: String,
    },

    #[error("Record {kind}/{id} has schema version {found}, newest supported is {supported}")]
    UnsupportedSchema {
        kind: String,
        id: String,
        found: i64,
        supported: i64,
    },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Domain errors raised by the reasoning graph, memory store, chunker,
/// session manager and auto-cycle.
#[derive(Debug, Error)]
pub enum ThinkingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Dependency cycle: {thought_id} would transitively depend on itself via {via}")]
    Cycle { thought_id: String, via: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Session {session_id} is busy with another mutation")]
    Busy { session_id: String },

    #[error("No active session")]
    NoActiveSession,

    #[error("Token budget {budget} cannot fit the highest-priority unit ({required} tokens)")]
    BudgetExceeded { budget: usize, required: usize },

    #[error("Completeness score {score:.2} is below the pass threshold {threshold:.2}")]
    ValidationAdvisory { score: f64, threshold: f64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ThinkingError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ThinkingError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        ThinkingError::InvalidState {
            message: message.into(),
        }
    }
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

impl From<ThinkingError> for McpError {
    fn from(err: ThinkingError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for domain operations
pub type ThinkingResult<T> = Result<T, ThinkingError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::RecordNotFound {
            kind: "thought".to_string(),
            id: "t-1".to_string(),
        };
        assert_eq!(err.to_string(), "Record not found: thought/t-1");

        let err = StorageError::UnsupportedSchema {
            kind: "session".to_string(),
            id: "s-1".to_string(),
            found: 3,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "Record session/s-1 has schema version 3, newest supported is 1"
        );

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_thinking_error_display() {
        let err = ThinkingError::not_found("Thought", "t-9");
        assert_eq!(err.to_string(), "Thought not found: t-9");

        let err = ThinkingError::Cycle {
            thought_id: "t-1".to_string(),
            via: "t-2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle: t-1 would transitively depend on itself via t-2"
        );

        let err = ThinkingError::Busy {
            session_id: "s-1".to_string(),
        };
        assert_eq!(err.to_string(), "Session s-1 is busy with another mutation");

        let err = ThinkingError::BudgetExceeded {
            budget: 5,
            required: 12,
        };
        assert_eq!(
            err.to_string(),
            "Token budget 5 cannot fit the highest-priority unit (12 tokens)"
        );

        let err = ThinkingError::ValidationAdvisory {
            score: 0.4,
            threshold: 0.6,
        };
        assert_eq!(
            err.to_string(),
            "Completeness score 0.40 is below the pass threshold 0.60"
        );
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownTool {
            tool_name: "nonexistent".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown tool: nonexistent");

        let err = McpError::InvalidParameters {
            tool_name: "add_thought".to_string(),
            message: "missing content".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameters for add_thought: missing content"
        );
    }

    #[test]
    fn test_storage_error_conversion_to_thinking_error() {
        let storage_err = StorageError::Query {
            message: "disk full".to_string(),
        };
        let err: ThinkingError = storage_err.into();
        assert!(matches!(err, ThinkingError::Storage(_)));
    }

    #[test]
    fn test_thinking_error_conversion_to_app_and_mcp_error() {
        let app_err: AppError = ThinkingError::NoActiveSession.into();
        assert!(matches!(app_err, AppError::Thinking(_)));

        let mcp_err: McpError = ThinkingError::invalid_state("branch already merged").into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("branch already merged"));
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Config {
            message: "test error".to_string(),
        };
        let mcp_err: McpError = app_err.into();
        assert!(mcp_err.to_string().contains("Configuration error"));
    }
}
