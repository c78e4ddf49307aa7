use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_sequential_thinking::{
    cli::{execute_command, Cli, Command},
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    // Initialize logging
    init_logging(&config, cli.log_level.is_some());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Sequential Thinking Server starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Create application state
    let state = Arc::new(AppState::new(config, storage));

    match state.manager.restore_active().await {
        Ok(Some(session_id)) => info!(session_id = %session_id, "Active session restored"),
        Ok(None) => info!("No active session to restore"),
        Err(e) => warn!(error = %e, "Failed to restore active session"),
    }

    if let Some(Command::Sessions(command)) = cli.command {
        let result = execute_command(command, &state.manager).await;
        state.manager.shutdown().await;
        if result.exit_code == 0 {
            println!("{}", result.message);
        } else {
            eprintln!("{}", result.message);
        }
        std::process::exit(result.exit_code);
    }

    // Start MCP server
    let server = McpServer::new(state.clone());

    info!("Server ready, waiting for requests on stdin...");

    let outcome = server.run().await;
    state.manager.shutdown().await;

    if let Err(e) = outcome {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over the configured level unless the level was given on
/// the command line.
fn init_logging(config: &Config, level_from_cli: bool) {
    let env_filter = if level_from_cli {
        EnvFilter::new(&config.logging.level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
