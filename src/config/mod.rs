use std::env;
use std::path::PathBuf;

use crate::cycle::StepKind;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Context chunker settings.
    pub chunker: ChunkerConfig,
    /// Auto-cycle settings.
    pub auto_cycle: AutoCycleConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path of the SQLite file.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Context chunker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkerConfig {
    /// Default token budget when a request names none.
    pub token_budget: usize,
    /// Fixed per-unit token overhead.
    pub unit_overhead: usize,
    /// Confidence at or above which a thought is high priority.
    pub high_confidence_threshold: f64,
}

/// Auto-cycle configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AutoCycleConfig {
    /// Completeness score needed to pass validation.
    pub pass_threshold: f64,
    /// Mean thought confidence that earns the confidence rubric weight.
    pub confidence_threshold: f64,
    /// Steps skipped by default.
    pub skip_steps: Vec<StepKind>,
    /// Suggestions at or below this relevance are discarded.
    pub package_relevance_threshold: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/thinking.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let chunker_defaults = ChunkerConfig::default();
        let chunker = ChunkerConfig {
            token_budget: env::var("CONTEXT_TOKEN_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(chunker_defaults.token_budget),
            unit_overhead: env::var("CONTEXT_UNIT_OVERHEAD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(chunker_defaults.unit_overhead),
            high_confidence_threshold: unit_interval_var(
                "HIGH_CONFIDENCE_THRESHOLD",
                chunker_defaults.high_confidence_threshold,
            )?,
        };

        let cycle_defaults = AutoCycleConfig::default();
        let auto_cycle = AutoCycleConfig {
            pass_threshold: unit_interval_var(
                "AUTO_CYCLE_PASS_THRESHOLD",
                cycle_defaults.pass_threshold,
            )?,
            confidence_threshold: unit_interval_var(
                "AUTO_CYCLE_CONFIDENCE_THRESHOLD",
                cycle_defaults.confidence_threshold,
            )?,
            skip_steps: match env::var("AUTO_CYCLE_SKIP_STEPS") {
                Ok(raw) => parse_skip_steps(&raw)?,
                Err(_) => cycle_defaults.skip_steps,
            },
            package_relevance_threshold: unit_interval_var(
                "PACKAGE_RELEVANCE_THRESHOLD",
                cycle_defaults.package_relevance_threshold,
            )?,
        };

        Ok(Config {
            database,
            logging,
            chunker,
            auto_cycle,
        })
    }
}

/// Parse a comma-separated list of step names, ignoring blanks.
pub fn parse_skip_steps(raw: &str) -> Result<Vec<StepKind>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<StepKind>().map_err(|e| AppError::Config {
                message: format!("AUTO_CYCLE_SKIP_STEPS: {}", e),
            })
        })
        .collect()
}

fn unit_interval_var(name: &str, default: f64) -> Result<f64, AppError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };

    let value: f64 = raw.trim().parse().map_err(|_| AppError::Config {
        message: format!("{} must be a number, got '{}'", name, raw),
    })?;

    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::Config {
            message: format!("{} must be between 0 and 1, got {}", name, value),
        });
    }

    Ok(value)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/thinking.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            token_budget: 25_000,
            unit_overhead: 4,
            high_confidence_threshold: 0.8,
        }
    }
}

impl Default for AutoCycleConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.6,
            confidence_threshold: 0.7,
            skip_steps: Vec::new(),
            package_relevance_threshold: 0.3,
        }
    }
}
