//! Automated thinking cycle.
//!
//! The cycle is an ordered list of [`StepDescriptor`]s driven by one loop in
//! [`AutoCycle::run`]. A step either succeeds, is skipped on request, or fails
//! and halts the rest. Completed steps are never rolled back.

mod steps;

#[cfg(test)]
#[path = "cycle_tests.rs"]
mod cycle_tests;

pub use steps::{
    evaluate, ArchitectureDecisionStep, MemoryStorageStep, PackageDiscoveryStep, RubricBreakdown,
    ThoughtGenerationStep, ValidationReport, ValidationStep, AUTO_DECISION_TITLE,
    AUTO_MEMORY_PATTERN, GENERATED_CONFIDENCE,
};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{AutoCycleConfig, ChunkerConfig};
use crate::error::{ThinkingError, ThinkingResult};
use crate::packages::{PackageLookup, PackageSuggestion};
use crate::session::SessionWriter;

/// One step of the auto-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Ask the package lookup for relevant packages.
    PackageDiscovery,
    /// Add template thoughts to the main line.
    ThoughtGeneration,
    /// Turn thoughts into memories.
    MemoryStorage,
    /// Record the cycle's decision.
    ArchitectureDecision,
    /// Score the session's completeness.
    Validation,
}

impl StepKind {
    /// All steps in execution order.
    pub const ALL: [StepKind; 5] = [
        StepKind::PackageDiscovery,
        StepKind::ThoughtGeneration,
        StepKind::MemoryStorage,
        StepKind::ArchitectureDecision,
        StepKind::Validation,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::PackageDiscovery => "PackageDiscovery",
            StepKind::ThoughtGeneration => "ThoughtGeneration",
            StepKind::MemoryStorage => "MemoryStorage",
            StepKind::ArchitectureDecision => "ArchitectureDecision",
            StepKind::Validation => "Validation",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    /// Accepts `PackageDiscovery`, `package_discovery`, `package-discovery`
    /// and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let squashed: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        StepKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_lowercase() == squashed)
            .ok_or_else(|| format!("Unknown step: {}", s))
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Ran to completion.
    Success,
    /// Skipped on request.
    Skipped,
    /// Failed; later steps did not run.
    Failed,
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Which step.
    pub step: StepKind,
    /// How it ended.
    pub status: StepStatus,
    /// Step output, `null` unless it succeeded.
    pub output: Value,
    /// Error message if it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

/// Report of one auto-cycle run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCycleRun {
    /// Run ID.
    pub run_id: String,
    /// Session the run worked on.
    pub session_id: String,
    /// Step results in execution order.
    pub steps: Vec<StepResult>,
    /// Whether every step succeeded or was skipped.
    pub completed: bool,
    /// Step that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<StepKind>,
    /// Completeness score, if validation ran.
    pub score: Option<f64>,
    /// Score needed to pass.
    pub pass_threshold: f64,
    /// Whether the score reached the threshold, if validation ran.
    pub passed: Option<bool>,
    /// Advisory raised when the score is below the threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// End timestamp.
    pub finished_at: DateTime<Utc>,
}

/// Per-run overrides of the configured auto-cycle settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOptions {
    /// Steps to skip in addition to the configured ones.
    pub skip_steps: Vec<StepKind>,
    /// Pass threshold for this run.
    pub pass_threshold: Option<f64>,
    /// Confidence threshold for this run.
    pub confidence_threshold: Option<f64>,
}

impl CycleOptions {
    /// Effective settings and skip set of a run.
    pub fn resolve(&self, base: &AutoCycleConfig) -> (AutoCycleConfig, HashSet<StepKind>) {
        let mut config = base.clone();
        if let Some(threshold) = self.pass_threshold {
            config.pass_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(threshold) = self.confidence_threshold {
            config.confidence_threshold = threshold.clamp(0.0, 1.0);
        }
        let skip = base
            .skip_steps
            .iter()
            .chain(&self.skip_steps)
            .copied()
            .collect();
        (config, skip)
    }
}

/// Executes one step against the cycle context.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step, returning its output.
    async fn execute(&self, ctx: &mut CycleContext<'_>) -> ThinkingResult<Value>;
}

/// A step as data: its kind, whether it may be skipped and its executor.
pub struct StepDescriptor {
    /// Step kind.
    pub kind: StepKind,
    /// Whether a skip request is honored.
    pub skippable: bool,
    /// Executor.
    pub executor: Box<dyn StepExecutor>,
}

impl StepDescriptor {
    /// A skippable step.
    pub fn new(kind: StepKind, executor: impl StepExecutor + 'static) -> Self {
        Self {
            kind,
            skippable: true,
            executor: Box::new(executor),
        }
    }

    /// Mark the step as mandatory.
    pub fn mandatory(mut self) -> Self {
        self.skippable = false;
        self
    }
}

/// State shared by the steps of one run.
///
/// Owns the session writer, so the session stays locked for the whole run.
pub struct CycleContext<'a> {
    writer: SessionWriter<'a>,
    packages: Arc<dyn PackageLookup>,
    config: AutoCycleConfig,
    chunker: ChunkerConfig,
    discovered: Vec<PackageSuggestion>,
    generated_thoughts: Option<Vec<String>>,
    validation: Option<ValidationReport>,
}

impl<'a> CycleContext<'a> {
    /// Create a context around a held session writer.
    pub fn new(
        writer: SessionWriter<'a>,
        packages: Arc<dyn PackageLookup>,
        config: AutoCycleConfig,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            writer,
            packages,
            config,
            chunker,
            discovered: Vec::new(),
            generated_thoughts: None,
            validation: None,
        }
    }

    /// The session writer.
    pub fn writer(&mut self) -> &mut SessionWriter<'a> {
        &mut self.writer
    }

    /// Auto-cycle settings.
    pub fn config(&self) -> &AutoCycleConfig {
        &self.config
    }

    /// Packages kept by discovery.
    pub fn discovered(&self) -> &[PackageSuggestion] {
        &self.discovered
    }

    /// Thoughts generated in this run, `None` if generation did not run.
    pub fn generated_thoughts(&self) -> Option<&[String]> {
        self.generated_thoughts.as_deref()
    }

    /// Validation report, once validation ran.
    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }
}

/// The step pipeline.
pub struct AutoCycle {
    steps: Vec<StepDescriptor>,
}

impl AutoCycle {
    /// A cycle over custom steps.
    pub fn new(steps: Vec<StepDescriptor>) -> Self {
        Self { steps }
    }

    /// The five standard steps in order.
    pub fn standard() -> Self {
        Self::new(vec![
            StepDescriptor::new(StepKind::PackageDiscovery, PackageDiscoveryStep),
            StepDescriptor::new(StepKind::ThoughtGeneration, ThoughtGenerationStep),
            StepDescriptor::new(StepKind::MemoryStorage, MemoryStorageStep),
            StepDescriptor::new(StepKind::ArchitectureDecision, ArchitectureDecisionStep),
            StepDescriptor::new(StepKind::Validation, ValidationStep),
        ])
    }

    /// Step kinds in execution order.
    pub fn kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.kind).collect()
    }

    /// Run every step in order.
    ///
    /// Step failures end up in the report; they are never returned as errors.
    pub async fn run(&self, ctx: &mut CycleContext<'_>, skip: &HashSet<StepKind>) -> AutoCycleRun {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let session_id = ctx.writer.session_id().to_string();
        let mut results = Vec::with_capacity(self.steps.len());
        let mut halted_at = None;

        info!(run_id = %run_id, session_id = %session_id, steps = self.steps.len(), "Starting auto-cycle");

        for descriptor in &self.steps {
            if descriptor.skippable && skip.contains(&descriptor.kind) {
                info!(run_id = %run_id, step = %descriptor.kind, "Step skipped");
                results.push(StepResult {
                    step: descriptor.kind,
                    status: StepStatus::Skipped,
                    output: Value::Null,
                    error: None,
                    duration_ms: 0,
                });
                continue;
            }

            let step_start = Instant::now();
            match descriptor.executor.execute(ctx).await {
                Ok(output) => {
                    let duration_ms = step_start.elapsed().as_millis() as u64;
                    info!(run_id = %run_id, step = %descriptor.kind, duration_ms, "Step completed");
                    results.push(StepResult {
                        step: descriptor.kind,
                        status: StepStatus::Success,
                        output,
                        error: None,
                        duration_ms,
                    });
                }
                Err(e) => {
                    let duration_ms = step_start.elapsed().as_millis() as u64;
                    warn!(run_id = %run_id, step = %descriptor.kind, error = %e, "Step failed, halting");
                    results.push(StepResult {
                        step: descriptor.kind,
                        status: StepStatus::Failed,
                        output: Value::Null,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    halted_at = Some(descriptor.kind);
                    break;
                }
            }
        }

        let pass_threshold = ctx.config.pass_threshold;
        let score = ctx.validation.as_ref().map(|v| v.score);
        let passed = score.map(|s| s >= pass_threshold);
        let advisory = score.filter(|s| *s < pass_threshold).map(|score| {
            ThinkingError::ValidationAdvisory {
                score,
                threshold: pass_threshold,
            }
            .to_string()
        });

        AutoCycleRun {
            run_id,
            session_id,
            steps: results,
            completed: halted_at.is_none(),
            halted_at,
            score,
            pass_threshold,
            passed,
            advisory,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
