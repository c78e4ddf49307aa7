//! The five standard auto-cycle steps and the validation rubric.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CycleContext, StepExecutor};
use crate::config::{AutoCycleConfig, ChunkerConfig};
use crate::error::ThinkingResult;
use crate::graph::{NewThought, Thought};
use crate::memory::{tokenize, NewDecision, NewMemory};
use crate::session::{mean_confidence, SessionAnalysis, SessionState, SessionType};

/// Confidence of generated thoughts.
pub const GENERATED_CONFIDENCE: f64 = 0.7;
/// Pattern label of memories stored by the cycle.
pub const AUTO_MEMORY_PATTERN: &str = "auto_generated";
/// Title of the decision recorded by the cycle.
pub const AUTO_DECISION_TITLE: &str = "Auto-cycle decision framework";

const COVERAGE_WEIGHT: f64 = 0.4;
const DECISION_WEIGHT: f64 = 0.2;
const CONFIDENCE_WEIGHT: f64 = 0.2;
const MEMORY_WEIGHT: f64 = 0.2;

/// Shortest success-criteria word that counts as a term.
const MIN_TERM_LEN: usize = 3;

/// Queries the package lookup with the problem and codebase context.
pub struct PackageDiscoveryStep;

#[async_trait]
impl StepExecutor for PackageDiscoveryStep {
    async fn execute(&self, ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        let snapshot = ctx.writer.snapshot();
        let session = &snapshot.session;
        if !session.package_exploration_required {
            return Ok(json!({
                "discovered": [],
                "note": "package exploration not required for this session",
            }));
        }

        let query = match &session.codebase_context {
            Some(context) => format!("{} {}", session.problem_statement, context),
            None => session.problem_statement.clone(),
        };
        let suggestions = ctx.packages.suggest(&query).await?;
        let considered = suggestions.len();

        let threshold = ctx.config.package_relevance_threshold;
        ctx.discovered = suggestions
            .into_iter()
            .filter(|s| s.relevance_score > threshold)
            .collect();

        let found = ctx.discovered.clone();
        ctx.writer
            .apply(move |state| {
                state.session.record_packages(found);
                Ok(())
            })
            .await?;

        Ok(json!({
            "considered": considered,
            "discovered": ctx.discovered,
        }))
    }
}

/// Adds the template thoughts to the main line.
pub struct ThoughtGenerationStep;

fn thought_templates(state: &SessionState) -> Vec<String> {
    let session = &state.session;
    let mut templates = vec![
        format!("Problem analysis: {}", session.problem_statement),
        format!("Success criteria: {}", session.success_criteria),
        "First principles: What are the core requirements?".to_string(),
        "Constraints: What limitations do we have?".to_string(),
        "Implementation approach: How should we proceed?".to_string(),
    ];
    if session.session_type == SessionType::Coding {
        templates.extend([
            "Package discovery: What existing libraries can help?".to_string(),
            "Architecture considerations: How should components interact?".to_string(),
            "Testing strategy: How will we validate the solution?".to_string(),
            "Deployment considerations: How will this be deployed?".to_string(),
        ]);
    }
    templates
}

#[async_trait]
impl StepExecutor for ThoughtGenerationStep {
    async fn execute(&self, ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        let snapshot = ctx.writer.snapshot();
        let templates = thought_templates(&snapshot);
        let packages: Vec<String> = if snapshot.session.session_type == SessionType::Coding {
            ctx.discovered.iter().map(|p| p.name.clone()).collect()
        } else {
            Vec::new()
        };

        let ids = ctx
            .writer
            .apply(move |state| {
                let mut ids: Vec<String> = Vec::with_capacity(templates.len());
                for content in templates {
                    let mut new = NewThought::new(content, GENERATED_CONFIDENCE);
                    // Everything hangs off the problem analysis.
                    if let Some(first) = ids.first() {
                        new = new.with_dependencies(vec![first.clone()]);
                    }
                    if !packages.is_empty() {
                        new = new.with_suggested_packages(packages.clone());
                    }
                    ids.push(state.graph.add_thought(new)?);
                }
                Ok(ids)
            })
            .await?;

        ctx.generated_thoughts = Some(ids.clone());
        Ok(json!({
            "thoughts_generated": ids.len(),
            "thought_ids": ids,
        }))
    }
}

/// Stores one memory per thought.
pub struct MemoryStorageStep;

#[async_trait]
impl StepExecutor for MemoryStorageStep {
    async fn execute(&self, ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        let snapshot = ctx.writer.snapshot();
        let thoughts: Vec<Thought> = match &ctx.generated_thoughts {
            Some(ids) => ids
                .iter()
                .filter_map(|id| snapshot.graph.thought(id))
                .cloned()
                .collect(),
            None => snapshot.graph.main_line().cloned().collect(),
        };

        let ids = ctx
            .writer
            .apply(move |state| {
                thoughts
                    .iter()
                    .map(|thought| {
                        state.memory.store_memory(NewMemory {
                            content: format!("Thought: {}", thought.content),
                            tags: vec!["auto-cycle".to_string(), "thought".to_string()],
                            importance: thought.confidence,
                            confidence: Some(thought.confidence),
                            pattern: Some(AUTO_MEMORY_PATTERN.to_string()),
                            ..Default::default()
                        })
                    })
                    .collect::<ThinkingResult<Vec<String>>>()
            })
            .await?;

        Ok(json!({
            "memories_stored": ids.len(),
            "memory_ids": ids,
        }))
    }
}

/// Records the cycle's decision, depending on the discovered packages.
pub struct ArchitectureDecisionStep;

#[async_trait]
impl StepExecutor for ArchitectureDecisionStep {
    async fn execute(&self, ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        let snapshot = ctx.writer.snapshot();
        let dependencies: Vec<String> = ctx.discovered.iter().map(|p| p.name.clone()).collect();
        let options = if dependencies.is_empty() {
            vec!["Proceed without external packages".to_string()]
        } else {
            dependencies.iter().map(|d| format!("Integrate {}", d)).collect()
        };

        let new = NewDecision {
            title: AUTO_DECISION_TITLE.to_string(),
            context: format!("Problem: {}", snapshot.session.problem_statement),
            options,
            chosen_option: "Systematic approach with package integration".to_string(),
            rationale: "Automated decision making for consistency".to_string(),
            consequences: "Standardized approach, may need human review".to_string(),
            dependencies,
        };

        let id = ctx
            .writer
            .apply(move |state| state.memory.record_decision(new))
            .await?;

        Ok(json!({ "decision_id": id }))
    }
}

/// Points earned per rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricBreakdown {
    /// Fraction of success-criteria terms found in stored content.
    pub criteria_coverage: f64,
    /// Weighted coverage points.
    pub coverage: f64,
    /// Points for having a decision.
    pub decision: f64,
    /// Points for mean confidence at or above the threshold.
    pub confidence: f64,
    /// Points for having memories.
    pub memory: f64,
}

/// Completeness verdict of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Completeness score, 0.0-1.0.
    pub score: f64,
    /// Score needed to pass.
    pub threshold: f64,
    /// Whether the score reached the threshold.
    pub passed: bool,
    /// Per-criterion points.
    pub breakdown: RubricBreakdown,
    /// Session figures at validation time.
    pub analysis: SessionAnalysis,
}

/// Score a session against the completeness rubric.
pub fn evaluate(
    state: &SessionState,
    config: &AutoCycleConfig,
    chunker: &ChunkerConfig,
) -> ValidationReport {
    let criteria_coverage = criteria_coverage(state);
    let thoughts = state.graph.thoughts();

    let breakdown = RubricBreakdown {
        criteria_coverage,
        coverage: COVERAGE_WEIGHT * criteria_coverage,
        decision: if state.memory.decisions().is_empty() {
            0.0
        } else {
            DECISION_WEIGHT
        },
        confidence: match mean_confidence(&thoughts) {
            Some(mean) if mean >= config.confidence_threshold => CONFIDENCE_WEIGHT,
            _ => 0.0,
        },
        memory: if state.memory.memory_count() > 0 {
            MEMORY_WEIGHT
        } else {
            0.0
        },
    };

    let score = (breakdown.coverage + breakdown.decision + breakdown.confidence + breakdown.memory)
        .clamp(0.0, 1.0);

    ValidationReport {
        score,
        threshold: config.pass_threshold,
        passed: score >= config.pass_threshold,
        breakdown,
        analysis: state.analyze(chunker),
    }
}

/// Fraction of distinct success-criteria terms that occur in the session's
/// thoughts, memories or decisions. No terms means no coverage.
fn criteria_coverage(state: &SessionState) -> f64 {
    let terms: BTreeSet<String> = tokenize(&state.session.success_criteria)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }

    let corpus: Vec<String> = state
        .graph
        .thoughts()
        .iter()
        .map(|t| t.content.to_lowercase())
        .chain(state.memory.memories().map(|m| m.content.to_lowercase()))
        .chain(
            state
                .memory
                .decisions()
                .iter()
                .map(|d| d.text_block().to_lowercase()),
        )
        .collect();

    let found = terms
        .iter()
        .filter(|term| corpus.iter().any(|text| text.contains(term.as_str())))
        .count();
    found as f64 / terms.len() as f64
}

/// Scores the session. Advisory only; never fails.
pub struct ValidationStep;

#[async_trait]
impl StepExecutor for ValidationStep {
    async fn execute(&self, ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        let snapshot = ctx.writer.snapshot();
        let report = evaluate(&snapshot, &ctx.config, &ctx.chunker);
        let output = serde_json::to_value(&report).unwrap_or(Value::Null);
        ctx.validation = Some(report);
        Ok(output)
    }
}
