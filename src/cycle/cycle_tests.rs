//! Unit tests for the auto-cycle driver and rubric.

use super::*;
use crate::error::ThinkingError;
use crate::memory::{MemoryFilter, NewMemory};
use crate::session::{NewSession, SessionHandle, SessionState, SessionType};
use crate::storage::{SqliteStorage, Storage};
use mockall::mock;
use pretty_assertions::assert_eq;

mock! {
    pub Lookup {}

    #[async_trait]
    impl PackageLookup for Lookup {
        async fn suggest(&self, query: &str) -> ThinkingResult<Vec<PackageSuggestion>>;
    }
}

fn suggestion(name: &str, relevance_score: f64) -> PackageSuggestion {
    PackageSuggestion {
        name: name.to_string(),
        relevance_score,
    }
}

fn lookup_returning(suggestions: Vec<PackageSuggestion>) -> Arc<dyn PackageLookup> {
    let mut lookup = MockLookup::new();
    lookup
        .expect_suggest()
        .returning(move |_| Ok(suggestions.clone()));
    Arc::new(lookup)
}

fn unused_lookup() -> Arc<dyn PackageLookup> {
    let mut lookup = MockLookup::new();
    lookup.expect_suggest().never();
    Arc::new(lookup)
}

async fn storage() -> Arc<dyn Storage> {
    Arc::new(SqliteStorage::new_in_memory().await.unwrap())
}

fn handle(new: NewSession) -> SessionHandle {
    SessionHandle::new(SessionState::new(new.into_session()))
}

fn config() -> AutoCycleConfig {
    AutoCycleConfig::default()
}

fn no_skips() -> HashSet<StepKind> {
    HashSet::new()
}

struct Failing;

#[async_trait]
impl StepExecutor for Failing {
    async fn execute(&self, _ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        Err(ThinkingError::invalid_state("step exploded"))
    }
}

struct Echo(&'static str);

#[async_trait]
impl StepExecutor for Echo {
    async fn execute(&self, _ctx: &mut CycleContext<'_>) -> ThinkingResult<Value> {
        Ok(Value::String(self.0.to_string()))
    }
}

// ============================================================================
// StepKind
// ============================================================================

#[test]
fn test_step_kind_parse_spellings() {
    assert_eq!(
        "PackageDiscovery".parse::<StepKind>().unwrap(),
        StepKind::PackageDiscovery
    );
    assert_eq!(
        "memory_storage".parse::<StepKind>().unwrap(),
        StepKind::MemoryStorage
    );
    assert_eq!(
        "Architecture-Decision".parse::<StepKind>().unwrap(),
        StepKind::ArchitectureDecision
    );
    assert!("Completed".parse::<StepKind>().is_err());
}

#[test]
fn test_step_kind_serde_uses_canonical_names() {
    let json = serde_json::to_string(&StepKind::ThoughtGeneration).unwrap();
    assert_eq!(json, "\"ThoughtGeneration\"");
}

// ============================================================================
// Driver
// ============================================================================

#[tokio::test]
async fn test_failure_halts_remaining_steps() {
    let handle = handle(NewSession::new("p"));
    let writer = handle.try_write(storage().await).unwrap();
    let mut ctx = CycleContext::new(writer, unused_lookup(), config(), ChunkerConfig::default());

    let cycle = AutoCycle::new(vec![
        StepDescriptor::new(StepKind::PackageDiscovery, Echo("one")),
        StepDescriptor::new(StepKind::ThoughtGeneration, Failing),
        StepDescriptor::new(StepKind::MemoryStorage, Echo("never")),
    ]);
    let run = cycle.run(&mut ctx, &no_skips()).await;

    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].status, StepStatus::Success);
    assert_eq!(run.steps[0].output, Value::String("one".into()));
    assert_eq!(run.steps[1].status, StepStatus::Failed);
    assert!(run.steps[1].error.as_deref().unwrap().contains("step exploded"));
    assert_eq!(run.halted_at, Some(StepKind::ThoughtGeneration));
    assert!(!run.completed);
    assert_eq!(run.score, None);
    assert_eq!(run.passed, None);
}

#[tokio::test]
async fn test_mandatory_step_ignores_skip_request() {
    let handle = handle(NewSession::new("p"));
    let writer = handle.try_write(storage().await).unwrap();
    let mut ctx = CycleContext::new(writer, unused_lookup(), config(), ChunkerConfig::default());

    let cycle = AutoCycle::new(vec![
        StepDescriptor::new(StepKind::PackageDiscovery, Echo("a")),
        StepDescriptor::new(StepKind::Validation, Echo("b")).mandatory(),
    ]);
    let skip: HashSet<StepKind> = StepKind::ALL.into_iter().collect();
    let run = cycle.run(&mut ctx, &skip).await;

    let statuses: Vec<StepStatus> = run.steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Skipped, StepStatus::Success]);
    assert!(run.completed);
}

#[tokio::test]
async fn test_standard_cycle_for_coding_session() {
    let handle = handle(
        NewSession::new("Build a JSON API over a database")
            .with_success_criteria("endpoints documented and tested")
            .with_type(SessionType::Coding),
    );
    let lookup = lookup_returning(vec![
        suggestion("sqlx", 0.8),
        suggestion("serde_json", 0.5),
        suggestion("obscure", 0.2),
    ]);
    let writer = handle.try_write(storage().await).unwrap();
    let config = AutoCycleConfig {
        confidence_threshold: 0.65,
        ..config()
    };
    let mut ctx = CycleContext::new(writer, lookup, config, ChunkerConfig::default());

    let run = AutoCycle::standard().run(&mut ctx, &no_skips()).await;
    drop(ctx);

    assert_eq!(
        run.steps.iter().map(|s| s.step).collect::<Vec<_>>(),
        StepKind::ALL.to_vec()
    );
    assert!(run.steps.iter().all(|s| s.status == StepStatus::Success));
    assert!(run.completed);

    let state = handle.snapshot();
    let thoughts = state.graph.thoughts();
    assert_eq!(thoughts.len(), 9);
    let first = thoughts[0].id.clone();
    assert!(thoughts[0].content.starts_with("Problem analysis: Build a JSON API"));
    assert!(thoughts[1..].iter().all(|t| t.dependencies == vec![first.clone()]));
    assert!(thoughts
        .iter()
        .all(|t| t.suggested_packages == vec!["sqlx".to_string(), "serde_json".to_string()]));

    let stored: Vec<_> = state
        .memory
        .query_memories(MemoryFilter {
            tags: vec!["auto-cycle".into(), "thought".into()],
            ..Default::default()
        })
        .collect();
    assert_eq!(stored.len(), 9);
    assert!(stored
        .iter()
        .all(|m| m.pattern.as_deref() == Some(AUTO_MEMORY_PATTERN) && m.importance == 0.7));

    let decision = &state.memory.decisions()[0];
    assert_eq!(decision.title, AUTO_DECISION_TITLE);
    assert_eq!(decision.dependencies, vec!["sqlx", "serde_json"]);
    assert_eq!(
        state.session.discovered_packages,
        vec![suggestion("sqlx", 0.8), suggestion("serde_json", 0.5)]
    );

    // Coverage: "endpoints", "documented", "and", "tested" are all in the
    // success-criteria thought, so full marks everywhere.
    assert!((run.score.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(run.passed, Some(true));
    assert_eq!(run.advisory, None);
}

#[tokio::test]
async fn test_exploration_not_required_skips_lookup_but_succeeds() {
    let mut new = NewSession::new("Plan a trip");
    new.package_exploration_required = false;
    let handle = handle(new);
    let writer = handle.try_write(storage().await).unwrap();
    let mut ctx = CycleContext::new(writer, unused_lookup(), config(), ChunkerConfig::default());

    let cycle = AutoCycle::new(vec![StepDescriptor::new(
        StepKind::PackageDiscovery,
        PackageDiscoveryStep,
    )]);
    let run = cycle.run(&mut ctx, &no_skips()).await;

    assert_eq!(run.steps[0].status, StepStatus::Success);
    assert!(ctx.discovered().is_empty());
    drop(ctx);
    assert!(handle.snapshot().session.discovered_packages.is_empty());
}

#[tokio::test]
async fn test_memory_storage_uses_main_line_when_generation_skipped() {
    let handle = handle(NewSession::new("p"));
    let store = storage().await;
    {
        let mut writer = handle.try_write(store.clone()).unwrap();
        writer
            .apply(|state| {
                state
                    .graph
                    .add_thought(crate::graph::NewThought::new("existing", 0.4))
            })
            .await
            .unwrap();
    }

    let writer = handle.try_write(store).unwrap();
    let mut ctx = CycleContext::new(writer, unused_lookup(), config(), ChunkerConfig::default());
    let skip: HashSet<StepKind> = [
        StepKind::PackageDiscovery,
        StepKind::ThoughtGeneration,
        StepKind::ArchitectureDecision,
    ]
    .into_iter()
    .collect();
    let run = AutoCycle::standard().run(&mut ctx, &skip).await;
    drop(ctx);

    assert!(run.completed);
    let state = handle.snapshot();
    let memories: Vec<_> = state.memory.memories().collect();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].content, "Thought: existing");
    assert_eq!(memories[0].importance, 0.4);

    // No criteria, no decision, low confidence: only the memory points.
    assert_eq!(run.score, Some(0.2));
    assert_eq!(run.passed, Some(false));
    assert!(run.advisory.unwrap().contains("below the pass threshold"));
}

// ============================================================================
// Rubric
// ============================================================================

#[test]
fn test_rubric_of_empty_session_is_zero() {
    let state = SessionState::new(NewSession::new("p").with_success_criteria("fast").into_session());
    let report = evaluate(&state, &config(), &ChunkerConfig::default());

    assert_eq!(report.score, 0.0);
    assert!(!report.passed);
    assert_eq!(report.analysis.total_thoughts, 0);
}

#[test]
fn test_rubric_partial_coverage() {
    let mut state = SessionState::new(
        NewSession::new("p")
            .with_success_criteria("latency under budget")
            .into_session(),
    );
    state
        .memory
        .store_memory(NewMemory {
            content: "Measured LATENCY at 4ms".into(),
            importance: 0.5,
            ..Default::default()
        })
        .unwrap();

    let report = evaluate(&state, &config(), &ChunkerConfig::default());

    // "latency", "under", "budget": one of three found.
    assert!((report.breakdown.criteria_coverage - 1.0 / 3.0).abs() < 1e-9);
    assert!((report.score - (0.4 / 3.0 + 0.2)).abs() < 1e-9);
    assert_eq!(report.breakdown.decision, 0.0);
    assert_eq!(report.breakdown.confidence, 0.0);
}
