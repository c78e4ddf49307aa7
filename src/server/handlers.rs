use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::chunker::UnitKind;
use crate::cycle::{CycleOptions, StepKind};
use crate::error::{McpError, McpResult};
use crate::graph::NewThought;
use crate::memory::{MemoryFilter, NewCodePattern, NewDecision, NewMemory};
use crate::session::{NewSession, Session, SessionExport, SessionType};

/// Route tool calls to the session manager
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Sessions
        "create_session" => handle_create_session(state, arguments).await,
        "switch_session" => handle_switch_session(state, arguments).await,
        "load_session" => handle_load_session(state, arguments).await,
        "list_sessions" => handle_list_sessions(state).await,
        "delete_session" => handle_delete_session(state, arguments).await,
        "get_active_session" => handle_get_active_session(state).await,
        "export_session" => handle_export_session(state, arguments).await,
        "import_session" => handle_import_session(state, arguments).await,
        "analyze_session" => handle_analyze_session(state, arguments).await,
        // Reasoning graph
        "add_thought" => handle_add_thought(state, arguments).await,
        "revise_thought" => handle_revise_thought(state, arguments).await,
        "create_branch" => handle_create_branch(state, arguments).await,
        "merge_branch" => handle_merge_branch(state, arguments).await,
        "abandon_branch" => handle_abandon_branch(state, arguments).await,
        // Memory store
        "store_memory" => handle_store_memory(state, arguments).await,
        "revise_memory" => handle_revise_memory(state, arguments).await,
        "query_memories" => handle_query_memories(state, arguments).await,
        "create_collection" => handle_create_collection(state, arguments).await,
        "merge_collection" => handle_merge_collection(state, arguments).await,
        "add_to_collection" => handle_add_to_collection(state, arguments).await,
        "record_decision" => handle_record_decision(state, arguments).await,
        "query_decisions" => handle_query_decisions(state, arguments).await,
        // Context and automation
        "get_context_chunk" => handle_get_context_chunk(state, arguments).await,
        "run_auto_cycle" => handle_run_auto_cycle(state, arguments).await,
        "suggest_packages" => handle_suggest_packages(state, arguments).await,
        "explore_packages" => handle_explore_packages(state, arguments).await,
        "detect_code_reinvention" => handle_detect_code_reinvention(state, arguments).await,
        "prevent_reinvention_check" => handle_prevent_reinvention_check(state, arguments).await,
        "store_code_pattern" => handle_store_code_pattern(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Parameter types
// ============================================================================

/// Arguments that only name a session; `None` means the active one.
#[derive(Debug, Default, Deserialize)]
struct SessionParams {
    session_id: Option<String>,
}

/// Arguments that must name a session.
#[derive(Debug, Deserialize)]
struct RequiredSessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateSessionParams {
    problem_statement: String,
    #[serde(default)]
    success_criteria: String,
    #[serde(default)]
    constraints: String,
    session_type: Option<String>,
    codebase_context: Option<String>,
    package_exploration_required: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ImportSessionParams {
    export: SessionExport,
    #[serde(default)]
    overwrite: bool,
}

#[derive(Debug, Deserialize)]
struct AddThoughtParams {
    session_id: Option<String>,
    content: String,
    confidence: f64,
    #[serde(default)]
    dependencies: Vec<String>,
    branch_id: Option<String>,
    #[serde(default)]
    suggested_packages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReviseThoughtParams {
    session_id: Option<String>,
    thought_id: String,
    content: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CreateBranchParams {
    session_id: Option<String>,
    name: String,
    from_thought: String,
    #[serde(default)]
    purpose: String,
}

#[derive(Debug, Deserialize)]
struct MergeBranchParams {
    session_id: Option<String>,
    branch_id: String,
    target_thought: String,
}

#[derive(Debug, Deserialize)]
struct BranchParams {
    session_id: Option<String>,
    branch_id: String,
}

#[derive(Debug, Deserialize)]
struct StoreMemoryParams {
    session_id: Option<String>,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_importance")]
    importance: f64,
    confidence: Option<f64>,
    code_snippet: Option<String>,
    language: Option<String>,
    pattern: Option<String>,
    collection_id: Option<String>,
}

fn default_importance() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct ReviseMemoryParams {
    session_id: Option<String>,
    memory_id: String,
    content: Option<String>,
    importance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct QueryMemoriesParams {
    session_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    content_contains: Option<String>,
    min_importance: Option<f64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CreateCollectionParams {
    session_id: Option<String>,
    name: String,
    #[serde(default)]
    purpose: String,
    memory_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeCollectionParams {
    session_id: Option<String>,
    target_collection: String,
    source_collection: String,
}

#[derive(Debug, Deserialize)]
struct AddToCollectionParams {
    session_id: Option<String>,
    collection_id: String,
    memory_id: String,
}

#[derive(Debug, Deserialize)]
struct RecordDecisionParams {
    session_id: Option<String>,
    title: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    chosen_option: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    consequences: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryDecisionsParams {
    session_id: Option<String>,
    pattern: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextChunkParams {
    session_id: Option<String>,
    budget: Option<usize>,
    #[serde(default)]
    required_kinds: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AutoCycleParams {
    session_id: Option<String>,
    #[serde(default)]
    skip_steps: Vec<String>,
    pass_threshold: Option<f64>,
    confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SuggestPackagesParams {
    query: String,
}

#[derive(Debug, Deserialize)]
struct ExplorePackagesParams {
    session_id: Option<String>,
    task: String,
}

#[derive(Debug, Deserialize)]
struct ReinventionParams {
    session_id: Option<String>,
    proposal: String,
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StoreCodePatternParams {
    session_id: Option<String>,
    pattern_type: String,
    code_snippet: String,
    #[serde(default)]
    description: String,
    language: Option<String>,
    file_path: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_importance")]
    importance: f64,
}

// ============================================================================
// Session handlers
// ============================================================================

async fn handle_create_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    const TOOL: &str = "create_session";
    let params: CreateSessionParams = parse_arguments(TOOL, arguments)?;

    let mut new = NewSession::new(params.problem_statement)
        .with_success_criteria(params.success_criteria)
        .with_constraints(params.constraints);
    if let Some(raw) = params.session_type {
        new = new.with_type(parse_value::<SessionType>(TOOL, "session_type", &raw)?);
    }
    if let Some(context) = params.codebase_context {
        new = new.with_codebase_context(context);
    }
    if let Some(required) = params.package_exploration_required {
        new.package_exploration_required = required;
    }

    session_json(&state.manager.create_session(new).await?, true)
}

async fn handle_switch_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RequiredSessionParams = parse_arguments("switch_session", arguments)?;
    session_json(&state.manager.switch_session(&params.session_id).await?, true)
}

async fn handle_load_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RequiredSessionParams = parse_arguments("load_session", arguments)?;
    session_json(&state.manager.load_session(&params.session_id).await?, true)
}

async fn handle_list_sessions(state: &SharedState) -> McpResult<Value> {
    let sessions = state.manager.list_sessions().await?;
    Ok(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

async fn handle_delete_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RequiredSessionParams = parse_arguments("delete_session", arguments)?;
    state.manager.delete_session(&params.session_id).await?;
    Ok(json!({
        "deleted": true,
        "session_id": params.session_id,
    }))
}

async fn handle_get_active_session(state: &SharedState) -> McpResult<Value> {
    let snapshot = state.manager.active_session().await?;
    Ok(json!({
        "session": session_json(&snapshot.session, true)?,
        "thought_count": snapshot.graph.len(),
        "branch_count": snapshot.graph.branches().count(),
        "memory_count": snapshot.memory.memory_count(),
        "decision_count": snapshot.memory.decisions().len(),
    }))
}

async fn handle_export_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: SessionParams = parse_arguments("export_session", arguments)?;
    let export = state
        .manager
        .export_session(params.session_id.as_deref())
        .await?;
    let active = state.manager.active_session_id().await.as_deref() == Some(export.session.id.as_str());

    let mut value = to_json(&export)?;
    value["session"] = session_json(&export.session, active)?;
    Ok(value)
}

async fn handle_import_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ImportSessionParams = parse_arguments("import_session", arguments)?;
    let session = state
        .manager
        .import_session(params.export, params.overwrite)
        .await?;
    session_json(&session, false)
}

async fn handle_analyze_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("analyze_session", arguments, |p: SessionParams| async move {
        state.manager.analyze_session(p.session_id.as_deref()).await
    })
    .await
}

// ============================================================================
// Reasoning graph handlers
// ============================================================================

async fn handle_add_thought(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("add_thought", arguments, |p: AddThoughtParams| async move {
        let mut new = NewThought::new(p.content, p.confidence)
            .with_dependencies(p.dependencies)
            .with_suggested_packages(p.suggested_packages);
        if let Some(branch_id) = p.branch_id {
            new = new.on_branch(branch_id);
        }
        state.manager.add_thought(p.session_id.as_deref(), new).await
    })
    .await
}

async fn handle_revise_thought(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("revise_thought", arguments, |p: ReviseThoughtParams| async move {
        state
            .manager
            .revise_thought(p.session_id.as_deref(), &p.thought_id, p.content, p.confidence)
            .await
    })
    .await
}

async fn handle_create_branch(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("create_branch", arguments, |p: CreateBranchParams| async move {
        state
            .manager
            .create_branch(p.session_id.as_deref(), &p.name, &p.from_thought, &p.purpose)
            .await
    })
    .await
}

async fn handle_merge_branch(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("merge_branch", arguments, |p: MergeBranchParams| async move {
        state
            .manager
            .merge_branch(p.session_id.as_deref(), &p.branch_id, &p.target_thought)
            .await
    })
    .await
}

async fn handle_abandon_branch(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("abandon_branch", arguments, |p: BranchParams| async move {
        state
            .manager
            .abandon_branch(p.session_id.as_deref(), &p.branch_id)
            .await
    })
    .await
}

// ============================================================================
// Memory store handlers
// ============================================================================

async fn handle_store_memory(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("store_memory", arguments, |p: StoreMemoryParams| async move {
        let new = NewMemory {
            content: p.content,
            tags: p.tags,
            importance: p.importance,
            confidence: p.confidence,
            code_snippet: p.code_snippet,
            language: p.language,
            pattern: p.pattern,
            collection_id: p.collection_id,
        };
        state.manager.store_memory(p.session_id.as_deref(), new).await
    })
    .await
}

async fn handle_revise_memory(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("revise_memory", arguments, |p: ReviseMemoryParams| async move {
        state
            .manager
            .revise_memory(p.session_id.as_deref(), &p.memory_id, p.content, p.importance)
            .await
    })
    .await
}

async fn handle_query_memories(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: QueryMemoriesParams = parse_arguments("query_memories", arguments)?;
    let filter = MemoryFilter {
        tags: params.tags,
        content_contains: params.content_contains,
        min_importance: params.min_importance,
    };

    let memories = state
        .manager
        .query_memories(params.session_id.as_deref(), filter, params.limit)
        .await?;

    Ok(json!({
        "count": memories.len(),
        "memories": memories,
    }))
}

async fn handle_create_collection(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler("create_collection", arguments, |p: CreateCollectionParams| async move {
        state
            .manager
            .create_collection(
                p.session_id.as_deref(),
                &p.name,
                &p.purpose,
                p.memory_id.as_deref(),
            )
            .await
    })
    .await
}

async fn handle_merge_collection(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("merge_collection", arguments, |p: MergeCollectionParams| async move {
        state
            .manager
            .merge_collection(
                p.session_id.as_deref(),
                &p.target_collection,
                &p.source_collection,
            )
            .await
    })
    .await
}

async fn handle_add_to_collection(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler("add_to_collection", arguments, |p: AddToCollectionParams| async move {
        state
            .manager
            .add_to_collection(p.session_id.as_deref(), &p.collection_id, &p.memory_id)
            .await
    })
    .await
}

async fn handle_record_decision(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("record_decision", arguments, |p: RecordDecisionParams| async move {
        let new = NewDecision {
            title: p.title,
            context: p.context,
            options: p.options,
            chosen_option: p.chosen_option,
            rationale: p.rationale,
            consequences: p.consequences,
            dependencies: p.dependencies,
        };
        state.manager.record_decision(p.session_id.as_deref(), new).await
    })
    .await
}

async fn handle_query_decisions(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: QueryDecisionsParams = parse_arguments("query_decisions", arguments)?;
    let matches = state
        .manager
        .query_decisions(
            params.session_id.as_deref(),
            params.pattern.as_deref(),
            &params.tags,
            params.threshold,
        )
        .await?;

    Ok(json!({
        "count": matches.len(),
        "decisions": matches,
    }))
}

// ============================================================================
// Context and automation handlers
// ============================================================================

async fn handle_get_context_chunk(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    const TOOL: &str = "get_context_chunk";
    let params: ContextChunkParams = parse_arguments(TOOL, arguments)?;
    let required_kinds = params
        .required_kinds
        .iter()
        .map(|raw| parse_value::<UnitKind>(TOOL, "required_kinds", raw))
        .collect::<McpResult<Vec<_>>>()?;

    let selection = state
        .manager
        .context_chunk(params.session_id.as_deref(), params.budget, required_kinds)
        .await?;

    Ok(json!({
        "summary": selection.summary(),
        "budget_exceeded": selection.budget_exceeded,
        "entries": selection.entries,
    }))
}

async fn handle_run_auto_cycle(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    const TOOL: &str = "run_auto_cycle";
    let params: AutoCycleParams = parse_arguments(TOOL, arguments)?;
    let options = CycleOptions {
        skip_steps: params
            .skip_steps
            .iter()
            .map(|raw| parse_value::<StepKind>(TOOL, "skip_steps", raw))
            .collect::<McpResult<Vec<_>>>()?,
        pass_threshold: params.pass_threshold,
        confidence_threshold: params.confidence_threshold,
    };

    to_json(
        state
            .manager
            .run_auto_cycle(params.session_id.as_deref(), &options)
            .await?,
    )
}

async fn handle_suggest_packages(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: SuggestPackagesParams = parse_arguments("suggest_packages", arguments)?;
    let suggestions = state.manager.suggest_packages(&params.query).await?;
    Ok(json!({ "packages": suggestions }))
}

async fn handle_explore_packages(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ExplorePackagesParams = parse_arguments("explore_packages", arguments)?;
    let found = state
        .manager
        .explore_packages(params.session_id.as_deref(), &params.task)
        .await?;
    Ok(json!({
        "task": params.task,
        "count": found.len(),
        "packages": found,
    }))
}

async fn handle_detect_code_reinvention(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler("detect_code_reinvention", arguments, |p: ReinventionParams| async move {
        state
            .manager
            .detect_reinvention(p.session_id.as_deref(), &p.proposal, p.threshold)
            .await
    })
    .await
}

async fn handle_prevent_reinvention_check(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler("prevent_reinvention_check", arguments, |p: ReinventionParams| async move {
        state
            .manager
            .check_reinvention(p.session_id.as_deref(), &p.proposal, p.threshold)
            .await
    })
    .await
}

async fn handle_store_code_pattern(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("store_code_pattern", arguments, |p: StoreCodePatternParams| async move {
        let new = NewCodePattern {
            pattern_type: p.pattern_type,
            code_snippet: p.code_snippet,
            description: p.description,
            language: p.language,
            file_path: p.file_path,
            tags: p.tags,
            importance: p.importance,
        };
        state.manager.store_code_pattern(p.session_id.as_deref(), new).await
    })
    .await
}

// ============================================================================
// Helper functions
// ============================================================================

/// Parse tool arguments. Missing arguments count as an empty object so tools
/// with only optional parameters can be called bare.
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    let args = arguments.unwrap_or_else(|| json!({}));
    serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
        tool_name: tool_name.to_string(),
        message: e.to_string(),
    })
}

/// Parse one string argument through `FromStr`.
fn parse_value<T>(tool_name: &str, field: &str, raw: &str) -> McpResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| McpError::InvalidParameters {
        tool_name: tool_name.to_string(),
        message: format!("{}: {}", field, e),
    })
}

fn to_json<R: Serialize>(result: R) -> McpResult<Value> {
    serde_json::to_value(result).map_err(McpError::Json)
}

/// A session header with its `active` flag.
fn session_json(session: &Session, active: bool) -> McpResult<Value> {
    let mut value = to_json(session)?;
    if let Value::Object(fields) = &mut value {
        fields.insert("active".to_string(), Value::Bool(active));
    }
    Ok(value)
}

/// Parse arguments, run one manager operation and serialize its result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    to_json(result)
}
