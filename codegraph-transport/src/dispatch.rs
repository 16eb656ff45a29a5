//! Maps each of spec §6's 13 tool names onto either a [`Task`] submitted
//! through the Conductor (mandatory delegation, spec §4.2) or a direct
//! engine read for `get_metrics`, which isn't "work" any more than the
//! teacher's `ping`/`tools_list` are (connection.rs dispatches those
//! outside the full run path too).

use codegraph_core::{EngineError, Task, TaskPayload, TaskPriority};

use crate::bootstrap::Runtime;

/// The fixed tool surface (spec §6's table), used both for dispatch and to
/// answer a `tools_list`-style introspection call if one is ever added.
pub const TOOL_NAMES: &[&str] = &[
    "index",
    "list_file_entities",
    "list_entity_relationships",
    "query",
    "get_metrics",
    "semantic_search",
    "find_similar_code",
    "analyze_code_impact",
    "detect_code_clones",
    "suggest_refactoring",
    "cross_language_search",
    "analyze_hotspots",
    "find_related_concepts",
];

fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, EngineError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::invalid(format!("missing `{key}` parameter")))
}

/// Dispatches one tool call by name. `params` is the JSON-RPC request's
/// `params` object verbatim; each arm validates its own required fields
/// before constructing a task (spec §7: "fail the call synchronously with a
/// structured error; no side effects").
pub async fn dispatch(runtime: &Runtime, method: &str, params: serde_json::Value) -> Result<serde_json::Value, EngineError> {
    match method {
        "index" => {
            let directory = require_str(&params, "directory")?;
            if !std::path::Path::new(directory).is_absolute() {
                return Err(EngineError::invalid("`directory` must be an absolute path"));
            }
            let incremental = params.get("incremental").and_then(|v| v.as_bool()).unwrap_or(false);
            let exclude_patterns: Vec<String> = params
                .get("excludePatterns")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            let task = Task::new(
                TaskPayload::Index {
                    directory: directory.to_string(),
                    incremental,
                    exclude_patterns,
                    batch: None,
                },
                TaskPriority::default(),
            );
            runtime.conductor.submit(task).await
        }

        "list_file_entities" => {
            require_str(&params, "filePath")?;
            query_task(runtime, "list_file_entities", params).await
        }

        "list_entity_relationships" => {
            if params.get("entityId").is_none() && params.get("entityName").is_none() {
                return Err(EngineError::invalid("missing `entityName` parameter"));
            }
            if let Some(depth) = params.get("depth").and_then(|v| v.as_u64()) {
                if depth > 5 {
                    return Err(EngineError::invalid("`depth` must be <= 5"));
                }
            }
            query_task(runtime, "list_entity_relationships", params).await
        }

        "query" => {
            let text = require_str(&params, "query")?.to_string();
            let limit = params.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
            let task = Task::new(TaskPayload::Query { query: text, limit, params }, TaskPriority::default());
            runtime.conductor.submit(task).await
        }

        "get_metrics" => get_metrics(runtime).await,

        "semantic_search" => {
            let text = require_str(&params, "query")?.to_string();
            let limit = params.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
            let task = Task::new(TaskPayload::Semantic { query: text, limit, params }, TaskPriority::default());
            let mut result = runtime.conductor.submit(task).await?;
            reshape_semantic_search(&mut result);
            Ok(result)
        }

        "find_similar_code" => {
            require_str(&params, "code")?;
            semantic_task(runtime, "find_similar_code", params).await
        }

        "analyze_code_impact" => {
            require_str(&params, "entityId")?;
            query_task(runtime, "analyze_code_impact", params).await
        }

        "detect_code_clones" => semantic_task(runtime, "detect_code_clones", params).await,

        "suggest_refactoring" => {
            let file_path = require_str(&params, "filePath")?.to_string();
            let code = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| EngineError::invalid(format!("cannot read `{file_path}`: {e}")))?;
            let mut params = params;
            if let Some(obj) = params.as_object_mut() {
                obj.insert("code".to_string(), serde_json::json!(code));
            }
            semantic_task(runtime, "suggest_refactoring", params).await
        }

        "cross_language_search" => {
            require_str(&params, "query")?;
            semantic_task(runtime, "cross_language_search", params).await
        }

        "analyze_hotspots" => query_task(runtime, "analyze_hotspots", params).await,

        "find_related_concepts" => {
            require_str(&params, "entityId")?;
            query_task(runtime, "find_related_concepts", params).await
        }

        other => Err(EngineError::invalid(format!("unknown tool: {other}"))),
    }
}

async fn query_task(runtime: &Runtime, op: &str, params: serde_json::Value) -> Result<serde_json::Value, EngineError> {
    let limit = params.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
    let task = Task::new(TaskPayload::Query { query: op.to_string(), limit, params }, TaskPriority::default());
    runtime.conductor.submit(task).await
}

async fn semantic_task(runtime: &Runtime, op: &str, params: serde_json::Value) -> Result<serde_json::Value, EngineError> {
    let limit = params.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
    let task = Task::new(TaskPayload::Semantic { query: op.to_string(), limit, params }, TaskPriority::default());
    runtime.conductor.submit(task).await
}

/// `semantic_search`'s result shape (`{results[], totalResults, searchTime}`)
/// differs from the semantic agent's generic `{hits[], degraded, ...}` used
/// by every other semantic op, so this tool alone reshapes the envelope
/// rather than adding a special case inside the agent's dispatch table.
fn reshape_semantic_search(result: &mut serde_json::Value) {
    let hits = result.get("hits").cloned().unwrap_or(serde_json::json!([]));
    let total = hits.as_array().map(|a| a.len()).unwrap_or(0);
    *result = serde_json::json!({
        "results": hits,
        "totalResults": total,
        "searchTime": 0,
    });
}

/// `get_metrics` (spec §6: `{vectorSearch, memory, queryAgent, semanticAgent}`)
/// reads the query engine's stats, the semantic engine's circuit state and
/// vector-store occupancy, and the process-wide metrics registry directly —
/// no Conductor round trip, since none of this is "work" for an agent to do.
async fn get_metrics(runtime: &Runtime) -> Result<serde_json::Value, EngineError> {
    let query_stats = runtime.query_engine.stats();
    let circuit_state = runtime.semantic_engine.circuit_state();
    let vector_stats = runtime.semantic_engine.vector_stats().await.ok();
    let snapshot = runtime.metrics.snapshot(query_stats, circuit_state, vector_stats).await;
    Ok(serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null))
}
