//! Route handlers for the scheduling and agent endpoints

use std::collections::BTreeSet;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::agents::AgentRecord;
use crate::logging::ExecutionLogSink;
use crate::{ExecutionLog, InstanceId, RemoteJobSpec};

/// Default number of logs returned by `GET /api/v1/logs`
const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct InstanceQuery {
    pub id: InstanceId,
}

#[derive(Debug, Deserialize)]
pub struct ExternalExecutionQuery {
    pub id: InstanceId,
    /// RFC 3339 timestamp stamped onto every produced measurement
    pub date: String,
    #[serde(rename = "dateField")]
    pub date_field: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/v1/scheduling/start?id=
///
/// Schedules the instance unless it is already scheduled.
pub async fn start_scheduling(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> ApiResult<Json<bool>> {
    let instance = state
        .instances
        .find(query.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no measure instance {}", query.id)))?;

    if state.scheduler.is_scheduled(query.id).await {
        return Ok(Json(false));
    }

    Ok(Json(state.scheduler.schedule_measure(&instance).await))
}

/// GET /api/v1/scheduling/stop?id=
pub async fn stop_scheduling(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> Json<bool> {
    if !state.scheduler.is_scheduled(query.id).await {
        return Json(false);
    }

    Json(state.scheduler.remove_measure(query.id).await)
}

/// GET /api/v1/scheduling/status?id=
pub async fn scheduling_status(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> Json<bool> {
    Json(state.scheduler.is_scheduled(query.id).await)
}

/// GET /api/v1/scheduling/execute?id=
///
/// Runs one persisting cycle immediately and records its log.
pub async fn execute_measure(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> ApiResult<Json<ExecutionLog>> {
    let log = state
        .executor
        .execute_by_id(query.id)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    state.logs.record(log.clone()).await;
    Ok(Json(log))
}

/// GET /api/v1/scheduling/test?id=
///
/// Dry run: nothing is persisted and the log is not recorded.
pub async fn test_measure(
    State(state): State<ApiState>,
    Query(query): Query<InstanceQuery>,
) -> ApiResult<Json<ExecutionLog>> {
    let log = state
        .executor
        .test_measure(query.id)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    Ok(Json(log))
}

/// GET /api/v1/scheduling/external?id=&date=&dateField=
///
/// Back-dated execution: the given timestamp is stamped into `dateField`
/// on every produced measurement.
pub async fn external_execution(
    State(state): State<ApiState>,
    Query(query): Query<ExternalExecutionQuery>,
) -> ApiResult<Json<ExecutionLog>> {
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&query.date)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid date '{}': {e}", query.date)))?
        .with_timezone(&Utc);

    let log = state
        .executor
        .execute_external(query.id, timestamp, &query.date_field)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    state.logs.record(log.clone()).await;
    Ok(Json(log))
}

/// GET /api/v1/agents
pub async fn list_agents(State(state): State<ApiState>) -> Json<Vec<AgentRecord>> {
    Json(state.registry.agents().await)
}

/// POST /api/v1/agents/:label/register
///
/// Body: JSON array of measure names the agent can execute.
pub async fn register_agent(
    State(state): State<ApiState>,
    Path(label): Path<String>,
    Json(measures): Json<BTreeSet<String>>,
) -> Json<bool> {
    state.registry.register_agent(&label, measures).await;
    Json(true)
}

/// POST /api/v1/agents/:label/lifesign
pub async fn register_life_sign(
    State(state): State<ApiState>,
    Path(label): Path<String>,
) -> Json<bool> {
    Json(state.registry.register_life_sign(&label).await)
}

/// GET /api/v1/agents/:label/assignments
///
/// The work currently assigned to the agent, properties unmasked.
pub async fn agent_assignments(
    State(state): State<ApiState>,
    Path(label): Path<String>,
) -> Json<Vec<RemoteJobSpec>> {
    Json(state.scheduler.assignments(&label).await)
}

/// GET /api/v1/logs?limit=
pub async fn recent_logs(
    State(state): State<ApiState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<ExecutionLog>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.logs.recent(limit).await)
}
