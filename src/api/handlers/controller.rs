use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::api::middleware::AppError;
use crate::models::{Fetch, HintValue, Index};
use crate::services::{pull, ControllerId, ControllerRegistry, PullRequest, SharedController};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub registry: ControllerRegistry,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub sql: String,
    #[serde(default = "default_true")]
    pub fetch: bool,
    #[serde(default)]
    pub fetch_column_names: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainMode {
    #[default]
    Physical,
    Execution,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub sql: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub mode: ExplainMode,
}

#[derive(Debug, Deserialize)]
pub struct CostRequest {
    pub sql: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct HintRequest {
    pub key: String,
    pub value: HintValue,
}

#[derive(Debug, Deserialize)]
pub struct CreateIndexRequest {
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub index_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    pub table: Option<String>,
    pub index_name: Option<String>,
}

fn default_true() -> bool {
    true
}

fn require_sql(sql: &str) -> Result<&str, AppError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(AppError::Validation("SQL cannot be empty".to_string()));
    }
    Ok(sql)
}

/// Look a controller up by id, falling back to its registered name
async fn resolve(state: &AppState, key: &str) -> Result<SharedController, AppError> {
    if let Ok(id) = ControllerId::parse(key) {
        if let Ok(controller) = state.registry.get(id).await {
            return Ok(controller);
        }
    }
    state
        .registry
        .find_by_name(key)
        .await
        .map(|(_, controller)| controller)
        .ok_or_else(|| AppError::NotFound(format!("Controller {} not found", key)))
}

/// List registered controllers
pub async fn list_controllers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let controllers = state.registry.list().await;
    Json(serde_json::json!({
        "controllers": controllers
    }))
}

/// Open the controller's connection unless it is already live
pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;
    controller.connect_if_loss().await?;

    Ok(Json(serde_json::json!({
        "session": controller.session_info(),
    })))
}

/// Close a controller and drop it from the registry
pub async fn remove_controller(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = match ControllerId::parse(&id) {
        Ok(id) => id,
        Err(_) => state
            .registry
            .find_by_name(&id)
            .await
            .map(|(id, _)| id)
            .ok_or_else(|| AppError::NotFound(format!("Controller {} not found", id)))?,
    };

    if state.registry.remove(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Controller {} not found", id)))
    }
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sql = require_sql(&payload.sql)?;
    tracing::info!("Executing statement on controller {}", id);

    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;
    let fetch = Fetch::from_flags(payload.fetch, payload.fetch_column_names);
    let result = controller.execute(sql, fetch).await?;

    Ok(Json(serde_json::json!({
        "rows": result.map(|r| r.to_sequence()),
        "execution": controller.last_execution(),
    })))
}

pub async fn explain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExplainRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sql = require_sql(&payload.sql)?;

    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;
    let plan = match payload.mode {
        ExplainMode::Physical => controller.explain_physical_plan(sql, &payload.comment).await?,
        ExplainMode::Execution => controller.explain_execution_plan(sql, &payload.comment).await?,
    };

    Ok(Json(serde_json::json!({ "plan": plan })))
}

pub async fn estimated_cost(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CostRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sql = require_sql(&payload.sql)?;

    let controller = resolve(&state, &id).await?;
    let cost = controller
        .lock()
        .await
        .get_estimated_cost(sql, &payload.comment)
        .await?;

    Ok(Json(serde_json::json!({ "cost": cost })))
}

pub async fn set_hint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<HintRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("Setting {} = {} on controller {}", payload.key, payload.value, id);

    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;
    controller.set_hint(&payload.key, payload.value).await?;

    Ok(Json(serde_json::json!({
        "hints": controller.session_info().hints,
    })))
}

pub async fn reset_hints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let controller = resolve(&state, &id).await?;
    controller.lock().await.reset_hints().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateIndexRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if payload.columns.is_empty() {
        return Err(AppError::Validation("An index needs at least one column".to_string()));
    }
    let index = match payload.index_name {
        Some(name) => Index::new(payload.table, payload.columns, name),
        None => Index::with_default_name(payload.table, payload.columns),
    };

    let controller = resolve(&state, &id).await?;
    controller.lock().await.create_index(&index).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "index": index })),
    ))
}

/// Drop one index when `index_name` is given, every secondary index otherwise
pub async fn drop_indexes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<IndexQuery>,
) -> Result<StatusCode, AppError> {
    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;

    match params.index_name {
        Some(name) => {
            let index = Index::new(params.table.unwrap_or_default(), Vec::<String>::new(), name);
            controller.drop_index(&index).await?;
        }
        None => controller.drop_all_indexes().await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_indexes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<IndexQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let table = params
        .table
        .ok_or_else(|| AppError::Validation("table is required".to_string()))?;

    let controller = resolve(&state, &id).await?;
    let indexes = controller.lock().await.get_existing_indexes(&table).await?;

    Ok(Json(serde_json::json!({ "indexes": indexes })))
}

/// Bytes used by one index, one table's indexes, or every index
pub async fn index_size(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<IndexQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;

    let bytes = match (params.table, params.index_name) {
        (table, Some(name)) => {
            let index = Index::new(table.unwrap_or_default(), Vec::<String>::new(), name);
            controller.get_index_byte(&index).await?
        }
        (Some(table), None) => controller.get_table_indexes_byte(&table).await?,
        (None, None) => controller.get_all_indexes_byte().await?,
    };

    Ok(Json(serde_json::json!({ "bytes": bytes })))
}

pub async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let controller = resolve(&state, &id).await?;
    let tables = controller.lock().await.get_all_table_names().await?;
    Ok(Json(serde_json::json!({ "tables": tables })))
}

pub async fn table_row_count(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let controller = resolve(&state, &id).await?;
    let rows = controller.lock().await.get_table_row_count(&table).await?;
    Ok(Json(serde_json::json!({ "table": table, "rows": rows })))
}

/// Collect the requested data products for one statement
pub async fn pull_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<PullRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_sql(&payload.sql)?;
    if payload.products.is_empty() {
        return Err(AppError::Validation("At least one data product is required".to_string()));
    }

    let controller = resolve(&state, &id).await?;
    let mut controller = controller.lock().await;
    let response = pull(&mut **controller, &payload).await?;

    Ok(Json(serde_json::json!({ "pull": response })))
}
