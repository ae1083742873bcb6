/**
 * HTTP API - thin axum layer over the registry and the dispatchers
 *
 * ROUTES:
 * - GET  /health                       liveness
 * - GET  /api/targets                  list (with runtime overlay)
 * - POST /api/targets                  create
 * - PATCH/DELETE /api/targets/{name}   update / delete
 * - GET  /api/status?target&silent     ping + overlay update
 * - POST /api/wake|shutdown|reboot     {"target": ...}
 * - GET  /api/logs?limit               newest-first audit entries
 *
 * ERRORS: every failure is a WolError rendered as {"detail": ...}, including
 * malformed bodies and query strings.
 */

use crate::error::{WolError, WolResult};
use crate::logs::LogStore;
use crate::net::NetProbe;
use crate::power::{CommandReport, PowerAction, PowerDispatcher};
use crate::targets::{NewTarget, Registry, TargetPatch};
use crate::wol::{WakeDispatcher, WakeReport};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_LOG_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub logs: Arc<LogStore>,
    pub wake: Arc<WakeDispatcher>,
    pub power: Arc<PowerDispatcher>,
    pub probe: Arc<dyn NetProbe>,
}

#[derive(Debug, Deserialize)]
struct ActionBody {
    target: String,
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    target: String,
    #[serde(default)]
    silent: bool,
}

#[derive(Debug, Deserialize)]
struct LogParams {
    limit: Option<i64>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/targets", get(list_targets).post(create_target))
        .route("/api/targets/{name}", patch(update_target).delete(delete_target))
        .route("/api/status", get(status))
        .route("/api/wake", post(wake))
        .route("/api/shutdown", post(shutdown))
        .route("/api/reboot", post(reboot))
        .route("/api/logs", get(logs))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> WolResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| WolError::invalid(e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> WolResult<T> {
    params
        .map(|Query(inner)| inner)
        .map_err(|e| WolError::invalid(e.body_text()))
}

// GET /api/targets
async fn list_targets(State(app): State<AppState>) -> WolResult<Json<Value>> {
    let targets = app.registry.list()?;
    Ok(Json(json!({ "targets": targets })))
}

// POST /api/targets
async fn create_target(
    State(app): State<AppState>,
    payload: Result<Json<NewTarget>, JsonRejection>,
) -> WolResult<Json<Value>> {
    let new = body(payload)?;
    let target = app.registry.create(&new.name, &new.ip, new.mac.as_deref())?;
    Ok(Json(json!({ "target": target })))
}

// PATCH /api/targets/{name}
async fn update_target(
    State(app): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<TargetPatch>, JsonRejection>,
) -> WolResult<Json<Value>> {
    let patch = body(payload)?;
    let target = app.registry.update(&name, patch)?;
    Ok(Json(json!({ "target": target })))
}

// DELETE /api/targets/{name}
async fn delete_target(State(app): State<AppState>, Path(name): Path<String>) -> WolResult<Json<Value>> {
    app.registry.delete(&name)?;
    Ok(Json(json!({ "ok": true })))
}

// GET /api/status?target=...&silent=...
async fn status(
    State(app): State<AppState>,
    params: Result<Query<StatusParams>, QueryRejection>,
) -> WolResult<Json<Value>> {
    let params = query(params)?;
    let target = app.registry.get_or_fail(&params.target)?;
    let online = app.probe.ping(&target.ip).await;
    app.registry.record_status(&target.name, online, Some(target.ip.as_str())).await;
    if !params.silent {
        app.logs.append(json!({
            "evt": "status",
            "target": params.target,
            "online": online,
        }))?;
    }
    Ok(Json(json!({ "target": target.name, "online": online })))
}

// POST /api/wake
async fn wake(
    State(app): State<AppState>,
    payload: Result<Json<ActionBody>, JsonRejection>,
) -> WolResult<Json<WakeReport>> {
    let action = body(payload)?;
    Ok(Json(app.wake.wake(&action.target).await?))
}

// POST /api/shutdown
async fn shutdown(
    State(app): State<AppState>,
    payload: Result<Json<ActionBody>, JsonRejection>,
) -> WolResult<Json<CommandReport>> {
    let action = body(payload)?;
    Ok(Json(app.power.execute(&action.target, PowerAction::Shutdown).await?))
}

// POST /api/reboot
async fn reboot(
    State(app): State<AppState>,
    payload: Result<Json<ActionBody>, JsonRejection>,
) -> WolResult<Json<CommandReport>> {
    let action = body(payload)?;
    Ok(Json(app.power.execute(&action.target, PowerAction::Reboot).await?))
}

// GET /api/logs?limit=...
async fn logs(
    State(app): State<AppState>,
    params: Result<Query<LogParams>, QueryRejection>,
) -> WolResult<Json<Value>> {
    let limit = query(params)?.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let entries = app.logs.read(limit)?;
    Ok(Json(json!({ "logs": entries })))
}
