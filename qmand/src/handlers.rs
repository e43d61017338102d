//! `/remote-api/*` route handlers (§6 external interfaces).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use common::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use attribution_store::{ContainerAttribution, ImageAttribution, VolumeAttribution};
use quota_engine::DockerDevice;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/remote-api/ping", get(ping))
        .route("/remote-api/quotas", get(get_quotas))
        .route(
            "/remote-api/quotas/users/:uid",
            get(get_quotas_for_uid).put(put_quota_for_uid),
        )
        .route("/remote-api/quotas/users/by-name/:name", get(get_quotas_by_name))
        .route("/remote-api/docker/containers", get(list_containers))
        .route("/remote-api/docker/images", get(list_images))
        .route("/remote-api/docker/volumes", get(list_volumes))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_basic_auth,
        ))
        // unauthenticated scrape endpoint, consistent with a bare Prometheus exporter
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(msg: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "msg": msg })))
}

fn not_found(msg: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "msg": msg })))
}

fn engine_error(e: EngineError) -> ApiError {
    tracing::warn!(error = %e, "remote-api request failed");
    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "msg": e.to_string() })))
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_quotas(State(state): State<Arc<AppState>>) -> Result<Json<Vec<DockerDevice>>, ApiError> {
    let device = state
        .aggregator
        .collect_remote_quotas(&state.data_root, state.reserved_bytes)
        .await
        .map_err(engine_error)?;
    Ok(Json(vec![device]))
}

async fn get_quotas_for_uid(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<i64>,
) -> Result<Json<Vec<DockerDevice>>, ApiError> {
    let device = state
        .aggregator
        .collect_remote_quotas_for_uid(uid, &state.data_root, state.reserved_bytes)
        .await
        .map_err(engine_error)?;
    Ok(Json(device.into_iter().collect()))
}

async fn get_quotas_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<DockerDevice>>, ApiError> {
    let Some(uid) = common::resolve_uid(&name) else {
        return Err(not_found(&format!("user not found: {name}")));
    };
    let device = state
        .aggregator
        .collect_remote_quotas_for_uid(uid as i64, &state.data_root, state.reserved_bytes)
        .await
        .map_err(engine_error)?;
    Ok(Json(device.into_iter().collect()))
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SetUserQuotaBody {
    block_hard_limit: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    block_soft_limit: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    inode_hard_limit: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    inode_soft_limit: Option<i64>,
}

async fn put_quota_for_uid(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<i64>,
    Query(q): Query<DeviceQuery>,
    body: Option<Json<SetUserQuotaBody>>,
) -> Result<Json<DockerDevice>, ApiError> {
    let Some(device) = q.device else {
        return Err(bad_request("device query parameter required"));
    };
    if device != "docker" {
        return Err(bad_request(
            "device not recognized: only device=docker is supported",
        ));
    }

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let block_hard_limit = body.block_hard_limit.unwrap_or(0);

    state
        .store
        .set_user_quota_limit(uid, block_hard_limit)
        .await
        .map_err(|e| engine_error(EngineError::from(e)))?;
    state.cache.invalidate_containers().await;

    let device = state
        .aggregator
        .collect_remote_quotas_for_uid(uid, &state.data_root, state.reserved_bytes)
        .await
        .map_err(engine_error)?
        .unwrap_or_else(|| DockerDevice {
            name: "docker",
            mount_points: vec![state.data_root.clone()],
            fstype: "docker",
            opts: vec!["docker"],
            usage: quota_engine::DeviceUsage { used: 0, total: 0, free: 0, percent: 0.0 },
            user_quota_format: Some("docker"),
            user_quotas: Some(vec![quota_engine::UserQuotaView::docker(uid, 0, block_hard_limit)]),
            unattributed_usage: None,
        });

    Ok(Json(device))
}

#[derive(Serialize, Deserialize)]
struct CachedList<T> {
    items: Vec<T>,
}

async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ContainerAttribution>>, ApiError> {
    if let Some(cached) = state.cache.get_containers::<CachedList<ContainerAttribution>>().await {
        return Ok(Json(cached.items));
    }
    let items = state.store.list_container_attributions().await.map_err(|e| engine_error(EngineError::from(e)))?;
    state.cache.set_containers(&CachedList { items: items.clone() }).await;
    Ok(Json(items))
}

async fn list_images(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ImageAttribution>>, ApiError> {
    if let Some(cached) = state.cache.get_images::<CachedList<ImageAttribution>>().await {
        return Ok(Json(cached.items));
    }
    let items = state.store.list_image_attributions().await.map_err(|e| engine_error(EngineError::from(e)))?;
    state.cache.set_images(&CachedList { items: items.clone() }).await;
    Ok(Json(items))
}

async fn list_volumes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VolumeAttribution>>, ApiError> {
    let items = state.store.list_volume_attributions().await.map_err(|e| engine_error(EngineError::from(e)))?;
    Ok(Json(items))
}
