use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::{Value, json};

use super::{resolve_app, resolve_deployment};
use crate::access::require_permission;
use crate::auth::RequireAccount;
use crate::keys::{generate_deployment_key, generate_id};
use crate::server::AppState;
use crate::server::dto::{CreateDeploymentRequest, UpdateDeploymentRequest};
use crate::server::response::ApiResult;
use crate::server::validation::validate_deployment_name;
use crate::store::Store;
use crate::types::{Deployment, Permission};

fn deployment_payload(store: &dyn Store, deployment: &Deployment) -> ApiResult<Value> {
    let package = store.latest_package(&deployment.id)?;
    Ok(json!({
        "name": deployment.name,
        "key": deployment.key,
        "createdTime": deployment.created_time,
        "package": package,
    }))
}

pub async fn list_deployments(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;

    let deployments = store.list_deployments(&ctx.app.id)?;
    let mut payloads = Vec::with_capacity(deployments.len());
    for deployment in &deployments {
        payloads.push(deployment_payload(store, deployment)?);
    }

    Ok(Json(json!({ "deployments": payloads })))
}

pub async fn create_deployment(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
    Json(req): Json<CreateDeploymentRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_deployment_name(&req.name)?;

    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;

    let deployment = Deployment {
        id: generate_id(),
        app_id: ctx.app.id,
        name: req.name,
        key: req.key.unwrap_or_else(generate_deployment_key),
        created_time: Utc::now(),
    };
    store.add_deployment(&deployment)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "deployment": deployment_payload(store, &deployment)? })),
    ))
}

pub async fn get_deployment(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    Ok(Json(
        json!({ "deployment": deployment_payload(store, &deployment)? }),
    ))
}

pub async fn update_deployment(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
    Json(req): Json<UpdateDeploymentRequest>,
) -> ApiResult<Json<Value>> {
    validate_deployment_name(&req.name)?;

    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    store.rename_deployment(&deployment.id, &req.name)?;
    let renamed = Deployment {
        name: req.name,
        ..deployment
    };

    Ok(Json(
        json!({ "deployment": deployment_payload(store, &renamed)? }),
    ))
}

pub async fn delete_deployment(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    store.remove_deployment(&deployment.id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deployment_metrics(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    let metrics = state.metrics.metrics(&deployment.key)?;
    Ok(Json(json!({ "metrics": metrics })))
}

pub async fn deployment_history(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    let history = store.package_history(&deployment.id)?;
    Ok(Json(json!({ "history": history })))
}

pub async fn clear_deployment_history(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    state.releases.clear_history(&deployment)?;
    Ok(StatusCode::NO_CONTENT)
}
