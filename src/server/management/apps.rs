use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use super::{app_payload, resolve_app};
use crate::access::require_permission;
use crate::auth::RequireAccount;
use crate::keys::{generate_deployment_key, generate_id};
use crate::server::AppState;
use crate::server::dto::{CreateAppRequest, UpdateAppRequest};
use crate::server::response::{ApiError, ApiResult};
use crate::server::validation::{validate_app_name, validate_deployment_name};
use crate::store::Store;
use crate::types::{App, Deployment, Permission};

/// Deployments every new app starts with unless the request names its own.
const DEFAULT_DEPLOYMENTS: [&str; 2] = ["Production", "Staging"];

pub async fn list_apps(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.store.as_ref();
    let apps = store.list_apps_for_account(&auth.account.id)?;

    let mut payloads = Vec::with_capacity(apps.len());
    for app in &apps {
        let collaborators = store.list_collaborators(&app.id)?;
        payloads.push(app_payload(store, app, &collaborators, &auth.account.id)?);
    }

    Ok(Json(json!({ "apps": payloads })))
}

pub async fn create_app(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAppRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_app_name(&req.name)?;
    let deployment_names: Vec<String> = match req.deployments {
        Some(names) => names,
        None => DEFAULT_DEPLOYMENTS.iter().map(|s| s.to_string()).collect(),
    };
    for name in &deployment_names {
        validate_deployment_name(name)?;
    }

    let store = state.store.as_ref();
    let app = App {
        id: generate_id(),
        name: req.name,
        created_time: Utc::now(),
    };
    store.add_app(&auth.account.id, &app)?;

    for name in &deployment_names {
        store.add_deployment(&Deployment {
            id: generate_id(),
            app_id: app.id.clone(),
            name: name.clone(),
            key: generate_deployment_key(),
            created_time: Utc::now(),
        })?;
    }

    let collaborators = store.list_collaborators(&app.id)?;
    let payload = app_payload(store, &app, &collaborators, &auth.account.id)?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/apps/{}", app.name))],
        Json(json!({ "app": payload })),
    ))
}

pub async fn get_app(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    let payload = app_payload(store, &ctx.app, &ctx.collaborators, &auth.account.id)?;
    Ok(Json(json!({ "app": payload })))
}

pub async fn update_app(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
    Json(req): Json<UpdateAppRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate_app_name(&req.name)?;

    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;

    store.rename_app(&ctx.app.id, &auth.account.id, &req.name)?;

    let app = App {
        name: req.name,
        ..ctx.app
    };
    let payload = app_payload(store, &app, &ctx.collaborators, &auth.account.id)?;
    Ok(Json(json!({ "app": payload })))
}

pub async fn delete_app(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
) -> ApiResult<StatusCode> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;

    store.remove_app(&ctx.app.id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn transfer_app(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, email)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;

    let target = store
        .get_account_by_email(&email)?
        .ok_or_else(|| ApiError::not_found("The specified account does not exist"))?;

    store.transfer_app(&ctx.app.id, &target.id)?;
    Ok(StatusCode::CREATED)
}
