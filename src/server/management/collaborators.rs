use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;

use super::{collaborator_map, resolve_app};
use crate::access::{is_owner, require_permission};
use crate::auth::RequireAccount;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResult};
use crate::store::Store;
use crate::types::{Collaborator, Permission};

pub async fn list_collaborators(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(app_name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;

    let map = collaborator_map(store, &ctx.collaborators, &auth.account.id)?;
    Ok(Json(json!({ "collaborators": map })))
}

pub async fn add_collaborator(
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

    if ctx.collaborators.iter().any(|c| c.account_id == target.id) {
        return Err(ApiError::conflict(
            "The specified account is already a collaborator",
        ));
    }

    store.add_collaborator(&Collaborator {
        app_id: ctx.app.id,
        account_id: target.id,
        permission: Permission::Collaborator,
    })?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_collaborator(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, email)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;

    let target = store
        .get_account_by_email(&email)?
        .ok_or_else(|| ApiError::not_found("The specified account does not exist"))?;

    // Anyone may remove themselves; removing others takes Owner.
    if target.id != auth.account.id {
        require_permission(&ctx.collaborators, &auth.account.id, Permission::Owner)?;
    }

    if is_owner(&ctx.collaborators, &target.id) {
        return Err(ApiError::forbidden("Cannot remove the app owner"));
    }

    store.remove_collaborator(&ctx.app.id, &target.id)?;
    Ok(StatusCode::NO_CONTENT)
}
