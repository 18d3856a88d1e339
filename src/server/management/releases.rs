use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::{resolve_app, resolve_deployment};
use crate::access::require_permission;
use crate::auth::RequireAccount;
use crate::release::{PromoteOverrides, ReleaseInfo, ReleasePatch};
use crate::server::AppState;
use crate::server::dto::{PackageInfo, PromoteBody, UpdateReleaseBody};
use crate::server::response::{ApiError, ApiResult};
use crate::types::Permission;

/// Multipart upload: a `package` ZIP plus a `packageInfo` JSON part.
pub async fn release(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    let mut bundle: Option<Vec<u8>> = None;
    let mut info: Option<PackageInfo> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart error: {e}")))?
    {
        match field.name().unwrap_or("") {
            "package" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read package: {e}")))?;
                bundle = Some(bytes.to_vec());
            }
            "packageInfo" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("failed to read packageInfo: {e}"))
                })?;
                info = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| ApiError::bad_request(format!("invalid packageInfo: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let bundle = bundle.ok_or_else(|| ApiError::bad_request("missing 'package' part"))?;
    let info = info.ok_or_else(|| ApiError::bad_request("missing 'packageInfo' part"))?;

    let release_info = ReleaseInfo {
        app_version: info.app_version,
        description: info.description,
        is_disabled: info.is_disabled,
        is_mandatory: info.is_mandatory,
        rollout: info.rollout,
    };

    let package = state
        .releases
        .commit_package(
            &ctx.app,
            &deployment,
            release_info,
            bundle,
            Some(auth.account.email.clone()),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "package": package }))))
}

pub async fn update_release(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
    Json(body): Json<UpdateReleaseBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    let patch = ReleasePatch {
        label: body.label,
        app_version: body.app_version,
        description: body.description,
        is_disabled: body.is_disabled,
        is_mandatory: body.is_mandatory,
        rollout: body.rollout,
    };

    let package = state.releases.update_release(&deployment, patch)?;
    Ok(Json(json!({ "package": package })))
}

pub async fn promote(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, source_name, dest_name)): Path<(String, String, String)>,
    body: Option<Json<PromoteBody>>,
) -> ApiResult<impl IntoResponse> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;

    let source = resolve_deployment(store, &ctx.app.id, &source_name)?;
    let dest = resolve_deployment(store, &ctx.app.id, &dest_name)?;

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let overrides = PromoteOverrides {
        description: body.description,
        is_disabled: body.is_disabled,
        is_mandatory: body.is_mandatory,
        rollout: body.rollout,
    };

    let package = state
        .releases
        .promote(
            &ctx.app,
            &source,
            &dest,
            overrides,
            Some(auth.account.email.clone()),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "package": package }))))
}

pub async fn rollback(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    rollback_inner(auth, state, app_name, deployment_name, None).await
}

pub async fn rollback_to_label(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path((app_name, deployment_name, target_label)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    rollback_inner(auth, state, app_name, deployment_name, Some(target_label)).await
}

async fn rollback_inner(
    auth: RequireAccount,
    state: Arc<AppState>,
    app_name: String,
    deployment_name: String,
    target_label: Option<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let store = state.store.as_ref();
    let ctx = resolve_app(store, &auth.account.id, &app_name)?;
    require_permission(&ctx.collaborators, &auth.account.id, Permission::Collaborator)?;
    let deployment = resolve_deployment(store, &ctx.app.id, &deployment_name)?;

    let package = state
        .releases
        .rollback(
            &ctx.app,
            &deployment,
            target_label.as_deref(),
            Some(auth.account.email.clone()),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "package": package }))))
}
