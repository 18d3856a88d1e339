use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::warn;

use super::AppState;
use super::dto::{
    LegacyUpdateCheckParams, LegacyUpdateInfo, ReportDeployBody, ReportDownloadBody,
    SignedUrlParams, UpdateCheckParams,
};
use super::response::{ApiError, ApiResult};
use crate::error::Error;
use crate::metrics::DeploymentStatus;
use crate::resolver::{UpdateInfo, UpdateQuery};

pub async fn update_check(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UpdateCheckParams>,
) -> ApiResult<Json<Value>> {
    let query = UpdateQuery::from(params);
    let info = state.resolver.check_for_update(&query).await?;
    Ok(Json(json!({ "updateInfo": info })))
}

/// Legacy transport: same resolver, snake_case field names, and storage
/// errors degrade to a 200 no-update so old SDKs keep running.
pub async fn update_check_legacy(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LegacyUpdateCheckParams>,
) -> ApiResult<Json<Value>> {
    let query = UpdateQuery::from(params);
    let info = match state.resolver.check_for_update(&query).await {
        Ok(info) => info,
        Err(Error::NotFound) => return Err(ApiError::not_found("deployment key not found")),
        Err(Error::Invalid(message)) => return Err(ApiError::bad_request(message)),
        Err(e) => {
            warn!("legacy update check degraded to no-update: {e}");
            UpdateInfo {
                is_available: false,
                app_version: query.app_version.clone(),
                ..Default::default()
            }
        }
    };

    Ok(Json(json!({ "update_info": LegacyUpdateInfo::from(info) })))
}

pub async fn report_deploy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReportDeployBody>,
) -> ApiResult<Json<Value>> {
    if body.deployment_key.is_empty() || body.client_unique_id.is_empty() {
        return Err(ApiError::bad_request(
            "deploymentKey and clientUniqueId are required",
        ));
    }

    let label = body
        .label
        .as_deref()
        .or(body.app_version.as_deref())
        .ok_or_else(|| ApiError::bad_request("label or appVersion is required"))?;

    match &body.status {
        Some(raw) => {
            let status = DeploymentStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("invalid status '{raw}'")))?;
            state.metrics.record_deployment_status(
                &body.deployment_key,
                label,
                status,
                &body.client_unique_id,
            )?;
        }
        None => {
            let previous = body
                .previous_deployment_key
                .as_deref()
                .zip(body.previous_label_or_app_version.as_deref());
            state.metrics.record_deployment(
                &body.deployment_key,
                label,
                &body.client_unique_id,
                previous,
            )?;
        }
    }

    Ok(Json(json!({ "status": "ok" })))
}

pub async fn report_download(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReportDownloadBody>,
) -> ApiResult<Json<Value>> {
    if body.deployment_key.is_empty() || body.label.is_empty() {
        return Err(ApiError::bad_request("deploymentKey and label are required"));
    }

    state
        .metrics
        .record_download(&body.deployment_key, &body.label)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Serves a blob for a signed URL minted by the blob service.
pub async fn download_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<SignedUrlParams>,
) -> ApiResult<Response> {
    if !state
        .blobs
        .verify_signed_url(&key, params.expires, &params.signature)
    {
        return Err(ApiError::forbidden("invalid or expired download link"));
    }

    let bytes = state.blobs.get_blob(&key).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal(format!("build download response: {e}")))
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
