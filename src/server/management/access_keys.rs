use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde_json::json;

use crate::access::mask_access_key;
use crate::auth::RequireAccount;
use crate::keys::{generate_access_key, generate_id};
use crate::server::AppState;
use crate::server::dto::{CreateAccessKeyRequest, UpdateAccessKeyRequest};
use crate::server::response::{ApiError, ApiResult};
use crate::server::validation::validate_friendly_name;
use crate::store::Store;
use crate::types::AccessKey;

pub async fn list_access_keys(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let keys: Vec<AccessKey> = state
        .store
        .list_access_keys(&auth.account.id)?
        .into_iter()
        .map(mask_access_key)
        .collect();

    Ok(Json(json!({ "accessKeys": keys })))
}

/// The only response that ever carries the secret token.
pub async fn create_access_key(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccessKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_friendly_name(&req.friendly_name)?;

    let expires = match req.ttl {
        Some(ttl_ms) if ttl_ms > 0 => Some(Utc::now() + Duration::milliseconds(ttl_ms)),
        Some(_) => return Err(ApiError::bad_request("ttl must be positive")),
        None => None,
    };

    let key = AccessKey {
        id: generate_id(),
        account_id: auth.account.id.clone(),
        name: generate_access_key(),
        friendly_name: req.friendly_name,
        created_by: req.created_by.unwrap_or_default(),
        created_time: Utc::now(),
        expires,
        is_session: false,
    };
    state.store.create_access_key(&key)?;

    Ok((StatusCode::CREATED, Json(json!({ "accessKey": key }))))
}

pub async fn get_access_key(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(friendly_name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let key = state
        .store
        .get_access_key(&auth.account.id, &friendly_name)?
        .ok_or_else(|| ApiError::not_found("Access key not found"))?;

    Ok(Json(json!({ "accessKey": mask_access_key(key) })))
}

pub async fn update_access_key(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(friendly_name): Path<String>,
    Json(req): Json<UpdateAccessKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut key = state
        .store
        .get_access_key(&auth.account.id, &friendly_name)?
        .ok_or_else(|| ApiError::not_found("Access key not found"))?;

    if let Some(friendly_name) = req.friendly_name {
        validate_friendly_name(&friendly_name)?;
        key.friendly_name = friendly_name;
    }
    if let Some(ttl_ms) = req.ttl {
        if ttl_ms <= 0 {
            return Err(ApiError::bad_request("ttl must be positive"));
        }
        key.expires = Some(Utc::now() + Duration::milliseconds(ttl_ms));
    }

    state.store.update_access_key(&key)?;
    Ok(Json(json!({ "accessKey": mask_access_key(key) })))
}

pub async fn delete_access_key(
    auth: RequireAccount,
    State(state): State<Arc<AppState>>,
    Path(friendly_name): Path<String>,
) -> ApiResult<StatusCode> {
    let key = state
        .store
        .get_access_key(&auth.account.id, &friendly_name)?
        .ok_or_else(|| ApiError::not_found("Access key not found"))?;

    state.store.remove_access_key(&key.id)?;
    Ok(StatusCode::NO_CONTENT)
}
