use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::Error;
use crate::server::AppState;
use crate::store::Store;
use crate::types::Account;

/// Extractor that requires a valid bearer access key and resolves it to
/// the owning account.
pub struct RequireAccount {
    pub account: Account,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidKey,
    KeyExpired,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid access key"),
            AuthError::KeyExpired => (StatusCode::UNAUTHORIZED, "Access key expired"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "message": message });
        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                "Bearer realm=\"airlift\"".parse().unwrap(),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAccount {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let token = extract_bearer_token(auth_header)?.ok_or(AuthError::MissingAuth)?;

        let account_id = state
            .store
            .account_id_for_access_key(&token)
            .map_err(|e| match e {
                Error::NotFound => AuthError::InvalidKey,
                Error::Expired => AuthError::KeyExpired,
                _ => AuthError::InternalError,
            })?;

        let account = state
            .store
            .get_account(&account_id)
            .map_err(|_| AuthError::InternalError)?
            .ok_or(AuthError::InvalidKey)?;

        Ok(RequireAccount { account })
    }
}

/// Extracts the key from an Authorization header. Returns `Ok(None)` when
/// no header is present, an error for unsupported schemes.
fn extract_bearer_token(auth_header: Option<&str>) -> Result<Option<String>, AuthError> {
    match auth_header {
        Some(header) if header.starts_with("Bearer ") => {
            Ok(Some(header.trim_start_matches("Bearer ").to_string()))
        }
        Some(_) => Err(AuthError::InvalidScheme),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        assert_eq!(
            extract_bearer_token(Some("Bearer ck_abc")).unwrap(),
            Some("ck_abc".to_string())
        );
        assert_eq!(extract_bearer_token(None).unwrap(), None);
        assert!(extract_bearer_token(Some("Basic dXNlcjpwYXNz")).is_err());
    }
}
