use axum::Json;
use serde_json::json;

use crate::auth::RequireAccount;
use crate::server::response::ApiResult;

pub async fn get_account(auth: RequireAccount) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "account": auth.account })))
}
