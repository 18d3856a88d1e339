pub mod access_keys;
pub mod account;
pub mod apps;
pub mod collaborators;
pub mod deployments;
pub mod releases;

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::dto::CollaboratorEntry;
use super::response::{ApiError, ApiResult};
use crate::store::Store;
use crate::types::{App, Collaborator, Deployment};

pub(crate) struct AppContext {
    pub app: App,
    pub collaborators: Vec<Collaborator>,
}

/// Resolves an app by name among the caller's apps. Apps the caller has no
/// part in resolve to 404, never 403.
pub(crate) fn resolve_app(
    store: &dyn Store,
    account_id: &str,
    name: &str,
) -> ApiResult<AppContext> {
    let app = store
        .get_app_by_name(account_id, name)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;
    let collaborators = store.list_collaborators(&app.id)?;
    Ok(AppContext { app, collaborators })
}

pub(crate) fn resolve_deployment(
    store: &dyn Store,
    app_id: &str,
    name: &str,
) -> ApiResult<Deployment> {
    store
        .get_deployment(app_id, name)?
        .ok_or_else(|| ApiError::not_found("Deployment not found"))
}

pub(crate) fn collaborator_map(
    store: &dyn Store,
    collaborators: &[Collaborator],
    current_account_id: &str,
) -> ApiResult<BTreeMap<String, CollaboratorEntry>> {
    let mut map = BTreeMap::new();
    for collaborator in collaborators {
        let Some(account) = store.get_account(&collaborator.account_id)? else {
            continue;
        };
        map.insert(
            account.email,
            CollaboratorEntry {
                permission: collaborator.permission.as_str().to_string(),
                is_current_account: collaborator.account_id == current_account_id,
            },
        );
    }
    Ok(map)
}

pub(crate) fn app_payload(
    store: &dyn Store,
    app: &App,
    collaborators: &[Collaborator],
    current_account_id: &str,
) -> ApiResult<Value> {
    let deployments: Vec<String> = store
        .list_deployments(&app.id)?
        .into_iter()
        .map(|d| d.name)
        .collect();

    Ok(json!({
        "name": app.name,
        "createdTime": app.created_time,
        "collaborators": collaborator_map(store, collaborators, current_account_id)?,
        "deployments": deployments,
    }))
}
