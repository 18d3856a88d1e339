use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::acquisition;
use super::management::{access_keys, account, apps, collaborators, deployments, releases};
use crate::metrics::MetricsCounter;
use crate::release::ReleaseEngine;
use crate::resolver::UpdateResolver;
use crate::storage::BlobService;
use crate::store::Store;

/// Uploaded bundles are capped well above any realistic JS bundle.
const MAX_BUNDLE_BYTES: usize = 256 * 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<BlobService>,
    pub releases: ReleaseEngine,
    pub resolver: UpdateResolver,
    pub metrics: MetricsCounter,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<BlobService>) -> Self {
        Self {
            releases: ReleaseEngine::new(Arc::clone(&store), Arc::clone(&blobs)),
            resolver: UpdateResolver::new(Arc::clone(&store), Arc::clone(&blobs)),
            metrics: MetricsCounter::new(Arc::clone(&store)),
            store,
            blobs,
        }
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(acquisition::health))
        // Acquisition surface, queried by device SDKs without auth.
        .route("/updateCheck", get(acquisition::update_check))
        .route(
            "/v0.1/public/codepush/update_check",
            get(acquisition::update_check_legacy),
        )
        .route("/reportStatus/deploy", post(acquisition::report_deploy))
        .route("/reportStatus/download", post(acquisition::report_download))
        .route("/storage/{*key}", get(acquisition::download_blob))
        // Management surface, bearer access key required.
        .route("/account", get(account::get_account))
        .route("/accessKeys", get(access_keys::list_access_keys))
        .route("/accessKeys", post(access_keys::create_access_key))
        .route("/accessKeys/{friendlyName}", get(access_keys::get_access_key))
        .route(
            "/accessKeys/{friendlyName}",
            patch(access_keys::update_access_key),
        )
        .route(
            "/accessKeys/{friendlyName}",
            delete(access_keys::delete_access_key),
        )
        .route("/apps", get(apps::list_apps))
        .route("/apps", post(apps::create_app))
        .route("/apps/{app}", get(apps::get_app))
        .route("/apps/{app}", patch(apps::update_app))
        .route("/apps/{app}", delete(apps::delete_app))
        .route("/apps/{app}/transfer/{email}", post(apps::transfer_app))
        .route(
            "/apps/{app}/collaborators",
            get(collaborators::list_collaborators),
        )
        .route(
            "/apps/{app}/collaborators/{email}",
            post(collaborators::add_collaborator),
        )
        .route(
            "/apps/{app}/collaborators/{email}",
            delete(collaborators::remove_collaborator),
        )
        .route("/apps/{app}/deployments", get(deployments::list_deployments))
        .route("/apps/{app}/deployments", post(deployments::create_deployment))
        .route(
            "/apps/{app}/deployments/{deployment}",
            get(deployments::get_deployment),
        )
        .route(
            "/apps/{app}/deployments/{deployment}",
            patch(deployments::update_deployment),
        )
        .route(
            "/apps/{app}/deployments/{deployment}",
            delete(deployments::delete_deployment),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/release",
            post(releases::release),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/release",
            patch(releases::update_release),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/promote/{dest}",
            post(releases::promote),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/rollback",
            post(releases::rollback),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/rollback/{target}",
            post(releases::rollback_to_label),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/history",
            get(deployments::deployment_history),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/history",
            delete(deployments::clear_deployment_history),
        )
        .route(
            "/apps/{app}/deployments/{deployment}/metrics",
            get(deployments::deployment_metrics),
        )
        .layer(DefaultBodyLimit::max(MAX_BUNDLE_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
