pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use registry_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::RegistryConfig;
use crate::services::{ObjectStorage, ProviderRegistry, Stores};

const DEFAULT_MODULES_PREFIX: &str = "/v1/modules";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RegistryConfig>,
    pub stores: Stores,
    pub storage: Arc<dyn ObjectStorage>,
    pub providers: ProviderRegistry,
}

impl AppState {
    /// Deadline applied to each store, storage and provider call.
    pub fn timeout(&self) -> Duration {
        self.config.server.request_timeout()
    }
}

/// Path the Terraform protocol routes are mounted under, derived from the
/// advertised `modules.v1` value. Absolute URLs fall back to `/v1/modules`.
fn modules_prefix(modules_path: &str) -> String {
    if modules_path.starts_with('/') {
        let trimmed = modules_path.trim_end_matches('/');
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    DEFAULT_MODULES_PREFIX.to_string()
}

pub fn build_router(state: AppState) -> Router {
    let module_routes = Router::new()
        .route(
            "/",
            get(handlers::modules::list_modules).post(handlers::modules::create_module),
        )
        .route(
            "/:org/:name/:provider",
            get(handlers::modules::get_latest_module),
        )
        .route(
            "/:org/:name/:provider/versions",
            get(handlers::modules::list_versions),
        )
        .route(
            "/:org/:name/:provider/:version",
            get(handlers::modules::get_module)
                .patch(handlers::modules::update_module)
                .delete(handlers::modules::delete_module),
        )
        .route(
            "/:org/:name/:provider/:version/download",
            get(handlers::modules::download_module),
        )
        .route(
            "/:org/:name/:provider/:version/archive",
            get(handlers::modules::module_archive),
        );

    let prefix = modules_prefix(&state.config.discovery.modules_path);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics_endpoint))
        .route(
            "/.well-known/terraform.json",
            get(handlers::discovery::service_discovery),
        )
        .nest(&prefix, module_routes)
        .route(
            "/v1/organizations",
            get(handlers::organizations::list_organizations)
                .post(handlers::organizations::create_organization),
        )
        .route(
            "/v1/organizations/:name",
            get(handlers::organizations::get_organization)
                .patch(handlers::organizations::update_organization)
                .delete(handlers::organizations::delete_organization),
        )
        .route(
            "/v1/organizations/:name/modules",
            get(handlers::organizations::list_organization_modules),
        )
        .route(
            "/v1/organizations/:name/oauth-clients",
            get(handlers::vcs::list_organization_connections)
                .post(handlers::vcs::create_connection),
        )
        .route(
            "/v1/oauth-clients/:id",
            get(handlers::vcs::get_connection)
                .patch(handlers::vcs::update_connection)
                .delete(handlers::vcs::delete_connection),
        )
        .route(
            "/oauth/:provider/:id/callback",
            get(handlers::oauth::oauth_callback),
        )
        .route(
            "/v1/sources/:provider/:connection_id/:repo",
            post(handlers::sources::create_module_from_vcs),
        )
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modules_prefix_follows_discovery_path() {
        assert_eq!(modules_prefix("/v1/modules/"), "/v1/modules");
        assert_eq!(modules_prefix("/registry/modules"), "/registry/modules");
        assert_eq!(modules_prefix("/"), "/v1/modules");
        assert_eq!(
            modules_prefix("https://registry.example.com/v1/modules/"),
            "/v1/modules"
        );
    }
}
