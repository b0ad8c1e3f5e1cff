//! Shared setup for registry-service router tests.
//!
//! Every test app runs on the in-memory stores with archives served from a
//! throwaway directory.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use registry_service::config::RegistryConfig;
use registry_service::services::{
    FilesystemStorage, GithubProvider, ProviderRegistry, Stores,
};
use registry_service::{build_router, AppState};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const ARCHIVE: &[u8] = b"PK\x03\x04acme-vpc-module";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub archives: TempDir,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_stores(config, Stores::memory())
    }

    pub fn with_stores(config: RegistryConfig, stores: Stores) -> Self {
        let mut providers = ProviderRegistry::default();
        providers.register(Arc::new(GithubProvider::with_client(reqwest::Client::new())));
        Self::with_providers(config, stores, providers)
    }

    pub fn with_providers(config: RegistryConfig, stores: Stores, providers: ProviderRegistry) -> Self {
        let archives = tempfile::tempdir().expect("Failed to create archive dir");
        let state = AppState {
            config: Arc::new(config),
            stores,
            storage: Arc::new(FilesystemStorage::new(archives.path())),
            providers,
        };
        Self {
            router: build_router(state.clone()),
            state,
            archives,
        }
    }

    pub fn write_archive(&self, key: &str, body: &[u8]) {
        let path = self.archives.path().join(Path::new(key));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response {
        self.request(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn send_json(&self, method: &str, uri: &str, body: Value) -> Response {
        self.request(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn create_organization(&self, name: &str, email: &str) -> Value {
        let response = self
            .send_json(
                "POST",
                "/v1/organizations",
                serde_json::json!({"name": name, "email": email}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    /// Registers a GitHub connection whose OAuth and API endpoints both live at `base_uri`.
    pub async fn create_connection(&self, org: &str, client_id: &str, base_uri: &str) -> Value {
        let response = self
            .send_json(
                "POST",
                &format!("/v1/organizations/{}/oauth-clients", org),
                serde_json::json!({
                    "service_provider": "github",
                    "http_uri": base_uri,
                    "api_uri": base_uri,
                    "client_id": client_id,
                    "client_secret": "s3cr3t",
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
