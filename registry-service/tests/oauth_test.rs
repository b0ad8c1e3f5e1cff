mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{json_body, TestApp};
use registry_service::config::RegistryConfig;
use registry_service::models::{OAuthClientLink, VcsConnection, VcsToken};
use registry_service::services::{
    MemoryBackend, Page, StoreError, Stores, VcsConnectionStore,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Memory store that records every call reaching it.
struct RecordingStore {
    inner: Arc<dyn VcsConnectionStore>,
    reads: AtomicUsize,
    token_updates: Mutex<Vec<(String, VcsToken)>>,
}

impl RecordingStore {
    fn new(inner: Arc<dyn VcsConnectionStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            token_updates: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VcsConnectionStore for RecordingStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }

    async fn create(
        &self,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        self.inner.create(org_id, org_name, link).await
    }

    async fn read_all(&self, page: Page) -> Result<Vec<VcsConnection>, StoreError> {
        self.inner.read_all(page).await
    }

    async fn read_organization_connections(
        &self,
        org_id: &str,
        page: Page,
    ) -> Result<Vec<VcsConnection>, StoreError> {
        self.inner.read_organization_connections(org_id, page).await
    }

    async fn read_one(&self, id: &str, include_tokens: bool) -> Result<VcsConnection, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_one(id, include_tokens).await
    }

    async fn update(
        &self,
        id: &str,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        self.inner.update(id, org_id, org_name, link).await
    }

    async fn update_vcs_token(&self, client_id: &str, token: VcsToken) -> Result<(), StoreError> {
        self.token_updates
            .lock()
            .unwrap()
            .push((client_id.to_string(), token.clone()));
        self.inner.update_vcs_token(client_id, token).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }
}

fn recording_app(config: RegistryConfig) -> (TestApp, Arc<RecordingStore>) {
    let memory = MemoryBackend::default();
    let recorder = Arc::new(RecordingStore::new(Arc::new(memory.vcs_connections())));
    let stores = Stores {
        vcs_connections: recorder.clone(),
        ..Stores::from_memory(memory)
    };
    (TestApp::with_stores(config, stores), recorder)
}

async fn mount_token_endpoint(server: &MockServer, code: &str) {
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(query_param("client_id", "client-1"))
        .and(query_param("client_secret", "s3cr3t"))
        .and(query_param("code", code))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_exchanged",
            "token_type": "bearer",
            "scope": "repo"
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn empty_code_is_rejected_before_any_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let (app, recorder) = recording_app(RegistryConfig::default());

    for uri in [
        "/oauth/github/some-id/callback?code=",
        "/oauth/github/some-id/callback",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Bad Request - invalid code");
    }

    assert_eq!(recorder.reads.load(Ordering::SeqCst), 0);
    assert!(recorder.token_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_connection_is_not_found() {
    let (app, recorder) = recording_app(RegistryConfig::default());

    let response = app.get("/oauth/github/missing/callback?code=abc").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Not Found - vcs connection does not exist");
    assert!(recorder.token_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn successful_exchange_stores_token_once() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "abc").await;
    let (app, recorder) = recording_app(RegistryConfig::default());
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app.create_connection("acme", "client-1", &server.uri()).await;
    let id = connection["data"]["id"].as_str().unwrap();

    let response = app
        .get(&format!("/oauth/github/{}/callback?code=abc", id))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["access_token"], "gho_exchanged");

    let updates = recorder.token_updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "client-1");
    assert_eq!(updates[0].1.access_token, "gho_exchanged");
    assert_eq!(updates[0].1.scope, "repo");

    let stored = app
        .state
        .stores
        .vcs_connections
        .read_one(id, true)
        .await
        .unwrap();
    assert_eq!(stored.access_token(), Some("gho_exchanged"));
}

#[tokio::test]
async fn configured_redirect_is_followed_and_redirect_uri_sent() {
    let server = MockServer::start().await;
    let mut config = RegistryConfig::default();
    config.oauth.post_login_redirect = Some("/connected".to_string());
    config.oauth.public_url = Some("https://registry.example.com/".to_string());
    let (app, recorder) = recording_app(config);
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app.create_connection("acme", "client-1", &server.uri()).await;
    let id = connection["data"]["id"].as_str().unwrap().to_string();

    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(query_param(
            "redirect_uri",
            format!("https://registry.example.com/oauth/github/{}/callback", id),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_exchanged",
            "token_type": "bearer",
            "scope": "repo"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = app
        .get(&format!("/oauth/github/{}/callback?code=abc", id))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()["location"], "/connected");
    assert_eq!(recorder.token_updates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn provider_error_is_bad_gateway_and_nothing_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        })))
        .mount(&server)
        .await;
    let (app, recorder) = recording_app(RegistryConfig::default());
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app.create_connection("acme", "client-1", &server.uri()).await;
    let id = connection["data"]["id"].as_str().unwrap();

    let response = app
        .get(&format!("/oauth/github/{}/callback?code=stale", id))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(recorder.token_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_token_response_is_internal_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;
    let (app, recorder) = recording_app(RegistryConfig::default());
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app.create_connection("acme", "client-1", &server.uri()).await;
    let id = connection["data"]["id"].as_str().unwrap();

    let response = app
        .get(&format!("/oauth/github/{}/callback?code=abc", id))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(recorder.token_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn callback_for_other_provider_is_rejected() {
    let (app, recorder) = recording_app(RegistryConfig::default());
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app
        .create_connection("acme", "client-1", "https://github.com")
        .await;
    let id = connection["data"]["id"].as_str().unwrap();

    let response = app
        .get(&format!("/oauth/gitlab/{}/callback?code=abc", id))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(recorder.token_updates.lock().unwrap().is_empty());
}
