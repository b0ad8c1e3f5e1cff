mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp};
use registry_service::models::VcsToken;
use registry_service::services::VcsConnectionStore;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_github(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer gho_stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "acme"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/terraform-aws-vpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "terraform-aws-vpc",
            "description": "VPC from GitHub",
            "html_url": "https://github.com/acme/terraform-aws-vpc",
            "ssh_url": "git@github.com:acme/terraform-aws-vpc.git",
            "clone_url": "https://github.com/acme/terraform-aws-vpc.git",
            "owner": {"login": "acme"}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/terraform-aws-vpc/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "v1.2.0", "commit": {"sha": "abc123"}},
            {"name": "v1.1.0", "commit": {"sha": "def456"}}
        ])))
        .mount(server)
        .await;
}

/// Organization plus a GitHub connection pointed at `server`, optionally with a stored token.
async fn connected_app(server: &MockServer, with_token: bool) -> (TestApp, String) {
    let app = TestApp::spawn();
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app.create_connection("acme", "client-1", &server.uri()).await;
    if with_token {
        app.state
            .stores
            .vcs_connections
            .update_vcs_token(
                "client-1",
                VcsToken {
                    access_token: "gho_stored".to_string(),
                    token_type: "bearer".to_string(),
                    scope: "repo".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    let id = connection["data"]["id"].as_str().unwrap().to_string();
    (app, id)
}

fn body() -> Value {
    json!({"name": "vpc", "provider": "aws"})
}

#[tokio::test]
async fn assembles_module_from_repository() {
    let server = MockServer::start().await;
    mount_github(&server).await;
    let (app, id) = connected_app(&server, true).await;

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/github/{}/terraform-aws-vpc", id),
            body(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let data = json_body(response).await["data"].clone();
    assert_eq!(data["name"], "vpc");
    assert_eq!(data["provider"], "aws");
    assert_eq!(data["description"], "VPC from GitHub");
    assert_eq!(data["vcs_connection"]["id"], id.as_str());
    assert_eq!(data["vcs_connection"]["link"], format!("/v1/oauth-clients/{}", id));
    assert_eq!(data["organization"]["link"], "/v1/organizations/acme");
    assert_eq!(data["vcs_repo"]["owner"], "acme");
    assert_eq!(data["vcs_repo"]["tags"].as_array().unwrap().len(), 2);
    assert_eq!(
        data["vcs_repo"]["tags"][0]["https_clone_uri"],
        "git::https://github.com/acme/terraform-aws-vpc.git?ref=v1.2.0"
    );

    // Nothing is persisted.
    let response = app.get("/v1/modules/acme/vpc/aws/versions").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn body_description_wins_over_repository() {
    let server = MockServer::start().await;
    mount_github(&server).await;
    let (app, id) = connected_app(&server, true).await;

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/github/{}/terraform-aws-vpc", id),
            json!({"name": "vpc", "provider": "aws", "description": "ours", "owner": "acme"}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["description"], "ours");
}

#[tokio::test]
async fn provider_mismatch_is_bad_request() {
    let server = MockServer::start().await;
    let (app, id) = connected_app(&server, true).await;

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/gitlab/{}/terraform-aws-vpc", id),
            body(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Bad Request - vcs provider mismatch");
}

#[tokio::test]
async fn missing_name_is_unprocessable() {
    let server = MockServer::start().await;
    let (app, id) = connected_app(&server, true).await;

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/github/{}/terraform-aws-vpc", id),
            json!({"provider": "aws"}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Unprocessable Entity - name is required");
}

#[tokio::test]
async fn unknown_connection_is_not_found() {
    let app = TestApp::spawn();

    let response = app
        .send_json("POST", "/v1/sources/github/missing/terraform-aws-vpc", body())
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn connection_without_token_is_bad_request() {
    let server = MockServer::start().await;
    let (app, id) = connected_app(&server, false).await;

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/github/{}/terraform-aws-vpc", id),
            body(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_repository_is_not_found() {
    let server = MockServer::start().await;
    mount_github(&server).await;
    let (app, id) = connected_app(&server, true).await;

    let response = app
        .send_json("POST", &format!("/v1/sources/github/{}/ghost", id), body())
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unregistered_provider_is_not_implemented() {
    let server = MockServer::start().await;
    let app = TestApp::with_providers(
        registry_service::config::RegistryConfig::default(),
        registry_service::services::Stores::memory(),
        registry_service::services::ProviderRegistry::default(),
    );
    app.create_organization("acme", "ops@acme.io").await;
    let connection = app.create_connection("acme", "client-1", &server.uri()).await;
    let id = connection["data"]["id"].as_str().unwrap();

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/github/{}/terraform-aws-vpc", id),
            body(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "Not Implemented - vcs provider: github is not supported"
    );
}

#[tokio::test]
async fn encoded_traversal_in_repository_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/victim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "victim",
            "description": "leaked",
            "html_url": "https://github.com/victim",
            "ssh_url": "git@github.com:victim.git",
            "clone_url": "https://github.com/victim.git",
            "owner": {"login": "victim"}
        })))
        .expect(0)
        .mount(&server)
        .await;
    let (app, id) = connected_app(&server, true).await;

    let response = app
        .send_json(
            "POST",
            &format!("/v1/sources/github/{}/..%2F..%2Forgs%2Fvictim", id),
            json!({"name": "vpc", "provider": "aws", "owner": "acme"}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["message"],
        "Bad Request - invalid repository name: acme/../../orgs/victim"
    );
}
