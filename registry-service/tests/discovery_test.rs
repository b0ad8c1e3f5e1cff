mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp};
use registry_service::config::{LoginConfig, RegistryConfig};

#[tokio::test]
async fn discovery_advertises_modules_endpoint() {
    let app = TestApp::spawn();

    let response = app.get("/.well-known/terraform.json").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body, serde_json::json!({"modules.v1": "/v1/modules/"}));
}

#[tokio::test]
async fn discovery_includes_login_when_configured() {
    let mut config = RegistryConfig::default();
    config.discovery.login = Some(LoginConfig {
        client: "terraform-cli".to_string(),
        grant_types: vec!["authz_code".to_string()],
        authz: "/oauth/authorization".to_string(),
        token: "/oauth/token".to_string(),
        ports: vec![10000, 10010],
    });
    let app = TestApp::with_config(config);

    let body = json_body(app.get("/.well-known/terraform.json").await).await;

    assert_eq!(body["login.v1"]["client"], "terraform-cli");
    assert_eq!(body["login.v1"]["grant_types"][0], "authz_code");
    assert_eq!(body["login.v1"]["ports"], serde_json::json!([10000, 10010]));
    assert_eq!(body["modules.v1"], "/v1/modules/");
}

#[tokio::test]
async fn protocol_routes_follow_configured_modules_path() {
    let mut config = RegistryConfig::default();
    config.discovery.modules_path = "/terraform/modules/".to_string();
    let app = TestApp::with_config(config);
    app.create_organization("acme", "ops@acme.io").await;

    let body = json_body(app.get("/.well-known/terraform.json").await).await;
    assert_eq!(body["modules.v1"], "/terraform/modules/");

    let response = app.get("/terraform/modules/acme/vpc/aws/versions").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Not Found - module not found");

    let response = app.get("/terraform/modules/acme/vpc/aws/1.0.0/download").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn health_reports_backend() {
    let app = TestApp::spawn();

    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "registry-service");
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["storage"], "filesystem");
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = TestApp::spawn();

    let response = app.get("/.well-known/terraform.json").await;

    let headers = response.headers();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::spawn();
    let response = app.get("/v2/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
