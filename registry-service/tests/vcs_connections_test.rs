mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp};
use registry_service::services::VcsConnectionStore;
use serde_json::json;

fn connection_body(client_id: &str) -> serde_json::Value {
    json!({
        "service_provider": "github",
        "http_uri": "https://github.com/",
        "api_uri": "https://api.github.com/",
        "client_id": client_id,
        "client_secret": "s3cr3t",
    })
}

#[tokio::test]
async fn create_returns_connection_without_secrets() {
    let app = TestApp::spawn();
    let org = app.create_organization("acme", "ops@acme.io").await;

    let response = app
        .send_json(
            "POST",
            "/v1/organizations/acme/oauth-clients",
            connection_body("client-1"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let data = json_body(response).await["data"].clone();
    let id = data["id"].as_str().unwrap();
    assert_eq!(data["organization"]["id"], org["data"]["id"]);
    assert_eq!(data["organization"]["link"], "/v1/organizations/acme");
    assert_eq!(data["oauth"]["http_uri"], "https://github.com");
    assert_eq!(data["oauth"]["api_uri"], "https://api.github.com");
    assert_eq!(
        data["oauth"]["callback_uri"],
        format!("/oauth/github/{}/callback", id)
    );
    assert!(data["oauth"].get("client_secret").is_none());
    assert!(data["oauth"].get("token").is_none());

    let stored = app
        .state
        .stores
        .vcs_connections
        .read_one(id, true)
        .await
        .unwrap();
    assert_eq!(stored.oauth.client_secret, "s3cr3t");
}

#[tokio::test]
async fn missing_oauth_fields_are_unprocessable() {
    let app = TestApp::spawn();
    app.create_organization("acme", "ops@acme.io").await;

    let mut body = connection_body("client-1");
    body["client_secret"] = json!("");
    let response = app
        .send_json("POST", "/v1/organizations/acme/oauth-clients", body)
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "Unprocessable Entity - client_secret missing"
    );
}

#[tokio::test]
async fn connection_for_unknown_organization_is_not_found() {
    let app = TestApp::spawn();

    let response = app
        .send_json(
            "POST",
            "/v1/organizations/ghost/oauth-clients",
            connection_body("client-1"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_client_id_is_conflict() {
    let app = TestApp::spawn();
    app.create_organization("acme", "ops@acme.io").await;
    app.create_connection("acme", "client-1", "https://github.com")
        .await;

    let response = app
        .send_json(
            "POST",
            "/v1/organizations/acme/oauth-clients",
            connection_body("client-1"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn list_is_scoped_to_organization() {
    let app = TestApp::spawn();
    app.create_organization("acme", "ops@acme.io").await;
    app.create_organization("globex", "it@globex.io").await;
    app.create_connection("acme", "client-1", "https://github.com")
        .await;
    app.create_connection("acme", "client-2", "https://github.com")
        .await;
    app.create_connection("globex", "client-3", "https://github.com")
        .await;

    let body = json_body(app.get("/v1/organizations/acme/oauth-clients").await).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let body = json_body(
        app.get("/v1/organizations/acme/oauth-clients?limit=1&offset=1")
            .await,
    )
    .await;
    assert_eq!(body["data"][0]["oauth"]["client_id"], "client-2");
}

#[tokio::test]
async fn update_keeps_secret_and_callback() {
    let app = TestApp::spawn();
    app.create_organization("acme", "ops@acme.io").await;
    let created = app
        .create_connection("acme", "client-1", "https://github.com")
        .await;
    let id = created["data"]["id"].as_str().unwrap();

    let mut body = connection_body("client-1");
    body["client_secret"] = json!("");
    body["api_uri"] = json!("https://ghe.example.com/api/v3");
    let response = app
        .send_json("PATCH", &format!("/v1/oauth-clients/{}", id), body)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let data = json_body(response).await["data"].clone();
    assert_eq!(data["oauth"]["api_uri"], "https://ghe.example.com/api/v3");
    assert_eq!(
        data["oauth"]["callback_uri"],
        created["data"]["oauth"]["callback_uri"]
    );
    assert_eq!(data["organization"]["link"], "/v1/organizations/acme");

    let stored = app
        .state
        .stores
        .vcs_connections
        .read_one(id, true)
        .await
        .unwrap();
    assert_eq!(stored.oauth.client_secret, "s3cr3t");
}

#[tokio::test]
async fn get_and_delete_by_id() {
    let app = TestApp::spawn();
    app.create_organization("acme", "ops@acme.io").await;
    let created = app
        .create_connection("acme", "client-1", "https://github.com")
        .await;
    let uri = format!("/v1/oauth-clients/{}", created["data"]["id"].as_str().unwrap());

    let response = app.get(&uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["oauth"]["client_id"], "client-1");

    assert_eq!(app.delete(&uri).await.status(), StatusCode::NO_CONTENT);
    let response = app.get(&uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Not Found - vcs connection does not exist");
}
