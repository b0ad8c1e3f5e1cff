//! VCS connection management. Responses never carry the client secret or token.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use registry_core::deadline::with_deadline;
use registry_core::error::AppError;
use registry_core::extract::JsonBody;
use registry_core::response::DataResponse;
use validator::Validate;

use crate::dtos::{PageParams, VcsConnectionRequest};
use crate::models::{OAuthClientLink, VcsConnection};
use crate::AppState;

/// GET /v1/organizations/{name}/oauth-clients
pub async fn list_organization_connections(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page()?;
    let organization =
        with_deadline(state.timeout(), state.stores.organizations.read_one(&name)).await?;
    let connections = with_deadline(
        state.timeout(),
        state
            .stores
            .vcs_connections
            .read_organization_connections(&organization.id, page),
    )
    .await?;

    Ok(DataResponse::ok(
        connections
            .into_iter()
            .map(VcsConnection::redacted)
            .collect::<Vec<_>>(),
    ))
}

/// POST /v1/organizations/{name}/oauth-clients
pub async fn create_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    JsonBody(req): JsonBody<VcsConnectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let link = OAuthClientLink::from(req);
    link.validate()?;

    let organization =
        with_deadline(state.timeout(), state.stores.organizations.read_one(&name)).await?;
    let connection = with_deadline(
        state.timeout(),
        state
            .stores
            .vcs_connections
            .create(&organization.id, &organization.name, link),
    )
    .await?;

    tracing::info!(
        id = %connection.id,
        org = %organization.name,
        provider = %connection.oauth.service_provider,
        "VCS connection created"
    );
    Ok(DataResponse::created(connection.redacted()))
}

/// GET /v1/oauth-clients/{id}
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let connection = with_deadline(
        state.timeout(),
        state.stores.vcs_connections.read_one(&id, false),
    )
    .await?;
    Ok(DataResponse::ok(connection.redacted()))
}

/// PATCH /v1/oauth-clients/{id}
///
/// Replaces the OAuth settings. An empty `client_secret` keeps the stored one.
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<VcsConnectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let existing = with_deadline(
        state.timeout(),
        state.stores.vcs_connections.read_one(&id, false),
    )
    .await?;

    let mut link = OAuthClientLink::from(req);
    if link.client_secret.is_empty() {
        link.client_secret = existing.oauth.client_secret.clone();
    }
    link.validate()?;

    let connection = with_deadline(
        state.timeout(),
        state.stores.vcs_connections.update(
            &id,
            &existing.organization.id,
            existing.organization_name(),
            link,
        ),
    )
    .await?;
    Ok(DataResponse::ok(connection.redacted()))
}

/// DELETE /v1/oauth-clients/{id}
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    with_deadline(state.timeout(), state.stores.vcs_connections.delete(&id)).await?;
    tracing::info!(id = %id, "VCS connection deleted");
    Ok(StatusCode::NO_CONTENT)
}
