use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use registry_core::deadline::with_deadline;
use registry_core::error::AppError;
use registry_core::extract::JsonBody;
use registry_core::response::DataResponse;
use validator::Validate;

use crate::dtos::SourceRequestBody;
use crate::models::{ResourceLink, VcsModule};
use crate::services::SourceRequest;
use crate::AppState;

/// Assemble a module document from a VCS repository.
///
/// POST /v1/sources/{provider}/{connection_id}/{repo}
///
/// Nothing is persisted; the caller gets the document back.
#[tracing::instrument(skip_all)]
pub async fn create_module_from_vcs(
    State(state): State<AppState>,
    Path((provider, connection_id, repo)): Path<(String, String, String)>,
    JsonBody(body): JsonBody<SourceRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let connection = with_deadline(
        state.timeout(),
        state.stores.vcs_connections.read_one(&connection_id, true),
    )
    .await?;

    if connection.oauth.service_provider != provider {
        return Err(AppError::BadRequest(anyhow::anyhow!("vcs provider mismatch")));
    }

    body.validate()?;

    let source_provider = state.providers.get(&provider)?;

    let token = connection
        .access_token()
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "vcs connection has not completed the oauth exchange"
            ))
        })?
        .to_string();

    let source = with_deadline(
        state.timeout(),
        source_provider.fetch_vcs_source(SourceRequest {
            api_uri: connection.oauth.api_uri.clone(),
            token,
            repo_name: repo,
            repo_owner: body.owner.clone(),
        }),
    )
    .await?;

    tracing::info!(
        connection_id = %connection.id,
        repo = %source.name,
        tags = source.tags.len(),
        "Assembled module from VCS"
    );

    let description = body
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| source.description.clone());

    Ok(DataResponse::ok(VcsModule {
        name: body.name,
        provider: body.provider,
        description,
        vcs_connection: ResourceLink {
            id: connection.id.clone(),
            link: connection.link(),
        },
        organization: connection.organization.clone(),
        vcs_repo: source,
    }))
}
