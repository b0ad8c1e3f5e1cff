use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use registry_core::deadline::with_deadline;
use registry_core::error::AppError;
use registry_core::extract::{JsonBody, ValidatedJson};
use registry_core::response::DataResponse;

use crate::dtos::{
    CreateOrganizationRequest, ModuleResponse, OrganizationResponse, PageParams,
    UpdateOrganizationRequest,
};
use crate::AppState;

/// GET /v1/organizations
pub async fn list_organizations(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page()?;
    let organizations =
        with_deadline(state.timeout(), state.stores.organizations.read_all(page)).await?;
    Ok(DataResponse::ok(
        organizations
            .into_iter()
            .map(OrganizationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// POST /v1/organizations
pub async fn create_organization(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let organization = with_deadline(
        state.timeout(),
        state.stores.organizations.create(&req.name, &req.email),
    )
    .await?;

    tracing::info!(org = %organization.name, id = %organization.id, "Organization created");
    Ok(DataResponse::created(OrganizationResponse::from(
        organization,
    )))
}

/// GET /v1/organizations/{name}
pub async fn get_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let organization =
        with_deadline(state.timeout(), state.stores.organizations.read_one(&name)).await?;
    Ok(DataResponse::ok(OrganizationResponse::from(organization)))
}

/// PATCH /v1/organizations/{name}
pub async fn update_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
    JsonBody(req): JsonBody<UpdateOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let organization = with_deadline(
        state.timeout(),
        state.stores.organizations.update(&name, &req.email),
    )
    .await?;
    Ok(DataResponse::ok(OrganizationResponse::from(organization)))
}

/// DELETE /v1/organizations/{name}
///
/// Modules and VCS connections that reference the organization are left alone.
pub async fn delete_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    with_deadline(state.timeout(), state.stores.organizations.delete(&name)).await?;
    tracing::info!(org = %name, "Organization deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/organizations/{name}/modules
pub async fn list_organization_modules(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page()?;
    let modules = with_deadline(
        state.timeout(),
        state.stores.modules.read_organization_modules(&name, page),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("organization does not exist")))?;

    Ok(DataResponse::ok(
        modules.into_iter().map(ModuleResponse::from).collect::<Vec<_>>(),
    ))
}
