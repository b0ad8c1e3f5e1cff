//! Terraform module registry protocol plus module management.
//!
//! The protocol half (`versions`, `download`, `archive`) is what `terraform
//! init` talks to; the rest lets operators register and inspect versions.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::counter;
use registry_core::deadline::{bounded, with_deadline};
use registry_core::error::AppError;
use registry_core::extract::{JsonBody, ValidatedJson};
use registry_core::response::DataResponse;

use crate::dtos::{ModuleResponse, PageParams};
use crate::models::{ModuleUpdate, ModuleVersionsResponse, NewModule};
use crate::services::storage::ZIP_CONTENT_TYPE;
use crate::services::StoreError;
use crate::AppState;

pub const TERRAFORM_GET_HEADER: HeaderName = HeaderName::from_static("x-terraform-get");
pub const ARCHIVE_LOCATION: &str = "./archive?archive=zip";

/// GET /v1/modules/{org}/{name}/{provider}/versions
#[tracing::instrument(skip(state))]
pub async fn list_versions(
    State(state): State<AppState>,
    Path((org, name, provider)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let versions = with_deadline(
        state.timeout(),
        state.stores.modules.read_module_versions(&org, &name, &provider),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("organization does not exist")))?;

    if versions.is_empty() {
        return Err(AppError::NotFound(anyhow::anyhow!("module not found")));
    }

    Ok(axum::Json(ModuleVersionsResponse::from_versions(
        versions.into_iter().map(|m| m.version),
    )))
}

/// GET /v1/modules/{org}/{name}/{provider}/{version}/download
///
/// Points the client at the sibling archive route; no lookup happens here.
pub async fn download_module() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(TERRAFORM_GET_HEADER, ARCHIVE_LOCATION)],
    )
}

/// GET /v1/modules/{org}/{name}/{provider}/{version}/archive
#[tracing::instrument(skip(state))]
pub async fn module_archive(
    State(state): State<AppState>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
) -> Result<Response, AppError> {
    let source = match bounded(
        state.timeout(),
        state
            .stores
            .modules
            .read_module_version_source(&org, &name, &provider, &version),
    )
    .await?
    {
        Ok(source) => source,
        Err(err @ (StoreError::NotFound(_) | StoreError::Canceled)) => return Err(err.into()),
        Err(e) => {
            tracing::error!(error = %e, "Module source lookup failed");
            return Err(AppError::InternalError(anyhow::anyhow!(
                "failed finding module source"
            )));
        }
    };

    let data = bounded(state.timeout(), state.storage.fetch_module_source(&source))
        .await?
        .map_err(|e| {
            tracing::error!(
                error = %e,
                source = %source,
                store = state.storage.backing_store_name(),
                "Module archive fetch failed"
            );
            AppError::InternalError(anyhow::anyhow!(
                "failed fetching module source from file store"
            ))
        })?;

    counter!("registry_archive_downloads_total", "organization" => org, "provider" => provider)
        .increment(1);
    tracing::info!(bytes = data.len(), "Serving module archive");
    Ok(([(header::CONTENT_TYPE, ZIP_CONTENT_TYPE)], data).into_response())
}

/// GET /v1/modules
pub async fn list_modules(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page()?;
    let modules = with_deadline(state.timeout(), state.stores.modules.read_all(page)).await?;
    Ok(DataResponse::ok(
        modules.into_iter().map(ModuleResponse::from).collect::<Vec<_>>(),
    ))
}

/// POST /v1/modules
pub async fn create_module(
    State(state): State<AppState>,
    ValidatedJson(new): ValidatedJson<NewModule>,
) -> Result<impl IntoResponse, AppError> {
    let module = with_deadline(state.timeout(), state.stores.modules.create(new)).await?;
    tracing::info!(
        org = %module.organization,
        name = %module.name,
        provider = %module.provider,
        version = %module.version,
        "Module version registered"
    );
    Ok(DataResponse::created(ModuleResponse::from(module)))
}

/// GET /v1/modules/{org}/{name}/{provider}
pub async fn get_latest_module(
    State(state): State<AppState>,
    Path((org, name, provider)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let module = with_deadline(
        state.timeout(),
        state.stores.modules.read_one(&org, &name, &provider, None),
    )
    .await?;
    Ok(DataResponse::ok(ModuleResponse::from(module)))
}

/// GET /v1/modules/{org}/{name}/{provider}/{version}
pub async fn get_module(
    State(state): State<AppState>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let module = with_deadline(
        state.timeout(),
        state
            .stores
            .modules
            .read_one(&org, &name, &provider, Some(&version)),
    )
    .await?;
    Ok(DataResponse::ok(ModuleResponse::from(module)))
}

/// PATCH /v1/modules/{org}/{name}/{provider}/{version}
pub async fn update_module(
    State(state): State<AppState>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
    JsonBody(update): JsonBody<ModuleUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let module = with_deadline(
        state.timeout(),
        state
            .stores
            .modules
            .update(&org, &name, &provider, &version, update),
    )
    .await?;
    Ok(DataResponse::ok(ModuleResponse::from(module)))
}

/// DELETE /v1/modules/{org}/{name}/{provider}/{version}
#[tracing::instrument(skip(state))]
pub async fn delete_module(
    State(state): State<AppState>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
) -> Result<StatusCode, AppError> {
    with_deadline(
        state.timeout(),
        state
            .stores
            .modules
            .delete(&org, &name, &provider, &version),
    )
    .await?;
    tracing::info!("Module version deleted");
    Ok(StatusCode::NO_CONTENT)
}
