//! OAuth authorization-code callback for VCS connections.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use metrics::counter;
use registry_core::deadline::with_deadline;
use registry_core::error::AppError;
use registry_core::response::DataResponse;

use crate::dtos::CallbackParams;
use crate::AppState;

/// Handle the provider's redirect back to us.
///
/// GET /oauth/{provider}/{id}/callback?code=...
///
/// Exchanges the code for a token, stores it against the connection's
/// `client_id`, then either redirects to the configured landing page or
/// returns the token.
#[tracing::instrument(skip_all)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path((provider, id)): Path<(String, String)>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("invalid code")))?;

    let connection = with_deadline(
        state.timeout(),
        state.stores.vcs_connections.read_one(&id, true),
    )
    .await?;

    if connection.oauth.service_provider != provider {
        tracing::warn!(
            connection_id = %id,
            expected = %connection.oauth.service_provider,
            got = %provider,
            "OAuth callback for mismatched provider"
        );
        return Err(AppError::BadRequest(anyhow::anyhow!("vcs provider mismatch")));
    }

    let source_provider = state.providers.get(&provider)?;

    let redirect_uri = state.config.oauth.public_url.as_deref().map(|base| {
        format!(
            "{}{}",
            base.trim_end_matches('/'),
            connection.oauth.callback_uri
        )
    });

    let token = with_deadline(
        state.timeout(),
        source_provider.exchange_code(&connection.oauth, &code, redirect_uri.as_deref()),
    )
    .await
    .inspect_err(|_| {
        counter!("registry_oauth_exchanges_total", "provider" => provider.clone(), "outcome" => "failed")
            .increment(1);
    })?;
    counter!("registry_oauth_exchanges_total", "provider" => provider.clone(), "outcome" => "succeeded")
        .increment(1);

    with_deadline(
        state.timeout(),
        state
            .stores
            .vcs_connections
            .update_vcs_token(&connection.oauth.client_id, token.clone()),
    )
    .await?;

    tracing::info!(
        connection_id = %id,
        provider = %provider,
        scope = %token.scope,
        "VCS token stored"
    );

    match &state.config.oauth.post_login_redirect {
        Some(target) => Ok(Redirect::to(target).into_response()),
        None => Ok(DataResponse::ok(token).into_response()),
    }
}
