//! Source providers: VCS APIs that describe repositories and mint OAuth tokens.

pub mod github;

use async_trait::async_trait;
use registry_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProvidersConfig;
use crate::models::{OAuthClientLink, SourceData, VcsToken};

pub use github::GithubProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("vcs provider: {0} is not supported")]
    UnsupportedProvider(String),

    #[error("repository {0} not found")]
    RepositoryNotFound(String),

    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("request to vcs provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response from vcs provider: {0}")]
    Decode(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            err @ ProviderError::UnsupportedProvider(_) => {
                AppError::NotImplemented(anyhow::Error::new(err))
            }
            err @ ProviderError::RepositoryNotFound(_) => {
                AppError::NotFound(anyhow::Error::new(err))
            }
            err @ ProviderError::InvalidRepository(_) => {
                AppError::BadRequest(anyhow::Error::new(err))
            }
            err @ ProviderError::Upstream { .. } => AppError::BadGateway(err.to_string()),
            err @ (ProviderError::Transport(_) | ProviderError::Decode(_)) => {
                AppError::InternalError(anyhow::Error::new(err))
            }
        }
    }
}

/// Everything a provider needs to describe one repository.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub api_uri: String,
    pub token: String,
    pub repo_name: String,
    /// Defaults to the account that owns `token`.
    pub repo_owner: Option<String>,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Key matched against a connection's `service_provider`.
    fn service_provider(&self) -> &'static str;

    async fn fetch_vcs_source(&self, request: SourceRequest) -> Result<SourceData, ProviderError>;

    /// Trades an OAuth authorization code for an access token.
    async fn exchange_code(
        &self,
        oauth: &OAuthClientLink,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<VcsToken, ProviderError>;
}

/// Provider lookup by name, populated once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SourceProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::default();
        if config.github.enabled {
            registry.register(Arc::new(GithubProvider::new()));
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn SourceProvider>) {
        tracing::info!(provider = provider.service_provider(), "Registered source provider");
        self.providers
            .insert(provider.service_provider().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SourceProvider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnsupportedProvider(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GithubProviderConfig;
    use axum::http::StatusCode;

    #[test]
    fn unknown_provider_is_not_implemented() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default());
        assert!(registry.get("github").is_ok());
        let err = registry.get("gitlab").err().unwrap();
        assert_eq!(err.to_string(), "vcs provider: gitlab is not supported");
        assert_eq!(AppError::from(err).status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn disabled_github_is_not_registered() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig {
            github: GithubProviderConfig { enabled: false },
        });
        assert!(matches!(
            registry.get("github"),
            Err(ProviderError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn upstream_errors_are_bad_gateway() {
        let err = ProviderError::Upstream {
            status: 401,
            message: "Bad credentials".to_string(),
        };
        assert_eq!(AppError::from(err).status(), StatusCode::BAD_GATEWAY);
    }
}
