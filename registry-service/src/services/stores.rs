//! Data-access contracts shared by every backend.
//!
//! Handlers only ever see `Arc<dyn …Store>`; the concrete implementation is
//! picked once at startup by [`Stores::build`]. Backends normalise their
//! native failure signals into [`StoreError`] so that pagination, not-found
//! and duplicate handling look the same regardless of where data lives.

use async_trait::async_trait;
use registry_core::error::AppError;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::models::{Module, ModuleUpdate, NewModule, OAuthClientLink, Organization, VcsConnection, VcsToken};
use crate::services::filesystem::{FilesystemModuleStore, FilesystemOrganizationStore};
use crate::services::memory::MemoryBackend;
use crate::services::dynamo::DynamoBackend;
use crate::services::mongo::MongoBackend;
use crate::services::postgres::PostgresBackend;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DuplicateKey(String),

    #[error("operation not supported by the {0} backend")]
    Unsupported(&'static str),

    #[error("operation canceled")]
    Canceled,

    #[error("{0}")]
    Backend(#[source] anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("record not found".to_string()),
            other => StoreError::Backend(anyhow::Error::new(other)),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            StoreError::DuplicateKey(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            err @ StoreError::Unsupported(_) => AppError::NotImplemented(anyhow::Error::new(err)),
            StoreError::Canceled => AppError::Canceled,
            StoreError::Backend(e) => AppError::DatabaseError(e),
        }
    }
}

/// Offset/limit window applied by every listing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }
}

/// Skips `offset` items then caps at `limit`; an overrun yields an empty list.
pub fn paginate<T>(items: impl IntoIterator<Item = T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .collect()
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn init(&self) -> Result<(), StoreError>;
    async fn create(&self, name: &str, email: &str) -> Result<Organization, StoreError>;
    async fn read_all(&self, page: Page) -> Result<Vec<Organization>, StoreError>;
    async fn read_one(&self, name: &str) -> Result<Organization, StoreError>;
    /// Sets the email when non-empty and returns the stored record.
    async fn update(&self, name: &str, email: &str) -> Result<Organization, StoreError>;
    /// Idempotent: removing an unknown organization succeeds.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
    fn backend_type(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
pub trait VcsConnectionStore: Send + Sync {
    async fn init(&self) -> Result<(), StoreError>;
    /// Stores a validated link, deriving the callback from the new id.
    async fn create(
        &self,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError>;
    async fn read_all(&self, page: Page) -> Result<Vec<VcsConnection>, StoreError>;
    async fn read_organization_connections(
        &self,
        org_id: &str,
        page: Page,
    ) -> Result<Vec<VcsConnection>, StoreError>;
    /// The embedded token is only returned with `include_tokens`.
    async fn read_one(&self, id: &str, include_tokens: bool)
    -> Result<VcsConnection, StoreError>;
    /// Replaces the OAuth settings, keeping the id, callback and token.
    async fn update(
        &self,
        id: &str,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError>;
    /// Overwrites the token of the connection owning `client_id`. Replays are no-ops.
    async fn update_vcs_token(&self, client_id: &str, token: VcsToken) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn init(&self) -> Result<(), StoreError>;
    async fn read_all(&self, page: Page) -> Result<Vec<Module>, StoreError>;
    /// `None` when the organization itself does not exist.
    async fn read_organization_modules(
        &self,
        org: &str,
        page: Page,
    ) -> Result<Option<Vec<Module>>, StoreError>;
    /// `None` when the organization does not exist; `Some(vec![])` when it
    /// exists but holds no version of this module.
    async fn read_module_versions(
        &self,
        org: &str,
        name: &str,
        provider: &str,
    ) -> Result<Option<Vec<Module>>, StoreError>;
    /// Exact version, or the highest semantic version when `version` is `None`.
    async fn read_one(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: Option<&str>,
    ) -> Result<Module, StoreError>;
    async fn read_module_version_source(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<String, StoreError>;
    fn backend_type(&self) -> &'static str;

    async fn create(&self, _module: NewModule) -> Result<Module, StoreError> {
        Err(StoreError::Unsupported(self.backend_type()))
    }

    async fn update(
        &self,
        _org: &str,
        _name: &str,
        _provider: &str,
        _version: &str,
        _update: ModuleUpdate,
    ) -> Result<Module, StoreError> {
        Err(StoreError::Unsupported(self.backend_type()))
    }

    async fn delete(
        &self,
        _org: &str,
        _name: &str,
        _provider: &str,
        _version: &str,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unsupported(self.backend_type()))
    }
}

pub(crate) fn module_version_not_found() -> StoreError {
    StoreError::NotFound("module version not found".to_string())
}

pub(crate) fn organization_not_found() -> StoreError {
    StoreError::NotFound("organization does not exist".to_string())
}

pub(crate) fn vcs_connection_not_found() -> StoreError {
    StoreError::NotFound("vcs connection does not exist".to_string())
}

/// The three stores backing one process.
#[derive(Clone)]
pub struct Stores {
    pub organizations: Arc<dyn OrganizationStore>,
    pub vcs_connections: Arc<dyn VcsConnectionStore>,
    pub modules: Arc<dyn ModuleStore>,
}

impl Stores {
    /// Connects the configured backend and initialises every store.
    pub async fn build(config: &DatabaseConfig) -> Result<Self, StoreError> {
        tracing::info!(backend = ?config.backend, "Initialising data stores");

        let stores = match config.backend {
            DatabaseBackend::Memory => Self::memory(),
            DatabaseBackend::Json => {
                let path = config.json_path.as_deref().ok_or_else(|| {
                    StoreError::Backend(anyhow::anyhow!("database.json_path is not set"))
                })?;
                let memory = MemoryBackend::from_json_file(path).await?;
                Self::from_memory(memory)
            }
            DatabaseBackend::Filesystem => {
                let root = config.modules_path.as_deref().ok_or_else(|| {
                    StoreError::Backend(anyhow::anyhow!("database.modules_path is not set"))
                })?;
                Self::filesystem(root)
            }
            DatabaseBackend::Mongo => {
                let uri = required_uri(config)?;
                let mongo = MongoBackend::connect(uri, &config.name).await?;
                Self {
                    organizations: Arc::new(mongo.organizations()),
                    vcs_connections: Arc::new(mongo.vcs_connections()),
                    modules: Arc::new(mongo.modules()),
                }
            }
            DatabaseBackend::Postgres => {
                let uri = required_uri(config)?;
                let postgres = PostgresBackend::connect(uri, config.max_connections).await?;
                Self {
                    organizations: Arc::new(postgres.organizations()),
                    vcs_connections: Arc::new(postgres.vcs_connections()),
                    modules: Arc::new(postgres.modules()),
                }
            }
            DatabaseBackend::Dynamo => {
                let dynamo = DynamoBackend::connect(
                    config.region.as_deref(),
                    config.endpoint.as_deref(),
                    &config.name,
                )
                .await?;
                Self {
                    organizations: Arc::new(dynamo.organizations()),
                    vcs_connections: Arc::new(dynamo.vcs_connections()),
                    modules: Arc::new(dynamo.modules()),
                }
            }
        };

        stores.init().await?;
        Ok(stores)
    }

    pub fn memory() -> Self {
        Self::from_memory(MemoryBackend::default())
    }

    /// Organizations and modules read from the module tree; VCS connections
    /// are kept in memory.
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            organizations: Arc::new(FilesystemOrganizationStore::new(root.clone())),
            vcs_connections: Arc::new(MemoryBackend::default().vcs_connections()),
            modules: Arc::new(FilesystemModuleStore::new(root)),
        }
    }

    pub fn from_memory(memory: MemoryBackend) -> Self {
        Self {
            organizations: Arc::new(memory.organizations()),
            vcs_connections: Arc::new(memory.vcs_connections()),
            modules: Arc::new(memory.modules()),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        self.organizations.init().await?;
        self.vcs_connections.init().await?;
        self.modules.init().await?;
        Ok(())
    }
}

fn required_uri(config: &DatabaseConfig) -> Result<&str, StoreError> {
    config
        .uri
        .as_ref()
        .map(|uri| uri.expose_secret().as_str())
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("database.uri is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn paginate_skips_then_caps() {
        let page = Page { limit: 2, offset: 1 };
        assert_eq!(paginate(vec![1, 2, 3, 4], page), vec![2, 3]);
    }

    #[test]
    fn paginate_overrun_is_empty() {
        for count in 0..4 {
            let items: Vec<usize> = (0..count).collect();
            let page = Page { limit: 10, offset: count };
            assert!(paginate(items, page).is_empty());
        }
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StoreError::DuplicateKey("x".into()), StatusCode::CONFLICT),
            (StoreError::Unsupported("filesystem"), StatusCode::NOT_IMPLEMENTED),
            (
                StoreError::Backend(anyhow::anyhow!("x")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }
}
