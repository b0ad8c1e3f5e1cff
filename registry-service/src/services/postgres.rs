//! PostgreSQL backend built on a shared `sqlx` pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;

use crate::models::module::{latest, sort_by_version};
use crate::models::vcs_connection::organization_link;
use crate::models::{
    Module, ModuleUpdate, NewModule, OAuthClientLink, Organization, ResourceLink, VcsConnection,
    VcsToken,
};
use crate::services::stores::{
    module_version_not_found, organization_not_found, vcs_connection_not_found, ModuleStore,
    OrganizationStore, Page, StoreError, VcsConnectionStore,
};

#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(uri)
            .await?;

        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn organizations(&self) -> PostgresOrganizationStore {
        PostgresOrganizationStore {
            pool: self.pool.clone(),
        }
    }

    pub fn vcs_connections(&self) -> PostgresVcsConnectionStore {
        PostgresVcsConnectionStore {
            pool: self.pool.clone(),
        }
    }

    pub fn modules(&self) -> PostgresModuleStore {
        PostgresModuleStore {
            pool: self.pool.clone(),
        }
    }
}

/// Applies the embedded migrations. Safe to call from every store's `init`.
async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
    Ok(())
}

fn map_write_error(err: sqlx::Error, duplicate: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::DuplicateKey(duplicate.to_string())
        }
        _ => StoreError::from(err),
    }
}

fn bounds(page: Page) -> (i64, i64) {
    (
        i64::try_from(page.limit).unwrap_or(i64::MAX),
        i64::try_from(page.offset).unwrap_or(i64::MAX),
    )
}

#[derive(Clone)]
pub struct PostgresOrganizationStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: String,
    name: String,
    email: String,
    created_on: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            created_on: row.created_on,
        }
    }
}

#[async_trait]
impl OrganizationStore for PostgresOrganizationStore {
    async fn init(&self) -> Result<(), StoreError> {
        run_migrations(&self.pool).await
    }

    async fn create(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        let org = Organization::new(name, email);
        sqlx::query(
            "INSERT INTO organizations (id, name, email, created_on) VALUES ($1, $2, $3, $4)",
        )
        .bind(&org.id)
        .bind(&org.name)
        .bind(&org.email)
        .bind(org.created_on)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &format!("organization {} already exists", name)))?;
        Ok(org)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Organization>, StoreError> {
        let (limit, offset) = bounds(page);
        let rows = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, email, created_on FROM organizations \
             ORDER BY created_on, id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Organization::from).collect())
    }

    async fn read_one(&self, name: &str) -> Result<Organization, StoreError> {
        sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, email, created_on FROM organizations WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(Organization::from)
        .ok_or_else(organization_not_found)
    }

    async fn update(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        if email.is_empty() {
            return self.read_one(name).await;
        }
        sqlx::query_as::<_, OrganizationRow>(
            "UPDATE organizations SET email = $2 WHERE name = $1 \
             RETURNING id, name, email, created_on",
        )
        .bind(name)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(Organization::from)
        .ok_or_else(organization_not_found)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM organizations WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresVcsConnectionStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct VcsConnectionRow {
    id: String,
    organization_id: String,
    organization_link: String,
    service_provider: String,
    http_uri: String,
    api_uri: String,
    client_id: String,
    client_secret: String,
    callback_uri: String,
    token: Option<Json<VcsToken>>,
}

impl VcsConnectionRow {
    fn into_connection(self, include_tokens: bool) -> VcsConnection {
        VcsConnection {
            id: self.id,
            organization: ResourceLink {
                id: self.organization_id,
                link: self.organization_link,
            },
            oauth: OAuthClientLink {
                service_provider: self.service_provider,
                http_uri: self.http_uri,
                api_uri: self.api_uri,
                client_id: self.client_id,
                client_secret: self.client_secret,
                callback_uri: self.callback_uri,
                token: if include_tokens {
                    self.token.map(|Json(token)| token)
                } else {
                    None
                },
            },
        }
    }
}

const VCS_COLUMNS: &str = "id, organization_id, organization_link, service_provider, http_uri, \
                           api_uri, client_id, client_secret, callback_uri, token";

#[async_trait]
impl VcsConnectionStore for PostgresVcsConnectionStore {
    async fn init(&self) -> Result<(), StoreError> {
        run_migrations(&self.pool).await
    }

    async fn create(
        &self,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        let conn = VcsConnection::new(org_id, org_name, link);
        sqlx::query(
            "INSERT INTO vcs_connections (id, organization_id, organization_link, \
             service_provider, http_uri, api_uri, client_id, client_secret, callback_uri) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&conn.id)
        .bind(&conn.organization.id)
        .bind(&conn.organization.link)
        .bind(&conn.oauth.service_provider)
        .bind(&conn.oauth.http_uri)
        .bind(&conn.oauth.api_uri)
        .bind(&conn.oauth.client_id)
        .bind(&conn.oauth.client_secret)
        .bind(&conn.oauth.callback_uri)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_write_error(
                e,
                &format!(
                    "vcs connection for client_id {} already exists",
                    conn.oauth.client_id
                ),
            )
        })?;
        Ok(conn)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<VcsConnection>, StoreError> {
        let (limit, offset) = bounds(page);
        let rows = sqlx::query_as::<_, VcsConnectionRow>(&format!(
            "SELECT {} FROM vcs_connections ORDER BY created_on, id LIMIT $1 OFFSET $2",
            VCS_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_connection(false)).collect())
    }

    async fn read_organization_connections(
        &self,
        org_id: &str,
        page: Page,
    ) -> Result<Vec<VcsConnection>, StoreError> {
        let (limit, offset) = bounds(page);
        let rows = sqlx::query_as::<_, VcsConnectionRow>(&format!(
            "SELECT {} FROM vcs_connections WHERE organization_id = $1 \
             ORDER BY created_on, id LIMIT $2 OFFSET $3",
            VCS_COLUMNS
        ))
        .bind(org_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_connection(false)).collect())
    }

    async fn read_one(
        &self,
        id: &str,
        include_tokens: bool,
    ) -> Result<VcsConnection, StoreError> {
        sqlx::query_as::<_, VcsConnectionRow>(&format!(
            "SELECT {} FROM vcs_connections WHERE id = $1",
            VCS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| r.into_connection(include_tokens))
        .ok_or_else(vcs_connection_not_found)
    }

    async fn update(
        &self,
        id: &str,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        let organization = organization_link(org_id, org_name);
        sqlx::query_as::<_, VcsConnectionRow>(&format!(
            "UPDATE vcs_connections SET organization_id = $2, organization_link = $3, \
             service_provider = $4, http_uri = $5, api_uri = $6, client_id = $7, \
             client_secret = $8 WHERE id = $1 RETURNING {}",
            VCS_COLUMNS
        ))
        .bind(id)
        .bind(&organization.id)
        .bind(&organization.link)
        .bind(&link.service_provider)
        .bind(&link.http_uri)
        .bind(&link.api_uri)
        .bind(&link.client_id)
        .bind(&link.client_secret)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            map_write_error(
                e,
                &format!(
                    "vcs connection for client_id {} already exists",
                    link.client_id
                ),
            )
        })?
        .map(|r| r.into_connection(false))
        .ok_or_else(vcs_connection_not_found)
    }

    async fn update_vcs_token(&self, client_id: &str, token: VcsToken) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE vcs_connections SET token = $2 WHERE client_id = $1")
            .bind(client_id)
            .bind(Json(token))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(vcs_connection_not_found());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM vcs_connections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresModuleStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ModuleRow {
    id: String,
    organization: String,
    name: String,
    provider: String,
    version: String,
    description: String,
    source: String,
    created_on: DateTime<Utc>,
}

impl From<ModuleRow> for Module {
    fn from(row: ModuleRow) -> Self {
        Self {
            id: row.id,
            organization: row.organization,
            name: row.name,
            provider: row.provider,
            version: row.version,
            description: row.description,
            source: row.source,
            created_on: row.created_on,
        }
    }
}

const MODULE_COLUMNS: &str =
    "id, organization, name, provider, version, description, source, created_on";

impl PostgresModuleStore {
    async fn organization_exists(&self, org: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE name = $1)")
                .bind(org)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn versions(&self, org: &str, name: &str, provider: &str) -> Result<Vec<Module>, StoreError> {
        let rows = sqlx::query_as::<_, ModuleRow>(&format!(
            "SELECT {} FROM modules WHERE organization = $1 AND name = $2 AND provider = $3",
            MODULE_COLUMNS
        ))
        .bind(org)
        .bind(name)
        .bind(provider)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Module::from).collect())
    }
}

#[async_trait]
impl ModuleStore for PostgresModuleStore {
    async fn init(&self) -> Result<(), StoreError> {
        run_migrations(&self.pool).await
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Module>, StoreError> {
        let (limit, offset) = bounds(page);
        let rows = sqlx::query_as::<_, ModuleRow>(&format!(
            "SELECT {} FROM modules ORDER BY created_on, id LIMIT $1 OFFSET $2",
            MODULE_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Module::from).collect())
    }

    async fn read_organization_modules(
        &self,
        org: &str,
        page: Page,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        if !self.organization_exists(org).await? {
            return Ok(None);
        }
        let (limit, offset) = bounds(page);
        let rows = sqlx::query_as::<_, ModuleRow>(&format!(
            "SELECT {} FROM modules WHERE organization = $1 \
             ORDER BY created_on, id LIMIT $2 OFFSET $3",
            MODULE_COLUMNS
        ))
        .bind(org)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(rows.into_iter().map(Module::from).collect()))
    }

    async fn read_module_versions(
        &self,
        org: &str,
        name: &str,
        provider: &str,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        if !self.organization_exists(org).await? {
            return Ok(None);
        }
        let mut versions = self.versions(org, name, provider).await?;
        sort_by_version(&mut versions);
        Ok(Some(versions))
    }

    async fn read_one(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: Option<&str>,
    ) -> Result<Module, StoreError> {
        let candidates = self.versions(org, name, provider).await?;
        match version {
            Some(version) => candidates.into_iter().find(|m| m.version == version),
            None => latest(candidates),
        }
        .ok_or_else(module_version_not_found)
    }

    async fn read_module_version_source(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<String, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT source FROM modules \
             WHERE organization = $1 AND name = $2 AND provider = $3 AND version = $4",
        )
        .bind(org)
        .bind(name)
        .bind(provider)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(module_version_not_found)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn create(&self, module: NewModule) -> Result<Module, StoreError> {
        if !self.organization_exists(&module.organization).await? {
            return Err(organization_not_found());
        }
        let module = Module::from_new(module);
        sqlx::query(
            "INSERT INTO modules (id, organization, name, provider, version, description, source, created_on) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&module.id)
        .bind(&module.organization)
        .bind(&module.name)
        .bind(&module.provider)
        .bind(&module.version)
        .bind(&module.description)
        .bind(&module.source)
        .bind(module.created_on)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "module version already exists"))?;
        Ok(module)
    }

    async fn update(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
        update: ModuleUpdate,
    ) -> Result<Module, StoreError> {
        let source = update.source.filter(|s| !s.is_empty());
        sqlx::query_as::<_, ModuleRow>(&format!(
            "UPDATE modules SET description = COALESCE($5, description), \
             source = COALESCE($6, source) \
             WHERE organization = $1 AND name = $2 AND provider = $3 AND version = $4 \
             RETURNING {}",
            MODULE_COLUMNS
        ))
        .bind(org)
        .bind(name)
        .bind(provider)
        .bind(version)
        .bind(update.description)
        .bind(source)
        .fetch_optional(&self.pool)
        .await?
        .map(Module::from)
        .ok_or_else(module_version_not_found)
    }

    async fn delete(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM modules \
             WHERE organization = $1 AND name = $2 AND provider = $3 AND version = $4",
        )
        .bind(org)
        .bind(name)
        .bind(provider)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
