use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

use crate::models::module::{latest, sort_by_version};
use crate::models::{
    Module, ModuleUpdate, NewModule, OAuthClientLink, Organization, VcsConnection, VcsToken,
};
use crate::services::stores::{
    module_version_not_found, organization_not_found, vcs_connection_not_found, ModuleStore,
    OrganizationStore, Page, StoreError, VcsConnectionStore,
};

const ORGANIZATIONS: &str = "organizations";
const VCS_CONNECTIONS: &str = "vcs_connections";
const MODULES: &str = "modules";
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoBackend {
    client: MongoClient,
    db: Database,
}

impl MongoBackend {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to MongoDB");
            StoreError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub fn organizations(&self) -> MongoOrganizationStore {
        MongoOrganizationStore {
            client: self.client.clone(),
            collection: self.db.collection(ORGANIZATIONS),
        }
    }

    pub fn vcs_connections(&self) -> MongoVcsConnectionStore {
        MongoVcsConnectionStore {
            collection: self.db.collection(VCS_CONNECTIONS),
        }
    }

    pub fn modules(&self) -> MongoModuleStore {
        MongoModuleStore {
            collection: self.db.collection(MODULES),
            organizations: self.db.collection(ORGANIZATIONS),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn map_write_error(err: mongodb::error::Error, duplicate: &str) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::DuplicateKey(duplicate.to_string())
    } else {
        StoreError::from(err)
    }
}

fn to_document<T: serde::Serialize>(value: &T) -> Result<Document, StoreError> {
    mongodb::bson::to_document(value).map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
}

/// Insertion-ordered window; `_id` is an ObjectId so it sorts by creation.
fn page_options(page: Page) -> FindOptions {
    FindOptions::builder()
        .sort(doc! { "_id": 1 })
        .skip(u64::try_from(page.offset).unwrap_or(u64::MAX))
        .limit(i64::try_from(page.limit).unwrap_or(i64::MAX))
        .build()
}

async fn create_unique_index<T: Send + Sync>(
    collection: &Collection<T>,
    keys: Document,
    name: &str,
) -> Result<(), StoreError> {
    let index = IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(true)
                .build(),
        )
        .build();

    collection.create_index(index, None).await.map_err(|e| {
        tracing::error!(index = %name, error = %e, "Failed to create index");
        StoreError::from(e)
    })?;
    tracing::info!(collection = %collection.name(), index = %name, "Ensured index");
    Ok(())
}

#[derive(Clone)]
pub struct MongoOrganizationStore {
    client: MongoClient,
    collection: Collection<Organization>,
}

#[async_trait]
impl OrganizationStore for MongoOrganizationStore {
    async fn init(&self) -> Result<(), StoreError> {
        create_unique_index(&self.collection, doc! { "name": 1 }, "organization_name_unique")
            .await?;
        create_unique_index(&self.collection, doc! { "id": 1 }, "organization_id_unique").await
    }

    async fn create(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        let org = Organization::new(name, email);
        self.collection
            .insert_one(&org, None)
            .await
            .map_err(|e| map_write_error(e, &format!("organization {} already exists", name)))?;
        Ok(org)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Organization>, StoreError> {
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let cursor = self.collection.find(doc! {}, page_options(page)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn read_one(&self, name: &str) -> Result<Organization, StoreError> {
        self.collection
            .find_one(doc! { "name": name }, None)
            .await?
            .ok_or_else(organization_not_found)
    }

    async fn update(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        if !email.is_empty() {
            let result = self
                .collection
                .update_one(doc! { "name": name }, doc! { "$set": { "email": email } }, None)
                .await?;
            if result.matched_count == 0 {
                return Err(organization_not_found());
            }
        }
        self.read_one(name).await
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.collection
            .delete_one(doc! { "name": name }, None)
            .await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "mongo"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "MongoDB health check failed");
                StoreError::from(e)
            })?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MongoVcsConnectionStore {
    collection: Collection<VcsConnection>,
}

fn without_token(mut conn: VcsConnection) -> VcsConnection {
    conn.oauth.token = None;
    conn
}

#[async_trait]
impl VcsConnectionStore for MongoVcsConnectionStore {
    async fn init(&self) -> Result<(), StoreError> {
        create_unique_index(
            &self.collection,
            doc! { "oauth.client_id": 1 },
            "vcs_client_id_unique",
        )
        .await?;
        create_unique_index(&self.collection, doc! { "id": 1 }, "vcs_id_unique").await
    }

    async fn create(
        &self,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        let conn = VcsConnection::new(org_id, org_name, link);
        self.collection.insert_one(&conn, None).await.map_err(|e| {
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
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let cursor = self.collection.find(doc! {}, page_options(page)).await?;
        let conns: Vec<VcsConnection> = cursor.try_collect().await?;
        Ok(conns.into_iter().map(without_token).collect())
    }

    async fn read_organization_connections(
        &self,
        org_id: &str,
        page: Page,
    ) -> Result<Vec<VcsConnection>, StoreError> {
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let cursor = self
            .collection
            .find(doc! { "organization.id": org_id }, page_options(page))
            .await?;
        let conns: Vec<VcsConnection> = cursor.try_collect().await?;
        Ok(conns.into_iter().map(without_token).collect())
    }

    async fn read_one(
        &self,
        id: &str,
        include_tokens: bool,
    ) -> Result<VcsConnection, StoreError> {
        let conn = self
            .collection
            .find_one(doc! { "id": id }, None)
            .await?
            .ok_or_else(vcs_connection_not_found)?;
        Ok(if include_tokens {
            conn
        } else {
            without_token(conn)
        })
    }

    async fn update(
        &self,
        id: &str,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        let organization = crate::models::vcs_connection::organization_link(org_id, org_name);
        let update = doc! {
            "$set": {
                "organization": to_document(&organization)?,
                "oauth.service_provider": link.service_provider.as_str(),
                "oauth.http_uri": link.http_uri.as_str(),
                "oauth.api_uri": link.api_uri.as_str(),
                "oauth.client_id": link.client_id.as_str(),
                "oauth.client_secret": link.client_secret.as_str(),
            }
        };
        let result = self
            .collection
            .update_one(doc! { "id": id }, update, None)
            .await
            .map_err(|e| {
                map_write_error(
                    e,
                    &format!(
                        "vcs connection for client_id {} already exists",
                        link.client_id
                    ),
                )
            })?;
        if result.matched_count == 0 {
            return Err(vcs_connection_not_found());
        }
        self.read_one(id, false).await
    }

    async fn update_vcs_token(&self, client_id: &str, token: VcsToken) -> Result<(), StoreError> {
        let result = self
            .collection
            .update_one(
                doc! { "oauth.client_id": client_id },
                doc! { "$set": { "oauth.token": to_document(&token)? } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(vcs_connection_not_found());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.collection.delete_one(doc! { "id": id }, None).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MongoModuleStore {
    collection: Collection<Module>,
    organizations: Collection<Organization>,
}

impl MongoModuleStore {
    async fn organization_exists(&self, org: &str) -> Result<bool, StoreError> {
        let count = self
            .organizations
            .count_documents(doc! { "name": org }, None)
            .await?;
        Ok(count > 0)
    }

    async fn find(&self, filter: Document) -> Result<Vec<Module>, StoreError> {
        let cursor = self.collection.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }
}

fn module_key(org: &str, name: &str, provider: &str, version: &str) -> Document {
    doc! {
        "organization": org,
        "name": name,
        "provider": provider,
        "version": version,
    }
}

#[async_trait]
impl ModuleStore for MongoModuleStore {
    async fn init(&self) -> Result<(), StoreError> {
        create_unique_index(
            &self.collection,
            doc! { "organization": 1, "name": 1, "provider": 1, "version": 1 },
            "module_version_unique",
        )
        .await
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Module>, StoreError> {
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let cursor = self.collection.find(doc! {}, page_options(page)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn read_organization_modules(
        &self,
        org: &str,
        page: Page,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        if !self.organization_exists(org).await? {
            return Ok(None);
        }
        if page.limit == 0 {
            return Ok(Some(Vec::new()));
        }
        let cursor = self
            .collection
            .find(doc! { "organization": org }, page_options(page))
            .await?;
        Ok(Some(cursor.try_collect().await?))
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
        let mut versions = self
            .find(doc! { "organization": org, "name": name, "provider": provider })
            .await?;
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
        match version {
            Some(version) => self
                .collection
                .find_one(module_key(org, name, provider, version), None)
                .await?,
            None => latest(
                self.find(doc! { "organization": org, "name": name, "provider": provider })
                    .await?,
            ),
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
        self.read_one(org, name, provider, Some(version))
            .await
            .map(|m| m.source)
    }

    fn backend_type(&self) -> &'static str {
        "mongo"
    }

    async fn create(&self, module: NewModule) -> Result<Module, StoreError> {
        if !self.organization_exists(&module.organization).await? {
            return Err(organization_not_found());
        }
        let module = Module::from_new(module);
        self.collection
            .insert_one(&module, None)
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
        let mut set = Document::new();
        if let Some(description) = &update.description {
            set.insert("description", description.as_str());
        }
        if let Some(source) = update.source.as_ref().filter(|s| !s.is_empty()) {
            set.insert("source", source.as_str());
        }
        if !set.is_empty() {
            let result = self
                .collection
                .update_one(module_key(org, name, provider, version), doc! { "$set": set }, None)
                .await?;
            if result.matched_count == 0 {
                return Err(module_version_not_found());
            }
        }
        self.read_one(org, name, provider, Some(version)).await
    }

    async fn delete(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        self.collection
            .delete_one(module_key(org, name, provider, version), None)
            .await?;
        Ok(())
    }
}
