use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::module::{latest, sort_by_version};
use crate::models::vcs_connection::organization_link;
use crate::models::{
    Module, ModuleUpdate, NewModule, OAuthClientLink, Organization, VcsConnection, VcsToken,
};
use crate::services::stores::{
    module_version_not_found, organization_not_found, paginate, vcs_connection_not_found,
    ModuleStore, OrganizationStore, Page, StoreError, VcsConnectionStore,
};

#[derive(Debug, Default)]
struct MemoryState {
    organizations: Vec<Organization>,
    vcs_connections: Vec<VcsConnection>,
    modules: Vec<Module>,
}

impl MemoryState {
    fn organization_exists(&self, name: &str) -> bool {
        self.organizations.iter().any(|o| o.name == name)
    }

    fn module_exists(&self, module: &NewModule) -> bool {
        self.modules.iter().any(|m| {
            m.matches(&module.organization, &module.name, &module.provider)
                && m.version == module.version
        })
    }
}

/// Process-local backend. All three stores share one lock-protected state so
/// module writes can check organization existence.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    backend_type: &'static str,
}

/// Layout of the json backend's metadata file.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub organizations: Vec<SeedOrganization>,
    #[serde(default)]
    pub modules: Vec<NewModule>,
}

#[derive(Debug, Deserialize)]
pub struct SeedOrganization {
    pub name: String,
    pub email: String,
}

impl MemoryBackend {
    /// Builds the json backend. A module tuple listed twice is a
    /// `DuplicateKey`; modules of organizations missing from the seed are
    /// skipped.
    pub fn from_seed(seed: Seed) -> Result<Self, StoreError> {
        let mut state = MemoryState::default();
        for org in seed.organizations {
            if !state.organization_exists(&org.name) {
                state
                    .organizations
                    .push(Organization::new(org.name, org.email));
            }
        }
        for module in seed.modules {
            if !state.organization_exists(&module.organization) {
                tracing::warn!(
                    org = %module.organization,
                    name = %module.name,
                    provider = %module.provider,
                    version = %module.version,
                    "Skipping seed module of unknown organization"
                );
                continue;
            }
            if state.module_exists(&module) {
                return Err(StoreError::DuplicateKey(format!(
                    "module {}/{}/{} {} is listed more than once",
                    module.organization, module.name, module.provider, module.version
                )));
            }
            state.modules.push(Module::from_new(module));
        }

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            backend_type: "json",
        })
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await?;
        let seed: Seed = serde_json::from_slice(&raw).map_err(|e| {
            StoreError::Backend(anyhow::anyhow!(
                "invalid module metadata file {}: {}",
                path.display(),
                e
            ))
        })?;
        tracing::info!(
            path = %path.display(),
            organizations = seed.organizations.len(),
            modules = seed.modules.len(),
            "Loaded module metadata"
        );
        Self::from_seed(seed)
    }

    fn kind(&self) -> &'static str {
        if self.backend_type.is_empty() {
            "memory"
        } else {
            self.backend_type
        }
    }

    pub fn organizations(&self) -> MemoryOrganizationStore {
        MemoryOrganizationStore {
            backend: self.clone(),
        }
    }

    pub fn vcs_connections(&self) -> MemoryVcsConnectionStore {
        MemoryVcsConnectionStore {
            backend: self.clone(),
        }
    }

    pub fn modules(&self) -> MemoryModuleStore {
        MemoryModuleStore {
            backend: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryOrganizationStore {
    backend: MemoryBackend,
}

#[async_trait]
impl OrganizationStore for MemoryOrganizationStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        let mut state = self.backend.state.write().await;
        if state.organization_exists(name) {
            return Err(StoreError::DuplicateKey(format!(
                "organization {} already exists",
                name
            )));
        }
        let org = Organization::new(name, email);
        state.organizations.push(org.clone());
        Ok(org)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Organization>, StoreError> {
        let state = self.backend.state.read().await;
        Ok(paginate(state.organizations.iter().cloned(), page))
    }

    async fn read_one(&self, name: &str) -> Result<Organization, StoreError> {
        let state = self.backend.state.read().await;
        state
            .organizations
            .iter()
            .find(|o| o.name == name)
            .cloned()
            .ok_or_else(organization_not_found)
    }

    async fn update(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        let mut state = self.backend.state.write().await;
        let org = state
            .organizations
            .iter_mut()
            .find(|o| o.name == name)
            .ok_or_else(organization_not_found)?;
        if !email.is_empty() {
            org.email = email.to_string();
        }
        Ok(org.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.backend.state.write().await;
        state.organizations.retain(|o| o.name != name);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        self.backend.kind()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryVcsConnectionStore {
    backend: MemoryBackend,
}

fn without_token(mut conn: VcsConnection) -> VcsConnection {
    conn.oauth.token = None;
    conn
}

#[async_trait]
impl VcsConnectionStore for MemoryVcsConnectionStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create(
        &self,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        let mut state = self.backend.state.write().await;
        if state
            .vcs_connections
            .iter()
            .any(|c| c.oauth.client_id == link.client_id)
        {
            return Err(StoreError::DuplicateKey(format!(
                "vcs connection for client_id {} already exists",
                link.client_id
            )));
        }
        let conn = VcsConnection::new(org_id, org_name, link);
        state.vcs_connections.push(conn.clone());
        Ok(conn)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<VcsConnection>, StoreError> {
        let state = self.backend.state.read().await;
        Ok(paginate(
            state.vcs_connections.iter().cloned().map(without_token),
            page,
        ))
    }

    async fn read_organization_connections(
        &self,
        org_id: &str,
        page: Page,
    ) -> Result<Vec<VcsConnection>, StoreError> {
        let state = self.backend.state.read().await;
        Ok(paginate(
            state
                .vcs_connections
                .iter()
                .filter(|c| c.organization.id == org_id)
                .cloned()
                .map(without_token),
            page,
        ))
    }

    async fn read_one(
        &self,
        id: &str,
        include_tokens: bool,
    ) -> Result<VcsConnection, StoreError> {
        let state = self.backend.state.read().await;
        let conn = state
            .vcs_connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
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
        let mut state = self.backend.state.write().await;
        if state
            .vcs_connections
            .iter()
            .any(|c| c.id != id && c.oauth.client_id == link.client_id)
        {
            return Err(StoreError::DuplicateKey(format!(
                "vcs connection for client_id {} already exists",
                link.client_id
            )));
        }
        let conn = state
            .vcs_connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(vcs_connection_not_found)?;

        conn.organization = organization_link(org_id, org_name);
        conn.oauth = OAuthClientLink {
            callback_uri: conn.oauth.callback_uri.clone(),
            token: conn.oauth.token.take(),
            ..link
        };
        Ok(without_token(conn.clone()))
    }

    async fn update_vcs_token(&self, client_id: &str, token: VcsToken) -> Result<(), StoreError> {
        let mut state = self.backend.state.write().await;
        let conn = state
            .vcs_connections
            .iter_mut()
            .find(|c| c.oauth.client_id == client_id)
            .ok_or_else(vcs_connection_not_found)?;
        conn.oauth.token = Some(token);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.backend.state.write().await;
        state.vcs_connections.retain(|c| c.id != id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryModuleStore {
    backend: MemoryBackend,
}

#[async_trait]
impl ModuleStore for MemoryModuleStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Module>, StoreError> {
        let state = self.backend.state.read().await;
        Ok(paginate(state.modules.iter().cloned(), page))
    }

    async fn read_organization_modules(
        &self,
        org: &str,
        page: Page,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        let state = self.backend.state.read().await;
        if !state.organization_exists(org) {
            return Ok(None);
        }
        Ok(Some(paginate(
            state
                .modules
                .iter()
                .filter(|m| m.organization == org)
                .cloned(),
            page,
        )))
    }

    async fn read_module_versions(
        &self,
        org: &str,
        name: &str,
        provider: &str,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        let state = self.backend.state.read().await;
        if !state.organization_exists(org) {
            return Ok(None);
        }
        let mut versions: Vec<Module> = state
            .modules
            .iter()
            .filter(|m| m.matches(org, name, provider))
            .cloned()
            .collect();
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
        let state = self.backend.state.read().await;
        let candidates = state
            .modules
            .iter()
            .filter(|m| m.matches(org, name, provider))
            .cloned();
        match version {
            Some(version) => candidates.into_iter().find(|m| m.version == version),
            None => latest(candidates.collect()),
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
        self.backend.kind()
    }

    async fn create(&self, module: NewModule) -> Result<Module, StoreError> {
        let mut state = self.backend.state.write().await;
        if !state.organization_exists(&module.organization) {
            return Err(organization_not_found());
        }
        if state.module_exists(&module) {
            return Err(StoreError::DuplicateKey(
                "module version already exists".to_string(),
            ));
        }
        let module = Module::from_new(module);
        state.modules.push(module.clone());
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
        let mut state = self.backend.state.write().await;
        let module = state
            .modules
            .iter_mut()
            .find(|m| m.matches(org, name, provider) && m.version == version)
            .ok_or_else(module_version_not_found)?;
        module.apply(update);
        Ok(module.clone())
    }

    async fn delete(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.backend.state.write().await;
        state
            .modules
            .retain(|m| !(m.matches(org, name, provider) && m.version == version));
        Ok(())
    }
}
