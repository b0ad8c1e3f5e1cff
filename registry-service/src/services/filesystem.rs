use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::module::{latest, sort_by_version};
use crate::models::{Module, Organization};
use crate::services::stores::{
    module_version_not_found, organization_not_found, paginate, ModuleStore, OrganizationStore,
    Page, StoreError,
};

const ARCHIVE_EXTENSION: &str = "zip";

/// Read-only module store over a directory tree laid out as
/// `<root>/<org>/<name>/<provider>/<version>.zip`.
///
/// The tree is scanned on every read so archives dropped in place show up
/// without a restart. A module's `source` is its path relative to the root,
/// which is what the filesystem storage driver expects.
#[derive(Debug, Clone)]
pub struct FilesystemModuleStore {
    root: PathBuf,
}

impl FilesystemModuleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn scan(&self) -> Result<Vec<Module>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_tree(&root))
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    StoreError::Canceled
                } else {
                    StoreError::Backend(anyhow::anyhow!("module scan failed: {}", e))
                }
            })?
    }

    async fn organization_exists(&self, org: &str) -> Result<bool, StoreError> {
        if !is_plain_segment(org) {
            return Ok(false);
        }
        match tokio::fs::metadata(self.root.join(org)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Organizations of the filesystem backend: one per top-level directory of
/// the module tree. Read-only, like the module store over the same root, so
/// both always agree on which organizations exist.
#[derive(Debug, Clone)]
pub struct FilesystemOrganizationStore {
    root: PathBuf,
}

impl FilesystemOrganizationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn list(&self) -> Result<Vec<Organization>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Organization>, StoreError> {
            if !root.is_dir() {
                return Ok(Vec::new());
            }
            subdirectories(&root)?
                .into_iter()
                .map(|(name, path)| directory_organization(name, &path))
                .collect()
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("organization scan failed: {}", e)))?
    }
}

fn directory_organization(name: String, path: &Path) -> Result<Organization, StoreError> {
    let created_on = fs::metadata(path)?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(Organization {
        id: name.clone(),
        name,
        email: String::new(),
        created_on,
    })
}

#[async_trait]
impl OrganizationStore for FilesystemOrganizationStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create(&self, _name: &str, _email: &str) -> Result<Organization, StoreError> {
        Err(StoreError::Unsupported(self.backend_type()))
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Organization>, StoreError> {
        Ok(paginate(self.list().await?, page))
    }

    async fn read_one(&self, name: &str) -> Result<Organization, StoreError> {
        if !is_plain_segment(name) {
            return Err(organization_not_found());
        }
        self.list()
            .await?
            .into_iter()
            .find(|o| o.name == name)
            .ok_or_else(organization_not_found)
    }

    async fn update(&self, _name: &str, _email: &str) -> Result<Organization, StoreError> {
        Err(StoreError::Unsupported(self.backend_type()))
    }

    async fn delete(&self, _name: &str) -> Result<(), StoreError> {
        Err(StoreError::Unsupported(self.backend_type()))
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

fn subdirectories(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                dirs.push((name.to_string(), entry.path()));
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn scan_tree(root: &Path) -> Result<Vec<Module>, StoreError> {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "module directory does not exist");
        return Ok(Vec::new());
    }

    let mut modules = Vec::new();
    for (org, org_dir) in subdirectories(root)? {
        for (name, name_dir) in subdirectories(&org_dir)? {
            for (provider, provider_dir) in subdirectories(&name_dir)? {
                for entry in fs::read_dir(&provider_dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if !entry.file_type()?.is_file()
                        || path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION)
                    {
                        continue;
                    }
                    let Some(version) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let created_on: DateTime<Utc> = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());

                    modules.push(Module {
                        id: format!("{}/{}/{}/{}", org, name, provider, version),
                        organization: org.clone(),
                        name: name.clone(),
                        provider: provider.clone(),
                        version: version.to_string(),
                        description: String::new(),
                        source: format!(
                            "{}/{}/{}/{}.{}",
                            org, name, provider, version, ARCHIVE_EXTENSION
                        ),
                        created_on,
                    });
                }
            }
        }
    }

    modules.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(modules)
}

#[async_trait]
impl ModuleStore for FilesystemModuleStore {
    async fn init(&self) -> Result<(), StoreError> {
        let modules = self.scan().await?;
        tracing::info!(
            root = %self.root.display(),
            modules = modules.len(),
            "Filesystem module store ready"
        );
        Ok(())
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Module>, StoreError> {
        Ok(paginate(self.scan().await?, page))
    }

    async fn read_organization_modules(
        &self,
        org: &str,
        page: Page,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        if !self.organization_exists(org).await? {
            return Ok(None);
        }
        let modules = self
            .scan()
            .await?
            .into_iter()
            .filter(|m| m.organization == org);
        Ok(Some(paginate(modules, page)))
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
        let mut versions: Vec<Module> = self
            .scan()
            .await?
            .into_iter()
            .filter(|m| m.matches(org, name, provider))
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
        let candidates: Vec<Module> = self
            .scan()
            .await?
            .into_iter()
            .filter(|m| m.matches(org, name, provider))
            .collect();
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
        self.read_one(org, name, provider, Some(version))
            .await
            .map(|m| m.source)
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}
