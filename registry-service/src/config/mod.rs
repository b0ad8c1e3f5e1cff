use registry_core::config::{self as core_config, ServerConfig};
use registry_core::error::AppError;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Top-level service configuration.
///
/// Loaded from `configuration.{toml,yaml,json}` and `APP__*` variables, e.g.
/// `APP__DATABASE__BACKEND=postgres` or `APP__STORAGE__S3_BUCKET=modules`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Memory,
    Json,
    Filesystem,
    Mongo,
    Postgres,
    Dynamo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    /// Connection string for the mongo and postgres backends.
    #[serde(default)]
    pub uri: Option<SecretString>,
    /// Database name, or the table prefix for the dynamo backend.
    #[serde(default = "default_database_name")]
    pub name: String,
    /// AWS region for the dynamo backend. Falls back to the default AWS chain.
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint override for the dynamo backend, e.g. DynamoDB Local.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Seed file for the json backend.
    #[serde(default)]
    pub json_path: Option<String>,
    /// Module tree for the filesystem backend.
    #[serde(default)]
    pub modules_path: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_name() -> String {
    "terrarium".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            uri: None,
            name: default_database_name(),
            region: None,
            endpoint: None,
            json_path: None,
            modules_path: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,
}

fn default_local_path() -> String {
    "modules".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_path: default_local_path(),
            s3_bucket: None,
            s3_region: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_modules_path")]
    pub modules_path: String,
    /// Advertised as `login.v1` when present.
    #[serde(default)]
    pub login: Option<LoginConfig>,
}

fn default_modules_path() -> String {
    "/v1/modules/".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            modules_path: default_modules_path(),
            login: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginConfig {
    pub client: String,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    pub authz: String,
    pub token: String,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
}

fn default_grant_types() -> Vec<String> {
    vec!["authz_code".to_string()]
}

fn default_ports() -> Vec<u16> {
    vec![10000]
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OAuthConfig {
    /// Where the browser lands after a completed OAuth exchange.
    #[serde(default)]
    pub post_login_redirect: Option<String>,
    /// External base URL used to build absolute callback URIs.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub github: GithubProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for GithubProviderConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

impl RegistryConfig {
    pub fn load() -> Result<Self, AppError> {
        let config: RegistryConfig = core_config::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks the deserializer cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        match self.database.backend {
            DatabaseBackend::Mongo | DatabaseBackend::Postgres if self.database.uri.is_none() => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "database.uri is required for the {:?} backend",
                    self.database.backend
                )));
            }
            DatabaseBackend::Json if self.database.json_path.is_none() => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "database.json_path is required for the json backend"
                )));
            }
            DatabaseBackend::Filesystem if self.database.modules_path.is_none() => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "database.modules_path is required for the filesystem backend"
                )));
            }
            _ => {}
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.s3_bucket.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "storage.s3_bucket is required for the s3 backend"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_memory_and_filesystem() {
        let config = RegistryConfig::default();
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.discovery.modules_path, "/v1/modules/");
        assert!(config.providers.github.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn mongo_requires_uri() {
        let mut config = RegistryConfig::default();
        config.database.backend = DatabaseBackend::Mongo;
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn dynamo_needs_no_uri() {
        let mut config = RegistryConfig::default();
        config.database.backend = DatabaseBackend::Dynamo;
        assert!(config.validate().is_ok());
        assert_eq!(config.database.name, "terrarium");
    }

    #[test]
    fn s3_requires_bucket() {
        let mut config = RegistryConfig::default();
        config.storage.backend = StorageBackend::S3;
        assert!(config.validate().is_err());
        config.storage.s3_bucket = Some("modules".to_string());
        assert!(config.validate().is_ok());
    }
}
