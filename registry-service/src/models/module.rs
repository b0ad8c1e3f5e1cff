use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// One published version of a module, keyed by (organization, name, provider, version).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    pub id: String,
    pub organization: String,
    pub name: String,
    pub provider: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Opaque locator handed to the object storage driver.
    pub source: String,
    #[serde(default = "Utc::now")]
    pub created_on: DateTime<Utc>,
}

/// Payload for registering a module version directly.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewModule {
    #[validate(length(min = 1, message = "organization is required"))]
    pub organization: String,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "provider is required"))]
    pub provider: String,
    #[validate(custom(function = "validate_version"))]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, message = "source is required"))]
    pub source: String,
}

/// Mutable parts of a module version. The version itself never changes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleUpdate {
    pub description: Option<String>,
    pub source: Option<String>,
}

fn validate_version(version: &str) -> Result<(), ValidationError> {
    semver::Version::parse(version).map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("semver");
        err.message = Some("version must be a semantic version".into());
        err
    })
}

impl Module {
    pub fn from_new(new: NewModule) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization: new.organization,
            name: new.name,
            provider: new.provider,
            version: new.version,
            description: new.description,
            source: new.source,
            created_on: Utc::now(),
        }
    }

    pub fn matches(&self, org: &str, name: &str, provider: &str) -> bool {
        self.organization == org && self.name == name && self.provider == provider
    }

    pub fn apply(&mut self, update: ModuleUpdate) {
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(source) = update.source.filter(|s| !s.is_empty()) {
            self.source = source;
        }
    }
}

/// Orders version strings by semantic version; anything that does not parse
/// sorts after every valid version, lexically among itself.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn sort_by_version(modules: &mut [Module]) {
    modules.sort_by(|a, b| compare_versions(&a.version, &b.version));
}

/// Highest semantic version among `modules`.
pub fn latest(modules: Vec<Module>) -> Option<Module> {
    modules
        .into_iter()
        .filter(|m| semver::Version::parse(&m.version).is_ok())
        .max_by(|a, b| compare_versions(&a.version, &b.version))
}
