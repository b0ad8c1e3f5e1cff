use serde::Serialize;

use crate::config::LoginConfig;

/// Body of `/.well-known/terraform.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDiscovery {
    #[serde(rename = "login.v1", skip_serializing_if = "Option::is_none")]
    pub login_v1: Option<LoginConfig>,
    #[serde(rename = "modules.v1")]
    pub modules_v1: String,
}

/// `{"modules": [{"versions": [{"version": "1.2.0"}]}]}`
#[derive(Debug, Clone, Serialize)]
pub struct ModuleVersionsResponse {
    pub modules: Vec<ModuleVersions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleVersions {
    pub versions: Vec<ModuleVersion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleVersion {
    pub version: String,
}

impl ModuleVersionsResponse {
    pub fn from_versions<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: vec![ModuleVersions {
                versions: versions
                    .into_iter()
                    .map(|v| ModuleVersion { version: v.into() })
                    .collect(),
            }],
        }
    }
}
