use serde::{Deserialize, Serialize};

use crate::models::Module;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleResponse {
    pub id: String,
    pub organization: String,
    pub name: String,
    pub provider: String,
    pub version: String,
    pub description: String,
    pub source: String,
    pub created_on: String,
}

impl From<Module> for ModuleResponse {
    fn from(module: Module) -> Self {
        Self {
            id: module.id,
            organization: module.organization,
            name: module.name,
            provider: module.provider,
            version: module.version,
            description: module.description,
            source: module.source,
            created_on: module.created_on.to_rfc3339(),
        }
    }
}
