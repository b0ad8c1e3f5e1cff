use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace grouping modules and VCS connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_on: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            email: email.into(),
            created_on: Utc::now(),
        }
    }

    /// Path operators use to address this organization.
    pub fn link(&self) -> String {
        format!("/v1/organizations/{}", self.name)
    }
}
