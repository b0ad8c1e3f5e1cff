use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Organization;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "missing organization name"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "missing organization email"))]
    pub email: String,
}

/// Only the email is mutable; an empty email leaves it untouched.
#[derive(Debug, Deserialize)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrganizationResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_on: String,
    pub link: String,
}

impl From<Organization> for OrganizationResponse {
    fn from(org: Organization) -> Self {
        Self {
            link: org.link(),
            id: org.id,
            name: org.name,
            email: org.email,
            created_on: org.created_on.to_rfc3339(),
        }
    }
}
