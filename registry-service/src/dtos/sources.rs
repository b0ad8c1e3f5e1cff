use serde::Deserialize;
use validator::Validate;

/// Body of `POST /v1/sources/{provider}/{connection_id}/{repo}`.
#[derive(Debug, Deserialize, Validate)]
pub struct SourceRequestBody {
    #[serde(default)]
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "provider is required"))]
    pub provider: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Repository owner; defaults to the user the token belongs to.
    #[serde(default)]
    pub owner: Option<String>,
}
