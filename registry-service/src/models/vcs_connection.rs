use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Non-owning reference to another record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLink {
    pub id: String,
    pub link: String,
}

/// OAuth-linked integration between an organization and a VCS provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VcsConnection {
    pub id: String,
    pub organization: ResourceLink,
    pub oauth: OAuthClientLink,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct OAuthClientLink {
    #[validate(length(min = 1, message = "service_provider missing. Supported values are: 'github'"))]
    pub service_provider: String,
    #[validate(length(min = 1, message = "http_uri missing"))]
    pub http_uri: String,
    #[validate(length(min = 1, message = "api_uri missing"))]
    pub api_uri: String,
    #[validate(length(min = 1, message = "client_id missing"))]
    pub client_id: String,
    #[validate(length(min = 1, message = "client_secret missing"))]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(default)]
    pub callback_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<VcsToken>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VcsToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_in: Option<i64>,
}

impl fmt::Debug for VcsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcsToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

impl VcsConnection {
    /// Builds a new connection, assigning its id and the callback derived from it.
    pub fn new(org_id: &str, org_name: &str, mut oauth: OAuthClientLink) -> Self {
        let id = Uuid::new_v4().to_string();
        oauth.callback_uri = callback_uri(&oauth.service_provider, &id);
        oauth.token = None;
        Self {
            organization: organization_link(org_id, org_name),
            oauth,
            id,
        }
    }

    /// Copy safe to hand to API clients: no client secret, no token.
    pub fn redacted(mut self) -> Self {
        self.oauth.client_secret.clear();
        self.oauth.token = None;
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.oauth
            .token
            .as_ref()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn link(&self) -> String {
        format!("/v1/oauth-clients/{}", self.id)
    }

    /// Name segment of the organization back-reference.
    pub fn organization_name(&self) -> &str {
        self.organization.link.rsplit('/').next().unwrap_or_default()
    }
}

pub fn callback_uri(service_provider: &str, connection_id: &str) -> String {
    format!("/oauth/{}/{}/callback", service_provider, connection_id)
}

pub fn organization_link(org_id: &str, org_name: &str) -> ResourceLink {
    ResourceLink {
        id: org_id.to_string(),
        link: format!("/v1/organizations/{}", org_name),
    }
}
