use serde::Deserialize;

use crate::models::OAuthClientLink;

/// Operator-supplied OAuth client settings for a VCS connection.
#[derive(Debug, Deserialize)]
pub struct VcsConnectionRequest {
    #[serde(default)]
    pub service_provider: String,
    #[serde(default)]
    pub http_uri: String,
    #[serde(default)]
    pub api_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl From<VcsConnectionRequest> for OAuthClientLink {
    fn from(req: VcsConnectionRequest) -> Self {
        Self {
            service_provider: req.service_provider,
            http_uri: trim_slash(req.http_uri),
            api_uri: trim_slash(req.api_uri),
            client_id: req.client_id,
            client_secret: req.client_secret,
            callback_uri: String::new(),
            token: None,
        }
    }
}

fn trim_slash(uri: String) -> String {
    uri.trim_end_matches('/').to_string()
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
}
