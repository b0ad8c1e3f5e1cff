//! GitHub source provider.
//!
//! Uses the REST API (`/user`, `/repos/{owner}/{repo}`, `/repos/{owner}/{repo}/tags`)
//! with the connection's access token, and the web flow endpoint
//! `{http_uri}/login/oauth/access_token` for code exchange.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{ProviderError, SourceProvider, SourceRequest};
use crate::models::{OAuthClientLink, SourceData, SourceTag, VcsToken};

const TAGS_PER_PAGE: usize = 100;
const MAX_TAG_PAGES: usize = 50;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("terrarium-registry/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
});

/// Authenticated user, used as the default repository owner.
#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubRepository {
    name: String,
    description: Option<String>,
    html_url: String,
    ssh_url: String,
    clone_url: String,
    owner: GithubUser,
}

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
    commit: GithubCommit,
}

#[derive(Debug, Deserialize)]
struct GithubCommit {
    sha: String,
}

/// Body of the token endpoint. GitHub answers 200 even for a bad code, with
/// `error` set instead of a token.
#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    scope: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    refresh_token_expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone, Default)]
pub struct GithubProvider {
    client: Option<Client>,
}

impl GithubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with its own client instead of the shared lazy one.
    pub fn with_client(client: Client) -> Self {
        Self {
            client: Some(client),
        }
    }

    fn client(&self) -> &Client {
        self.client.as_ref().unwrap_or(&HTTP_CLIENT)
    }

    fn api_get(&self, api_uri: &str, path: &str, token: &str) -> RequestBuilder {
        self.client()
            .get(format!("{}{}", api_uri.trim_end_matches('/'), path))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn authenticated_user(&self, api_uri: &str, token: &str) -> Result<String, ProviderError> {
        let response = self.api_get(api_uri, "/user", token).send().await?;
        let user: GithubUser = decode(ensure_success(response).await?).await?;
        Ok(user.login)
    }

    async fn repository(
        &self,
        api_uri: &str,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<GithubRepository, ProviderError> {
        let response = self
            .api_get(api_uri, &repository_path(owner, repo)?, token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::RepositoryNotFound(format!("{}/{}", owner, repo)));
        }
        decode(ensure_success(response).await?).await
    }

    async fn tags(
        &self,
        api_uri: &str,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<GithubTag>, ProviderError> {
        let tags_path = format!("{}/tags", repository_path(owner, repo)?);
        let mut tags = Vec::new();
        for page in 1..=MAX_TAG_PAGES {
            let response = self
                .api_get(api_uri, &tags_path, token)
                .query(&[("per_page", TAGS_PER_PAGE), ("page", page)])
                .send()
                .await?;

            // No tags yet.
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }

            let batch: Vec<GithubTag> = decode(ensure_success(response).await?).await?;
            let short_page = batch.len() < TAGS_PER_PAGE;
            tags.extend(batch);
            if short_page {
                break;
            }
        }
        Ok(tags)
    }
}

/// Owner and repository names become single path segments. Anything that is
/// not a plain GitHub name is refused before a request carrying the token
/// goes out.
fn repository_path(owner: &str, repo: &str) -> Result<String, ProviderError> {
    for segment in [owner, repo] {
        if !is_github_name(segment) {
            return Err(ProviderError::InvalidRepository(format!("{}/{}", owner, repo)));
        }
    }
    Ok(format!(
        "/repos/{}/{}",
        urlencoding::encode(owner),
        urlencoding::encode(repo)
    ))
}

fn is_github_name(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn clone_uri(base: &str, tag: &str) -> String {
    format!("git::{}?ref={}", base, urlencoding::encode(tag))
}

async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), body = %message, "GitHub API request failed");
    Err(ProviderError::Upstream {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl SourceProvider for GithubProvider {
    fn service_provider(&self) -> &'static str {
        "github"
    }

    async fn fetch_vcs_source(&self, request: SourceRequest) -> Result<SourceData, ProviderError> {
        let owner = match request.repo_owner.filter(|o| !o.is_empty()) {
            Some(owner) => owner,
            None => {
                self.authenticated_user(&request.api_uri, &request.token)
                    .await?
            }
        };

        let repo = self
            .repository(&request.api_uri, &request.token, &owner, &request.repo_name)
            .await?;
        let tags = self
            .tags(&request.api_uri, &request.token, &owner, &request.repo_name)
            .await?;

        tracing::info!(
            owner = %owner,
            repo = %repo.name,
            tags = tags.len(),
            "Fetched GitHub repository metadata"
        );

        Ok(SourceData {
            tags: tags
                .into_iter()
                .map(|tag| SourceTag {
                    ssh_clone_uri: clone_uri(&repo.ssh_url, &tag.name),
                    https_clone_uri: clone_uri(&repo.clone_url, &tag.name),
                    commit: tag.commit.sha,
                    tag: tag.name,
                })
                .collect(),
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            owner: repo.owner.login,
            repo_uri: repo.html_url,
        })
    }

    async fn exchange_code(
        &self,
        oauth: &OAuthClientLink,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<VcsToken, ProviderError> {
        let token_url = format!(
            "{}/login/oauth/access_token",
            oauth.http_uri.trim_end_matches('/')
        );

        let mut params = vec![
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("code", code),
        ];
        if let Some(redirect_uri) = redirect_uri {
            params.push(("redirect_uri", redirect_uri));
        }

        let response = self
            .client()
            .post(&token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to reach GitHub token endpoint");
                ProviderError::Transport(e)
            })?;

        let body: TokenExchangeResponse = decode(ensure_success(response).await?).await?;

        if let Some(error) = body.error {
            let message = body.error_description.unwrap_or_else(|| error.clone());
            tracing::warn!(error = %error, "GitHub rejected authorization code");
            return Err(ProviderError::Upstream {
                status: StatusCode::OK.as_u16(),
                message,
            });
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Decode("token response missing access_token".to_string()))?;

        Ok(VcsToken {
            access_token,
            token_type: body.token_type,
            scope: body.scope,
            expires_in: body.expires_in,
            refresh_token: body.refresh_token,
            refresh_token_expires_in: body.refresh_token_expires_in,
        })
    }
}
