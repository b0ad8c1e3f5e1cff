use serde::{Deserialize, Serialize};

use super::vcs_connection::ResourceLink;

/// Repository metadata fetched from a source provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceData {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub repo_uri: String,
    pub tags: Vec<SourceTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceTag {
    pub tag: String,
    pub ssh_clone_uri: String,
    pub https_clone_uri: String,
    pub commit: String,
}

/// Module document assembled from a VCS repository.
#[derive(Debug, Clone, Serialize)]
pub struct VcsModule {
    pub name: String,
    pub provider: String,
    pub description: String,
    pub vcs_connection: ResourceLink,
    pub organization: ResourceLink,
    pub vcs_repo: SourceData,
}
