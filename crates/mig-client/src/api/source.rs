use super::encode_segment;
use crate::client::{CallClient, CallRequest, Probe};
use crate::error::{CallResult, System};
use serde::{Deserialize, Serialize};

const PAGE_SIZE: usize = 100;

/// Authenticated identity on the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    /// Numeric id
    pub id: u64,
    /// Login name
    pub username: String,
}

/// Repository statistics (requires `statistics=true`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatistics {
    /// Git repository size in bytes
    #[serde(default)]
    pub repository_size: u64,
    /// Large-object storage usage in bytes
    #[serde(default)]
    pub lfs_objects_size: u64,
}

/// Source project metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProject {
    /// Numeric id
    pub id: u64,
    /// Full namespaced path
    pub path_with_namespace: String,
    /// Default branch, absent for empty repositories
    #[serde(default)]
    pub default_branch: Option<String>,
    /// HTTP clone URL
    pub http_url_to_repo: String,
    /// Whether large-object storage is enabled
    #[serde(default)]
    pub lfs_enabled: bool,
    /// Whether the repository has no commits
    #[serde(default)]
    pub empty_repo: bool,
    /// Size statistics
    #[serde(default)]
    pub statistics: Option<ProjectStatistics>,
}

/// Branch or tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Short ref name
    pub name: String,
}

/// Source platform API
#[derive(Debug, Clone)]
pub struct SourceApi {
    client: CallClient,
}

impl SourceApi {
    /// Create API wrapper
    #[inline]
    #[must_use]
    pub fn new(client: CallClient) -> Self {
        Self { client }
    }

    /// Identity behind the session token
    ///
    /// # Errors
    /// `Authorization` when the token is rejected.
    pub async fn current_user(&self) -> CallResult<SourceUser> {
        self.client.get_json(System::Source, "/api/v4/user").await
    }

    /// Project metadata by namespaced path, including statistics
    ///
    /// # Errors
    /// Any call error other than 404.
    pub async fn project(&self, path: &str) -> CallResult<Probe<SourceProject>> {
        let request = CallRequest::get(System::Source, format!("/api/v4/projects/{}", encode_segment(path)))
            .query("statistics", "true");
        self.client.probe(request).await
    }

    /// All branches
    ///
    /// # Errors
    /// Any call error.
    pub async fn branches(&self, project_id: u64) -> CallResult<Vec<SourceRef>> {
        self.paged(&format!("/api/v4/projects/{project_id}/repository/branches")).await
    }

    /// All tags
    ///
    /// # Errors
    /// Any call error.
    pub async fn tags(&self, project_id: u64) -> CallResult<Vec<SourceRef>> {
        self.paged(&format!("/api/v4/projects/{project_id}/repository/tags")).await
    }

    async fn paged(&self, path: &str) -> CallResult<Vec<SourceRef>> {
        let mut all = Vec::new();
        for page in 1.. {
            let request = CallRequest::get(System::Source, path)
                .query("per_page", PAGE_SIZE.to_string())
                .query("page", page.to_string());
            let batch: Vec<SourceRef> = self.client.call(request).await?.json(System::Source)?;
            let last = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if last {
                break;
            }
        }
        Ok(all)
    }
}
