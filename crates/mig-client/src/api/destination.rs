use super::{encode_segment, ListEnvelope};
use crate::client::{CallClient, CallRequest, CallResponse, Probe};
use crate::error::{CallResult, ErrorKind, NormalizedError, System};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status the destination uses for "already a member"
pub const MEMBERSHIP_CONFLICT: u16 = 409;

/// Destination repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRepository {
    /// Repository id
    pub id: String,
    /// Repository name
    pub name: String,
    /// Size in bytes; zero for a repository without history
    #[serde(default)]
    pub size: u64,
    /// Default branch ref
    #[serde(default)]
    pub default_branch: Option<String>,
    /// Clone URL
    #[serde(default)]
    pub remote_url: Option<String>,
}

/// Destination ref
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRef {
    /// Full ref name (`refs/heads/main`)
    pub name: String,
    /// Target object id
    pub object_id: String,
}

/// Destination platform API
///
/// Resource bodies are returned as raw JSON objects; the reconcile layer
/// compares them attribute by attribute.
#[derive(Debug, Clone)]
pub struct DestinationApi {
    client: CallClient,
}

impl DestinationApi {
    /// Create API wrapper
    #[inline]
    #[must_use]
    pub fn new(client: CallClient) -> Self {
        Self { client }
    }

    /// Underlying client
    #[inline]
    #[must_use]
    pub fn client(&self) -> &CallClient {
        &self.client
    }

    /// Credential probe
    ///
    /// # Errors
    /// `Authorization` when the token is rejected.
    pub async fn connection_data(&self) -> CallResult<Value> {
        self.client.get_json(System::Destination, "/_apis/connectionData").await
    }

    // Projects

    /// Project by name or id
    ///
    /// # Errors
    /// Any call error other than 404.
    pub async fn project(&self, name: &str) -> CallResult<Probe<Value>> {
        let request = CallRequest::get(System::Destination, format!("/_apis/projects/{}", encode_segment(name)))
            .query("includeCapabilities", "true");
        self.client.probe(request).await
    }

    /// Create project
    ///
    /// # Errors
    /// Any call error; 409 when it already exists.
    pub async fn create_project(&self, body: &Value) -> CallResult<Value> {
        self.send(CallRequest::post(System::Destination, "/_apis/projects", body.clone())).await
    }

    /// Patch project
    ///
    /// # Errors
    /// Any call error.
    pub async fn update_project(&self, id: &str, patch: &Value) -> CallResult<Value> {
        let path = format!("/_apis/projects/{}", encode_segment(id));
        self.send(CallRequest::patch(System::Destination, path, patch.clone())).await
    }

    // Repositories

    /// Repository by name or id
    ///
    /// # Errors
    /// Any call error other than 404.
    pub async fn repository(&self, project: &str, name: &str) -> CallResult<Probe<Value>> {
        self.probe(repositories_path(project, Some(name))).await
    }

    /// Repository state used by preflight
    ///
    /// # Errors
    /// Any call error other than 404, or an unexpected body.
    pub async fn repository_info(&self, project: &str, name: &str) -> CallResult<Probe<DestinationRepository>> {
        let request = CallRequest::get(System::Destination, repositories_path(project, Some(name)));
        self.client.probe(request).await
    }

    /// Create repository
    ///
    /// # Errors
    /// Any call error; 409 when the name is taken.
    pub async fn create_repository(&self, project: &str, body: &Value) -> CallResult<Value> {
        self.send(CallRequest::post(System::Destination, repositories_path(project, None), body.clone()))
            .await
    }

    /// Patch repository
    ///
    /// # Errors
    /// Any call error.
    pub async fn update_repository(&self, project: &str, id: &str, patch: &Value) -> CallResult<Value> {
        self.send(CallRequest::patch(System::Destination, repositories_path(project, Some(id)), patch.clone()))
            .await
    }

    /// Delete repository
    ///
    /// # Errors
    /// Any call error.
    pub async fn delete_repository(&self, project: &str, id: &str) -> CallResult<()> {
        self.client
            .call(CallRequest::delete(System::Destination, repositories_path(project, Some(id))))
            .await
            .map(|_| ())
    }

    /// All refs of a repository
    ///
    /// # Errors
    /// Any call error.
    pub async fn refs(&self, project: &str, repository: &str) -> CallResult<Vec<GitRef>> {
        let path = format!("{}/refs", repositories_path(project, Some(repository)));
        self.list(path).await
    }

    // Groups

    /// Group by name
    ///
    /// # Errors
    /// Any call error other than 404.
    pub async fn group(&self, project: &str, name: &str) -> CallResult<Probe<Value>> {
        self.probe(groups_path(project, Some(name))).await
    }

    /// Create group
    ///
    /// # Errors
    /// Any call error.
    pub async fn create_group(&self, project: &str, body: &Value) -> CallResult<Value> {
        self.send(CallRequest::post(System::Destination, groups_path(project, None), body.clone())).await
    }

    /// Patch group
    ///
    /// # Errors
    /// Any call error.
    pub async fn update_group(&self, project: &str, name: &str, patch: &Value) -> CallResult<Value> {
        self.send(CallRequest::patch(System::Destination, groups_path(project, Some(name)), patch.clone()))
            .await
    }

    /// Direct members of a group
    ///
    /// # Errors
    /// Any call error.
    pub async fn members(&self, project: &str, group: &str) -> CallResult<Vec<Value>> {
        self.list(format!("{}/members", groups_path(project, Some(group)))).await
    }

    /// Add member; [`MEMBERSHIP_CONFLICT`] is returned as a response, not an error
    ///
    /// # Errors
    /// Any other call error.
    pub async fn add_member(&self, project: &str, group: &str, member: &str) -> CallResult<CallResponse> {
        let path = format!("{}/members/{}", groups_path(project, Some(group)), encode_segment(member));
        self.client
            .call(CallRequest::put(System::Destination, path, serde_json::json!({})).accept(MEMBERSHIP_CONFLICT))
            .await
    }

    // Branch policies

    /// All policy configurations of a project
    ///
    /// # Errors
    /// Any call error.
    pub async fn policies(&self, project: &str) -> CallResult<Vec<Value>> {
        self.list(policies_path(project, None)).await
    }

    /// Create policy configuration
    ///
    /// # Errors
    /// Any call error.
    pub async fn create_policy(&self, project: &str, body: &Value) -> CallResult<Value> {
        self.send(CallRequest::post(System::Destination, policies_path(project, None), body.clone())).await
    }

    /// Replace policy configuration
    ///
    /// # Errors
    /// Any call error.
    pub async fn update_policy(&self, project: &str, id: &str, body: &Value) -> CallResult<Value> {
        self.send(CallRequest::put(System::Destination, policies_path(project, Some(id)), body.clone()))
            .await
    }

    // Wiki

    /// Wiki page with content
    ///
    /// # Errors
    /// Any call error other than 404.
    pub async fn wiki_page(&self, project: &str, wiki: &str, page: &str) -> CallResult<Probe<Value>> {
        let request = CallRequest::get(System::Destination, wiki_pages_path(project, wiki))
            .query("path", page)
            .query("includeContent", "true");
        self.client.probe(request).await
    }

    /// Create or overwrite a wiki page
    ///
    /// # Errors
    /// Any call error.
    pub async fn put_wiki_page(&self, project: &str, wiki: &str, page: &str, content: &str) -> CallResult<Value> {
        let request = CallRequest::put(
            System::Destination,
            wiki_pages_path(project, wiki),
            serde_json::json!({ "content": content }),
        )
        .query("path", page);
        self.send(request).await
    }

    async fn probe(&self, path: String) -> CallResult<Probe<Value>> {
        self.client.probe(CallRequest::get(System::Destination, path)).await
    }

    async fn send(&self, request: CallRequest) -> CallResult<Value> {
        let response = self.client.call(request).await?;
        Ok(response.body.unwrap_or(Value::Null))
    }

    async fn list<T: serde::de::DeserializeOwned>(&self, path: String) -> CallResult<Vec<T>> {
        let response = self.client.call(CallRequest::get(System::Destination, path.clone())).await?;
        let envelope: ListEnvelope<T> = response.json(System::Destination).map_err(|e| {
            NormalizedError::new(System::Destination, path, ErrorKind::InvalidResponse, e.message)
        })?;
        Ok(envelope.value)
    }
}

fn repositories_path(project: &str, repository: Option<&str>) -> String {
    let base = format!("/{}/_apis/git/repositories", encode_segment(project));
    match repository {
        Some(r) => format!("{base}/{}", encode_segment(r)),
        None => base,
    }
}

fn groups_path(project: &str, group: Option<&str>) -> String {
    let base = format!("/{}/_apis/groups", encode_segment(project));
    match group {
        Some(g) => format!("{base}/{}", encode_segment(g)),
        None => base,
    }
}

fn policies_path(project: &str, id: Option<&str>) -> String {
    let base = format!("/{}/_apis/policy/configurations", encode_segment(project));
    match id {
        Some(id) => format!("{base}/{}", encode_segment(id)),
        None => base,
    }
}

fn wiki_pages_path(project: &str, wiki: &str) -> String {
    format!("/{}/_apis/wiki/wikis/{}/pages", encode_segment(project), encode_segment(wiki))
}
