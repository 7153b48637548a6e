use super::{repository_id, require_id};
use crate::handler::ResourceHandler;
use crate::resource::{AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::{CallResult, DestinationApi, NormalizedError, Probe};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Well-known branch policy types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// Minimum number of reviewers
    MinimumReviewers,
    /// Build validation
    Build,
    /// All comments resolved
    CommentRequirements,
    /// Linked work items required
    WorkItemLinking,
}

impl PolicyType {
    /// Destination type id
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            PolicyType::MinimumReviewers => "fa4e907d-c16b-4a4c-9dfa-4906e5d171dd",
            PolicyType::Build => "0609b952-1397-4640-95ec-e00a01b2c241",
            PolicyType::CommentRequirements => "c6a1889d-b943-4856-b76f-9e46bb6b0df2",
            PolicyType::WorkItemLinking => "40e92b44-2fe1-4dd6-b3d8-74a9c21d0c6e",
        }
    }
}

/// Branch policy configurations, identified by repository, branch and type
#[derive(Debug, Clone)]
pub struct BranchPolicyHandler {
    api: DestinationApi,
}

impl BranchPolicyHandler {
    /// Create handler
    #[inline]
    #[must_use]
    pub fn new(api: DestinationApi) -> Self {
        Self { api }
    }
}

fn ref_name(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

fn applies_to(policy: &Value, type_id: &str, repository_id: &str, ref_name: &str) -> bool {
    let same_type = policy
        .pointer("/type/id")
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case(type_id));
    let scopes = policy.pointer("/settings/scope").and_then(Value::as_array);
    same_type
        && scopes.is_some_and(|scopes| {
            scopes.iter().any(|s| {
                s.get("repositoryId").and_then(Value::as_str) == Some(repository_id)
                    && s.get("refName").and_then(Value::as_str) == Some(ref_name)
            })
        })
}

/// Full configuration body: desired attributes over `base`, scope pinned
fn policy_body(base: &Map<String, Value>, desired: &ResourceDescriptor, repository_id: &str, ref_name: &str) -> Result<Value, NormalizedError> {
    let mut body = base.clone();
    for (key, value) in &desired.attributes {
        if key != "settings" {
            body.insert(key.clone(), value.clone());
        }
    }
    body.entry("isEnabled").or_insert(Value::Bool(true));
    body.entry("isBlocking").or_insert(Value::Bool(true));
    body.insert("type".to_string(), json!({ "id": desired.id_part("type")? }));

    let mut settings = match body.remove("settings") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    if let Some(Value::Object(wanted)) = desired.attributes.get("settings") {
        for (key, value) in wanted {
            settings.insert(key.clone(), value.clone());
        }
    }
    settings.insert(
        "scope".to_string(),
        json!([{ "repositoryId": repository_id, "refName": ref_name, "matchKind": "exact" }]),
    );
    body.insert("settings".to_string(), Value::Object(settings));
    Ok(Value::Object(body))
}

#[async_trait]
impl ResourceHandler for BranchPolicyHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BranchPolicy
    }

    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>> {
        let project = desired.id_part("project")?;
        let repo_id = repository_id(&self.api, project, desired.id_part("repository")?).await?;
        let type_id = desired.id_part("type")?;
        let ref_name = ref_name(desired.id_part("branch")?);
        let policies = self.api.policies(project).await?;
        Ok(policies
            .into_iter()
            .find(|p| applies_to(p, type_id, &repo_id, &ref_name))
            .map_or(Probe::Absent, Probe::Found))
    }

    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        let project = desired.id_part("project")?;
        let repo_id = repository_id(&self.api, project, desired.id_part("repository")?).await?;
        let body = policy_body(&Map::new(), desired, &repo_id, &ref_name(desired.id_part("branch")?))?;
        self.api.create_policy(project, &body).await
    }

    async fn patch(&self, desired: &ResourceDescriptor, observed: &Value, _diff: &[AttributeDiff]) -> CallResult<Value> {
        let project = desired.id_part("project")?;
        let id = require_id(observed, "policy configuration")?;
        let repo_id = repository_id(&self.api, project, desired.id_part("repository")?).await?;
        let base = observed.as_object().cloned().unwrap_or_default();
        // The configuration endpoint replaces the whole document.
        let body = policy_body(&base, desired, &repo_id, &ref_name(desired.id_part("branch")?))?;
        self.api.update_policy(project, &id, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Attributes;

    fn descriptor() -> ResourceDescriptor {
        let mut attributes = Attributes::new();
        attributes.insert("settings".into(), json!({ "minimumApproverCount": 2 }));
        ResourceDescriptor::branch_policy("alpha", "app", "main", PolicyType::MinimumReviewers.id(), attributes)
    }

    #[test]
    fn body_pins_scope_and_type() {
        let body = policy_body(&Map::new(), &descriptor(), "repo-1", "refs/heads/main").unwrap();
        assert_eq!(body["type"]["id"], PolicyType::MinimumReviewers.id());
        assert_eq!(body["settings"]["minimumApproverCount"], 2);
        assert_eq!(body["settings"]["scope"][0]["repositoryId"], "repo-1");
        assert_eq!(body["isBlocking"], true);
        assert!(applies_to(&body, PolicyType::MinimumReviewers.id(), "repo-1", "refs/heads/main"));
    }

    #[test]
    fn body_keeps_unrelated_observed_settings() {
        let observed = json!({
            "id": 4,
            "isBlocking": false,
            "settings": { "creatorVoteCounts": true, "minimumApproverCount": 1 }
        });
        let body = policy_body(observed.as_object().unwrap(), &descriptor(), "repo-1", "refs/heads/main").unwrap();
        assert_eq!(body["settings"]["creatorVoteCounts"], true);
        assert_eq!(body["settings"]["minimumApproverCount"], 2);
        assert_eq!(body["isBlocking"], false);
    }

    #[test]
    fn branch_names_are_qualified() {
        assert_eq!(ref_name("main"), "refs/heads/main");
        assert_eq!(ref_name("refs/heads/release/1.0"), "refs/heads/release/1.0");
    }
}
