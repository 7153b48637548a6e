//! Built-in resource kinds
//!
//! One handler per destination resource type. Each is a thin mapping from
//! the descriptor's identity and attributes onto [`DestinationApi`] calls.

mod branch_policy;
mod group;
mod membership;
mod project;
mod repository;
mod wiki;

pub use branch_policy::{BranchPolicyHandler, PolicyType};
pub use group::GroupHandler;
pub use membership::MembershipHandler;
pub use project::ProjectHandler;
pub use repository::RepositoryHandler;
pub use wiki::WikiPageHandler;

use mig_client::{DestinationApi, ErrorKind, NormalizedError, Probe, System};
use serde_json::Value;

/// `id` of a resource, whether the server renders it as string or number
pub(crate) fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn require_id(value: &Value, what: &str) -> Result<String, NormalizedError> {
    id_of(value).ok_or_else(|| {
        NormalizedError::new(
            System::Destination,
            what,
            ErrorKind::InvalidResponse,
            format!("{what} has no id"),
        )
    })
}

/// Id of an existing repository, `NotFound` otherwise
pub(crate) async fn repository_id(api: &DestinationApi, project: &str, repository: &str) -> Result<String, NormalizedError> {
    match api.repository(project, repository).await? {
        Probe::Found(repo) => require_id(&repo, "repository"),
        Probe::Absent => Err(NormalizedError::new(
            System::Destination,
            format!("{project}/{repository}"),
            ErrorKind::NotFound,
            format!("repository '{repository}' does not exist in project '{project}'"),
        )),
    }
}
