use super::require_id;
use crate::handler::{patch_body, CreateConflict, ResourceHandler};
use crate::resource::{AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::{CallResult, DestinationApi, ErrorKind, NormalizedError, Probe, System};
use serde_json::{json, Value};

/// Git repositories
///
/// The only kind that supports delete, and only under replace intent.
#[derive(Debug, Clone)]
pub struct RepositoryHandler {
    api: DestinationApi,
}

impl RepositoryHandler {
    /// Create handler
    #[inline]
    #[must_use]
    pub fn new(api: DestinationApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ResourceHandler for RepositoryHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Repository
    }

    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>> {
        self.api
            .repository(desired.id_part("project")?, desired.id_part("name")?)
            .await
    }

    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        let project = desired.id_part("project")?;
        let name = desired.id_part("name")?;
        let project_id = match self.api.project(project).await? {
            Probe::Found(p) => require_id(&p, "project")?,
            Probe::Absent => {
                return Err(NormalizedError::new(
                    System::Destination,
                    format!("create repository {project}/{name}"),
                    ErrorKind::NotFound,
                    format!("project '{project}' does not exist"),
                ))
            }
        };

        let mut body = desired.attributes.clone();
        body.insert("name".to_string(), Value::String(name.to_string()));
        body.insert("project".to_string(), json!({ "id": project_id }));
        self.api.create_repository(project, &Value::Object(body)).await
    }

    async fn patch(&self, desired: &ResourceDescriptor, observed: &Value, diff: &[AttributeDiff]) -> CallResult<Value> {
        let id = require_id(observed, "repository")?;
        self.api
            .update_repository(desired.id_part("project")?, &id, &patch_body(diff))
            .await
    }

    async fn delete(&self, desired: &ResourceDescriptor, observed: &Value) -> CallResult<()> {
        let id = require_id(observed, "repository")?;
        self.api.delete_repository(desired.id_part("project")?, &id).await
    }

    fn create_conflict(&self, _error: &NormalizedError) -> CreateConflict {
        CreateConflict::AlreadyExists
    }
}
