use super::require_id;
use crate::handler::{patch_body, CreateConflict, ResourceHandler};
use crate::resource::{AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::{CallResult, DestinationApi, NormalizedError, Probe};
use serde_json::Value;

/// Destination projects
#[derive(Debug, Clone)]
pub struct ProjectHandler {
    api: DestinationApi,
}

impl ProjectHandler {
    /// Create handler
    #[inline]
    #[must_use]
    pub fn new(api: DestinationApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ResourceHandler for ProjectHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Project
    }

    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>> {
        self.api.project(desired.id_part("name")?).await
    }

    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        let name = desired.id_part("name")?;
        let mut body = desired.attributes.clone();
        body.insert("name".to_string(), Value::String(name.to_string()));
        let accepted = self.api.create_project(&Value::Object(body)).await?;

        // Creation may be asynchronous; prefer the project record over the
        // operation reference when it is already readable.
        match self.api.project(name).await? {
            Probe::Found(project) => Ok(project),
            Probe::Absent => Ok(accepted),
        }
    }

    async fn patch(&self, _desired: &ResourceDescriptor, observed: &Value, diff: &[AttributeDiff]) -> CallResult<Value> {
        let id = require_id(observed, "project")?;
        self.api.update_project(&id, &patch_body(diff)).await
    }

    fn protected_fields(&self) -> &'static [&'static str] {
        // Process template and version control type are fixed at creation.
        &["capabilities"]
    }

    fn create_conflict(&self, _error: &NormalizedError) -> CreateConflict {
        CreateConflict::AlreadyExists
    }
}
