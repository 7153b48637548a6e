use crate::handler::{patch_body, CreateConflict, ResourceHandler};
use crate::resource::{AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::{CallResult, DestinationApi, NormalizedError, Probe};
use serde_json::Value;

/// Project-scoped security groups
#[derive(Debug, Clone)]
pub struct GroupHandler {
    api: DestinationApi,
}

impl GroupHandler {
    /// Create handler
    #[inline]
    #[must_use]
    pub fn new(api: DestinationApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ResourceHandler for GroupHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Group
    }

    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>> {
        self.api
            .group(desired.id_part("project")?, desired.id_part("name")?)
            .await
    }

    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        let mut body = desired.attributes.clone();
        body.insert(
            "displayName".to_string(),
            Value::String(desired.id_part("name")?.to_string()),
        );
        self.api
            .create_group(desired.id_part("project")?, &Value::Object(body))
            .await
    }

    async fn patch(&self, desired: &ResourceDescriptor, _observed: &Value, diff: &[AttributeDiff]) -> CallResult<Value> {
        self.api
            .update_group(desired.id_part("project")?, desired.id_part("name")?, &patch_body(diff))
            .await
    }

    fn protected_fields(&self) -> &'static [&'static str] {
        &["origin"]
    }

    fn create_conflict(&self, _error: &NormalizedError) -> CreateConflict {
        CreateConflict::AlreadyExists
    }
}
