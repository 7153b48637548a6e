use crate::handler::ResourceHandler;
use crate::resource::{AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::{CallResult, DestinationApi, ErrorKind, NormalizedError, Probe, System};
use serde_json::Value;

/// Wiki pages; the body comes from the descriptor's `content` attribute
#[derive(Debug, Clone)]
pub struct WikiPageHandler {
    api: DestinationApi,
}

impl WikiPageHandler {
    /// Create handler
    #[inline]
    #[must_use]
    pub fn new(api: DestinationApi) -> Self {
        Self { api }
    }

    async fn put(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        let content = desired
            .attributes
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                NormalizedError::new(
                    System::Local,
                    format!("ensure {}", desired.key()),
                    ErrorKind::Validation,
                    "wiki page descriptor has no content",
                )
            })?;
        self.api
            .put_wiki_page(
                desired.id_part("project")?,
                desired.id_part("wiki")?,
                desired.id_part("path")?,
                content,
            )
            .await
    }
}

#[async_trait]
impl ResourceHandler for WikiPageHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::WikiPage
    }

    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>> {
        self.api
            .wiki_page(desired.id_part("project")?, desired.id_part("wiki")?, desired.id_part("path")?)
            .await
    }

    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        self.put(desired).await
    }

    async fn patch(&self, desired: &ResourceDescriptor, _observed: &Value, _diff: &[AttributeDiff]) -> CallResult<Value> {
        self.put(desired).await
    }
}
