use crate::handler::{CreateConflict, ResourceHandler};
use crate::resource::{AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::api::MEMBERSHIP_CONFLICT;
use mig_client::{CallResult, DestinationApi, NormalizedError, Probe, System};
use serde_json::{json, Value};

const MEMBER_KEYS: [&str; 4] = ["uniqueName", "principalName", "mailAddress", "id"];

/// Direct group memberships
///
/// A member may already belong through a route the member listing does not
/// show (nested or inherited groups); the destination then answers the add
/// with 409, which for this kind means the desired state already holds.
#[derive(Debug, Clone)]
pub struct MembershipHandler {
    api: DestinationApi,
}

impl MembershipHandler {
    /// Create handler
    #[inline]
    #[must_use]
    pub fn new(api: DestinationApi) -> Self {
        Self { api }
    }
}

fn is_member(entry: &Value, member: &str) -> bool {
    MEMBER_KEYS
        .iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .any(|value| value.eq_ignore_ascii_case(member))
}

#[async_trait]
impl ResourceHandler for MembershipHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Membership
    }

    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>> {
        let member = desired.id_part("member")?;
        let members = self
            .api
            .members(desired.id_part("project")?, desired.id_part("group")?)
            .await?;
        Ok(members
            .into_iter()
            .find(|entry| is_member(entry, member))
            .map_or(Probe::Absent, Probe::Found))
    }

    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value> {
        let project = desired.id_part("project")?;
        let group = desired.id_part("group")?;
        let member = desired.id_part("member")?;
        let response = self.api.add_member(project, group, member).await?;
        if response.status == MEMBERSHIP_CONFLICT {
            let message = response
                .body
                .as_ref()
                .and_then(|b| b.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("conflict")
                .to_string();
            return Err(NormalizedError::from_status(
                System::Destination,
                format!("PUT {project}/{group}/members/{member}"),
                response.status,
                message,
            ));
        }
        Ok(response.body.unwrap_or_else(|| json!({ "uniqueName": member })))
    }

    async fn patch(&self, _desired: &ResourceDescriptor, observed: &Value, _diff: &[AttributeDiff]) -> CallResult<Value> {
        // Memberships carry no mutable attributes.
        Ok(observed.clone())
    }

    fn create_conflict(&self, error: &NormalizedError) -> CreateConflict {
        if error.status == Some(MEMBERSHIP_CONFLICT) {
            CreateConflict::AlreadyMember
        } else {
            CreateConflict::Genuine
        }
    }
}
