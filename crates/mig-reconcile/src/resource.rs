//! Desired-state descriptors and reconciliation results

use mig_client::{ErrorKind, NormalizedError, System};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map of a resource
pub type Attributes = Map<String, Value>;

/// Destination resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Project (top-level container)
    Project,
    /// Git repository inside a project
    Repository,
    /// Security group inside a project
    Group,
    /// Direct member of a group
    Membership,
    /// Branch policy configuration
    BranchPolicy,
    /// Wiki page
    WikiPage,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Project => "project",
            ResourceKind::Repository => "repository",
            ResourceKind::Group => "group",
            ResourceKind::Membership => "membership",
            ResourceKind::BranchPolicy => "branch_policy",
            ResourceKind::WikiPage => "wiki_page",
        })
    }
}

/// Whether an existing resource may be deleted and recreated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceIntent {
    /// Never delete
    #[default]
    Keep,
    /// Delete the existing resource, then create it from the descriptor
    Replace,
}

/// Desired state of one destination resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Kind
    pub kind: ResourceKind,
    /// Identity key parts (e.g. `project`, `name`)
    pub identity: BTreeMap<String, String>,
    /// Desired attributes, excluding identity
    pub attributes: Attributes,
    /// Replace intent
    #[serde(default)]
    pub replace: ReplaceIntent,
}

impl ResourceDescriptor {
    /// Create new descriptor
    #[must_use]
    pub fn new(kind: ResourceKind, identity: &[(&str, &str)], attributes: Attributes) -> Self {
        Self {
            kind,
            identity: identity
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            attributes,
            replace: ReplaceIntent::Keep,
        }
    }

    /// Project by name
    #[must_use]
    pub fn project(name: &str, attributes: Attributes) -> Self {
        Self::new(ResourceKind::Project, &[("name", name)], attributes)
    }

    /// Repository in a project
    #[must_use]
    pub fn repository(project: &str, name: &str, attributes: Attributes) -> Self {
        Self::new(ResourceKind::Repository, &[("project", project), ("name", name)], attributes)
    }

    /// Group in a project
    #[must_use]
    pub fn group(project: &str, name: &str, attributes: Attributes) -> Self {
        Self::new(ResourceKind::Group, &[("project", project), ("name", name)], attributes)
    }

    /// Group membership
    #[must_use]
    pub fn membership(project: &str, group: &str, member: &str) -> Self {
        Self::new(
            ResourceKind::Membership,
            &[("project", project), ("group", group), ("member", member)],
            Attributes::new(),
        )
    }

    /// Branch policy of one type on one branch
    #[must_use]
    pub fn branch_policy(project: &str, repository: &str, branch: &str, policy_type: &str, attributes: Attributes) -> Self {
        Self::new(
            ResourceKind::BranchPolicy,
            &[
                ("project", project),
                ("repository", repository),
                ("branch", branch),
                ("type", policy_type),
            ],
            attributes,
        )
    }

    /// Wiki page with content
    #[must_use]
    pub fn wiki_page(project: &str, wiki: &str, path: &str, content: &str) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert("content".to_string(), Value::String(content.to_string()));
        Self::new(
            ResourceKind::WikiPage,
            &[("project", project), ("wiki", wiki), ("path", path)],
            attributes,
        )
    }

    /// With replace intent
    #[must_use]
    pub fn with_replace(mut self, replace: ReplaceIntent) -> Self {
        self.replace = replace;
        self
    }

    /// Identity part, or a validation error naming the missing part
    ///
    /// # Errors
    /// `Validation` when the descriptor lacks the part.
    pub fn id_part(&self, part: &str) -> Result<&str, NormalizedError> {
        self.identity.get(part).map(String::as_str).ok_or_else(|| {
            NormalizedError::new(
                System::Local,
                format!("ensure {}", self.kind),
                ErrorKind::Validation,
                format!("descriptor is missing identity part '{part}'"),
            )
        })
    }

    /// Identity rendered as `a/b/c` in key order of construction
    #[must_use]
    pub fn key(&self) -> String {
        let order: &[&str] = match self.kind {
            ResourceKind::Project => &["name"],
            ResourceKind::Repository | ResourceKind::Group => &["project", "name"],
            ResourceKind::Membership => &["project", "group", "member"],
            ResourceKind::BranchPolicy => &["project", "repository", "branch", "type"],
            ResourceKind::WikiPage => &["project", "wiki", "path"],
        };
        order
            .iter()
            .filter_map(|part| self.identity.get(*part).map(String::as_str))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Reconciliation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Resource was absent and has been created
    Created,
    /// Resource already matched; nothing was written
    AlreadyConformant,
    /// Mutable fields were patched
    Updated,
    /// Left untouched for manual resolution (or a known benign conflict)
    ConflictSkipped,
    /// Reconciliation failed
    Failed,
}

impl ReconcileOutcome {
    /// Only `Failed` is a failure
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, ReconcileOutcome::Failed)
    }

    /// Whether a write was issued
    #[inline]
    #[must_use]
    pub fn wrote(&self) -> bool {
        matches!(self, ReconcileOutcome::Created | ReconcileOutcome::Updated)
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::AlreadyConformant => "already_conformant",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::ConflictSkipped => "conflict_skipped",
            ReconcileOutcome::Failed => "failed",
        })
    }
}

/// One divergent attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    /// Attribute name
    pub field: String,
    /// Observed value, `None` when absent
    pub observed: Option<Value>,
    /// Desired value
    pub desired: Value,
    /// Whether the attribute may not be changed in place
    pub protected: bool,
}

/// Result of ensuring one descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Kind
    pub kind: ResourceKind,
    /// Identity key
    pub key: String,
    /// Outcome
    pub outcome: ReconcileOutcome,
    /// Observed-vs-desired differences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<AttributeDiff>,
    /// Extra context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Failure, when `outcome` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NormalizedError>,
    /// Resource state after reconciliation, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
}

impl ReconciliationResult {
    /// Create new result
    #[must_use]
    pub fn new(descriptor: &ResourceDescriptor, outcome: ReconcileOutcome) -> Self {
        Self {
            kind: descriptor.kind,
            key: descriptor.key(),
            outcome,
            diff: Vec::new(),
            detail: None,
            error: None,
            resource: None,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failed(descriptor: &ResourceDescriptor, error: NormalizedError) -> Self {
        let mut result = Self::new(descriptor, ReconcileOutcome::Failed);
        result.error = Some(error);
        result
    }

    /// With diff
    #[must_use]
    pub fn with_diff(mut self, diff: Vec<AttributeDiff>) -> Self {
        self.diff = diff;
        self
    }

    /// With detail
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// With resource state
    #[must_use]
    pub fn with_resource(mut self, resource: Option<Value>) -> Self {
        self.resource = resource;
        self
    }

    /// Resource id from the recorded state
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.resource.as_ref()?.get("id")?.as_str()
    }
}

/// Whether `observed` satisfies `desired`
///
/// Objects conform when every desired key conforms (extra observed keys are
/// ignored); everything else compares by equality.
#[must_use]
pub fn conforms(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d
            .iter()
            .all(|(k, dv)| o.get(k).is_some_and(|ov| conforms(dv, ov))),
        (Value::Array(d), Value::Array(o)) => {
            d.len() == o.len() && d.iter().zip(o).all(|(dv, ov)| conforms(dv, ov))
        }
        _ => desired == observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn subset_objects_conform() {
        let desired = json!({"isBlocking": true, "settings": {"minimumApproverCount": 2}});
        let observed = json!({
            "id": 12,
            "isBlocking": true,
            "settings": {"minimumApproverCount": 2, "scope": [{"refName": "refs/heads/main"}]}
        });
        assert!(conforms(&desired, &observed));
    }

    #[test]
    fn differing_scalars_do_not_conform() {
        assert!(!conforms(&json!({"a": 1}), &json!({"a": 2})));
        assert!(!conforms(&json!({"a": 1}), &json!({})));
    }

    #[test]
    fn key_follows_identity_order() {
        let d = ResourceDescriptor::membership("alpha", "Contributors", "dev@example.com");
        assert_eq!(d.key(), "alpha/Contributors/dev@example.com");
    }

    #[test]
    fn only_failed_is_failure() {
        assert!(ReconcileOutcome::Failed.is_failure());
        for outcome in [
            ReconcileOutcome::Created,
            ReconcileOutcome::AlreadyConformant,
            ReconcileOutcome::Updated,
            ReconcileOutcome::ConflictSkipped,
        ] {
            assert!(!outcome.is_failure());
        }
    }

    #[test]
    fn missing_identity_part_is_validation_error() {
        let d = ResourceDescriptor::project("alpha", Attributes::new());
        let err = d.id_part("project").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn every_value_conforms_to_itself(v in value()) {
            prop_assert!(conforms(&v, &v));
        }

        #[test]
        fn extra_observed_keys_are_ignored(
            desired in prop::collection::btree_map("[a-z]{1,6}", value(), 0..4),
            extra in value(),
        ) {
            let desired = Value::Object(desired.into_iter().collect());
            let mut observed = desired.clone();
            observed["_server_field"] = extra;
            prop_assert!(conforms(&desired, &observed));
        }

        #[test]
        fn changed_scalar_breaks_conformance(key in "[a-z]{1,6}", n in any::<i64>()) {
            let mut desired = Value::Object(serde_json::Map::new());
            desired[key.as_str()] = json!(n);
            let mut observed = desired.clone();
            observed[key.as_str()] = json!(n.wrapping_add(1));
            prop_assert!(!conforms(&desired, &observed));
        }
    }
}
