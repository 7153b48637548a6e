//! Governance template: the desired destination state shared by every unit

use mig_reconcile::{Attributes, PolicyType, ReplaceIntent, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Project settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTemplate {
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// `private` or `public`
    #[serde(default = "default_visibility")]
    pub visibility: String,
    /// Process template id; fixed once the project exists
    #[serde(default)]
    pub process_template_id: Option<String>,
}

fn default_visibility() -> String {
    "private".to_string()
}

impl Default for ProjectTemplate {
    fn default() -> Self {
        Self {
            description: None,
            visibility: default_visibility(),
            process_template_id: None,
        }
    }
}

/// Group with direct members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTemplate {
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Member identities (unique names)
    #[serde(default)]
    pub members: Vec<String>,
}

/// Policy applied to the default branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPolicyTemplate {
    /// Policy type
    pub policy: PolicyType,
    /// Whether the policy blocks completion
    #[serde(default = "default_true")]
    pub blocking: bool,
    /// Type-specific settings
    #[serde(default)]
    pub settings: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Baseline wiki page
///
/// The body is supplied externally, inline or from `content_file`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WikiTemplate {
    /// Wiki name; defaults to `<project>.wiki`
    #[serde(default)]
    pub wiki: Option<String>,
    /// Page path
    #[serde(default = "default_wiki_path")]
    pub path: String,
    /// Inline body
    #[serde(default)]
    pub content: Option<String>,
    /// Body file, resolved at configuration load
    #[serde(default)]
    pub content_file: Option<PathBuf>,
}

fn default_wiki_path() -> String {
    "/Home".to_string()
}

/// Desired governance for migrated projects
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GovernanceTemplate {
    /// Project settings
    #[serde(default)]
    pub project: ProjectTemplate,
    /// Groups
    #[serde(default)]
    pub groups: Vec<GroupTemplate>,
    /// Default-branch policies
    #[serde(default)]
    pub branch_policies: Vec<BranchPolicyTemplate>,
    /// Baseline wiki page
    #[serde(default)]
    pub wiki: Option<WikiTemplate>,
}

impl GovernanceTemplate {
    /// Destination project
    #[must_use]
    pub fn project_descriptor(&self, project: &str) -> ResourceDescriptor {
        let mut attributes = Attributes::new();
        if let Some(description) = &self.project.description {
            attributes.insert("description".into(), Value::String(description.clone()));
        }
        attributes.insert("visibility".into(), Value::String(self.project.visibility.clone()));
        if let Some(template) = &self.project.process_template_id {
            attributes.insert(
                "capabilities".into(),
                json!({
                    "versioncontrol": { "sourceControlType": "Git" },
                    "processTemplate": { "templateTypeId": template }
                }),
            );
        }
        ResourceDescriptor::project(project, attributes)
    }

    /// Destination repository
    #[must_use]
    pub fn repository_descriptor(&self, project: &str, repository: &str, replace: bool) -> ResourceDescriptor {
        let intent = if replace {
            ReplaceIntent::Replace
        } else {
            ReplaceIntent::Keep
        };
        ResourceDescriptor::repository(project, repository, Attributes::new()).with_replace(intent)
    }

    /// Groups, their members and the wiki page, in reconciliation order
    #[must_use]
    pub fn governance_descriptors(&self, project: &str) -> Vec<ResourceDescriptor> {
        let mut out = Vec::new();
        for group in &self.groups {
            let mut attributes = Attributes::new();
            if let Some(description) = &group.description {
                attributes.insert("description".into(), Value::String(description.clone()));
            }
            out.push(ResourceDescriptor::group(project, &group.name, attributes));
            for member in &group.members {
                out.push(ResourceDescriptor::membership(project, &group.name, member));
            }
        }
        if let Some(wiki) = &self.wiki {
            if let Some(content) = &wiki.content {
                let name = wiki.wiki.clone().unwrap_or_else(|| format!("{project}.wiki"));
                out.push(ResourceDescriptor::wiki_page(project, &name, &wiki.path, content));
            }
        }
        out
    }

    /// Policies for one branch of one repository
    #[must_use]
    pub fn policy_descriptors(&self, project: &str, repository: &str, branch: &str) -> Vec<ResourceDescriptor> {
        self.branch_policies
            .iter()
            .map(|policy| {
                let mut attributes = Attributes::new();
                attributes.insert("isEnabled".into(), Value::Bool(true));
                attributes.insert("isBlocking".into(), Value::Bool(policy.blocking));
                attributes.insert("settings".into(), Value::Object(policy.settings.clone()));
                ResourceDescriptor::branch_policy(project, repository, branch, policy.policy.id(), attributes)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mig_reconcile::ResourceKind;

    fn template() -> GovernanceTemplate {
        GovernanceTemplate {
            groups: vec![GroupTemplate {
                name: "Maintainers".into(),
                description: None,
                members: vec!["a@example.com".into(), "b@example.com".into()],
            }],
            wiki: Some(WikiTemplate {
                content: Some("# Welcome".into()),
                ..WikiTemplate::default()
            }),
            ..GovernanceTemplate::default()
        }
    }

    #[test]
    fn governance_orders_group_before_members() {
        let kinds: Vec<_> = template()
            .governance_descriptors("alpha")
            .iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Group,
                ResourceKind::Membership,
                ResourceKind::Membership,
                ResourceKind::WikiPage
            ]
        );
    }

    #[test]
    fn wiki_defaults_to_project_wiki() {
        let descriptors = template().governance_descriptors("alpha");
        let wiki = descriptors.last().unwrap();
        assert_eq!(wiki.key(), "alpha/alpha.wiki//Home");
    }

    #[test]
    fn wiki_without_body_is_not_reconciled() {
        let mut t = template();
        t.wiki = Some(WikiTemplate::default());
        assert!(t
            .governance_descriptors("alpha")
            .iter()
            .all(|d| d.kind != ResourceKind::WikiPage));
    }

    #[test]
    fn replace_flag_sets_intent() {
        let d = template().repository_descriptor("alpha", "app", true);
        assert_eq!(d.replace, ReplaceIntent::Replace);
    }
}
