use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::approvals::queue::ApprovalQueue;
use crate::approvals::rules::{ApprovalRule, RuleAction};
use crate::config::{read_toml, ConfigError};

/// Rule set and queue definitions handed to the workflow service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCatalog {
    #[serde(default)]
    pub rules: Vec<ApprovalRule>,
    #[serde(default)]
    pub queues: Vec<ApprovalQueue>,
}

impl WorkflowCatalog {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let catalog: Self = read_toml(path)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let catalog: Self = toml::from_str(raw).map_err(|source| ConfigError::ParseFile {
            path: Path::new("<inline>").to_path_buf(),
            source,
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn queue(&self, slug: &str) -> Option<&ApprovalQueue> {
        self.queues.iter().find(|queue| queue.slug == slug)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut rule_ids = BTreeSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() || rule.entity_type.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "rules need a non-empty id and entity_type".to_string(),
                ));
            }
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigError::Validation(format!("duplicate rule id `{}`", rule.id)));
            }
            if rule.action == RuleAction::AutoApprove && rule.conditions.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "rule `{}` auto-approves without any condition",
                    rule.id
                )));
            }
        }

        let mut slugs = BTreeSet::new();
        for queue in &self.queues {
            if queue.slug.trim().is_empty() {
                return Err(ConfigError::Validation("queues need a non-empty slug".to_string()));
            }
            if !slugs.insert(queue.slug.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate queue slug `{}`",
                    queue.slug
                )));
            }
            if queue.entity_types.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "queue `{}` must list at least one entity type",
                    queue.slug
                )));
            }
        }

        Ok(())
    }
}
