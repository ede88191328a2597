use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Generic handle to any content item taking part in the approval workflow.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into() }
    }

    /// Parses the `type:id` form used by bulk selections and the CLI.
    pub fn parse(raw: &str) -> Option<Self> {
        let (entity_type, entity_id) = raw.trim().split_once(':')?;
        if entity_type.is_empty() || entity_id.is_empty() {
            return None;
        }
        Some(Self::new(entity_type, entity_id))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    System,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Identity performing an action. Reviewer capability is decided by the
/// access-control layer and handed in here as `can_review`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub kind: ActorKind,
    pub can_review: bool,
    pub groups: BTreeSet<String>,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: ActorId(id.into()),
            kind: ActorKind::User,
            can_review: false,
            groups: BTreeSet::new(),
        }
    }

    pub fn reviewer(id: impl Into<String>) -> Self {
        Self { can_review: true, ..Self::user(id) }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: ActorId(id.into()),
            kind: ActorKind::System,
            can_review: true,
            groups: BTreeSet::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.kind == ActorKind::System
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    ChangesRequested,
    Archived,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "changes_requested" => Some(Self::ChangesRequested),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Statuses that carry reviewer metadata.
    pub fn is_reviewed(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::ChangesRequested)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl ApprovalPriority {
    pub const ALL: [Self; 4] = [Self::Urgent, Self::High, Self::Normal, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval metadata for one entity. Only the engine produces new versions
/// of a record; `state_version` is the compare-and-swap token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub entity: EntityRef,
    pub status: ApprovalStatus,
    pub priority: ApprovalPriority,
    pub submitted_by: Option<ActorId>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<ActorId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub assigned_reviewer: Option<ActorId>,
    pub history_len: u32,
    pub history_head: Option<String>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn is_public(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn is_draft(&self) -> bool {
        self.status == ApprovalStatus::Draft
    }

    /// Review fields are only set on reviewed statuses and never predate
    /// the submission.
    pub fn check_review_fields(&self) -> Result<(), DomainError> {
        let reviewed = self.reviewed_by.is_some() || self.reviewed_at.is_some();
        if reviewed && !self.status.is_reviewed() {
            return Err(DomainError::InvariantViolation(format!(
                "{} carries review fields in status {}",
                self.entity, self.status
            )));
        }
        if let (Some(submitted_at), Some(reviewed_at)) = (self.submitted_at, self.reviewed_at) {
            if reviewed_at < submitted_at {
                return Err(DomainError::InvariantViolation(format!(
                    "{} was reviewed before it was submitted",
                    self.entity
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Submitted,
    Approved,
    Rejected,
    ChangesRequested,
    Archived,
    PriorityChanged,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Archived => "archived",
            Self::PriorityChanged => "priority_changed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "changes_requested" => Some(Self::ChangesRequested),
            "archived" => Some(Self::Archived),
            "priority_changed" => Some(Self::PriorityChanged),
            _ => None,
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a log entry came from a person or from an auto-approval rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewOrigin {
    Human,
    Rule { rule_id: String },
}

impl ReviewOrigin {
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::Human => None,
            Self::Rule { rule_id } => Some(rule_id),
        }
    }

    pub fn is_automated(&self) -> bool {
        matches!(self, Self::Rule { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntryId(pub String);

/// Immutable audit record of one change. `entry_hash` chains to the
/// previous entry of the same entity through `prev_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLogEntry {
    pub id: LogEntryId,
    pub entity: EntityRef,
    pub sequence: u32,
    pub action: LogAction,
    pub actor: ActorId,
    pub actor_kind: ActorKind,
    pub origin: ReviewOrigin,
    pub prior_status: Option<ApprovalStatus>,
    pub new_status: Option<ApprovalStatus>,
    pub notes: String,
    pub metadata: BTreeMap<String, String>,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub occurred_at: DateTime<Utc>,
}

/// Named value an entity exposes to auto-approval rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FactValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Capability any content type implements to take part in the workflow.
pub trait Approvable {
    fn entity_ref(&self) -> EntityRef;

    fn default_priority(&self) -> ApprovalPriority {
        ApprovalPriority::Normal
    }

    fn facts(&self) -> BTreeMap<String, FactValue> {
        BTreeMap::new()
    }
}

/// Owned copy of what an `Approvable` exposes, so a submission can be
/// queued (for example in a bulk request) after the content is gone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub entity: EntityRef,
    pub priority: ApprovalPriority,
    pub facts: BTreeMap<String, FactValue>,
}

impl ContentSnapshot {
    pub fn capture(item: &dyn Approvable) -> Self {
        Self { entity: item.entity_ref(), priority: item.default_priority(), facts: item.facts() }
    }
}

impl Approvable for ContentSnapshot {
    fn entity_ref(&self) -> EntityRef {
        self.entity.clone()
    }

    fn default_priority(&self) -> ApprovalPriority {
        self.priority
    }

    fn facts(&self) -> BTreeMap<String, FactValue> {
        self.facts.clone()
    }
}
