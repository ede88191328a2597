use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::approvals::rules::{RuleAction, RuleDecision};
use crate::audit::hash_entry;
use crate::domain::approval::{
    Actor, ActorId, ApprovalLogEntry, ApprovalPriority, ApprovalRecord, ApprovalStatus, EntityRef,
    LogAction, LogEntryId, ReviewOrigin,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub require_notes_on_reject: bool,
    pub require_notes_on_request_changes: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { require_notes_on_reject: true, require_notes_on_request_changes: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Submit,
    Approve,
    Reject,
    RequestChanges,
    Archive,
    ChangePriority,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestChanges => "request_changes",
            Self::Archive => "archive",
            Self::ChangePriority => "change_priority",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submit" => Some(Self::Submit),
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "request_changes" => Some(Self::RequestChanges),
            "archive" => Some(Self::Archive),
            "change_priority" => Some(Self::ChangePriority),
            _ => None,
        }
    }

    fn requires_reviewer(&self) -> bool {
        matches!(self, Self::Approve | Self::Reject | Self::RequestChanges | Self::ChangePriority)
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of operations callers can request on an entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalCommand {
    Submit,
    Approve {
        #[serde(default)]
        notes: String,
    },
    Reject {
        #[serde(default)]
        notes: String,
    },
    RequestChanges {
        #[serde(default)]
        notes: String,
    },
    Archive {
        #[serde(default)]
        notes: String,
    },
    ChangePriority {
        priority: ApprovalPriority,
    },
}

impl ApprovalCommand {
    pub fn action(&self) -> WorkflowAction {
        match self {
            Self::Submit => WorkflowAction::Submit,
            Self::Approve { .. } => WorkflowAction::Approve,
            Self::Reject { .. } => WorkflowAction::Reject,
            Self::RequestChanges { .. } => WorkflowAction::RequestChanges,
            Self::Archive { .. } => WorkflowAction::Archive,
            Self::ChangePriority { .. } => WorkflowAction::ChangePriority,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {action} an entity in status {status}")]
    InvalidTransition { status: ApprovalStatus, action: WorkflowAction },
    #[error("{entity} changed after version {expected_version} was loaded")]
    ConcurrentModification { entity: EntityRef, expected_version: u32 },
    #[error("actor `{actor}` is not authorized to {action}")]
    UnauthorizedActor { actor: ActorId, action: WorkflowAction },
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
}

/// Next version of a record plus the log entries that must be stored with it.
/// `expected_version` is the version the change was planned against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub expected_version: u32,
    pub record: ApprovalRecord,
    pub entries: Vec<ApprovalLogEntry>,
}

impl TransitionResult {
    /// Folds a change planned on top of `self.record` into one commit unit.
    pub fn then(mut self, next: TransitionResult) -> Self {
        self.record = next.record;
        self.entries.extend(next.entries);
        self
    }

    pub fn entity(&self) -> &EntityRef {
        &self.record.entity
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
    Approve,
    Reject,
    RequestChanges,
}

impl Verdict {
    fn action(self) -> WorkflowAction {
        match self {
            Self::Approve => WorkflowAction::Approve,
            Self::Reject => WorkflowAction::Reject,
            Self::RequestChanges => WorkflowAction::RequestChanges,
        }
    }

    fn log_action(self) -> LogAction {
        match self {
            Self::Approve => LogAction::Approved,
            Self::Reject => LogAction::Rejected,
            Self::RequestChanges => LogAction::ChangesRequested,
        }
    }
}

struct Change<'a> {
    action: LogAction,
    actor: &'a Actor,
    origin: ReviewOrigin,
    notes: String,
    metadata: BTreeMap<String, String>,
}

/// Deterministic approval state machine. Plans changes; persisting them is
/// the caller's job.
#[derive(Clone, Debug, Default)]
pub struct ApprovalEngine {
    settings: EngineSettings,
}

impl ApprovalEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn register(&self, entity: EntityRef, priority: ApprovalPriority) -> ApprovalRecord {
        let now = Utc::now();
        ApprovalRecord {
            entity,
            status: ApprovalStatus::Draft,
            priority,
            submitted_by: None,
            submitted_at: None,
            reviewed_by: None,
            reviewed_at: None,
            assigned_reviewer: None,
            history_len: 0,
            history_head: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(
        &self,
        record: &ApprovalRecord,
        command: &ApprovalCommand,
        actor: &Actor,
    ) -> Result<TransitionResult, WorkflowError> {
        match command {
            ApprovalCommand::Submit => self.submit(record, actor),
            ApprovalCommand::Approve { notes } => self.approve(record, actor, notes),
            ApprovalCommand::Reject { notes } => self.reject(record, actor, notes),
            ApprovalCommand::RequestChanges { notes } => self.request_changes(record, actor, notes),
            ApprovalCommand::Archive { notes } => self.archive(record, actor, notes),
            ApprovalCommand::ChangePriority { priority } => {
                self.change_priority(record, actor, *priority)
            }
        }
    }

    pub fn submit(
        &self,
        record: &ApprovalRecord,
        actor: &Actor,
    ) -> Result<TransitionResult, WorkflowError> {
        self.plan_submit(record, actor, None)
    }

    /// Submits and applies the outcome of rule evaluation in the same unit.
    pub fn submit_with_decision(
        &self,
        record: &ApprovalRecord,
        actor: &Actor,
        decision: Option<&RuleDecision>,
        system: &Actor,
    ) -> Result<TransitionResult, WorkflowError> {
        let Some(decision) = decision else {
            return self.plan_submit(record, actor, None);
        };

        match &decision.action {
            RuleAction::AssignReviewer { reviewer } => {
                self.plan_submit(record, actor, Some((reviewer, decision)))
            }
            RuleAction::AutoApprove => {
                let submitted = self.plan_submit(record, actor, None)?;
                let reviewed =
                    self.rule_review(&submitted.record, system, Verdict::Approve, decision)?;
                Ok(submitted.then(reviewed))
            }
            RuleAction::AutoReject => {
                let submitted = self.plan_submit(record, actor, None)?;
                let reviewed =
                    self.rule_review(&submitted.record, system, Verdict::Reject, decision)?;
                Ok(submitted.then(reviewed))
            }
        }
    }

    pub fn approve(
        &self,
        record: &ApprovalRecord,
        reviewer: &Actor,
        notes: &str,
    ) -> Result<TransitionResult, WorkflowError> {
        self.human_review(record, reviewer, Verdict::Approve, notes)
    }

    pub fn reject(
        &self,
        record: &ApprovalRecord,
        reviewer: &Actor,
        notes: &str,
    ) -> Result<TransitionResult, WorkflowError> {
        self.human_review(record, reviewer, Verdict::Reject, notes)
    }

    pub fn request_changes(
        &self,
        record: &ApprovalRecord,
        reviewer: &Actor,
        notes: &str,
    ) -> Result<TransitionResult, WorkflowError> {
        self.human_review(record, reviewer, Verdict::RequestChanges, notes)
    }

    pub fn archive(
        &self,
        record: &ApprovalRecord,
        actor: &Actor,
        notes: &str,
    ) -> Result<TransitionResult, WorkflowError> {
        next_status(record.status, WorkflowAction::Archive)?;

        let mut next = record.clone();
        next.status = ApprovalStatus::Archived;
        next.reviewed_by = None;
        next.reviewed_at = None;
        next.assigned_reviewer = None;

        Ok(seal(
            record,
            next,
            Change {
                action: LogAction::Archived,
                actor,
                origin: ReviewOrigin::Human,
                notes: notes.trim().to_string(),
                metadata: BTreeMap::new(),
            },
        ))
    }

    pub fn change_priority(
        &self,
        record: &ApprovalRecord,
        actor: &Actor,
        priority: ApprovalPriority,
    ) -> Result<TransitionResult, WorkflowError> {
        authorize(actor, WorkflowAction::ChangePriority)?;
        next_status(record.status, WorkflowAction::ChangePriority)?;
        if record.priority == priority {
            return Err(WorkflowError::Validation {
                field: "priority".to_string(),
                reason: format!("priority is already {priority}"),
            });
        }

        let mut next = record.clone();
        next.priority = priority;

        let mut metadata = BTreeMap::new();
        metadata.insert("old_priority".to_string(), record.priority.as_str().to_string());
        metadata.insert("new_priority".to_string(), priority.as_str().to_string());

        Ok(seal(
            record,
            next,
            Change {
                action: LogAction::PriorityChanged,
                actor,
                origin: ReviewOrigin::Human,
                notes: format!("Priority changed from {} to {}", record.priority, priority),
                metadata,
            },
        ))
    }

    fn plan_submit(
        &self,
        record: &ApprovalRecord,
        actor: &Actor,
        assignment: Option<(&ActorId, &RuleDecision)>,
    ) -> Result<TransitionResult, WorkflowError> {
        next_status(record.status, WorkflowAction::Submit)?;

        let mut next = record.clone();
        next.status = ApprovalStatus::Pending;
        next.submitted_by = Some(actor.id.clone());
        next.submitted_at = Some(Utc::now());
        next.reviewed_by = None;
        next.reviewed_at = None;
        next.assigned_reviewer = assignment.map(|(reviewer, _)| reviewer.clone());

        let mut metadata = BTreeMap::new();
        if let Some((reviewer, decision)) = assignment {
            metadata.insert("assigned_reviewer".to_string(), reviewer.0.clone());
            metadata.insert("rule_id".to_string(), decision.rule_id.clone());
        }

        Ok(seal(
            record,
            next,
            Change {
                action: LogAction::Submitted,
                actor,
                origin: ReviewOrigin::Human,
                notes: "Submitted for review".to_string(),
                metadata,
            },
        ))
    }

    fn human_review(
        &self,
        record: &ApprovalRecord,
        reviewer: &Actor,
        verdict: Verdict,
        notes: &str,
    ) -> Result<TransitionResult, WorkflowError> {
        let action = verdict.action();
        authorize(reviewer, action)?;
        next_status(record.status, action)?;

        let notes = notes.trim();
        let notes_required = match verdict {
            Verdict::Approve => false,
            Verdict::Reject => self.settings.require_notes_on_reject,
            Verdict::RequestChanges => self.settings.require_notes_on_request_changes,
        };
        if notes_required && notes.is_empty() {
            return Err(WorkflowError::Validation {
                field: "notes".to_string(),
                reason: format!("notes are required to {action}"),
            });
        }

        let notes = notes.to_string();
        Ok(review(record, reviewer, verdict, ReviewOrigin::Human, notes, BTreeMap::new()))
    }

    fn rule_review(
        &self,
        record: &ApprovalRecord,
        system: &Actor,
        verdict: Verdict,
        decision: &RuleDecision,
    ) -> Result<TransitionResult, WorkflowError> {
        let action = verdict.action();
        if !system.is_system() {
            return Err(WorkflowError::UnauthorizedActor { actor: system.id.clone(), action });
        }
        next_status(record.status, action)?;

        let verb = match verdict {
            Verdict::Approve => "Auto-approved",
            Verdict::Reject => "Auto-rejected",
            Verdict::RequestChanges => "Changes requested",
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("rule_name".to_string(), decision.rule_name.clone());

        Ok(review(
            record,
            system,
            verdict,
            ReviewOrigin::Rule { rule_id: decision.rule_id.clone() },
            format!("{verb} by rule `{}`", decision.rule_name),
            metadata,
        ))
    }
}

/// The approval state machine. ARCHIVED is terminal.
fn next_status(
    current: ApprovalStatus,
    action: WorkflowAction,
) -> Result<ApprovalStatus, WorkflowError> {
    use ApprovalStatus::{Approved, Archived, ChangesRequested, Draft, Pending, Rejected};
    use WorkflowAction::{Approve, Archive, ChangePriority, Reject, RequestChanges, Submit};

    let next = match (current, action) {
        (Draft, Submit) | (ChangesRequested, Submit) => Pending,
        (Pending, Approve) => Approved,
        (Pending, Reject) => Rejected,
        (Pending, RequestChanges) => ChangesRequested,
        (Archived, Archive) | (Archived, ChangePriority) => {
            return Err(WorkflowError::InvalidTransition { status: current, action });
        }
        (_, Archive) => Archived,
        (status, ChangePriority) => status,
        _ => return Err(WorkflowError::InvalidTransition { status: current, action }),
    };

    Ok(next)
}

fn authorize(actor: &Actor, action: WorkflowAction) -> Result<(), WorkflowError> {
    if action.requires_reviewer() && !actor.can_review {
        return Err(WorkflowError::UnauthorizedActor { actor: actor.id.clone(), action });
    }
    Ok(())
}

fn review(
    record: &ApprovalRecord,
    reviewer: &Actor,
    verdict: Verdict,
    origin: ReviewOrigin,
    notes: String,
    metadata: BTreeMap<String, String>,
) -> TransitionResult {
    let now = Utc::now();
    let reviewed_at = record.submitted_at.map_or(now, |submitted_at| submitted_at.max(now));

    let mut next = record.clone();
    next.status = match verdict {
        Verdict::Approve => ApprovalStatus::Approved,
        Verdict::Reject => ApprovalStatus::Rejected,
        Verdict::RequestChanges => ApprovalStatus::ChangesRequested,
    };
    next.reviewed_by = Some(reviewer.id.clone());
    next.reviewed_at = Some(reviewed_at);

    let change = Change { action: verdict.log_action(), actor: reviewer, origin, notes, metadata };
    seal(record, next, change)
}

fn seal(record: &ApprovalRecord, mut next: ApprovalRecord, change: Change<'_>) -> TransitionResult {
    let now = Utc::now();
    let sequence = record.history_len.saturating_add(1);
    let status_changed = next.status != record.status;

    let mut entry = ApprovalLogEntry {
        id: LogEntryId(Uuid::new_v4().to_string()),
        entity: record.entity.clone(),
        sequence,
        action: change.action,
        actor: change.actor.id.clone(),
        actor_kind: change.actor.kind,
        origin: change.origin,
        prior_status: Some(record.status),
        new_status: Some(next.status),
        notes: change.notes,
        metadata: change.metadata,
        prev_hash: record.history_head.clone(),
        entry_hash: String::new(),
        occurred_at: now,
    };
    if !status_changed {
        entry.metadata.insert("status_unchanged".to_string(), "true".to_string());
    }
    entry.entry_hash = hash_entry(&entry);

    next.history_len = sequence;
    next.history_head = Some(entry.entry_hash.clone());
    next.state_version = record.state_version.saturating_add(1);
    next.updated_at = now;

    TransitionResult { expected_version: record.state_version, record: next, entries: vec![entry] }
}
