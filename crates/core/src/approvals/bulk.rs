use serde::Serialize;

use crate::approvals::engine::{ApprovalCommand, WorkflowAction};
use crate::domain::approval::{
    ActorId, Approvable, ApprovalRecord, ContentSnapshot, EntityRef,
};
use crate::errors::ApplicationError;

/// One line of a bulk request. Submissions carry the content they submit so
/// rules see the same facts as a direct submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkItem {
    pub entity: EntityRef,
    pub command: ApprovalCommand,
    pub content: Option<ContentSnapshot>,
}

impl BulkItem {
    pub fn new(entity: EntityRef, command: ApprovalCommand) -> Self {
        Self { entity, command, content: None }
    }

    pub fn submit(item: &dyn Approvable) -> Self {
        let content = ContentSnapshot::capture(item);
        Self {
            entity: content.entity.clone(),
            command: ApprovalCommand::Submit,
            content: Some(content),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BulkItemResult {
    pub entity: EntityRef,
    pub action: WorkflowAction,
    pub outcome: Result<ApprovalRecord, ApplicationError>,
}

impl BulkItemResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-item outcomes of a bulk request; one failure never aborts the rest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkReport {
    pub results: Vec<BulkItemResult>,
    pub success_count: usize,
    pub error_count: usize,
}

impl BulkReport {
    pub fn push(&mut self, result: BulkItemResult) {
        if result.is_success() {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.results.push(result);
    }

    pub fn summary(&self) -> BulkSummary {
        BulkSummary {
            success_count: self.success_count,
            error_count: self.error_count,
            failures: self
                .results
                .iter()
                .filter_map(|result| {
                    result.outcome.as_ref().err().map(|error| BulkFailure {
                        entity: result.entity.to_string(),
                        action: result.action,
                        error_class: error.error_class(),
                        message: error.to_string(),
                    })
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub entity: String,
    pub action: WorkflowAction,
    pub error_class: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub failures: Vec<BulkFailure>,
}

/// Fills blank notes with the wording used for bulk moderation.
pub fn with_default_notes(command: ApprovalCommand, actor: &ActorId) -> ApprovalCommand {
    fn or_default(notes: String, fallback: String) -> String {
        if notes.trim().is_empty() {
            fallback
        } else {
            notes
        }
    }

    match command {
        ApprovalCommand::Approve { notes } => ApprovalCommand::Approve {
            notes: or_default(notes, format!("Bulk approved by {actor}")),
        },
        ApprovalCommand::Reject { notes } => ApprovalCommand::Reject {
            notes: or_default(notes, format!("Bulk rejected by {actor}")),
        },
        ApprovalCommand::RequestChanges { notes } => ApprovalCommand::RequestChanges {
            notes: or_default(notes, "Changes requested".to_string()),
        },
        ApprovalCommand::Archive { notes } => ApprovalCommand::Archive {
            notes: or_default(notes, format!("Bulk archived by {actor}")),
        },
        other => other,
    }
}
