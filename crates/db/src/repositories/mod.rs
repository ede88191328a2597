use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use waymark_core::approvals::engine::{TransitionResult, WorkflowError};
use waymark_core::domain::approval::{
    ActorId, ApprovalLogEntry, ApprovalPriority, ApprovalRecord, ApprovalStatus, EntityRef,
};
use waymark_core::errors::ApplicationError;

pub mod approval;
pub mod memory;

pub use approval::SqlApprovalRepository;
pub use memory::InMemoryApprovalRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} changed after version {expected_version} was loaded")]
    Conflict { entity: EntityRef, expected_version: u32 },
    #[error("{0} is already registered")]
    Duplicate(EntityRef),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { entity, expected_version } => {
                WorkflowError::ConcurrentModification { entity, expected_version }.into()
            }
            RepositoryError::Duplicate(entity) => WorkflowError::Validation {
                field: "entity".to_string(),
                reason: format!("{entity} is already registered"),
            }
            .into(),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Narrows `list_records`; empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub entity_types: Vec<String>,
    pub status: Option<ApprovalStatus>,
    pub priority: Option<ApprovalPriority>,
    pub submitted_by: Option<ActorId>,
}

impl RecordFilter {
    pub fn with_status(status: ApprovalStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn matches(&self, record: &ApprovalRecord) -> bool {
        (self.entity_types.is_empty()
            || self.entity_types.iter().any(|entity_type| {
                entity_type.eq_ignore_ascii_case(&record.entity.entity_type)
            }))
            && self.status.map_or(true, |status| record.status == status)
            && self.priority.map_or(true, |priority| record.priority == priority)
            && self
                .submitted_by
                .as_ref()
                .map_or(true, |actor| record.submitted_by.as_ref() == Some(actor))
    }
}

/// Storage for approval records and their append-only log.
///
/// `commit_transition` is the only way to change a stored record: it must
/// write the next record version and every log entry atomically, and only
/// when the stored `state_version` still equals `expected_version`.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_record(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRecord>, RepositoryError>;

    async fn insert_record(&self, record: &ApprovalRecord) -> Result<(), RepositoryError>;

    async fn commit_transition(&self, transition: &TransitionResult)
        -> Result<(), RepositoryError>;

    async fn list_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;

    /// Entries for one entity, oldest first.
    async fn history(&self, entity: &EntityRef) -> Result<Vec<ApprovalLogEntry>, RepositoryError>;

    async fn recent_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApprovalLogEntry>, RepositoryError>;

    /// Approvals ever recorded for submissions made by `submitter`, including
    /// items archived since.
    async fn count_approved_for_submitter(
        &self,
        submitter: &ActorId,
    ) -> Result<u32, RepositoryError>;
}
