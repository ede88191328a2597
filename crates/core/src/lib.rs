pub mod approvals;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    ApprovalCommand, ApprovalEngine, ApprovalQueue, ApprovalRule, BulkItem, BulkReport,
    DashboardSummary, EngineSettings, QueueRouter, RuleAction, RuleCondition, RuleDecision,
    RuleEvaluator, SubmissionFacts, TransitionResult, WorkflowAction, WorkflowError,
};
pub use audit::{verify_history, AuditStats, HistoryVerification};
pub use catalog::WorkflowCatalog;
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::approval::{
    Actor, ActorId, ActorKind, Approvable, ApprovalLogEntry, ApprovalPriority, ApprovalRecord,
    ApprovalStatus, ContentSnapshot, EntityRef, FactValue, LogAction, ReviewOrigin,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, InterfaceErrorKind};
