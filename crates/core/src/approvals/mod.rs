pub mod bulk;
pub mod engine;
pub mod queue;
pub mod rules;

pub use bulk::{with_default_notes, BulkItem, BulkItemResult, BulkReport, BulkSummary};
pub use engine::{
    ApprovalCommand, ApprovalEngine, EngineSettings, TransitionResult, WorkflowAction,
    WorkflowError,
};
pub use queue::{
    presentation_order, ApprovalQueue, DashboardSummary, QueuePage, QueueRouter, QueueSummary,
};
pub use rules::{
    ApprovalRule, RuleAction, RuleCondition, RuleDecision, RuleEvaluator, SubmissionFacts,
};

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub(crate) fn contains_key(candidate: &str, value: &str) -> bool {
    let candidate = normalize_key(candidate);
    candidate == "*" || candidate == "all" || candidate == normalize_key(value)
}
