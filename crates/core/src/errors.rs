use thiserror::Error;

use crate::approvals::engine::WorkflowError;
use crate::config::ConfigError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<WorkflowError> for ApplicationError {
    fn from(value: WorkflowError) -> Self {
        Self::Domain(DomainError::Workflow(value))
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl ApplicationError {
    pub fn workflow(&self) -> Option<&WorkflowError> {
        match self {
            Self::Domain(DomainError::Workflow(error)) => Some(error),
            _ => None,
        }
    }

    /// Stable snake_case name used in bulk reports and CLI output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Workflow(WorkflowError::InvalidTransition { .. })) => {
                "invalid_transition"
            }
            Self::Domain(DomainError::Workflow(WorkflowError::ConcurrentModification { .. })) => {
                "concurrent_modification"
            }
            Self::Domain(DomainError::Workflow(WorkflowError::UnauthorizedActor { .. })) => {
                "unauthorized_actor"
            }
            Self::Domain(DomainError::Workflow(WorkflowError::Validation { .. })) => "validation",
            Self::Domain(DomainError::InvariantViolation(_)) => "invariant_violation",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// What an operator or API caller is told went wrong, independent of transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    ServiceUnavailable,
    Internal,
}

impl InterfaceErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }

    fn of(error: &ApplicationError) -> Self {
        match error {
            ApplicationError::Domain(DomainError::Workflow(workflow)) => match workflow {
                WorkflowError::UnauthorizedActor { .. } => Self::Forbidden,
                WorkflowError::ConcurrentModification { .. } => Self::Conflict,
                WorkflowError::InvalidTransition { .. } | WorkflowError::Validation { .. } => {
                    Self::BadRequest
                }
            },
            ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest,
            ApplicationError::NotFound(_) => Self::NotFound,
            ApplicationError::Persistence(_) => Self::ServiceUnavailable,
            ApplicationError::Configuration(_) => Self::Internal,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{} [{correlation_id}]: {detail}", kind.as_str())]
pub struct InterfaceError {
    pub kind: InterfaceErrorKind,
    pub detail: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            InterfaceErrorKind::BadRequest => "The review action was rejected as invalid.",
            InterfaceErrorKind::Forbidden => "This reviewer may not act on the item.",
            InterfaceErrorKind::NotFound => "The requested item does not exist.",
            InterfaceErrorKind::Conflict => {
                "Someone else updated the item first; reload and retry."
            }
            InterfaceErrorKind::ServiceUnavailable => "Storage is unavailable right now.",
            InterfaceErrorKind::Internal => "Waymark is misconfigured; see the logs.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let kind = InterfaceErrorKind::of(&self);
        let detail = match self {
            Self::NotFound(detail) | Self::Persistence(detail) | Self::Configuration(detail) => {
                detail
            }
            Self::Domain(error) => error.to_string(),
        };
        InterfaceError { kind, detail, correlation_id: correlation_id.into() }
    }
}
