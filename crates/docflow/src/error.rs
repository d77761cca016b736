//! Error types for case lifecycle operations.

use docflow_ids::{CaseId, RegisterId};
use docflow_store::StoreError;
use thiserror::Error;

/// Classification of a failure, independent of the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or bad upstream data; never retried
    InvalidArgument,
    /// No edge between the current and requested state
    UnsupportedTransition,
    /// A guarded edge refused the move
    GuardViolation,
    /// Case/register data disagree with each other
    ConsistencyViolation,
    /// The store itself failed
    Store,
}

/// Business refusal raised by a guarded edge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("case {case_id} cannot return to packaging: marked for rejection at {rejected_at}")]
    PendingPackaging { case_id: CaseId, rejected_at: String },

    #[error(
        "case {case_id} cannot go to processing: issue location {issue_location:?}, marked for rejection: {rejected}"
    )]
    PendingProcessing {
        case_id: CaseId,
        issue_location: Option<String>,
        rejected: bool,
    },

    #[error("case {case_id} cannot go to rejecting: not marked for rejection")]
    PendingRejecting { case_id: CaseId },

    #[error(
        "case {case_id} cannot be closed from pending: issue location {issue_location:?} and not marked for rejection"
    )]
    PendingClosed {
        case_id: CaseId,
        issue_location: Option<String>,
    },

    #[error("case {case_id} cannot go to rejecting: rejection planned for {planned}, today is {today}")]
    IssuanceRejecting {
        case_id: CaseId,
        planned: String,
        today: String,
    },

    #[error("case {case_id} cannot be closed: rejection was due {planned}, today is {today}")]
    IssuanceClosed {
        case_id: CaseId,
        planned: String,
        today: String,
    },
}

/// Errors from single-case transitions.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("case {case_id} has kind {kind:?}, expected {expected:?}")]
    BadCaseKind {
        case_id: CaseId,
        kind: String,
        expected: String,
    },

    #[error("case {case_id} already has state {state:?}")]
    CaseAlreadyStarted { case_id: CaseId, state: String },

    #[error("unsupported transition for case {case_id}: {from:?} -> {to:?}")]
    UnsupportedTransition {
        case_id: CaseId,
        from: Option<String>,
        to: String,
    },

    #[error(transparent)]
    Guard(#[from] GuardViolation),

    #[error("case {case_id}: attribute {attribute} is not a date: {value:?}")]
    MalformedDate {
        case_id: CaseId,
        attribute: String,
        value: Option<String>,
    },

    #[error("case {case_id} is not linked to register {register_id}")]
    CaseNotInRegister {
        case_id: CaseId,
        register_id: RegisterId,
    },

    #[error("case {case_id} has no open register to leave")]
    NoOpenRegister { case_id: CaseId },

    #[error("case {case_id} changed state concurrently (expected {expected:?})")]
    ConcurrentModification {
        case_id: CaseId,
        expected: Option<String>,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl TransitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransitionError::BadCaseKind { .. } | TransitionError::MalformedDate { .. } => {
                ErrorKind::InvalidArgument
            }
            TransitionError::UnsupportedTransition { .. } => ErrorKind::UnsupportedTransition,
            TransitionError::Guard(_) => ErrorKind::GuardViolation,
            TransitionError::CaseAlreadyStarted { .. }
            | TransitionError::CaseNotInRegister { .. }
            | TransitionError::NoOpenRegister { .. }
            | TransitionError::ConcurrentModification { .. } => ErrorKind::ConsistencyViolation,
            TransitionError::Store(_) => ErrorKind::Store,
        }
    }
}

/// Errors from exporting a register.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("register not found: {0}")]
    RegisterNotFound(RegisterId),

    #[error("register {0} is already exported")]
    AlreadyExported(RegisterId),

    #[error("register {0} is empty")]
    EmptyRegister(RegisterId),

    #[error("register {register_id} contains case {case_id} without attributes")]
    AttributelessCase {
        register_id: RegisterId,
        case_id: CaseId,
    },

    #[error("case {case_id} has state {state:?}, expected \"pending\"")]
    UnexpectedCaseState {
        case_id: CaseId,
        state: Option<String>,
    },

    #[error("members of register {0} changed during export")]
    MembershipChanged(RegisterId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::RegisterNotFound(_) => ErrorKind::InvalidArgument,
            ExportError::AlreadyExported(_)
            | ExportError::EmptyRegister(_)
            | ExportError::AttributelessCase { .. }
            | ExportError::UnexpectedCaseState { .. }
            | ExportError::MembershipChanged(_) => ErrorKind::ConsistencyViolation,
            ExportError::Store(_) => ErrorKind::Store,
        }
    }
}

/// Errors loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors from the sweep scheduler lifecycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler requires a running tokio runtime")]
    NoRuntime,

    #[error("scheduler state lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, TransitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let case_id = CaseId::from("1");
        let err = TransitionError::UnsupportedTransition {
            case_id: case_id.clone(),
            from: None,
            to: "closed".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UnsupportedTransition);

        let err = TransitionError::from(GuardViolation::PendingRejecting {
            case_id: case_id.clone(),
        });
        assert_eq!(err.kind(), ErrorKind::GuardViolation);

        let err = TransitionError::MalformedDate {
            case_id,
            attribute: "rejecting_expected_at".to_string(),
            value: Some("soon".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_guard_message_carries_dates() {
        let violation = GuardViolation::IssuanceClosed {
            case_id: CaseId::from("9"),
            planned: "2024-01-01".to_string(),
            today: "2024-01-02".to_string(),
        };
        let message = violation.to_string();
        assert!(message.contains("2024-01-01"));
        assert!(message.contains("2024-01-02"));
    }
}
