//! Error types for the store layer.

use docflow_ids::{CaseId, RegisterId};
use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No case record with this identifier
    #[error("Case not found: {0}")]
    CaseNotFound(CaseId),

    /// No register record with this identifier
    #[error("Register not found: {0}")]
    RegisterNotFound(RegisterId),

    /// The case is not linked to the register
    #[error("Case {case_id} is not linked to register {register_id}")]
    NotLinked {
        case_id: CaseId,
        register_id: RegisterId,
    },

    /// The register has been exported and is read-only
    #[error("Register {0} is already exported")]
    RegisterExported(RegisterId),

    /// A case moved out of the state a batch write was validated against
    #[error("Case {case_id} is in state {found:?}, expected {expected}")]
    StateMismatch {
        case_id: CaseId,
        expected: String,
        found: Option<String>,
    },

    /// The register's members differ from the set an export was validated against
    #[error("Membership of register {0} changed during export")]
    MembershipChanged(RegisterId),

    /// Case identifier already taken
    #[error("Case already exists: {0}")]
    DuplicateCase(CaseId),

    /// IO error (snapshot file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lock guarding store state was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}
