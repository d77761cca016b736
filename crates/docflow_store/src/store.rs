//! Store traits consumed by the lifecycle engine.
//!
//! The host system owns case persistence; these traits are the narrow surface
//! the engine needs from it. Operations that must not interleave (register
//! find-or-create, detach-and-maybe-delete, export commit) are single calls so
//! a backend can make each one atomic.

use docflow_ids::{CaseId, RegisterId};

use crate::error::Result;
use crate::types::{Attachment, Attributes, CaseFilter, DetachOutcome, ExportStamp, Register, RegisterKey};

/// Attribute read/write and query access to case records.
pub trait CaseStore: Send + Sync {
    /// Read a case's attributes. With `names`, only those attributes are returned.
    fn get_attributes(&self, case_id: &CaseId, names: Option<&[&str]>) -> Result<Attributes>;

    /// Overwrite the given attributes on every listed case in one operation.
    /// Attributes not named in `attrs` are left untouched.
    fn set_attributes(&self, case_ids: &[CaseId], attrs: &Attributes) -> Result<()>;

    /// Overwrite attributes only if the case's current state still equals
    /// `expected_state` (`None` = no state). Returns `false` without writing
    /// when the state has moved.
    fn set_attributes_if_state(
        &self,
        case_id: &CaseId,
        expected_state: Option<&str>,
        attrs: &Attributes,
    ) -> Result<bool>;

    /// Identifiers of all cases matching the filter.
    fn find_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseId>>;
}

/// Register records and the case-register join.
pub trait RegisterStore: Send + Sync {
    fn get_register(&self, register_id: &RegisterId) -> Result<Option<Register>>;

    fn list_registers(&self) -> Result<Vec<Register>>;

    /// Find the open register for `key`, creating it if none exists, and link
    /// the case to it. Linking an already linked case is a no-op and reports
    /// `newly_linked == false`.
    fn attach_case(&self, case_id: &CaseId, key: &RegisterKey) -> Result<Attachment>;

    /// Unlink the case; deletes the register when it was the last member.
    /// Fails with `NotLinked` when no such link exists.
    fn detach_case(&self, case_id: &CaseId, register_id: &RegisterId) -> Result<DetachOutcome>;

    /// Put back a link removed by `detach_case`. A register deleted by that
    /// detach is recreated from `register` with its original id and key.
    fn restore_link(&self, case_id: &CaseId, register: &Register) -> Result<()>;

    /// The open register the case is currently linked to, if any.
    fn open_register_of(&self, case_id: &CaseId) -> Result<Option<RegisterId>>;

    fn linked_cases(&self, register_id: &RegisterId) -> Result<Vec<CaseId>>;

    fn count_links(&self, register_id: &RegisterId) -> Result<usize>;

    /// Mark the register exported and apply every case update, all or nothing.
    /// `updates` must name exactly the cases linked to the register, otherwise
    /// `MembershipChanged`. Every updated case must still be in
    /// `expected_state`. Fails with `RegisterExported` if another export got
    /// there first.
    fn commit_export(
        &self,
        register_id: &RegisterId,
        stamp: &ExportStamp,
        expected_state: &str,
        updates: &[(CaseId, Attributes)],
    ) -> Result<()>;
}

/// Full store surface used by the engine.
pub trait Store: CaseStore + RegisterStore {}

impl<T: CaseStore + RegisterStore> Store for T {}
