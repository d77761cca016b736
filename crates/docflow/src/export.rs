//! Register export.
//!
//! Exporting hands a register to its institution: the register is stamped
//! and every member case leaves "pending" at once. All members are validated
//! before anything is written, and the write itself is one store call.

use std::sync::Arc;

use docflow_ids::{CaseId, RegisterId};
use docflow_store::{Attributes, ExportStamp, Store, StoreError, STATE_ATTR};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::ExportError;
use crate::rules::{self, attrs, Params};
use crate::state::CaseState;

/// Attributes read per member case.
const EXPORT_ATTRS: &[&str] = &[
    STATE_ATTR,
    attrs::ISSUE_LOCATION_TYPE,
    attrs::ADDED_TO_REJECTING_AT,
];

/// Outcome of a committed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub register_id: RegisterId,
    pub exported_at: String,
    pub exporter_id: Option<String>,
    /// Member cases and the state each one moved to
    pub cases: Vec<(CaseId, CaseState)>,
}

impl ExportSummary {
    pub fn count(&self, state: CaseState) -> usize {
        self.cases.iter().filter(|(_, s)| *s == state).count()
    }
}

pub struct ExportProcessor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ExportProcessor {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn export(&self, register_id: &RegisterId, params: &Params) -> Result<ExportSummary, ExportError> {
        let register = self
            .store
            .get_register(register_id)?
            .ok_or_else(|| ExportError::RegisterNotFound(register_id.clone()))?;
        if register.exported {
            return Err(ExportError::AlreadyExported(register_id.clone()));
        }

        let members = self.store.linked_cases(register_id)?;
        if members.is_empty() {
            return Err(ExportError::EmptyRegister(register_id.clone()));
        }

        let exported_at = self.clock.timestamp();
        let exporter_id = rules::person_id(params).map(str::to_string);

        let mut updates = Vec::with_capacity(members.len());
        let mut cases = Vec::with_capacity(members.len());
        for case_id in members {
            let next = self.validate_member(register_id, &case_id)?;
            let mut update = Attributes::new()
                .with(STATE_ATTR, next.as_str())
                .with(attrs::DOCS_SENT_AT, exported_at.as_str());
            update.set(attrs::PROCESSOR_PERSON_ID, exporter_id.clone());
            if next == CaseState::Closed {
                update.set(attrs::CLOSED_AT, Some(exported_at.clone()));
            }
            debug!("Export of {} moves case {} to {}", register_id, case_id, next);
            cases.push((case_id.clone(), next));
            updates.push((case_id, update));
        }

        let stamp = ExportStamp {
            exporter_id: exporter_id.clone(),
            exported_at: exported_at.clone(),
        };
        let pending = CaseState::Pending.as_str();
        match self.store.commit_export(register_id, &stamp, pending, &updates) {
            Ok(()) => {}
            Err(StoreError::RegisterExported(id)) => return Err(ExportError::AlreadyExported(id)),
            Err(StoreError::MembershipChanged(id)) => {
                warn!("Members of register {} changed during export", id);
                return Err(ExportError::MembershipChanged(id));
            }
            Err(StoreError::StateMismatch { case_id, found, .. }) => {
                warn!("Case {} left pending during export of {}", case_id, register_id);
                return Err(ExportError::UnexpectedCaseState {
                    case_id,
                    state: found,
                });
            }
            Err(err) => return Err(err.into()),
        }

        let summary = ExportSummary {
            register_id: register_id.clone(),
            exported_at,
            exporter_id,
            cases,
        };
        info!(
            "Exported register {}: {} cases to processing, {} closed",
            register_id,
            summary.count(CaseState::Processing),
            summary.count(CaseState::Closed)
        );
        Ok(summary)
    }

    /// Check one member and pick its next state.
    fn validate_member(&self, register_id: &RegisterId, case_id: &CaseId) -> Result<CaseState, ExportError> {
        let attributeless = || ExportError::AttributelessCase {
            register_id: register_id.clone(),
            case_id: case_id.clone(),
        };
        let all = match self.store.get_attributes(case_id, None) {
            Ok(all) => all,
            Err(StoreError::CaseNotFound(_)) => return Err(attributeless()),
            Err(err) => return Err(err.into()),
        };
        if all.is_empty() {
            return Err(attributeless());
        }

        let relevant = all.project(EXPORT_ATTRS);
        if relevant.state() != Some(CaseState::Pending.as_str()) {
            return Err(ExportError::UnexpectedCaseState {
                case_id: case_id.clone(),
                state: relevant.state().map(str::to_string),
            });
        }

        Ok(if rules::closes_directly(&relevant) {
            CaseState::Closed
        } else {
            CaseState::Processing
        })
    }
}
