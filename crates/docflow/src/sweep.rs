//! Expiry sweep: unclaimed results past their deadline go to "rejecting".

use std::sync::Arc;

use docflow_ids::CaseId;
use docflow_store::{Attributes, CaseFilter, Store, StoreError, STATE_ATTR};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::rules::attrs;
use crate::state::CaseState;

/// Result of one sweep run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub rejected: Vec<CaseId>,
    pub rejected_at: String,
}

/// Bulk `issuance -> rejecting` over every overdue case.
///
/// The query is the guard: cases whose deadline is missing or unparseable
/// are simply not matched.
pub struct ExpirySweep {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    case_kind: String,
}

impl ExpirySweep {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, case_kind: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            case_kind: case_kind.into(),
        }
    }

    pub fn run(&self) -> Result<SweepReport, StoreError> {
        let filter = CaseFilter::default()
            .kind(self.case_kind.as_str())
            .state(CaseState::Issuance.as_str())
            .date_at_most(attrs::REJECTING_EXPECTED_AT, self.clock.yesterday());
        let overdue = self.store.find_cases(&filter)?;
        let rejected_at = self.clock.timestamp();

        if overdue.is_empty() {
            debug!("Expiry sweep found no overdue cases");
            return Ok(SweepReport {
                rejected: overdue,
                rejected_at,
            });
        }

        let update = Attributes::new()
            .with(STATE_ATTR, CaseState::Rejecting.as_str())
            .with(attrs::ADDED_TO_REJECTING_AT, rejected_at.as_str());
        self.store.set_attributes(&overdue, &update)?;
        info!("Expiry sweep moved {} cases to rejecting", overdue.len());

        Ok(SweepReport {
            rejected: overdue,
            rejected_at,
        })
    }
}
