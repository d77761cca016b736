//! Declarative transition table.
//!
//! Every permitted move is one [`EdgeDescriptor`] keyed by `(from, to)`, where
//! `from = None` is the edge out of "no state yet". The table is built once
//! and handed to the engine; nothing mutates it afterwards.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use docflow_ids::CaseId;
use docflow_store::{Attributes, STATE_ATTR};

use crate::error::{GuardViolation, TransitionError};
use crate::rules::{self, attrs, Params, Rule, ValueDirective};
use crate::state::CaseState;

/// Read-only view a guard evaluates.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub case_id: &'a CaseId,
    pub attributes: &'a Attributes,
    pub params: &'a Params,
    pub today: NaiveDate,
}

/// Guard predicate. `Ok(false)` refuses the edge; `Err` aborts it outright.
pub type Guard = fn(&GuardContext<'_>) -> Result<bool, TransitionError>;

/// Builds the error raised when a guard returns `false`.
pub type Rejection = fn(&GuardContext<'_>) -> GuardViolation;

/// Register side effect of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAction {
    /// Put the case into the open register for its key
    Attach,
    /// Take the case out of its register
    Detach,
}

/// Transition key: source state (`None` = no state yet) and target state.
pub type EdgeKey = (Option<CaseState>, CaseState);

#[derive(Clone)]
pub struct EdgeDescriptor {
    pub from: Option<CaseState>,
    pub to: CaseState,
    pub need: Vec<&'static str>,
    pub guard: Option<Guard>,
    pub reject_with: Option<Rejection>,
    pub set: Vec<(String, ValueDirective)>,
    pub register: Option<RegisterAction>,
}

impl std::fmt::Debug for EdgeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeDescriptor")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("need", &self.need)
            .field("guarded", &self.guard.is_some())
            .field("rejects", &self.reject_with.is_some())
            .field("set", &self.set)
            .field("register", &self.register)
            .finish()
    }
}

impl EdgeDescriptor {
    pub fn new(from: Option<CaseState>, to: CaseState) -> Self {
        Self {
            from,
            to,
            need: Vec::new(),
            guard: None,
            reject_with: None,
            set: Vec::new(),
            register: None,
        }
    }

    pub fn need(mut self, names: &[&'static str]) -> Self {
        self.need.extend_from_slice(names);
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn reject_with(mut self, rejection: Rejection) -> Self {
        self.reject_with = Some(rejection);
        self
    }

    pub fn set(mut self, name: &str, directive: ValueDirective) -> Self {
        self.set.push((name.to_string(), directive));
        self
    }

    /// Attaching reads the register key from the case, so those names are
    /// prefetched as well.
    pub fn attach(mut self) -> Self {
        self.register = Some(RegisterAction::Attach);
        self.need.extend_from_slice(&[
            attrs::INSTITUTION_RGUID,
            attrs::OFFICE_ID,
            attrs::BACK_OFFICE_ID,
            attrs::REGISTER_TYPE,
        ]);
        self
    }

    pub fn detach(mut self) -> Self {
        self.register = Some(RegisterAction::Detach);
        self
    }

    pub fn key(&self) -> EdgeKey {
        (self.from, self.to)
    }

    /// Evaluate the guard. A `false` result only fails the edge when a
    /// rejection is declared; otherwise it is logged and ignored.
    pub fn check(&self, ctx: &GuardContext<'_>) -> Result<(), TransitionError> {
        let Some(guard) = self.guard else {
            return Ok(());
        };
        if guard(ctx)? {
            return Ok(());
        }
        match self.reject_with {
            Some(rejection) => Err(TransitionError::Guard(rejection(ctx))),
            None => {
                tracing::warn!(
                    "Advisory guard failed for case {} ({:?} -> {}), proceeding",
                    ctx.case_id,
                    self.from.map(|s| s.as_str()),
                    self.to
                );
                Ok(())
            }
        }
    }
}

/// Immutable edge catalogue plus the attribute names it reads.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    edges: BTreeMap<EdgeKey, EdgeDescriptor>,
    needed: Vec<String>,
}

impl TransitionTable {
    /// Build a table. A later edge with the same key replaces an earlier one.
    pub fn new(edges: impl IntoIterator<Item = EdgeDescriptor>) -> Self {
        let edges: BTreeMap<EdgeKey, EdgeDescriptor> =
            edges.into_iter().map(|edge| (edge.key(), edge)).collect();
        let mut needed: BTreeSet<String> = BTreeSet::new();
        needed.insert(STATE_ATTR.to_string());
        for edge in edges.values() {
            needed.extend(edge.need.iter().map(|name| name.to_string()));
        }
        Self {
            edges,
            needed: needed.into_iter().collect(),
        }
    }

    pub fn edge(&self, from: Option<CaseState>, to: CaseState) -> Option<&EdgeDescriptor> {
        self.edges.get(&(from, to))
    }

    pub fn edges(&self) -> impl Iterator<Item = &EdgeDescriptor> {
        self.edges.values()
    }

    /// Union of every edge's `need` plus the state attribute.
    pub fn needed_attributes(&self) -> Vec<&str> {
        self.needed.iter().map(String::as_str).collect()
    }

    /// Targets reachable from `from`.
    pub fn targets_from(&self, from: Option<CaseState>) -> Vec<CaseState> {
        self.edges
            .keys()
            .filter(|(source, _)| *source == from)
            .map(|(_, target)| *target)
            .collect()
    }

    /// The case lifecycle graph.
    pub fn standard() -> Self {
        use CaseState::*;

        Self::new([
            EdgeDescriptor::new(None, Packaging)
                .set(attrs::CREATED_AT, ValueDirective::now())
                .set(attrs::CASE_ID, ValueDirective::Rule(Rule::CaseId)),
            EdgeDescriptor::new(Some(Packaging), Pending)
                .set(attrs::ADDED_TO_PENDING_AT, ValueDirective::now())
                .attach(),
            EdgeDescriptor::new(Some(Pending), Packaging)
                .need(&[attrs::ADDED_TO_REJECTING_AT])
                .guard(|ctx| Ok(!rules::is_rejected(ctx.attributes)))
                .reject_with(|ctx| GuardViolation::PendingPackaging {
                    case_id: ctx.case_id.clone(),
                    rejected_at: ctx
                        .attributes
                        .raw(attrs::ADDED_TO_REJECTING_AT)
                        .unwrap_or_default()
                        .to_string(),
                })
                .set(attrs::ADDED_TO_PENDING_AT, ValueDirective::clear())
                .detach(),
            EdgeDescriptor::new(Some(Pending), Processing)
                .need(&[attrs::ISSUE_LOCATION_TYPE, attrs::ADDED_TO_REJECTING_AT])
                .guard(|ctx| Ok(!rules::closes_directly(ctx.attributes)))
                .reject_with(|ctx| GuardViolation::PendingProcessing {
                    case_id: ctx.case_id.clone(),
                    issue_location: issue_location(ctx.attributes),
                    rejected: rules::is_rejected(ctx.attributes),
                })
                .set(attrs::DOCS_SENT_AT, ValueDirective::now())
                .set(attrs::PROCESSOR_PERSON_ID, ValueDirective::person_id()),
            EdgeDescriptor::new(Some(Pending), Rejecting)
                .need(&[attrs::ADDED_TO_REJECTING_AT])
                .guard(|ctx| Ok(rules::is_rejected(ctx.attributes)))
                .reject_with(|ctx| GuardViolation::PendingRejecting {
                    case_id: ctx.case_id.clone(),
                })
                .set(attrs::ADDED_TO_PENDING_AT, ValueDirective::clear())
                .detach(),
            EdgeDescriptor::new(Some(Rejecting), Pending)
                .set(attrs::ADDED_TO_PENDING_AT, ValueDirective::now())
                .attach(),
            EdgeDescriptor::new(Some(Pending), Closed)
                .need(&[attrs::ISSUE_LOCATION_TYPE, attrs::ADDED_TO_REJECTING_AT])
                .guard(|ctx| Ok(rules::closes_directly(ctx.attributes)))
                .reject_with(|ctx| GuardViolation::PendingClosed {
                    case_id: ctx.case_id.clone(),
                    issue_location: issue_location(ctx.attributes),
                })
                .set(attrs::CLOSED_AT, ValueDirective::now())
                .set(attrs::DOCS_SENT_AT, ValueDirective::now())
                .set(attrs::PROCESSOR_PERSON_ID, ValueDirective::person_id()),
            EdgeDescriptor::new(Some(Processing), Issuance)
                .set(attrs::RESPONDED_AT, ValueDirective::now())
                .set(
                    attrs::RESPONSE_PROCESSOR_PERSON_ID,
                    ValueDirective::person_id(),
                )
                .set(attrs::RESULT_ID, ValueDirective::param(attrs::RESULT_ID)),
            EdgeDescriptor::new(Some(Issuance), Rejecting)
                .need(&[attrs::REJECTING_EXPECTED_AT])
                .guard(|ctx| Ok(planned_rejection(ctx)? <= ctx.today))
                .reject_with(|ctx| GuardViolation::IssuanceRejecting {
                    case_id: ctx.case_id.clone(),
                    planned: planned_raw(ctx.attributes),
                    today: ctx.today.to_string(),
                })
                .set(attrs::ADDED_TO_REJECTING_AT, ValueDirective::now()),
            EdgeDescriptor::new(Some(Issuance), Closed)
                .need(&[attrs::REJECTING_EXPECTED_AT])
                .guard(|ctx| Ok(ctx.today < planned_rejection(ctx)?))
                .reject_with(|ctx| GuardViolation::IssuanceClosed {
                    case_id: ctx.case_id.clone(),
                    planned: planned_raw(ctx.attributes),
                    today: ctx.today.to_string(),
                })
                .set(attrs::CLOSED_AT, ValueDirective::now())
                .set(attrs::ISSUER_PERSON_ID, ValueDirective::person_id())
                .set(attrs::ISSUED_AT, ValueDirective::now()),
        ])
    }
}

fn issue_location(attributes: &Attributes) -> Option<String> {
    attributes
        .raw(attrs::ISSUE_LOCATION_TYPE)
        .map(str::to_string)
}

fn planned_rejection(ctx: &GuardContext<'_>) -> Result<NaiveDate, TransitionError> {
    rules::required_date(ctx.case_id, ctx.attributes, attrs::REJECTING_EXPECTED_AT)
}

fn planned_raw(attributes: &Attributes) -> String {
    attributes
        .raw(attrs::REJECTING_EXPECTED_AT)
        .unwrap_or_default()
        .to_string()
}
