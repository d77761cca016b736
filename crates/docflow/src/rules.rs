//! Attribute derivation rules and the predicates guards are built from.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use docflow_ids::CaseId;
use docflow_store::{parse_date, AttrLookup, Attributes};

use crate::error::TransitionError;

/// Caller-supplied parameters of a transition or export.
pub type Params = BTreeMap<String, String>;

/// Case attribute names the lifecycle reads or writes.
pub mod attrs {
    pub const CREATED_AT: &str = "created_at";
    pub const CASE_ID: &str = "case_id";
    pub const ADDED_TO_PENDING_AT: &str = "added_to_pending_at";
    pub const ADDED_TO_REJECTING_AT: &str = "added_to_rejecting_at";
    pub const ISSUE_LOCATION_TYPE: &str = "issue_location_type";
    pub const DOCS_SENT_AT: &str = "docs_sent_at";
    pub const PROCESSOR_PERSON_ID: &str = "processor_person_id";
    pub const CLOSED_AT: &str = "closed_at";
    pub const RESPONDED_AT: &str = "responded_at";
    pub const RESPONSE_PROCESSOR_PERSON_ID: &str = "response_processor_person_id";
    pub const RESULT_ID: &str = "result_id";
    pub const REJECTING_EXPECTED_AT: &str = "rejecting_expected_at";
    pub const ISSUER_PERSON_ID: &str = "issuer_person_id";
    pub const ISSUED_AT: &str = "issued_at";
    pub const INSTITUTION_RGUID: &str = "institution_rguid";
    pub const OFFICE_ID: &str = "office_id";
    pub const BACK_OFFICE_ID: &str = "back_office_id";
    pub const REGISTER_TYPE: &str = "register_type";
}

/// Parameter names the lifecycle understands.
pub mod params {
    pub const OPERATOR_ID: &str = "operator_id";
    pub const EXPORTER_ID: &str = "exporter_id";
    pub const REGISTER_ID: &str = "register_id";
    pub const REGISTER_TYPE: &str = "register_type";
}

/// `issue_location_type` value for pickup at the institution itself.
pub const INSTITUTION_ISSUE: &str = "institution";

/// Named computations a derivation may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Current local timestamp
    Now,
    /// Operator or exporter performing the action
    PersonId,
    /// The case's own identifier
    CaseId,
}

/// How a derived attribute gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDirective {
    /// Fixed value; `None` clears the attribute
    Literal(Option<String>),
    Rule(Rule),
    /// Caller parameter of this name; the name itself when the parameter is missing
    FromParam(String),
}

impl ValueDirective {
    pub fn clear() -> Self {
        ValueDirective::Literal(None)
    }

    pub fn now() -> Self {
        ValueDirective::Rule(Rule::Now)
    }

    pub fn person_id() -> Self {
        ValueDirective::Rule(Rule::PersonId)
    }

    pub fn param(name: impl Into<String>) -> Self {
        ValueDirective::FromParam(name.into())
    }
}

/// Inputs available while resolving directives.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub case_id: &'a CaseId,
    pub params: &'a Params,
    /// Shared by every `Now` in one operation so all timestamps agree
    pub timestamp: &'a str,
}

/// Resolve one directive to the value to store.
pub fn resolve(directive: &ValueDirective, ctx: &RuleContext<'_>) -> Option<String> {
    match directive {
        ValueDirective::Literal(value) => value.clone(),
        ValueDirective::Rule(Rule::Now) => Some(ctx.timestamp.to_string()),
        ValueDirective::Rule(Rule::PersonId) => person_id(ctx.params).map(str::to_string),
        ValueDirective::Rule(Rule::CaseId) => Some(ctx.case_id.to_string()),
        ValueDirective::FromParam(name) => Some(
            ctx.params
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.clone()),
        ),
    }
}

/// `operator_id`, falling back to `exporter_id`.
pub fn person_id(params: &Params) -> Option<&str> {
    params
        .get(params::OPERATOR_ID)
        .or_else(|| params.get(params::EXPORTER_ID))
        .map(String::as_str)
}

/// The case has been marked for rejection.
pub fn is_rejected(attributes: &Attributes) -> bool {
    matches!(
        attributes.lookup(attrs::ADDED_TO_REJECTING_AT),
        AttrLookup::Value(_)
    )
}

/// The result is picked up at the institution rather than at the front office.
pub fn is_issued_in_institution(attributes: &Attributes) -> bool {
    attributes.raw(attrs::ISSUE_LOCATION_TYPE) == Some(INSTITUTION_ISSUE)
}

/// Both pending exits that bypass processing depend on this.
pub fn closes_directly(attributes: &Attributes) -> bool {
    is_issued_in_institution(attributes) || is_rejected(attributes)
}

/// Parse a date attribute a guard must compare.
pub fn required_date(
    case_id: &CaseId,
    attributes: &Attributes,
    name: &str,
) -> Result<NaiveDate, TransitionError> {
    let raw = attributes.raw(name);
    raw.and_then(parse_date)
        .ok_or_else(|| TransitionError::MalformedDate {
            case_id: case_id.clone(),
            attribute: name.to_string(),
            value: raw.map(str::to_string),
        })
}
