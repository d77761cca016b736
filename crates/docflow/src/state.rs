//! Case states.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Position of a case in the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseState {
    /// Documents are being collected
    Packaging,
    /// Waiting in a register for hand-off to the institution
    Pending,
    /// Handed off, institution is working on it
    Processing,
    /// Result is back and awaits the applicant
    Issuance,
    /// Unclaimed result is being returned
    Rejecting,
    /// Terminal
    Closed,
}

impl CaseState {
    pub const ALL: [CaseState; 6] = [
        CaseState::Packaging,
        CaseState::Pending,
        CaseState::Processing,
        CaseState::Issuance,
        CaseState::Rejecting,
        CaseState::Closed,
    ];

    /// Value stored in the state attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Packaging => "packaging",
            CaseState::Pending => "pending",
            CaseState::Processing => "processing",
            CaseState::Issuance => "issuance",
            CaseState::Rejecting => "rejecting",
            CaseState::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Closed)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when parsing a CaseState from string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid state: {0}")]
pub struct StateParseError(pub String);

impl std::str::FromStr for CaseState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "packaging" => Ok(CaseState::Packaging),
            "pending" => Ok(CaseState::Pending),
            "processing" => Ok(CaseState::Processing),
            "issuance" => Ok(CaseState::Issuance),
            "rejecting" => Ok(CaseState::Rejecting),
            "closed" => Ok(CaseState::Closed),
            _ => Err(StateParseError(s.to_string())),
        }
    }
}
