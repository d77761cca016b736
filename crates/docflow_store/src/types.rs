//! Records exchanged with the store.

use chrono::NaiveDate;
use docflow_ids::{CaseId, RegisterId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the attribute holding a case's position in the transition graph.
pub const STATE_ATTR: &str = "state";

// ============================================================================
// Case attributes
// ============================================================================

/// How an attribute appears in a case's attribute bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrLookup<'a> {
    /// Never set
    Absent,
    /// Set, but null or whitespace-only
    Blank,
    /// Set to a non-blank value
    Value(&'a str),
}

/// Sparse, schemaless attribute bag of a case.
///
/// A key mapped to `None` is present-but-null, which is distinct from an
/// absent key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Option<String>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), None);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        self.0.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> AttrLookup<'_> {
        match self.0.get(name) {
            None => AttrLookup::Absent,
            Some(None) => AttrLookup::Blank,
            Some(Some(value)) if value.trim().is_empty() => AttrLookup::Blank,
            Some(Some(value)) => AttrLookup::Value(value.as_str()),
        }
    }

    /// Raw stored value, including blank strings.
    pub fn raw(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|value| value.as_deref())
    }

    /// Value if present and non-blank.
    pub fn non_blank(&self, name: &str) -> Option<&str> {
        match self.lookup(name) {
            AttrLookup::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Current state of the case, `None` when unset or blank.
    pub fn state(&self) -> Option<&str> {
        self.non_blank(STATE_ATTR)
    }

    /// Copy of the listed attributes only.
    pub fn project(&self, names: &[&str]) -> Attributes {
        let map = names
            .iter()
            .filter_map(|name| {
                self.0
                    .get_key_value(*name)
                    .map(|(key, value)| (key.clone(), value.clone()))
            })
            .collect();
        Attributes(map)
    }

    /// Overwrite the attributes named in `other`, leaving the rest untouched.
    pub fn merge(&mut self, other: &Attributes) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Attributes(iter.into_iter().collect())
    }
}

/// Case handle as presented by the host: identifier plus discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    pub kind: String,
}

impl CaseRecord {
    pub fn new(id: impl Into<CaseId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Upper bound on a date-valued attribute (inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateBound {
    pub attribute: String,
    pub max: NaiveDate,
}

/// Filter for bulk case queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseFilter {
    pub kind: Option<String>,
    pub state: Option<String>,
    pub date_at_most: Option<DateBound>,
}

impl CaseFilter {
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn date_at_most(mut self, attribute: impl Into<String>, max: NaiveDate) -> Self {
        self.date_at_most = Some(DateBound {
            attribute: attribute.into(),
            max,
        });
        self
    }
}

// ============================================================================
// Registers
// ============================================================================

/// Kind of outbound correspondence batched in a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    Cases,
    Requests,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Cases => "cases",
            RegisterType::Requests => "requests",
        }
    }
}

impl Default for RegisterType {
    fn default() -> Self {
        RegisterType::Cases
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegisterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cases" => Ok(RegisterType::Cases),
            "requests" => Ok(RegisterType::Requests),
            other => Err(format!("unknown register type: {other}")),
        }
    }
}

/// Identity of an open register: at most one unexported register per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterKey {
    pub institution_rguid: Option<String>,
    pub office_id: Option<String>,
    pub back_office_id: Option<String>,
    pub register_type: RegisterType,
}

/// A batch unit of outbound correspondence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub id: RegisterId,
    #[serde(flatten)]
    pub key: RegisterKey,
    pub exported: bool,
    pub exporter_id: Option<String>,
    pub exported_at: Option<String>,
}

impl Register {
    pub fn open(id: RegisterId, key: RegisterKey) -> Self {
        Self {
            id,
            key,
            exported: false,
            exporter_id: None,
            exported_at: None,
        }
    }

    /// True when new cases may still be attached.
    pub fn is_open(&self) -> bool {
        !self.exported
    }
}

/// Result of linking a case into a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub register: Register,
    /// False when the case was already linked and nothing changed
    pub newly_linked: bool,
}

/// Who exported a register and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStamp {
    pub exporter_id: Option<String>,
    pub exported_at: String,
}

/// Result of removing a case from a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    /// Link removed; the register keeps `remaining` members
    Unlinked { remaining: usize },
    /// The case was the last member; the register was deleted
    RegisterDeleted,
}
