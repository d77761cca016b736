//! In-process store backend.
//!
//! All tables live behind a single mutex, so every trait call is atomic with
//! respect to every other call. Used directly in tests and wrapped by
//! [`crate::FileStore`] for the CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use docflow_ids::{CaseId, RegisterId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dates::parse_date;
use crate::error::{Result, StoreError};
use crate::store::{CaseStore, RegisterStore};
use crate::types::{
    Attachment, Attributes, CaseFilter, DetachOutcome, ExportStamp, Register, RegisterKey, STATE_ATTR,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredCase {
    pub kind: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct CaseLink {
    pub register_id: RegisterId,
    pub case_id: CaseId,
}

/// Serializable contents of a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    pub cases: BTreeMap<CaseId, StoredCase>,
    #[serde(default)]
    pub registers: BTreeMap<RegisterId, Register>,
    #[serde(default)]
    pub links: BTreeSet<CaseLink>,
}

impl StoreState {
    fn case(&self, case_id: &CaseId) -> Result<&StoredCase> {
        self.cases
            .get(case_id)
            .ok_or_else(|| StoreError::CaseNotFound(case_id.clone()))
    }

    fn ensure_cases_exist(&self, case_ids: impl IntoIterator<Item = CaseId>) -> Result<()> {
        for case_id in case_ids {
            self.case(&case_id)?;
        }
        Ok(())
    }

    fn write_attributes(&mut self, case_id: &CaseId, attrs: &Attributes) -> Result<()> {
        let stored = self
            .cases
            .get_mut(case_id)
            .ok_or_else(|| StoreError::CaseNotFound(case_id.clone()))?;
        stored.attributes.merge(attrs);
        Ok(())
    }

    fn members(&self, register_id: &RegisterId) -> impl Iterator<Item = &CaseId> + '_ {
        let register_id = register_id.clone();
        self.links
            .iter()
            .filter(move |link| link.register_id == register_id)
            .map(|link| &link.case_id)
    }

    fn link_count(&self, register_id: &RegisterId) -> usize {
        self.members(register_id).count()
    }

    fn open_register_for_case(&self, case_id: &CaseId) -> Option<&Register> {
        self.links
            .iter()
            .filter(|link| &link.case_id == case_id)
            .filter_map(|link| self.registers.get(&link.register_id))
            .find(|register| register.is_open())
    }

    fn matches(&self, stored: &StoredCase, filter: &CaseFilter) -> bool {
        if let Some(kind) = &filter.kind {
            if &stored.kind != kind {
                return false;
            }
        }
        if let Some(state) = &filter.state {
            if stored.attributes.non_blank(STATE_ATTR) != Some(state.as_str()) {
                return false;
            }
        }
        if let Some(bound) = &filter.date_at_most {
            let date = stored
                .attributes
                .non_blank(&bound.attribute)
                .and_then(parse_date);
            match date {
                Some(date) if date <= bound.max => {}
                _ => return false,
            }
        }
        true
    }
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub(crate) fn snapshot(&self) -> Result<StoreState> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Register a case record the way the host system would on creation.
    pub fn insert_case(
        &self,
        case_id: &CaseId,
        kind: impl Into<String>,
        attributes: Attributes,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if state.cases.contains_key(case_id) {
            return Err(StoreError::DuplicateCase(case_id.clone()));
        }
        state.cases.insert(
            case_id.clone(),
            StoredCase {
                kind: kind.into(),
                attributes,
            },
        );
        Ok(())
    }

    /// Discriminator of a stored case.
    pub fn case_kind(&self, case_id: &CaseId) -> Result<Option<String>> {
        Ok(self.lock()?.cases.get(case_id).map(|stored| stored.kind.clone()))
    }

    pub fn case_ids(&self) -> Result<Vec<CaseId>> {
        Ok(self.lock()?.cases.keys().cloned().collect())
    }
}

impl CaseStore for MemoryStore {
    fn get_attributes(&self, case_id: &CaseId, names: Option<&[&str]>) -> Result<Attributes> {
        let state = self.lock()?;
        let stored = state.case(case_id)?;
        Ok(match names {
            Some(names) => stored.attributes.project(names),
            None => stored.attributes.clone(),
        })
    }

    fn set_attributes(&self, case_ids: &[CaseId], attrs: &Attributes) -> Result<()> {
        let mut state = self.lock()?;
        state.ensure_cases_exist(case_ids.iter().cloned())?;
        for case_id in case_ids {
            state.write_attributes(case_id, attrs)?;
        }
        debug!("Updated {} attributes on {} cases", attrs.len(), case_ids.len());
        Ok(())
    }

    fn set_attributes_if_state(
        &self,
        case_id: &CaseId,
        expected_state: Option<&str>,
        attrs: &Attributes,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let current = state.case(case_id)?.attributes.state();
        if current != expected_state {
            debug!(
                "Conditional write on case {} skipped: expected state {:?}, found {:?}",
                case_id, expected_state, current
            );
            return Ok(false);
        }
        state.write_attributes(case_id, attrs)?;
        Ok(true)
    }

    fn find_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseId>> {
        let state = self.lock()?;
        Ok(state
            .cases
            .iter()
            .filter(|(_, stored)| state.matches(stored, filter))
            .map(|(case_id, _)| case_id.clone())
            .collect())
    }
}

impl RegisterStore for MemoryStore {
    fn get_register(&self, register_id: &RegisterId) -> Result<Option<Register>> {
        Ok(self.lock()?.registers.get(register_id).cloned())
    }

    fn list_registers(&self) -> Result<Vec<Register>> {
        Ok(self.lock()?.registers.values().cloned().collect())
    }

    fn attach_case(&self, case_id: &CaseId, key: &RegisterKey) -> Result<Attachment> {
        let mut state = self.lock()?;
        state.case(case_id)?;

        let existing = state
            .registers
            .values()
            .find(|register| register.is_open() && &register.key == key)
            .cloned();
        let register = match existing {
            Some(register) => register,
            None => {
                let register = Register::open(RegisterId::generate(), key.clone());
                state
                    .registers
                    .insert(register.id.clone(), register.clone());
                info!(
                    "Created register {} ({}) for institution {:?}",
                    register.id, key.register_type, key.institution_rguid
                );
                register
            }
        };

        let newly_linked = state.links.insert(CaseLink {
            register_id: register.id.clone(),
            case_id: case_id.clone(),
        });
        if newly_linked {
            debug!("Linked case {} to register {}", case_id, register.id);
        }
        Ok(Attachment {
            register,
            newly_linked,
        })
    }

    fn detach_case(&self, case_id: &CaseId, register_id: &RegisterId) -> Result<DetachOutcome> {
        let mut state = self.lock()?;
        let link = CaseLink {
            register_id: register_id.clone(),
            case_id: case_id.clone(),
        };
        if !state.links.remove(&link) {
            return Err(StoreError::NotLinked {
                case_id: case_id.clone(),
                register_id: register_id.clone(),
            });
        }

        let remaining = state.link_count(register_id);
        let exported = state
            .registers
            .get(register_id)
            .map(|register| register.exported)
            .unwrap_or(false);
        if remaining == 0 && !exported {
            state.registers.remove(register_id);
            info!("Deleted empty register {}", register_id);
            return Ok(DetachOutcome::RegisterDeleted);
        }
        debug!(
            "Unlinked case {} from register {} ({} remaining)",
            case_id, register_id, remaining
        );
        Ok(DetachOutcome::Unlinked { remaining })
    }

    fn restore_link(&self, case_id: &CaseId, register: &Register) -> Result<()> {
        let mut state = self.lock()?;
        state.case(case_id)?;
        if !state.registers.contains_key(&register.id) {
            state
                .registers
                .insert(register.id.clone(), register.clone());
            info!("Recreated register {}", register.id);
        }
        state.links.insert(CaseLink {
            register_id: register.id.clone(),
            case_id: case_id.clone(),
        });
        debug!("Restored link of case {} to register {}", case_id, register.id);
        Ok(())
    }

    fn open_register_of(&self, case_id: &CaseId) -> Result<Option<RegisterId>> {
        let state = self.lock()?;
        Ok(state
            .open_register_for_case(case_id)
            .map(|register| register.id.clone()))
    }

    fn linked_cases(&self, register_id: &RegisterId) -> Result<Vec<CaseId>> {
        Ok(self.lock()?.members(register_id).cloned().collect())
    }

    fn count_links(&self, register_id: &RegisterId) -> Result<usize> {
        Ok(self.lock()?.link_count(register_id))
    }

    fn commit_export(
        &self,
        register_id: &RegisterId,
        stamp: &ExportStamp,
        expected_state: &str,
        updates: &[(CaseId, Attributes)],
    ) -> Result<()> {
        let mut state = self.lock()?;
        let register = state
            .registers
            .get(register_id)
            .ok_or_else(|| StoreError::RegisterNotFound(register_id.clone()))?;
        if register.exported {
            return Err(StoreError::RegisterExported(register_id.clone()));
        }
        let linked: BTreeSet<&CaseId> = state.members(register_id).collect();
        let updated: BTreeSet<&CaseId> = updates.iter().map(|(case_id, _)| case_id).collect();
        if linked != updated || updated.len() != updates.len() {
            return Err(StoreError::MembershipChanged(register_id.clone()));
        }
        for (case_id, _) in updates {
            let found = state.case(case_id)?.attributes.state();
            if found != Some(expected_state) {
                return Err(StoreError::StateMismatch {
                    case_id: case_id.clone(),
                    expected: expected_state.to_string(),
                    found: found.map(str::to_string),
                });
            }
        }

        for (case_id, attrs) in updates {
            state.write_attributes(case_id, attrs)?;
        }
        if let Some(register) = state.registers.get_mut(register_id) {
            register.exported = true;
            register.exporter_id = stamp.exporter_id.clone();
            register.exported_at = Some(stamp.exported_at.clone());
        }
        info!(
            "Committed export of register {} ({} cases)",
            register_id,
            updates.len()
        );
        Ok(())
    }
}
