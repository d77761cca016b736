//! JSON snapshot store.
//!
//! Wraps a [`MemoryStore`] and rewrites the whole snapshot after every
//! mutating call. Intended for the CLI and local runs, not for concurrent
//! processes sharing one file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use docflow_ids::{CaseId, RegisterId};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::memory::{MemoryStore, StoreState};
use crate::store::{CaseStore, RegisterStore};
use crate::types::{Attachment, Attributes, CaseFilter, DetachOutcome, ExportStamp, Register, RegisterKey};

/// File-backed store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    persist_lock: Mutex<()>,
}

impl FileStore {
    /// Open a snapshot, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str::<StoreState>(&json)?
        } else {
            StoreState::default()
        };
        debug!(
            "Opened store {} ({} cases, {} registers)",
            path.display(),
            state.cases.len(),
            state.registers.len()
        );
        Ok(Self {
            path,
            inner: MemoryStore::from_state(state),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_case(
        &self,
        case_id: &CaseId,
        kind: impl Into<String>,
        attributes: Attributes,
    ) -> Result<()> {
        self.inner.insert_case(case_id, kind, attributes)?;
        self.persist()
    }

    pub fn case_kind(&self, case_id: &CaseId) -> Result<Option<String>> {
        self.inner.case_kind(case_id)
    }

    /// Write the current snapshot. Snapshot and write happen under one lock so
    /// the last writer always persists the newest state.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let state = self.inner.snapshot()?;
        let json = serde_json::to_string_pretty(&state)?;
        atomic_write(&self.path, json.as_bytes())?;
        debug!("Persisted store snapshot to {}", self.path.display());
        Ok(())
    }
}

impl CaseStore for FileStore {
    fn get_attributes(&self, case_id: &CaseId, names: Option<&[&str]>) -> Result<Attributes> {
        self.inner.get_attributes(case_id, names)
    }

    fn set_attributes(&self, case_ids: &[CaseId], attrs: &Attributes) -> Result<()> {
        self.inner.set_attributes(case_ids, attrs)?;
        self.persist()
    }

    fn set_attributes_if_state(
        &self,
        case_id: &CaseId,
        expected_state: Option<&str>,
        attrs: &Attributes,
    ) -> Result<bool> {
        let written = self
            .inner
            .set_attributes_if_state(case_id, expected_state, attrs)?;
        if written {
            self.persist()?;
        }
        Ok(written)
    }

    fn find_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseId>> {
        self.inner.find_cases(filter)
    }
}

impl RegisterStore for FileStore {
    fn get_register(&self, register_id: &RegisterId) -> Result<Option<Register>> {
        self.inner.get_register(register_id)
    }

    fn list_registers(&self) -> Result<Vec<Register>> {
        self.inner.list_registers()
    }

    fn attach_case(&self, case_id: &CaseId, key: &RegisterKey) -> Result<Attachment> {
        let attachment = self.inner.attach_case(case_id, key)?;
        if attachment.newly_linked {
            self.persist()?;
        }
        Ok(attachment)
    }

    fn detach_case(&self, case_id: &CaseId, register_id: &RegisterId) -> Result<DetachOutcome> {
        let outcome = self.inner.detach_case(case_id, register_id)?;
        self.persist()?;
        Ok(outcome)
    }

    fn restore_link(&self, case_id: &CaseId, register: &Register) -> Result<()> {
        self.inner.restore_link(case_id, register)?;
        self.persist()
    }

    fn open_register_of(&self, case_id: &CaseId) -> Result<Option<RegisterId>> {
        self.inner.open_register_of(case_id)
    }

    fn linked_cases(&self, register_id: &RegisterId) -> Result<Vec<CaseId>> {
        self.inner.linked_cases(register_id)
    }

    fn count_links(&self, register_id: &RegisterId) -> Result<usize> {
        self.inner.count_links(register_id)
    }

    fn commit_export(
        &self,
        register_id: &RegisterId,
        stamp: &ExportStamp,
        expected_state: &str,
        updates: &[(CaseId, Attributes)],
    ) -> Result<()> {
        self.inner
            .commit_export(register_id, stamp, expected_state, updates)?;
        self.persist()
    }
}

/// Atomic write via temp file + rename
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegisterType;
    use tempfile::TempDir;

    #[test]
    fn test_reopen_sees_persisted_state() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        let case_id = CaseId::from("7");
        let key = RegisterKey {
            institution_rguid: Some("I".to_string()),
            office_id: None,
            back_office_id: None,
            register_type: RegisterType::Requests,
        };

        let register_id = {
            let store = FileStore::open(&path).unwrap();
            store
                .insert_case(&case_id, "mfc_case", Attributes::new().with("state", "pending"))
                .unwrap();
            store.attach_case(&case_id, &key).unwrap().register.id
        };

        let reopened = FileStore::open(&path).unwrap();
        let attrs = reopened.get_attributes(&case_id, None).unwrap();
        assert_eq!(attrs.state(), Some("pending"));
        assert_eq!(reopened.open_register_of(&case_id).unwrap(), Some(register_id.clone()));
        let register = reopened.get_register(&register_id).unwrap().unwrap();
        assert_eq!(register.key, key);
    }

    #[test]
    fn test_failed_conditional_write_does_not_touch_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        let case_id = CaseId::from("1");
        store
            .insert_case(&case_id, "mfc_case", Attributes::new().with("state", "closed"))
            .unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let written = store
            .set_attributes_if_state(&case_id, Some("pending"), &Attributes::new().with("x", "1"))
            .unwrap();
        assert!(!written);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }
}
