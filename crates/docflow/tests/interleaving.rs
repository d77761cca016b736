//! Register and case consistency when other writers interleave with a
//! transition or an export.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use docflow::{
    ErrorKind, ExportError, ExportProcessor, FixedClock, Params, TransitionEngine,
    TransitionError, TransitionTable,
};
use docflow_ids::{CaseId, RegisterId};
use docflow_store::{
    Attachment, Attributes, CaseFilter, CaseRecord, CaseStore, DetachOutcome, ExportStamp,
    MemoryStore, Register, RegisterKey, RegisterStore, RegisterType, Result,
};

const KIND: &str = "mfc_case";

type Hook = Box<dyn FnOnce(&MemoryStore) + Send>;

/// Memory store that can run a hook right before an export commit and can
/// refuse conditional case writes as if another writer got there first.
#[derive(Default)]
struct InterleavingStore {
    inner: MemoryStore,
    before_commit: Mutex<Option<Hook>>,
    refuse_writes: AtomicBool,
}

impl InterleavingStore {
    fn before_commit(&self, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
        *self.before_commit.lock().unwrap() = Some(Box::new(hook));
    }
}

impl CaseStore for InterleavingStore {
    fn get_attributes(&self, case_id: &CaseId, names: Option<&[&str]>) -> Result<Attributes> {
        self.inner.get_attributes(case_id, names)
    }

    fn set_attributes(&self, case_ids: &[CaseId], attrs: &Attributes) -> Result<()> {
        self.inner.set_attributes(case_ids, attrs)
    }

    fn set_attributes_if_state(
        &self,
        case_id: &CaseId,
        expected_state: Option<&str>,
        attrs: &Attributes,
    ) -> Result<bool> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner
            .set_attributes_if_state(case_id, expected_state, attrs)
    }

    fn find_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseId>> {
        self.inner.find_cases(filter)
    }
}

impl RegisterStore for InterleavingStore {
    fn get_register(&self, register_id: &RegisterId) -> Result<Option<Register>> {
        self.inner.get_register(register_id)
    }

    fn list_registers(&self) -> Result<Vec<Register>> {
        self.inner.list_registers()
    }

    fn attach_case(&self, case_id: &CaseId, key: &RegisterKey) -> Result<Attachment> {
        self.inner.attach_case(case_id, key)
    }

    fn detach_case(&self, case_id: &CaseId, register_id: &RegisterId) -> Result<DetachOutcome> {
        self.inner.detach_case(case_id, register_id)
    }

    fn restore_link(&self, case_id: &CaseId, register: &Register) -> Result<()> {
        self.inner.restore_link(case_id, register)
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
        let hook = self.before_commit.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner
            .commit_export(register_id, stamp, expected_state, updates)
    }
}

struct Fixture {
    store: Arc<InterleavingStore>,
    engine: TransitionEngine,
    exports: ExportProcessor,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InterleavingStore::default());
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()));
        let engine = TransitionEngine::new(
            Arc::new(TransitionTable::standard()),
            store.clone(),
            clock.clone(),
            KIND,
        );
        let exports = ExportProcessor::new(store.clone(), clock);
        Self {
            store,
            engine,
            exports,
        }
    }

    fn case(&self, id: &str, attrs: Attributes) -> CaseRecord {
        self.store
            .inner
            .insert_case(&CaseId::from(id), KIND, attrs)
            .unwrap();
        CaseRecord::new(id, KIND)
    }

    fn state(&self, case: &CaseRecord) -> Option<String> {
        self.store
            .get_attributes(&case.id, None)
            .unwrap()
            .state()
            .map(str::to_string)
    }
}

fn office(state: &str) -> Attributes {
    Attributes::new()
        .with("state", state)
        .with("institution_rguid", "I")
        .with("office_id", "O")
        .with("back_office_id", "B")
}

fn key(institution: &str) -> RegisterKey {
    RegisterKey {
        institution_rguid: Some(institution.to_string()),
        office_id: Some("O".to_string()),
        back_office_id: Some("B".to_string()),
        register_type: RegisterType::Cases,
    }
}

fn exporter() -> Params {
    [("exporter_id".to_string(), "exp".to_string())]
        .into_iter()
        .collect()
}

#[test]
fn export_refuses_member_that_joined_after_validation() {
    let f = Fixture::new();
    let first = f.case("1", office("packaging"));
    let attached = f.engine.apply(&first, "pending", &Params::new()).unwrap();
    let register_id = attached.register.unwrap().register_id().clone();

    let key = f.store.get_register(&register_id).unwrap().unwrap().key;
    f.store.before_commit(move |inner| {
        let late = CaseId::from("late");
        inner.insert_case(&late, KIND, office("pending")).unwrap();
        inner.attach_case(&late, &key).unwrap();
    });

    let err = f.exports.export(&register_id, &exporter()).unwrap_err();
    assert!(matches!(err, ExportError::MembershipChanged(_)));
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
    assert!(!f.store.get_register(&register_id).unwrap().unwrap().exported);
    assert_eq!(f.state(&first).as_deref(), Some("pending"));

    // The late case is still in an open register and can leave it.
    let late = CaseRecord::new("late", KIND);
    f.engine.apply(&late, "packaging", &Params::new()).unwrap();

    let summary = f.exports.export(&register_id, &exporter()).unwrap();
    assert_eq!(summary.cases.len(), 1);
    assert_eq!(f.state(&first).as_deref(), Some("processing"));
}

#[test]
fn failed_write_after_detach_restores_the_same_register() {
    let f = Fixture::new();
    let case = f.case("1", office("packaging"));
    let attached = f.engine.apply(&case, "pending", &Params::new()).unwrap();
    let register_id = attached.register.unwrap().register_id().clone();

    f.store.refuse_writes.store(true, Ordering::SeqCst);
    let err = f.engine.apply(&case, "packaging", &Params::new()).unwrap_err();
    assert!(matches!(err, TransitionError::ConcurrentModification { .. }));

    assert_eq!(f.state(&case).as_deref(), Some("pending"));
    assert_eq!(
        f.store.open_register_of(&case.id).unwrap(),
        Some(register_id.clone())
    );
    assert_eq!(f.store.list_registers().unwrap().len(), 1);
    assert_eq!(f.store.linked_cases(&register_id).unwrap(), vec![case.id.clone()]);
}

#[test]
fn failed_write_after_detach_from_named_register_returns_there() {
    let f = Fixture::new();
    let case = f.case("1", office("pending"));
    // Keyed on another institution than the case's own attributes.
    let named = f.store.attach_case(&case.id, &key("J")).unwrap().register;

    f.store.refuse_writes.store(true, Ordering::SeqCst);
    let params: Params = [("register_id".to_string(), named.id.to_string())]
        .into_iter()
        .collect();
    let err = f.engine.apply(&case, "packaging", &params).unwrap_err();
    assert!(matches!(err, TransitionError::ConcurrentModification { .. }));

    assert_eq!(f.store.list_registers().unwrap(), vec![named.clone()]);
    assert_eq!(f.store.linked_cases(&named.id).unwrap(), vec![case.id.clone()]);
}

#[test]
fn failed_write_keeps_membership_that_predates_the_attach() {
    let f = Fixture::new();
    let case = f.case("1", office("packaging"));
    let register = f.store.attach_case(&case.id, &key("I")).unwrap().register;

    f.store.refuse_writes.store(true, Ordering::SeqCst);
    let err = f.engine.apply(&case, "pending", &Params::new()).unwrap_err();
    assert!(matches!(err, TransitionError::ConcurrentModification { .. }));

    assert_eq!(f.state(&case).as_deref(), Some("packaging"));
    assert_eq!(f.store.count_links(&register.id).unwrap(), 1);
}
