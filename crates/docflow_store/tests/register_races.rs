//! Register find-or-create and detach-and-delete under contention.

use std::sync::{Arc, Barrier};
use std::thread;

use docflow_ids::CaseId;
use docflow_store::{
    Attributes, DetachOutcome, MemoryStore, RegisterKey, RegisterStore, RegisterType,
};

fn key() -> RegisterKey {
    RegisterKey {
        institution_rguid: Some("I".to_string()),
        office_id: Some("O".to_string()),
        back_office_id: Some("B".to_string()),
        register_type: RegisterType::Cases,
    }
}

fn store_with(count: usize) -> (Arc<MemoryStore>, Vec<CaseId>) {
    let store = Arc::new(MemoryStore::new());
    let ids: Vec<CaseId> = (0..count).map(|i| CaseId::from(format!("case-{i}"))).collect();
    for id in &ids {
        store.insert_case(id, "mfc_case", Attributes::new()).unwrap();
    }
    (store, ids)
}

#[test]
fn concurrent_attach_creates_one_register() {
    let (store, ids) = store_with(16);
    let barrier = Arc::new(Barrier::new(ids.len()));

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.attach_case(&id, &key()).unwrap().register.id
            })
        })
        .collect();
    let mut register_ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    register_ids.dedup();

    assert_eq!(register_ids.len(), 1);
    assert_eq!(store.list_registers().unwrap().len(), 1);
    assert_eq!(store.count_links(&register_ids[0]).unwrap(), ids.len());
}

#[test]
fn concurrent_detach_deletes_register_exactly_once() {
    let (store, ids) = store_with(16);
    let register_id = ids
        .iter()
        .map(|id| store.attach_case(id, &key()).unwrap().register.id)
        .last()
        .unwrap();
    let barrier = Arc::new(Barrier::new(ids.len()));

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let store = store.clone();
            let barrier = barrier.clone();
            let register_id = register_id.clone();
            thread::spawn(move || {
                barrier.wait();
                store.detach_case(&id, &register_id).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<DetachOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let deletions = outcomes
        .iter()
        .filter(|outcome| **outcome == DetachOutcome::RegisterDeleted)
        .count();
    assert_eq!(deletions, 1);
    assert!(store.get_register(&register_id).unwrap().is_none());
}
