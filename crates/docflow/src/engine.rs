//! Transition engine.
//!
//! One transition is: prefetch the table's attribute set, look up the edge,
//! check its guard, resolve its derivations, apply its register action, and
//! write everything with a single conditional update keyed on the state that
//! was read. Transitions on the same case are serialized in-process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use docflow_ids::CaseId;
use docflow_store::{Attributes, CaseRecord, Store, STATE_ATTR};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, TransitionError};
use crate::registers::{register_key, RegisterBatcher, RegisterChange};
use crate::rules::{self, Params, RuleContext};
use crate::state::CaseState;
use crate::table::{GuardContext, RegisterAction, TransitionTable};

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub case_id: CaseId,
    pub from: Option<CaseState>,
    pub to: CaseState,
    /// Attributes written, state included
    pub written: Attributes,
    pub register: Option<RegisterChange>,
}

/// Per-case mutexes, dropped again once nobody holds or waits on them.
#[derive(Debug, Default)]
struct CaseLocks {
    locks: Mutex<HashMap<CaseId, Arc<Mutex<()>>>>,
}

impl CaseLocks {
    fn with_case<T>(&self, case_id: &CaseId, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(case_id.clone()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: no one else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(case_id);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct TransitionEngine {
    table: Arc<TransitionTable>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    batcher: RegisterBatcher,
    case_kind: String,
    locks: CaseLocks,
}

impl TransitionEngine {
    pub fn new(
        table: Arc<TransitionTable>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        case_kind: impl Into<String>,
    ) -> Self {
        Self {
            table,
            batcher: RegisterBatcher::new(store.clone()),
            store,
            clock,
            case_kind: case_kind.into(),
            locks: CaseLocks::default(),
        }
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn case_kind(&self) -> &str {
        &self.case_kind
    }

    /// Drive the edge out of "no state yet". Fails if the case already has a state.
    pub fn start(&self, case: &CaseRecord) -> Result<TransitionOutcome> {
        self.check_kind(case)?;
        self.locks.with_case(&case.id, || {
            self.apply_locked(case, CaseState::Packaging.as_str(), &Params::new(), true)
        })
    }

    /// Move a case to `target` along a declared edge.
    pub fn apply(&self, case: &CaseRecord, target: &str, params: &Params) -> Result<TransitionOutcome> {
        self.check_kind(case)?;
        self.locks
            .with_case(&case.id, || self.apply_locked(case, target, params, false))
    }

    fn check_kind(&self, case: &CaseRecord) -> Result<()> {
        if case.kind != self.case_kind {
            return Err(TransitionError::BadCaseKind {
                case_id: case.id.clone(),
                kind: case.kind.clone(),
                expected: self.case_kind.clone(),
            });
        }
        Ok(())
    }

    fn apply_locked(
        &self,
        case: &CaseRecord,
        target: &str,
        params: &Params,
        initial: bool,
    ) -> Result<TransitionOutcome> {
        let needed = self.table.needed_attributes();
        let attributes = self.store.get_attributes(&case.id, Some(needed.as_slice()))?;
        let current = attributes.state();

        if initial {
            if let Some(state) = current {
                return Err(TransitionError::CaseAlreadyStarted {
                    case_id: case.id.clone(),
                    state: state.to_string(),
                });
            }
        }

        let unsupported = || TransitionError::UnsupportedTransition {
            case_id: case.id.clone(),
            from: current.map(str::to_string),
            to: target.to_string(),
        };
        let from = match current {
            Some(raw) => Some(raw.parse::<CaseState>().map_err(|_| unsupported())?),
            None => None,
        };
        let to = target.parse::<CaseState>().map_err(|_| unsupported())?;
        let edge = self.table.edge(from, to).ok_or_else(unsupported)?;

        edge.check(&GuardContext {
            case_id: &case.id,
            attributes: &attributes,
            params,
            today: self.clock.today(),
        })?;

        let timestamp = self.clock.timestamp();
        let rule_ctx = RuleContext {
            case_id: &case.id,
            params,
            timestamp: &timestamp,
        };
        let mut update: Attributes = edge
            .set
            .iter()
            .map(|(name, directive)| (name.clone(), rules::resolve(directive, &rule_ctx)))
            .collect();
        update.set(STATE_ATTR, Some(to.as_str().to_string()));

        let change = match edge.register {
            None => None,
            Some(RegisterAction::Attach) => {
                let key = register_key(&attributes, params);
                Some(self.batcher.attach(&case.id, &key)?)
            }
            Some(RegisterAction::Detach) => {
                let register_id = self.batcher.register_to_leave(&case.id, params)?;
                Some(self.batcher.detach(&case.id, &register_id)?)
            }
        };

        let written = self
            .store
            .set_attributes_if_state(&case.id, current, &update);
        let failure = match written {
            Ok(true) => None,
            Ok(false) => Some(TransitionError::ConcurrentModification {
                case_id: case.id.clone(),
                expected: current.map(str::to_string),
            }),
            Err(err) => Some(TransitionError::Store(err)),
        };
        if let Some(err) = failure {
            warn!(
                "Transition {:?} -> {} on case {} failed at write: {}",
                current, to, case.id, err
            );
            if let Some(change) = &change {
                self.batcher.revert(&case.id, change);
            }
            return Err(err);
        }

        info!(
            "Case {} moved {} -> {}",
            case.id,
            current.unwrap_or("<none>"),
            to
        );
        debug!("Case {} written attributes: {:?}", case.id, update);

        Ok(TransitionOutcome {
            case_id: case.id.clone(),
            from,
            to,
            written: update,
            register: change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{ErrorKind, GuardViolation};
    use chrono::NaiveDate;
    use docflow_store::{CaseStore, MemoryStore, RegisterStore};

    fn engine_with(store: Arc<MemoryStore>) -> TransitionEngine {
        let clock = FixedClock::on(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        TransitionEngine::new(
            Arc::new(TransitionTable::standard()),
            store,
            Arc::new(clock),
            "mfc_case",
        )
    }

    fn insert(store: &MemoryStore, id: &str, attrs: Attributes) -> CaseRecord {
        store
            .insert_case(&CaseId::from(id), "mfc_case", attrs)
            .unwrap();
        CaseRecord::new(id, "mfc_case")
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_start_sets_initial_state_once() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new());

        let outcome = engine.start(&case).unwrap();
        assert_eq!(outcome.from, None);
        assert_eq!(outcome.to, CaseState::Packaging);
        let attrs = store.get_attributes(&case.id, None).unwrap();
        assert_eq!(attrs.state(), Some("packaging"));
        assert_eq!(attrs.non_blank("created_at"), Some("2024-06-10 12:00:00"));
        assert_eq!(attrs.non_blank("case_id"), Some("1"));

        let err = engine.start(&case).unwrap_err();
        assert!(matches!(err, TransitionError::CaseAlreadyStarted { .. }));
        assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
    }

    #[test]
    fn test_bad_kind_rejected_before_store_access() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store);
        // Not inserted: any store access would fail with CaseNotFound.
        let case = CaseRecord::new("ghost", "other_case");
        let err = engine.apply(&case, "pending", &Params::new()).unwrap_err();
        assert!(matches!(err, TransitionError::BadCaseKind { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_unsupported_transition_reports_states() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new().with("state", "packaging"));

        let err = engine.apply(&case, "closed", &Params::new()).unwrap_err();
        match err {
            TransitionError::UnsupportedTransition { case_id, from, to } => {
                assert_eq!(case_id, case.id);
                assert_eq!(from.as_deref(), Some("packaging"));
                assert_eq!(to, "closed");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = engine.apply(&case, "archived", &Params::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTransition);
    }

    #[test]
    fn test_guard_failure_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new().with("state", "pending"));

        let err = engine.apply(&case, "rejecting", &Params::new()).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Guard(GuardViolation::PendingRejecting { .. })
        ));
        let attrs = store.get_attributes(&case.id, None).unwrap();
        assert_eq!(attrs, Attributes::new().with("state", "pending"));
    }

    #[test]
    fn test_attach_then_detach_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(
            &store,
            "1",
            Attributes::new()
                .with("state", "packaging")
                .with("institution_rguid", "I")
                .with("office_id", "O")
                .with("back_office_id", "B"),
        );

        let outcome = engine.apply(&case, "pending", &Params::new()).unwrap();
        let Some(RegisterChange::Attached { register_id, .. }) = outcome.register.clone() else {
            panic!("expected attach");
        };
        assert_eq!(store.count_links(&register_id).unwrap(), 1);
        assert_eq!(
            outcome.written.non_blank("added_to_pending_at"),
            Some("2024-06-10 12:00:00")
        );

        let outcome = engine.apply(&case, "packaging", &Params::new()).unwrap();
        assert!(matches!(
            outcome.register,
            Some(RegisterChange::Detached { .. })
        ));
        assert!(store.get_register(&register_id).unwrap().is_none());
        let attrs = store.get_attributes(&case.id, None).unwrap();
        assert!(attrs.contains("added_to_pending_at"));
        assert_eq!(attrs.non_blank("added_to_pending_at"), None);
    }

    #[test]
    fn test_detach_from_foreign_register_fails_cleanly() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new().with("state", "pending"));

        let err = engine
            .apply(&case, "packaging", &params(&[("register_id", "R-404")]))
            .unwrap_err();
        assert!(matches!(err, TransitionError::CaseNotInRegister { .. }));
        let attrs = store.get_attributes(&case.id, None).unwrap();
        assert_eq!(attrs.state(), Some("pending"));
    }

    #[test]
    fn test_processing_to_issuance_uses_params() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new().with("state", "processing"));

        let outcome = engine
            .apply(
                &case,
                "issuance",
                &params(&[("exporter_id", "exp"), ("result_id", "R-7")]),
            )
            .unwrap();
        assert_eq!(
            outcome.written.non_blank("response_processor_person_id"),
            Some("exp")
        );
        assert_eq!(outcome.written.non_blank("result_id"), Some("R-7"));
    }

    #[test]
    fn test_edge_without_register_action_ignores_register_params() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new().with("state", "processing"));

        let outcome = engine
            .apply(&case, "issuance", &params(&[("register_type", "bogus")]))
            .unwrap();
        assert_eq!(outcome.register, None);
        assert!(store.list_registers().unwrap().is_empty());
    }

    #[test]
    fn test_locks_are_released() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let case = insert(&store, "1", Attributes::new());
        engine.start(&case).unwrap();
        assert_eq!(engine.locks.len(), 0);
    }

    #[test]
    fn test_concurrent_transitions_on_one_case() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(engine_with(store.clone()));
        let case = insert(&store, "1", Attributes::new().with("state", "processing"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let case = case.clone();
                std::thread::spawn(move || engine.apply(&case, "issuance", &Params::new()).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
