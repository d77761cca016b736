//! Register batching: which register a case joins or leaves.

use std::sync::Arc;

use docflow_ids::{CaseId, RegisterId};
use docflow_store::{
    Attachment, Attributes, DetachOutcome, Register, RegisterKey, RegisterType, Store, StoreError,
};
use tracing::{debug, info, warn};

use crate::error::{Result, TransitionError};
use crate::rules::{attrs, params, Params};

/// Dedupe key for the register a case should join.
///
/// The register type comes from the `register_type` parameter, then the case
/// attribute of the same name, then defaults to `cases`. Unknown values fall
/// back to the default.
pub fn register_key(attributes: &Attributes, params: &Params) -> RegisterKey {
    let register_type = params
        .get(params::REGISTER_TYPE)
        .map(String::as_str)
        .or_else(|| attributes.non_blank(attrs::REGISTER_TYPE))
        .map(|raw| {
            raw.parse::<RegisterType>().unwrap_or_else(|err| {
                warn!("{}, using {}", err, RegisterType::default());
                RegisterType::default()
            })
        })
        .unwrap_or_default();

    let owned = |name: &str| attributes.non_blank(name).map(str::to_string);
    RegisterKey {
        institution_rguid: owned(attrs::INSTITUTION_RGUID),
        office_id: owned(attrs::OFFICE_ID),
        back_office_id: owned(attrs::BACK_OFFICE_ID),
        register_type,
    }
}

/// Register membership changed by one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterChange {
    Attached {
        register_id: RegisterId,
        /// False when the case was already a member
        newly_linked: bool,
    },
    Detached {
        /// The register as it was before the case left
        register: Register,
        outcome: DetachOutcome,
    },
}

impl RegisterChange {
    pub fn register_id(&self) -> &RegisterId {
        match self {
            RegisterChange::Attached { register_id, .. } => register_id,
            RegisterChange::Detached { register, .. } => &register.id,
        }
    }
}

/// Attaches and detaches cases through the store's atomic register calls.
#[derive(Clone)]
pub struct RegisterBatcher {
    store: Arc<dyn Store>,
}

impl RegisterBatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Link the case into the open register for `key`, creating one if needed.
    pub fn attach(&self, case_id: &CaseId, key: &RegisterKey) -> Result<RegisterChange> {
        let Attachment {
            register,
            newly_linked,
        } = self.store.attach_case(case_id, key)?;
        info!(
            "Case {} attached to register {} ({})",
            case_id, register.id, register.key.register_type
        );
        Ok(RegisterChange::Attached {
            register_id: register.id,
            newly_linked,
        })
    }

    /// Unlink the case; the store drops the register once it is empty.
    pub fn detach(&self, case_id: &CaseId, register_id: &RegisterId) -> Result<RegisterChange> {
        let not_linked = || TransitionError::CaseNotInRegister {
            case_id: case_id.clone(),
            register_id: register_id.clone(),
        };
        let register = self.store.get_register(register_id)?.ok_or_else(not_linked)?;
        match self.store.detach_case(case_id, register_id) {
            Ok(outcome) => {
                match &outcome {
                    DetachOutcome::RegisterDeleted => info!(
                        "Case {} detached, register {} deleted",
                        case_id, register_id
                    ),
                    DetachOutcome::Unlinked { remaining } => info!(
                        "Case {} detached from register {} ({} remaining)",
                        case_id, register_id, remaining
                    ),
                }
                Ok(RegisterChange::Detached { register, outcome })
            }
            Err(StoreError::NotLinked {
                case_id,
                register_id,
            }) => Err(TransitionError::CaseNotInRegister {
                case_id,
                register_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Register to leave: the `register_id` parameter, else the case's open register.
    pub fn register_to_leave(&self, case_id: &CaseId, params: &Params) -> Result<RegisterId> {
        if let Some(raw) = params.get(params::REGISTER_ID) {
            return Ok(RegisterId::from(raw.as_str()));
        }
        let found = self.store.open_register_of(case_id)?;
        debug!("Case {} resolved open register {:?}", case_id, found);
        found.ok_or_else(|| TransitionError::NoOpenRegister {
            case_id: case_id.clone(),
        })
    }

    /// Undo an applied change after the case write failed, restoring the
    /// exact link that existed before.
    pub fn revert(&self, case_id: &CaseId, change: &RegisterChange) {
        let result = match change {
            RegisterChange::Attached {
                newly_linked: false,
                register_id,
            } => {
                debug!("Case {} was already in register {}", case_id, register_id);
                return;
            }
            RegisterChange::Attached { register_id, .. } => {
                self.store.detach_case(case_id, register_id).map(|_| ())
            }
            RegisterChange::Detached { register, .. } => self.store.restore_link(case_id, register),
        };
        match result {
            Ok(()) => info!("Reverted register change {:?} for case {}", change, case_id),
            Err(err) => warn!(
                "Failed to revert register change {:?} for case {}: {}",
                change, case_id, err
            ),
        }
    }
}
