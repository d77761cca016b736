//! Docflow: lifecycle engine for service-request cases.
//!
//! A case moves through `packaging -> pending -> processing -> issuance` and
//! ends `closed`, possibly via `rejecting`. Moves are declared in a
//! [`TransitionTable`]; the [`TransitionEngine`] checks guards, derives
//! attributes and keeps register membership in step. Registers are exported
//! in bulk by the [`ExportProcessor`], and the [`ExpirySweep`] returns
//! unclaimed results on a timer.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod registers;
pub mod rules;
pub mod scheduler;
pub mod state;
pub mod sweep;
pub mod table;
pub mod workflow;

pub use clock::{Clock, FixedClock, SystemClock, TIMESTAMP_FORMAT};
pub use config::{DocflowConfig, SweepConfig, SweepSchedule};
pub use engine::{TransitionEngine, TransitionOutcome};
pub use error::{ConfigError, ErrorKind, ExportError, GuardViolation, SchedulerError, TransitionError};
pub use export::{ExportProcessor, ExportSummary};
pub use registers::{register_key, RegisterBatcher, RegisterChange};
pub use rules::{Params, Rule, ValueDirective};
pub use scheduler::{Cadence, SweepScheduler};
pub use state::CaseState;
pub use sweep::{ExpirySweep, SweepReport};
pub use table::{EdgeDescriptor, GuardContext, RegisterAction, TransitionTable};
pub use workflow::CaseWorkflow;
