//! Host-facing entry points.

use std::sync::Arc;

use docflow_ids::RegisterId;
use docflow_store::{CaseRecord, Store};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::DocflowConfig;
use crate::engine::{TransitionEngine, TransitionOutcome};
use crate::error::{ExportError, Result, SchedulerError};
use crate::export::{ExportProcessor, ExportSummary};
use crate::rules::Params;
use crate::scheduler::{Cadence, SweepScheduler};
use crate::sweep::{ExpirySweep, SweepReport};
use crate::table::TransitionTable;

/// Case lifecycle over one store: transitions, register export, expiry sweep.
pub struct CaseWorkflow {
    engine: TransitionEngine,
    exporter: ExportProcessor,
    sweep: Arc<ExpirySweep>,
    scheduler: SweepScheduler,
    sweep_enabled: bool,
}

impl CaseWorkflow {
    /// Workflow with the standard table, the system clock and `config`.
    pub fn new(store: Arc<dyn Store>, config: &DocflowConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn Store>, config: &DocflowConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_table(
            Arc::new(TransitionTable::standard()),
            store,
            config,
            clock,
        )
    }

    pub fn with_table(
        table: Arc<TransitionTable>,
        store: Arc<dyn Store>,
        config: &DocflowConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = TransitionEngine::new(table, store.clone(), clock.clone(), config.case_kind.as_str());
        let exporter = ExportProcessor::new(store.clone(), clock.clone());
        let sweep = Arc::new(ExpirySweep::new(store, clock.clone(), config.case_kind.as_str()));
        let scheduler = SweepScheduler::new(sweep.clone(), clock, Cadence::from(config.sweep.schedule));
        Self {
            engine,
            exporter,
            sweep,
            scheduler,
            sweep_enabled: config.sweep.enabled,
        }
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }

    /// Put a freshly created case into its initial state.
    pub fn on_case_created(&self, case: &CaseRecord) -> Result<TransitionOutcome> {
        self.engine.start(case)
    }

    pub fn change_state(&self, case: &CaseRecord, target: &str, params: &Params) -> Result<TransitionOutcome> {
        self.engine.apply(case, target, params)
    }

    pub fn export_register(
        &self,
        register_id: &RegisterId,
        params: &Params,
    ) -> std::result::Result<ExportSummary, ExportError> {
        self.exporter.export(register_id, params)
    }

    /// One sweep pass, outside the scheduler.
    pub fn run_sweep(&self) -> docflow_store::Result<SweepReport> {
        self.sweep.run()
    }

    /// Start the expiry sweep on its schedule. Does nothing when the sweep is
    /// disabled in the config.
    pub fn start_scheduler(&self) -> std::result::Result<(), SchedulerError> {
        if !self.sweep_enabled {
            info!("Expiry sweep disabled, scheduler not started");
            return Ok(());
        }
        self.scheduler.start()
    }

    pub fn stop_scheduler(&self) -> std::result::Result<(), SchedulerError> {
        self.scheduler.stop()
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_store::MemoryStore;

    #[test]
    fn test_disabled_sweep_never_schedules() {
        let mut config = DocflowConfig::default();
        config.sweep.enabled = false;
        let workflow = CaseWorkflow::new(Arc::new(MemoryStore::new()), &config);

        // No runtime here: an enabled scheduler would fail with NoRuntime.
        workflow.start_scheduler().unwrap();
        assert!(!workflow.scheduler_running());
    }

    #[test]
    fn test_enabled_sweep_needs_runtime() {
        let workflow = CaseWorkflow::new(Arc::new(MemoryStore::new()), &DocflowConfig::default());
        let err = workflow.start_scheduler().unwrap_err();
        assert!(matches!(err, SchedulerError::NoRuntime));
    }
}
