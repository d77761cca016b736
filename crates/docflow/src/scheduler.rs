//! Timer that drives the expiry sweep.
//!
//! At most one sweep task runs per scheduler. `start` replaces a running task,
//! `stop` is a no-op when nothing runs. A failed sweep is logged and the timer
//! keeps going.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::SweepSchedule;
use crate::error::SchedulerError;
use crate::sweep::ExpirySweep;

/// Resolved firing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    DailyAt(NaiveTime),
    Every(Duration),
}

impl From<SweepSchedule> for Cadence {
    fn from(schedule: SweepSchedule) -> Self {
        match schedule {
            SweepSchedule::DailyAt(time) => Cadence::DailyAt(time),
            SweepSchedule::EverySecs(secs) => Cadence::Every(Duration::from_secs(secs)),
        }
    }
}

impl Cadence {
    /// Time to wait from `now` until the next run.
    pub fn delay_from(&self, now: NaiveDateTime) -> Duration {
        match self {
            Cadence::Every(period) => *period,
            Cadence::DailyAt(time) => {
                let today = now.date().and_time(*time);
                let next = if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                };
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

struct RunningSweep {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RunningSweep {
    fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.handle.abort();
    }
}

pub struct SweepScheduler {
    sweep: Arc<ExpirySweep>,
    clock: Arc<dyn Clock>,
    cadence: Cadence,
    running: Mutex<Option<RunningSweep>>,
}

impl SweepScheduler {
    pub fn new(sweep: Arc<ExpirySweep>, clock: Arc<dyn Clock>, cadence: Cadence) -> Self {
        Self {
            sweep,
            clock,
            cadence,
            running: Mutex::new(None),
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Spawn the sweep loop on the current tokio runtime, stopping any
    /// previous loop first.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let mut running = self.lock()?;
        if let Some(previous) = running.take() {
            info!("Restarting expiry sweep scheduler");
            previous.stop();
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = runtime.spawn(run_loop(
            self.sweep.clone(),
            self.clock.clone(),
            self.cadence,
            shutdown_rx,
        ));
        *running = Some(RunningSweep {
            shutdown_tx,
            handle,
        });
        info!("Expiry sweep scheduled ({:?})", self.cadence);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(running) = self.lock()?.take() {
            running.stop();
            info!("Expiry sweep unscheduled");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .map(|running| {
                running
                    .as_ref()
                    .map(|r| !r.handle.is_finished())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<RunningSweep>>, SchedulerError> {
        self.running.lock().map_err(|_| SchedulerError::Poisoned)
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        if let Ok(running) = self.running.get_mut() {
            if let Some(running) = running.take() {
                running.stop();
            }
        }
    }
}

async fn run_loop(
    sweep: Arc<ExpirySweep>,
    clock: Arc<dyn Clock>,
    cadence: Cadence,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let delay = cadence.delay_from(clock.now());
        debug!("Next expiry sweep in {:?}", delay);

        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!("Expiry sweep loop received shutdown");
                break;
            }

            _ = tokio::time::sleep(delay) => {
                let sweep = sweep.clone();
                match tokio::task::spawn_blocking(move || sweep.run()).await {
                    Ok(Ok(report)) => {
                        debug!("Expiry sweep rejected {} cases", report.rejected.len());
                    }
                    Ok(Err(err)) => error!("Expiry sweep failed: {}", err),
                    Err(err) => error!("Expiry sweep task panicked: {}", err),
                }
            }
        }
    }
}
