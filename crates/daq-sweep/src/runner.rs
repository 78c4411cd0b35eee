//! Background sweep runner.
//!
//! [`SweepRunner`] runs the engine on a Tokio task so a front end stays
//! responsive. Two things cross the task boundary:
//!
//! - [`RunnerStatus`], published on a `watch` channel. Watchers only see the
//!   latest value, so back-to-back sweeps can coalesce.
//! - Every completed [`SweepOutcome`], delivered in order on the queues
//!   handed out by [`SweepRunner::outcomes`]. Consumers that must see each
//!   sweep (saving files, counting results) read these.
//!
//! Looping mode repeats the sweep with a pause in between until it is
//! cancelled, a sweep fails, or the requested count is reached.

use crate::engine::{CancelHandle, SweepEngine, SweepOutcome};
use daq_core::error::{AppResult, DaqError};
use daq_driver_red_pitaya::AcquisitionConfig;
use daq_driver_santec::SweepParameters;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pause between looped sweeps.
pub const DEFAULT_LOOP_PAUSE: Duration = Duration::from_secs(1);

/// Runner status as seen by a front end.
#[derive(Debug, Clone)]
pub enum RunnerStatus {
    /// Nothing running
    Idle,
    /// Sweep `n` (1-based) in progress
    Running(u32),
    /// Last sweep completed
    Finished(Arc<SweepOutcome>),
    /// Last sweep failed
    Failed(String),
}

impl RunnerStatus {
    /// Whether a sweep is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self, RunnerStatus::Running(_))
    }
}

/// Repeat settings for [`SweepRunner::start_loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOptions {
    /// Pause before each sweep
    pub pause: Duration,
    /// Stop after this many sweeps; `None` loops until cancelled
    pub count: Option<u32>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            pause: DEFAULT_LOOP_PAUSE,
            count: None,
        }
    }
}

type OutcomeSenders = Arc<Mutex<Vec<mpsc::UnboundedSender<Arc<SweepOutcome>>>>>;

/// Runs sweeps on a background task and publishes their status.
pub struct SweepRunner {
    engine: Arc<SweepEngine>,
    status_tx: Arc<watch::Sender<RunnerStatus>>,
    outcome_txs: OutcomeSenders,
    active: Arc<AtomicBool>,
    cancel: Mutex<CancelHandle>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SweepRunner {
    /// Wrap `engine`.
    pub fn new(engine: Arc<SweepEngine>) -> Self {
        let (status_tx, _) = watch::channel(RunnerStatus::Idle);
        Self {
            engine,
            status_tx: Arc::new(status_tx),
            outcome_txs: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancelHandle::new()),
            task: Mutex::new(None),
        }
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<RunnerStatus> {
        self.status_tx.subscribe()
    }

    /// Receive every outcome completed after this call, in order.
    ///
    /// Unlike [`SweepRunner::subscribe`] nothing is coalesced; a dropped
    /// receiver is forgotten at the next delivery.
    pub fn outcomes(&self) -> mpsc::UnboundedReceiver<Arc<SweepOutcome>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcome_txs.lock().push(tx);
        rx
    }

    /// Latest status.
    pub fn status(&self) -> RunnerStatus {
        self.status_tx.borrow().clone()
    }

    /// Start a single sweep in the background.
    ///
    /// # Errors
    /// `Busy` if a sweep or loop is already running.
    pub fn start(&self, params: SweepParameters, cfg: AcquisitionConfig) -> AppResult<()> {
        self.spawn(
            params,
            cfg,
            LoopOptions {
                pause: Duration::ZERO,
                count: Some(1),
            },
        )
    }

    /// Start repeating sweeps in the background.
    ///
    /// # Errors
    /// `Busy` if a sweep or loop is already running.
    pub fn start_loop(
        &self,
        params: SweepParameters,
        cfg: AcquisitionConfig,
        options: LoopOptions,
    ) -> AppResult<()> {
        self.spawn(params, cfg, options)
    }

    /// Ask the running sweep or loop to stop before its next poll.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Wait for the background task to finish and return the final status.
    pub async fn wait(&self) -> RunnerStatus {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Sweep task ended abnormally: {}", e);
                self.status_tx
                    .send_replace(RunnerStatus::Failed(format!("sweep task failed: {}", e)));
            }
        }
        self.status()
    }

    fn spawn(
        &self,
        params: SweepParameters,
        cfg: AcquisitionConfig,
        options: LoopOptions,
    ) -> AppResult<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DaqError::Busy);
        }

        let cancel = CancelHandle::new();
        *self.cancel.lock() = cancel.clone();

        let engine = Arc::clone(&self.engine);
        let status_tx = Arc::clone(&self.status_tx);
        let outcome_txs = Arc::clone(&self.outcome_txs);
        let active = Arc::clone(&self.active);

        let handle = tokio::spawn(async move {
            run_loop(
                &engine,
                &status_tx,
                &outcome_txs,
                &params,
                &cfg,
                options,
                &cancel,
            )
            .await;
            active.store(false, Ordering::SeqCst);
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }
}

async fn run_loop(
    engine: &SweepEngine,
    status_tx: &watch::Sender<RunnerStatus>,
    outcome_txs: &OutcomeSenders,
    params: &SweepParameters,
    cfg: &AcquisitionConfig,
    options: LoopOptions,
    cancel: &CancelHandle,
) {
    let mut iteration: u32 = 0;
    loop {
        if options.count.is_some_and(|count| iteration >= count) {
            break;
        }
        if !options.pause.is_zero() {
            tokio::time::sleep(options.pause).await;
        }
        if cancel.is_cancelled() {
            info!("Sweep loop cancelled after {} sweeps", iteration);
            status_tx.send_replace(RunnerStatus::Failed(DaqError::Cancelled.to_string()));
            break;
        }

        iteration += 1;
        status_tx.send_replace(RunnerStatus::Running(iteration));

        match engine.sweep(params, cfg, cancel).await {
            Ok(outcome) => {
                info!(
                    sweep = iteration,
                    points = outcome.spectrum.len(),
                    "Sweep finished"
                );
                let outcome = Arc::new(outcome);
                outcome_txs
                    .lock()
                    .retain(|tx| tx.send(Arc::clone(&outcome)).is_ok());
                status_tx.send_replace(RunnerStatus::Finished(outcome));
            }
            Err(e) => {
                warn!(sweep = iteration, "Sweep failed: {}", e);
                status_tx.send_replace(RunnerStatus::Failed(e.to_string()));
                break;
            }
        }
    }
}
