//! Sweep acquisition engine.
//!
//! Runs one sweep-and-acquire cycle against a Red Pitaya buffer and a Santec
//! TSL:
//!
//! ```text
//! Idle ──configure, start sweep, settle──▶ Armed
//! Armed ──start logging, fill wait, arm completion trigger, soft trigger──▶ Triggered
//! Triggered ──poll status / drain new samples──▶ Draining (repeats)
//! Draining ──status TD: stop logging, final drain, stop sweep──▶ Complete ──▶ Idle
//! ```
//!
//! The engine owns the only copy of the last drained offset. If the polling
//! cadence is slower than one buffer period the write pointer can lap it and
//! samples are overwritten without any hardware error; the engine logs a
//! warning when the gap between two drains exceeds the buffer period.
//!
//! Any transport or protocol failure aborts the cycle. Logging and the sweep
//! are stopped on a best-effort basis (cleanup failures are logged, never
//! returned) and the original error is surfaced with no partial data.

use crate::drain::{self, DrainSegment};
use crate::spectrum::{map_to_wavelength, SweptSpectrum};
use daq_core::error::{AppResult, DaqError};
use daq_driver_red_pitaya::{
    AcquisitionConfig, RedPitayaAcquisition, Source, TriggerSource, TriggerStatus, BUFFER_SIZE,
    SAMPLE_RATE_HZ,
};
use daq_driver_santec::{SweepParameters, TriggerInput, TriggerOutput, TslDriver};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Settle time after `start_sweep` before logging begins.
pub const DEFAULT_SETTLE_MS: u64 = 3000;

// =============================================================================
// Configuration
// =============================================================================

/// Engine timing and routing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wait after `start_sweep` for the optical output to stabilise (ms)
    pub settle_ms: u64,
    /// Pause between polls (ms). Must stay well under one buffer period.
    pub poll_interval_ms: u64,
    /// Circular buffer size in samples
    pub buffer_size: u32,
    /// ADC sample rate before decimation (Hz)
    pub sample_rate_hz: f64,
    /// Digitizer input carrying the detector signal
    pub source: Source,
    /// Trigger marking sweep completion (laser output trigger wiring)
    pub completion_trigger: TriggerSource,
    /// Laser trigger input selected while arming
    pub trigger_input: TriggerInput,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_ms: DEFAULT_SETTLE_MS,
            poll_interval_ms: 0,
            buffer_size: BUFFER_SIZE,
            sample_rate_hz: SAMPLE_RATE_HZ,
            source: Source::Ch1,
            completion_trigger: TriggerSource::Ch2NegativeEdge,
            trigger_input: TriggerInput::Internal,
        }
    }
}

impl EngineConfig {
    /// Check the values that would make the poll loop meaningless.
    pub fn validate(&self) -> AppResult<()> {
        if self.buffer_size < 2 {
            return Err(DaqError::invalid_parameter(
                "buffer_size",
                format!("{} samples is too small", self.buffer_size),
            ));
        }
        if !(self.sample_rate_hz > 0.0 && self.sample_rate_hz.is_finite()) {
            return Err(DaqError::invalid_parameter(
                "sample_rate_hz",
                format!("{} Hz is not a valid sample rate", self.sample_rate_hz),
            ));
        }
        Ok(())
    }

    /// Settle delay.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Pause between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Time for the hardware to write one full buffer at `decimation`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` on `sample_rate_hz` when the period is too long to
    /// represent.
    pub fn buffer_period(&self, decimation: u32) -> AppResult<Duration> {
        let secs = f64::from(self.buffer_size) * f64::from(decimation) / self.sample_rate_hz;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            DaqError::invalid_parameter(
                "sample_rate_hz",
                format!(
                    "{} Hz gives an unrepresentable buffer period of {} s",
                    self.sample_rate_hz, secs
                ),
            )
        })
    }
}

// =============================================================================
// State and results
// =============================================================================

/// Engine state machine position, published through [`SweepEngine::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepState {
    /// No sweep in flight
    Idle,
    /// Instruments configured, sweep started and settled
    Armed,
    /// Logging started and the sweep released
    Triggered,
    /// Polling and draining the buffer
    Draining,
    /// Completion seen, tail drained, sweep stopped
    Complete,
}

/// Output of one acquisition cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAcquisition {
    /// Samples in acquisition order
    pub samples: Vec<f64>,
    /// Time from releasing the sweep to the completion trigger
    pub acquisition_time: Duration,
    /// Buffer reads that produced `samples`, in order
    pub segments: Vec<DrainSegment>,
}

/// Result of a complete sweep: the mapped spectrum plus what produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepOutcome {
    /// Parameters the laser was configured with
    pub params: SweepParameters,
    /// Measured acquisition time in seconds
    pub acquisition_time: f64,
    /// Raw samples drained before mapping
    pub sample_count: usize,
    /// Wavelength-mapped samples
    pub spectrum: SweptSpectrum,
}

/// Cooperative cancellation flag shared with a running cycle.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create an un-cancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The engine notices before its next poll.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// SweepEngine
// =============================================================================

/// Clears the running flag and returns the engine to `Idle` on every exit path.
pub(crate) struct RunGuard<'a> {
    engine: &'a SweepEngine,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine.running.store(false, Ordering::SeqCst);
        self.engine.publish(SweepState::Idle);
    }
}

/// Coordinates one sweep-and-acquire cycle at a time.
pub struct SweepEngine {
    acquisition: Arc<RedPitayaAcquisition>,
    laser: Arc<TslDriver>,
    config: EngineConfig,
    running: AtomicBool,
    state_tx: watch::Sender<SweepState>,
}

impl SweepEngine {
    /// Create an engine over the two instrument controllers.
    pub fn new(
        acquisition: Arc<RedPitayaAcquisition>,
        laser: Arc<TslDriver>,
        config: EngineConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SweepState::Idle);
        Self {
            acquisition,
            laser,
            config,
            running: AtomicBool::new(false),
            state_tx,
        }
    }

    /// Watch the state machine.
    pub fn subscribe_state(&self) -> watch::Receiver<SweepState> {
        self.state_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SweepState {
        *self.state_tx.borrow()
    }

    /// Whether a cycle is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn publish(&self, state: SweepState) {
        self.state_tx.send_replace(state);
    }

    /// Claim the engine, or fail with `Busy` without touching the instruments.
    pub(crate) fn try_claim(&self) -> AppResult<RunGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DaqError::Busy);
        }
        Ok(RunGuard { engine: self })
    }

    /// Run one full cycle with `cfg` (averaging is forced off).
    ///
    /// # Errors
    ///
    /// - `Busy` if another cycle is in flight (nothing is sent)
    /// - `InvalidParameter` for a bad `cfg` or engine config (nothing is sent)
    /// - `Transport` / `Protocol` from either instrument (cycle aborted)
    /// - `Cancelled` when `cancel` fires before a poll
    pub async fn run(
        &self,
        cfg: &AcquisitionConfig,
        cancel: &CancelHandle,
    ) -> AppResult<RawAcquisition> {
        let _guard = self.try_claim()?;
        let (cfg, buffer_period) = self.prepare(cfg)?;
        self.run_claimed(&cfg, buffer_period, cancel).await
    }

    /// Configure the laser for `params`, run one cycle and map the samples
    /// onto wavelength.
    ///
    /// The laser is only configured once the engine is claimed, so a `Busy`
    /// rejection never reaches the instruments.
    #[instrument(skip_all, fields(start = params.start_wavelength, stop = params.stop_wavelength, speed = params.speed), err)]
    pub async fn sweep(
        &self,
        params: &SweepParameters,
        cfg: &AcquisitionConfig,
        cancel: &CancelHandle,
    ) -> AppResult<SweepOutcome> {
        let _guard = self.try_claim()?;
        params.validate()?;
        let (cfg, buffer_period) = self.prepare(cfg)?;
        self.laser.configure(params).await?;

        let raw = self.run_claimed(&cfg, buffer_period, cancel).await?;
        let acquisition_time = raw.acquisition_time.as_secs_f64();
        let spectrum = map_to_wavelength(&raw.samples, acquisition_time, params)?;

        Ok(SweepOutcome {
            params: *params,
            acquisition_time,
            sample_count: raw.samples.len(),
            spectrum,
        })
    }

    /// Validate everything a cycle needs before any command is sent.
    fn prepare(&self, cfg: &AcquisitionConfig) -> AppResult<(AcquisitionConfig, Duration)> {
        let cfg = AcquisitionConfig {
            averaging: false,
            ..cfg.clone()
        };
        cfg.validate()?;
        self.config.validate()?;
        let buffer_period = self.config.buffer_period(cfg.decimation)?;
        Ok((cfg, buffer_period))
    }

    #[instrument(skip_all, fields(decimation = cfg.decimation), err)]
    async fn run_claimed(
        &self,
        cfg: &AcquisitionConfig,
        buffer_period: Duration,
        cancel: &CancelHandle,
    ) -> AppResult<RawAcquisition> {
        match self.cycle(cfg, buffer_period, cancel).await {
            Ok(raw) => Ok(raw),
            Err(err) => {
                warn!("Sweep aborted: {}", err);
                self.abort_cleanup().await;
                Err(err)
            }
        }
    }

    async fn cycle(
        &self,
        cfg: &AcquisitionConfig,
        buffer_period: Duration,
        cancel: &CancelHandle,
    ) -> AppResult<RawAcquisition> {
        // Idle -> Armed
        self.laser.set_trigger_input(self.config.trigger_input).await?;
        self.laser.set_trigger_output(TriggerOutput::Stop).await?;
        self.laser.set_trigger_standby(true).await?;
        self.acquisition.stop_logging().await?;
        self.acquisition.configure(cfg).await?;
        self.laser.start_sweep().await?;
        tokio::time::sleep(self.config.settle()).await;
        self.publish(SweepState::Armed);
        info!("Sweep armed");

        // Armed -> Triggered
        self.acquisition.start_logging().await?;
        tokio::time::sleep(buffer_period).await;
        let mut previous = self.checked_write_pointer().await?;
        self.acquisition
            .arm_trigger(self.config.completion_trigger)
            .await?;
        let started = Instant::now();
        self.laser.send_software_trigger().await?;
        self.publish(SweepState::Triggered);
        info!(previous_pointer = previous, "Sweep triggered");

        // Triggered -> Draining
        let mut raw = RawAcquisition::default();
        let mut last_drain = Instant::now();
        let poll_interval = self.config.poll_interval();

        loop {
            if cancel.is_cancelled() {
                info!("Sweep cancelled after {} samples", raw.samples.len());
                return Err(DaqError::Cancelled);
            }

            match self.acquisition.trigger_status().await? {
                TriggerStatus::Triggered => break,
                TriggerStatus::Waiting => {
                    if self.state() != SweepState::Draining {
                        self.publish(SweepState::Draining);
                    }

                    let gap = last_drain.elapsed();
                    if gap > buffer_period {
                        warn!(
                            gap_ms = gap.as_millis() as u64,
                            buffer_period_ms = buffer_period.as_millis() as u64,
                            "Poll gap exceeds one buffer period; samples may have been overwritten"
                        );
                    }

                    previous = self.drain(previous, &mut raw).await?;
                    last_drain = Instant::now();

                    if !poll_interval.is_zero() {
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }

        // Draining -> Complete
        raw.acquisition_time = started.elapsed();
        self.acquisition.stop_logging().await?;
        self.drain(previous, &mut raw).await?;
        self.laser.stop_sweep().await?;
        self.publish(SweepState::Complete);
        // Let watchers observe Complete before the guard publishes Idle
        tokio::task::yield_now().await;

        info!(
            samples = raw.samples.len(),
            segments = raw.segments.len(),
            acquisition_ms = raw.acquisition_time.as_millis() as u64,
            "Sweep complete"
        );
        Ok(raw)
    }

    async fn checked_write_pointer(&self) -> AppResult<u32> {
        let pointer = self.acquisition.write_pointer().await?;
        if pointer >= self.config.buffer_size {
            return Err(DaqError::Protocol(format!(
                "write pointer {} outside the {}-sample buffer",
                pointer, self.config.buffer_size
            )));
        }
        Ok(pointer)
    }

    /// Read everything written since `previous` and return the new pointer.
    async fn drain(&self, previous: u32, raw: &mut RawAcquisition) -> AppResult<u32> {
        let current = self.checked_write_pointer().await?;
        let segments = drain::plan(previous, current, self.config.buffer_size);
        debug!(
            previous,
            current,
            samples = drain::total(&segments),
            "Drain pass"
        );

        for segment in segments {
            let samples = self
                .acquisition
                .read_segment(self.config.source, segment.start, segment.count)
                .await?;
            debug!(
                start = segment.start,
                count = segment.count,
                "Drained segment"
            );
            raw.samples.extend(samples);
            raw.segments.push(segment);
        }
        Ok(current)
    }

    async fn abort_cleanup(&self) {
        if let Err(e) = self.acquisition.stop_logging().await {
            warn!("Cleanup: failed to stop logging: {}", e);
        }
        if let Err(e) = self.laser.stop_sweep().await {
            warn!("Cleanup: failed to stop sweep: {}", e);
        }
    }
}
