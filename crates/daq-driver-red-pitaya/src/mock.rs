//! Simulated Red Pitaya for running sweeps without hardware.
//!
//! [`MockRedPitaya`] implements [`CommandChannel`] and understands the subset of
//! the acquisition SCPI dialect used by [`RedPitayaAcquisition`]. The write
//! pointer advances by a fixed number of samples on every `ACQ:WPOS?` while
//! logging, wrapping at the buffer size, and an armed trigger reports `TD`
//! after a configurable number of status polls.
//!
//! [`RedPitayaAcquisition`]: crate::acquisition::RedPitayaAcquisition

use crate::acquisition::{DataUnits, TriggerSource, BUFFER_SIZE};
use async_trait::async_trait;
use daq_core::channel::CommandChannel;
use daq_core::error::{AppResult, DaqError};
use parking_lot::Mutex;

/// Settings the mock currently holds, as last written over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct MockAcquisitionState {
    /// Decimation factor
    pub decimation: u32,
    /// Data units
    pub units: DataUnits,
    /// Trigger level in volts
    pub trigger_level: f64,
    /// Trigger delay in samples
    pub trigger_delay: i32,
    /// Hardware averaging
    pub averaging: bool,
    /// Armed trigger source
    pub trigger: TriggerSource,
    /// Buffer writes enabled
    pub logging: bool,
}

impl Default for MockAcquisitionState {
    fn default() -> Self {
        Self {
            decimation: 1,
            units: DataUnits::Volts,
            trigger_level: 0.0,
            trigger_delay: 0,
            averaging: true,
            trigger: TriggerSource::Disabled,
            logging: false,
        }
    }
}

struct Inner {
    settings: MockAcquisitionState,
    buffer: Vec<f64>,
    write_pointer: u32,
    total_written: u64,
    status_polls: u32,
    triggered: bool,
}

impl Inner {
    fn new(buffer_size: u32) -> Self {
        Self {
            settings: MockAcquisitionState::default(),
            buffer: vec![0.0; buffer_size as usize],
            write_pointer: 0,
            total_written: 0,
            status_polls: 0,
            triggered: false,
        }
    }

    fn advance(&mut self, samples: u32) {
        let size = self.buffer.len() as u32;
        for _ in 0..samples {
            let value = synthetic_transmission(self.total_written);
            self.buffer[self.write_pointer as usize] = match self.settings.units {
                DataUnits::Volts => value,
                DataUnits::Raw => (value * 8191.0).round(),
            };
            self.total_written += 1;
            self.write_pointer = (self.write_pointer + 1) % size;
        }
    }
}

/// Periodic Lorentzian dips, roughly what a ring resonator looks like on the
/// photodiode during a sweep.
fn synthetic_transmission(sample: u64) -> f64 {
    const PERIOD: u64 = 4096;
    const WIDTH: f64 = 40.0;
    let offset = (sample % PERIOD) as f64 - (PERIOD / 2) as f64;
    1.0 - 0.8 / (1.0 + (offset / WIDTH).powi(2))
}

/// Mock Red Pitaya acquisition server.
pub struct MockRedPitaya {
    inner: Mutex<Inner>,
    samples_per_poll: u32,
    polls_to_trigger: u32,
}

impl Default for MockRedPitaya {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRedPitaya {
    /// Create a mock with the reference buffer size, 1024 samples per pointer
    /// poll and a trigger that fires on the 20th status poll.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new(BUFFER_SIZE)),
            samples_per_poll: 1024,
            polls_to_trigger: 20,
        }
    }

    /// Use a buffer of `size` samples.
    pub fn with_buffer_size(mut self, size: u32) -> Self {
        self.inner = Mutex::new(Inner::new(size.max(1)));
        self
    }

    /// Advance the write pointer by `samples` on every `ACQ:WPOS?` while logging.
    pub fn with_samples_per_poll(mut self, samples: u32) -> Self {
        self.samples_per_poll = samples;
        self
    }

    /// Report `TD` on the `polls`-th status poll after arming.
    pub fn with_polls_to_trigger(mut self, polls: u32) -> Self {
        self.polls_to_trigger = polls.max(1);
        self
    }

    /// Snapshot of the current settings.
    pub fn state(&self) -> MockAcquisitionState {
        self.inner.lock().settings.clone()
    }

    /// Total samples written since the last reset.
    pub fn samples_written(&self) -> u64 {
        self.inner.lock().total_written
    }

    fn handle_write(&self, command: &str) -> AppResult<()> {
        let (header, argument) = match command.split_once(' ') {
            Some((h, a)) => (h, Some(a.trim())),
            None => (command, None),
        };

        let mut inner = self.inner.lock();
        match (header.to_uppercase().as_str(), argument) {
            ("ACQ:RST", None) => {
                let size = inner.buffer.len() as u32;
                *inner = Inner::new(size);
            }
            ("ACQ:START", None) => {
                inner.settings.logging = true;
                inner.triggered = false;
                inner.status_polls = 0;
            }
            ("ACQ:STOP", None) => inner.settings.logging = false,
            ("ACQ:DEC", Some(value)) => inner.settings.decimation = parse_arg(command, value)?,
            ("ACQ:AVG", Some(value)) => {
                inner.settings.averaging = match value.to_uppercase().as_str() {
                    "ON" => true,
                    "OFF" => false,
                    _ => return Err(DaqError::unexpected_reply(command, value)),
                }
            }
            ("ACQ:DATA:UNITS", Some(value)) => {
                inner.settings.units = match value.to_uppercase().as_str() {
                    "VOLTS" => DataUnits::Volts,
                    "RAW" => DataUnits::Raw,
                    _ => return Err(DaqError::unexpected_reply(command, value)),
                }
            }
            ("ACQ:TRIG:LEV", Some(value)) => inner.settings.trigger_level = parse_arg(command, value)?,
            ("ACQ:TRIG:DLY", Some(value)) => inner.settings.trigger_delay = parse_arg(command, value)?,
            ("ACQ:TRIG", Some(value)) => {
                let source = TriggerSource::from_code(value)
                    .ok_or_else(|| DaqError::unexpected_reply(command, value))?;
                inner.settings.trigger = source;
                inner.status_polls = 0;
                inner.triggered = source == TriggerSource::Now;
            }
            _ => {
                tracing::warn!("Mock Red Pitaya ignoring unknown command: {}", command);
            }
        }
        Ok(())
    }

    fn handle_query(&self, command: &str) -> AppResult<String> {
        let (header, argument) = match command.split_once(' ') {
            Some((h, a)) => (h, Some(a.trim())),
            None => (command, None),
        };

        let mut inner = self.inner.lock();
        match header.to_uppercase().as_str() {
            "ACQ:WPOS?" => {
                if inner.settings.logging {
                    inner.advance(self.samples_per_poll);
                }
                Ok(inner.write_pointer.to_string())
            }
            "ACQ:TRIG:STAT?" => {
                let armed = inner.settings.trigger != TriggerSource::Disabled;
                if !inner.triggered && armed && inner.settings.logging {
                    inner.status_polls += 1;
                    if inner.status_polls >= self.polls_to_trigger {
                        inner.triggered = true;
                        // The board disarms itself once the trigger fires
                        inner.settings.trigger = TriggerSource::Disabled;
                    }
                }
                Ok(if inner.triggered { "TD" } else { "WAIT" }.to_string())
            }
            "ACQ:SOUR1:DATA:STA:N?" | "ACQ:SOUR2:DATA:STA:N?" => {
                let argument = argument.ok_or_else(|| DaqError::unexpected_reply(command, ""))?;
                let (start, count) = argument
                    .split_once(',')
                    .ok_or_else(|| DaqError::unexpected_reply(command, argument))?;
                let start: usize = parse_arg(command, start)?;
                let count: usize = parse_arg(command, count)?;
                let size = inner.buffer.len();
                let values: Vec<f64> = (0..count)
                    .map(|i| inner.buffer[(start + i) % size])
                    .collect();
                Ok(format_block(&values))
            }
            "ACQ:SOUR1:DATA?" | "ACQ:SOUR2:DATA?" => Ok(format_block(&inner.buffer)),
            _ => Err(DaqError::Protocol(format!(
                "Mock Red Pitaya does not understand {:?}",
                command
            ))),
        }
    }
}

fn parse_arg<T: std::str::FromStr>(command: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| DaqError::unexpected_reply(command, value))
}

fn format_block(values: &[f64]) -> String {
    let body: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("{{{}}}", body.join(","))
}

#[async_trait]
impl CommandChannel for MockRedPitaya {
    async fn send(&self, command: &str) -> AppResult<()> {
        tracing::debug!("Mock Red Pitaya write: {}", command);
        self.handle_write(command)
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        tracing::debug!("Mock Red Pitaya query: {}", command);
        self.handle_query(command)
    }
}
