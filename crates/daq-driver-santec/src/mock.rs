//! Simulated TSL for running sweeps without hardware.
//!
//! [`MockTsl`] tracks the settings written to it and answers queries in the
//! laser's own SI units. A started sweep with trigger standby enabled waits in
//! `Standing by trigger` until `:TRIG:INP:SOFT` arrives.

use crate::types::{
    PowerUnit, SweepMode, SweepStatus, TriggerEdge, TriggerInput, TriggerOutput, TslModel,
    WavelengthUnit, WireCode,
};
use async_trait::async_trait;
use daq_core::channel::CommandChannel;
use daq_core::error::{AppResult, DaqError};
use parking_lot::Mutex;

/// Settings the mock currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct MockTslState {
    /// CW wavelength in nm
    pub wavelength_nm: f64,
    /// CW wavelength unit
    pub wavelength_unit: WavelengthUnit,
    /// Diode on
    pub diode_on: bool,
    /// Power unit
    pub power_unit: PowerUnit,
    /// Output power in mW
    pub power_mw: f64,
    /// Trigger input
    pub trigger_input: TriggerInput,
    /// Trigger edge
    pub trigger_edge: TriggerEdge,
    /// Trigger standby enabled
    pub trigger_standby: bool,
    /// Output trigger timing
    pub trigger_output: TriggerOutput,
    /// Sweep repeat cycles
    pub sweep_cycles: u32,
    /// Sweep step in pm
    pub sweep_step_pm: f64,
    /// Sweep start in nm
    pub start_nm: f64,
    /// Sweep stop in nm
    pub stop_nm: f64,
    /// Sweep shape
    pub sweep_mode: SweepMode,
    /// Sweep speed in nm/s
    pub speed_nm_per_s: f64,
    /// Sweep state
    pub sweep_status: SweepStatus,
    /// Software triggers received
    pub software_triggers: u32,
}

impl Default for MockTslState {
    fn default() -> Self {
        Self {
            wavelength_nm: 1550.0,
            wavelength_unit: WavelengthUnit::Nm,
            diode_on: true,
            power_unit: PowerUnit::Mw,
            power_mw: 1.0,
            trigger_input: TriggerInput::Internal,
            trigger_edge: TriggerEdge::Rising,
            trigger_standby: false,
            trigger_output: TriggerOutput::None,
            sweep_cycles: 0,
            sweep_step_pm: 1.0,
            start_nm: 1500.0,
            stop_nm: 1600.0,
            sweep_mode: SweepMode::OneWayContinuous,
            speed_nm_per_s: 10.0,
            sweep_status: SweepStatus::Stopped,
            software_triggers: 0,
        }
    }
}

/// Mock Santec TSL.
pub struct MockTsl {
    state: Mutex<MockTslState>,
    model: TslModel,
    gpib_address: u32,
}

impl Default for MockTsl {
    fn default() -> Self {
        Self::new(TslModel::Tsl770)
    }
}

impl MockTsl {
    /// Create a mock that expects the command dialect of `model`.
    pub fn new(model: TslModel) -> Self {
        Self {
            state: Mutex::new(MockTslState::default()),
            model,
            gpib_address: 1,
        }
    }

    /// Snapshot of the current settings.
    pub fn state(&self) -> MockTslState {
        self.state.lock().clone()
    }

    /// Strip the unit suffix the TSL-770 dialect appends and parse the number.
    fn value(&self, command: &str, argument: &str, unit: &str) -> AppResult<f64> {
        let number = match self.model {
            TslModel::Tsl770 => argument
                .strip_suffix(unit)
                .ok_or_else(|| DaqError::unexpected_reply(command, argument))?,
            TslModel::Tsl550 => argument,
        };
        number
            .trim()
            .parse::<f64>()
            .map_err(|_| DaqError::unexpected_reply(command, argument))
    }

    fn handle_write(&self, command: &str) -> AppResult<()> {
        let (header, argument) = match command.split_once(' ') {
            Some((h, a)) => (h, a.trim()),
            None => (command, ""),
        };

        let mut state = self.state.lock();
        match header {
            ":WAV:UNIT" => state.wavelength_unit = code(command, argument)?,
            ":WAV" => state.wavelength_nm = self.value(command, argument, "nm")?,
            ":POW:STAT" => state.diode_on = flag(command, argument)?,
            ":POW:UNIT" => state.power_unit = code(command, argument)?,
            ":POW" => state.power_mw = self.value(command, argument, "mW")?,
            ":TRIG:INP:EXT" => state.trigger_input = code(command, argument)?,
            ":TRIG:INP:ACT" => state.trigger_edge = code(command, argument)?,
            ":TRIG:INP:STAN" => state.trigger_standby = flag(command, argument)?,
            ":TRIG:OUTP" => state.trigger_output = code(command, argument)?,
            ":TRIG:INP:SOFT" => {
                state.software_triggers += 1;
                if state.sweep_status == SweepStatus::StandingByTrigger {
                    state.sweep_status = SweepStatus::Running;
                }
            }
            ":WAV:SWE:CYCL" => {
                state.sweep_cycles = argument
                    .parse()
                    .map_err(|_| DaqError::unexpected_reply(command, argument))?
            }
            ":WAV:SWE:STEP" => {
                state.sweep_step_pm = match self.model {
                    TslModel::Tsl770 => self.value(command, argument, "pm")?,
                    TslModel::Tsl550 => self.value(command, argument, "")? * 1000.0,
                }
            }
            ":WAV:SWE:STAR" => state.start_nm = self.value(command, argument, "nm")?,
            ":WAV:SWE:STOP" => state.stop_nm = self.value(command, argument, "nm")?,
            ":WAV:SWE:MOD" => state.sweep_mode = code(command, argument)?,
            ":WAV:SWE:SPE" | ":WAVE:SWE:SPE" => {
                state.speed_nm_per_s = self.value(command, argument, "nm/s")?
            }
            ":WAV:SWE" => {
                state.sweep_status = if flag(command, argument)? {
                    if state.trigger_standby {
                        SweepStatus::StandingByTrigger
                    } else {
                        SweepStatus::Running
                    }
                } else {
                    SweepStatus::Stopped
                }
            }
            _ => {
                tracing::warn!("Mock TSL ignoring unknown command: {}", command);
            }
        }
        Ok(())
    }

    fn handle_query(&self, command: &str) -> AppResult<String> {
        let state = self.state.lock();
        let reply = match command {
            "*IDN?" => "SANTEC,TSL-770,MOCK0001,0001.0000".to_string(),
            ":SYST:COMM:GPIB:ADDR?" => self.gpib_address.to_string(),
            ":WAV?" => format!("{:E}", state.wavelength_nm * 1e-9),
            ":TRIG:INP:EXT?" => state.trigger_input.code().to_string(),
            ":TRIG:INP:STAN?" => u8::from(state.trigger_standby).to_string(),
            ":TRIG:OUTP?" => state.trigger_output.code().to_string(),
            ":WAV:SWE:STEP?" => format!("{:E}", state.sweep_step_pm * 1e-12),
            ":WAV:SWE:STAR?" => format!("{:E}", state.start_nm * 1e-9),
            ":WAV:SWE:STOP?" => format!("{:E}", state.stop_nm * 1e-9),
            ":WAV:SWE:MOD?" => state.sweep_mode.code().to_string(),
            ":WAV:SWE:SPE?" => format!("{:E}", state.speed_nm_per_s * 1e-9),
            ":WAV:SWE?" => state.sweep_status.code().to_string(),
            _ => {
                return Err(DaqError::Protocol(format!(
                    "Mock TSL does not understand {:?}",
                    command
                )))
            }
        };
        Ok(reply)
    }
}

fn code<T: WireCode>(command: &str, argument: &str) -> AppResult<T> {
    T::from_reply(command, argument)
}

fn flag(command: &str, argument: &str) -> AppResult<bool> {
    match argument {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(DaqError::unexpected_reply(command, argument)),
    }
}

#[async_trait]
impl CommandChannel for MockTsl {
    async fn send(&self, command: &str) -> AppResult<()> {
        tracing::debug!("Mock TSL write: {}", command);
        self.handle_write(command)
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        tracing::debug!("Mock TSL query: {}", command);
        self.handle_query(command)
    }
}
