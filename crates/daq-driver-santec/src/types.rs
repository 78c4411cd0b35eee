//! Closed enumerations for every integer code the TSL accepts or reports.

use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// An enumeration carried over the wire as a small integer.
pub trait WireCode: Sized + Copy {
    /// Integer sent to the instrument.
    fn code(self) -> u8;

    /// Inverse of [`WireCode::code`].
    fn from_code(code: u8) -> Option<Self>;

    /// Parse a query reply such as `"1"` or `"+1"`.
    fn from_reply(command: &str, reply: &str) -> AppResult<Self> {
        reply
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| DaqError::unexpected_reply(command, reply))
    }
}

macro_rules! wire_code {
    ($ty:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl WireCode for $ty {
            fn code(self) -> u8 {
                match self {
                    $($ty::$variant => $code,)+
                }
            }

            fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

/// Unit of the CW wavelength (`:WAV:UNIT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WavelengthUnit {
    /// Nanometres
    Nm,
    /// Terahertz
    Thz,
}
wire_code!(WavelengthUnit { Nm = 0, Thz = 1 });

/// Unit of the output power (`:POW:UNIT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerUnit {
    /// dBm
    Dbm,
    /// Milliwatts
    Mw,
}
wire_code!(PowerUnit { Dbm = 0, Mw = 1 });

/// Where the sweep start trigger comes from (`:TRIG:INP:EXT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerInput {
    /// Front panel / internal trigger
    Internal,
    /// Rear BNC
    External,
}
wire_code!(TriggerInput {
    Internal = 0,
    External = 1
});

/// Active edge of the external trigger input (`:TRIG:INP:ACT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEdge {
    /// Rising edge
    Rising,
    /// Falling edge
    Falling,
}
wire_code!(TriggerEdge {
    Rising = 0,
    Falling = 1
});

/// When the TSL emits its output trigger (`:TRIG:OUTP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOutput {
    /// No output trigger
    None,
    /// At the end of the sweep
    Stop,
    /// At the start of the sweep
    Start,
    /// At every wavelength step
    Step,
}
wire_code!(TriggerOutput {
    None = 0,
    Stop = 1,
    Start = 2,
    Step = 3
});

/// Sweep shape (`:WAV:SWE:MOD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// One-way, stepped
    OneWayStep,
    /// One-way, continuous
    OneWayContinuous,
    /// Two-way, stepped
    TwoWayStep,
    /// Two-way, continuous
    TwoWayContinuous,
}
wire_code!(SweepMode {
    OneWayStep = 0,
    OneWayContinuous = 1,
    TwoWayStep = 2,
    TwoWayContinuous = 3
});

/// Sweep state reported by `:WAV:SWE?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Not sweeping
    Stopped,
    /// Sweep in progress
    Running,
    /// Armed, waiting for the start trigger
    StandingByTrigger,
    /// Moving to the start wavelength
    Preparing,
}
wire_code!(SweepStatus {
    Stopped = 0,
    Running = 1,
    StandingByTrigger = 2,
    Preparing = 3
});

impl std::fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SweepStatus::Stopped => "Stopped",
            SweepStatus::Running => "Running",
            SweepStatus::StandingByTrigger => "Standing by trigger",
            SweepStatus::Preparing => "Preparation for sweep start",
        };
        f.write_str(text)
    }
}

/// Laser model. The TSL-550 takes bare values and a step in nanometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TslModel {
    /// TSL-770 (unit-suffixed values)
    #[default]
    Tsl770,
    /// TSL-550
    Tsl550,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_manual() {
        assert_eq!(TriggerOutput::Stop.code(), 1);
        assert_eq!(SweepMode::OneWayContinuous.code(), 1);
        assert_eq!(SweepMode::TwoWayContinuous.code(), 3);
        assert_eq!(TriggerInput::External.code(), 1);
        assert_eq!(PowerUnit::Mw.code(), 1);
        assert_eq!(WavelengthUnit::Nm.code(), 0);
    }

    #[test]
    fn test_from_reply() {
        assert_eq!(
            SweepStatus::from_reply(":WAV:SWE?", "2\r\n").unwrap(),
            SweepStatus::StandingByTrigger
        );
        assert_eq!(
            TriggerOutput::from_reply(":TRIG:OUTP?", "+3").unwrap(),
            TriggerOutput::Step
        );
        assert!(matches!(
            SweepStatus::from_reply(":WAV:SWE?", "7"),
            Err(DaqError::Protocol(_))
        ));
        assert!(SweepMode::from_reply(":WAV:SWE:MOD?", "one").is_err());
    }

    #[test]
    fn test_sweep_status_display() {
        assert_eq!(
            SweepStatus::StandingByTrigger.to_string(),
            "Standing by trigger"
        );
    }

    #[test]
    fn test_model_deserializes_lowercase() {
        let model: TslModel = serde_json::from_str("\"tsl550\"").unwrap();
        assert_eq!(model, TslModel::Tsl550);
    }
}
