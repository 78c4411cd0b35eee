//! Sweep parameters and the TSL's accepted ranges.

use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Tunable range of the TSL-770 in nm.
pub const WAVELENGTH_RANGE_NM: RangeInclusive<f64> = 1480.0..=1640.0;

/// Accepted sweep speed in nm/s.
pub const SPEED_RANGE_NM_PER_S: RangeInclusive<f64> = 0.5..=200.0;

/// Accepted sweep step in pm.
pub const STEP_RANGE_PM: RangeInclusive<f64> = 0.1..=160000.0;

/// Maximum output power in mW.
pub const MAX_POWER_MW: f64 = 13.0;

/// Check a wavelength against [`WAVELENGTH_RANGE_NM`].
pub fn check_wavelength(field: &'static str, nm: f64) -> AppResult<()> {
    if !WAVELENGTH_RANGE_NM.contains(&nm) {
        return Err(DaqError::invalid_parameter(
            field,
            format!("{} nm is outside 1480-1640 nm", nm),
        ));
    }
    Ok(())
}

/// Check a sweep speed against [`SPEED_RANGE_NM_PER_S`].
pub fn check_speed(speed: f64) -> AppResult<()> {
    if !SPEED_RANGE_NM_PER_S.contains(&speed) {
        return Err(DaqError::invalid_parameter(
            "speed",
            format!("{} nm/s is outside 0.5-200 nm/s", speed),
        ));
    }
    Ok(())
}

/// Check an output power against [`MAX_POWER_MW`]. NaN is rejected.
pub fn check_power(power: f64) -> AppResult<()> {
    if !(..=MAX_POWER_MW).contains(&power) {
        return Err(DaqError::invalid_parameter(
            "power",
            format!("{} mW is above the 13 mW limit", power),
        ));
    }
    Ok(())
}

/// Check a sweep step against [`STEP_RANGE_PM`].
pub fn check_step(step_pm: f64) -> AppResult<()> {
    if !STEP_RANGE_PM.contains(&step_pm) {
        return Err(DaqError::invalid_parameter(
            "step",
            format!("{} pm is outside 0.1-160000 pm", step_pm),
        ));
    }
    Ok(())
}

/// The four user-facing settings of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepParameters {
    /// First wavelength of the sweep in nm
    pub start_wavelength: f64,
    /// Last wavelength of the sweep in nm
    pub stop_wavelength: f64,
    /// Sweep speed in nm/s
    pub speed: f64,
    /// Output power in mW
    pub power: f64,
}

impl Default for SweepParameters {
    fn default() -> Self {
        Self {
            start_wavelength: 1500.0,
            stop_wavelength: 1600.0,
            speed: 10.0,
            power: 1.0,
        }
    }
}

impl SweepParameters {
    /// Validate every field. Nothing is sent to the laser if this fails.
    pub fn validate(&self) -> AppResult<()> {
        check_wavelength("start_wavelength", self.start_wavelength)?;
        check_wavelength("stop_wavelength", self.stop_wavelength)?;
        check_speed(self.speed)?;
        check_power(self.power)?;
        Ok(())
    }

    /// Nominal sweep duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.stop_wavelength - self.start_wavelength) / self.speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SweepParameters::default().validate().unwrap();
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let params = SweepParameters {
            start_wavelength: 1480.0,
            stop_wavelength: 1640.0,
            speed: 0.5,
            power: 13.0,
        };
        params.validate().unwrap();

        let params = SweepParameters {
            speed: 200.0,
            ..Default::default()
        };
        params.validate().unwrap();
    }

    #[test]
    fn test_each_field_is_checked() {
        let cases = [
            (
                SweepParameters {
                    start_wavelength: 1479.9,
                    ..Default::default()
                },
                "start_wavelength",
            ),
            (
                SweepParameters {
                    stop_wavelength: 1640.1,
                    ..Default::default()
                },
                "stop_wavelength",
            ),
            (
                SweepParameters {
                    speed: 0.4,
                    ..Default::default()
                },
                "speed",
            ),
            (
                SweepParameters {
                    power: 13.5,
                    ..Default::default()
                },
                "power",
            ),
        ];

        for (params, expected) in cases {
            match params.validate() {
                Err(DaqError::InvalidParameter { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected InvalidParameter({}), got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_nan_is_out_of_range() {
        for params in [
            SweepParameters {
                start_wavelength: f64::NAN,
                ..Default::default()
            },
            SweepParameters {
                speed: f64::NAN,
                ..Default::default()
            },
            SweepParameters {
                power: f64::NAN,
                ..Default::default()
            },
        ] {
            assert!(params.validate().is_err());
        }
    }

    #[test]
    fn test_step_range() {
        check_step(0.1).unwrap();
        check_step(160000.0).unwrap();
        assert!(check_step(0.05).is_err());
        assert!(check_step(160000.1).is_err());
    }

    #[test]
    fn test_duration() {
        let params = SweepParameters {
            start_wavelength: 1500.0,
            stop_wavelength: 1600.0,
            speed: 50.0,
            power: 1.0,
        };
        assert!((params.duration_secs() - 2.0).abs() < 1e-12);
    }
}
