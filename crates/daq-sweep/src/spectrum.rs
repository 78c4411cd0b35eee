//! Time-to-wavelength mapping of an acquired sample stream.
//!
//! The digitizer starts logging before the laser ramp begins, so the head of
//! the stream covers settle and standby time. Only the trailing
//! `(stop - start) / speed` seconds of a uniform time axis over the measured
//! acquisition time are kept; the last kept sample lands on the stop
//! wavelength.

use daq_core::error::{AppResult, DaqError};
use daq_driver_santec::SweepParameters;
use serde::{Deserialize, Serialize};

/// One point of a swept spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPoint {
    /// Wavelength in nm
    pub wavelength: f64,
    /// Detector amplitude in acquisition units
    pub amplitude: f64,
}

/// Ordered `(wavelength, amplitude)` pairs produced by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweptSpectrum {
    points: Vec<SpectrumPoint>,
}

impl SweptSpectrum {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no sample fell inside the sweep window.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in acquisition order.
    pub fn points(&self) -> &[SpectrumPoint] {
        &self.points
    }

    /// Iterate over the points.
    pub fn iter(&self) -> impl Iterator<Item = &SpectrumPoint> {
        self.points.iter()
    }

    /// Wavelength axis.
    pub fn wavelengths(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.wavelength).collect()
    }

    /// Amplitude axis.
    pub fn amplitudes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.amplitude).collect()
    }
}

/// Map `samples`, acquired over `acquisition_time` seconds, onto the sweep
/// described by `params`.
///
/// # Errors
///
/// `InvalidParameter` when `speed` is zero or not finite, when `samples` is
/// empty, or when `acquisition_time` is negative or not finite.
pub fn map_to_wavelength(
    samples: &[f64],
    acquisition_time: f64,
    params: &SweepParameters,
) -> AppResult<SweptSpectrum> {
    if params.speed == 0.0 || !params.speed.is_finite() {
        return Err(DaqError::invalid_parameter(
            "speed",
            format!("cannot map a sweep at {} nm/s", params.speed),
        ));
    }
    if samples.is_empty() {
        return Err(DaqError::invalid_parameter("samples", "no samples to map"));
    }
    if !(acquisition_time >= 0.0 && acquisition_time.is_finite()) {
        return Err(DaqError::invalid_parameter(
            "acquisition_time",
            format!("{} s is not a valid duration", acquisition_time),
        ));
    }

    let n = samples.len();
    let time_at = |i: usize| -> f64 {
        if n == 1 {
            0.0
        } else {
            acquisition_time * i as f64 / (n - 1) as f64
        }
    };

    let window_start = acquisition_time - params.duration_secs();

    // The axis is monotonic, so the kept samples are a suffix
    let first = (0..n).find(|&i| time_at(i) >= window_start).unwrap_or(n);
    let t_last = time_at(n - 1);

    let points = (first..n)
        .map(|i| SpectrumPoint {
            wavelength: params.stop_wavelength + params.speed * (time_at(i) - t_last),
            amplitude: samples[i],
        })
        .collect();

    Ok(SweptSpectrum { points })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(start: f64, stop: f64, speed: f64) -> SweepParameters {
        SweepParameters {
            start_wavelength: start,
            stop_wavelength: stop,
            speed,
            power: 1.0,
        }
    }

    #[test]
    fn test_retains_trailing_window_and_ends_at_stop() {
        let samples: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let spectrum = map_to_wavelength(&samples, 2.0, &params(1500.0, 1600.0, 100.0)).unwrap();

        // t_i = 2 i / 199 >= 1.0 keeps i = 100..=199
        assert_eq!(spectrum.len(), 100);
        let last = spectrum.points().last().unwrap();
        assert_eq!(last.wavelength, 1600.0);
        assert_eq!(last.amplitude, 199.0);
        assert_eq!(spectrum.points()[0].amplitude, 100.0);

        let first_wavelength = spectrum.points()[0].wavelength;
        assert!(first_wavelength >= 1500.0 && first_wavelength < 1501.0);
    }

    #[test]
    fn test_wavelengths_increase_monotonically() {
        let samples = vec![0.5; 1000];
        let spectrum = map_to_wavelength(&samples, 5.0, &params(1500.0, 1600.0, 50.0)).unwrap();
        let wavelengths = spectrum.wavelengths();
        assert!(wavelengths.windows(2).all(|w| w[0] < w[1]));
        assert!(wavelengths.iter().all(|w| *w >= 1500.0 - 1e-9));
    }

    #[test]
    fn test_short_acquisition_keeps_everything() {
        // Sweep nominally longer than the acquisition: nothing is trimmed
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let spectrum = map_to_wavelength(&samples, 0.5, &params(1500.0, 1600.0, 100.0)).unwrap();
        assert_eq!(spectrum.amplitudes(), samples);
    }

    #[test]
    fn test_single_sample_maps_to_stop() {
        let spectrum = map_to_wavelength(&[0.3], 1.0, &params(1500.0, 1600.0, 10.0)).unwrap();
        assert_eq!(spectrum.len(), 1);
        assert_eq!(spectrum.points()[0].wavelength, 1600.0);
    }

    #[test]
    fn test_zero_speed_rejected() {
        let err = map_to_wavelength(&[1.0, 2.0], 1.0, &params(1500.0, 1600.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            DaqError::InvalidParameter { field: "speed", .. }
        ));
    }

    #[test]
    fn test_empty_samples_rejected() {
        let err = map_to_wavelength(&[], 1.0, &params(1500.0, 1600.0, 10.0)).unwrap_err();
        assert!(matches!(
            err,
            DaqError::InvalidParameter {
                field: "samples",
                ..
            }
        ));
    }

    #[test]
    fn test_reversed_span_yields_empty_spectrum() {
        let spectrum = map_to_wavelength(&[1.0; 10], 1.0, &params(1600.0, 1500.0, 10.0)).unwrap();
        assert!(spectrum.is_empty());
    }
}
