//! CSV export of swept spectra.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use daq_driver_red_pitaya::DataUnits;
use daq_sweep::SweptSpectrum;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// `sweep_YYYYmmdd_HHMMSS.csv` inside `directory`, or
/// `sweep_YYYYmmdd_HHMMSS_NNN.csv` when numbering looped sweeps.
pub fn timestamped_path(directory: &Path, at: DateTime<Local>, sequence: Option<u32>) -> PathBuf {
    let stamp = at.format("%Y%m%d_%H%M%S");
    let name = match sequence {
        Some(n) => format!("sweep_{}_{:03}.csv", stamp, n),
        None => format!("sweep_{}.csv", stamp),
    };
    directory.join(name)
}

/// Column header for the amplitude axis.
fn amplitude_header(units: DataUnits) -> &'static str {
    match units {
        DataUnits::Volts => "Voltage (V)",
        DataUnits::Raw => "Amplitude (counts)",
    }
}

/// Write `spectrum` as two-column CSV, creating parent directories.
pub fn write_spectrum(path: &Path, spectrum: &SweptSpectrum, units: DataUnits) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(["Wavelength (nm)", amplitude_header(units)])?;
    for point in spectrum.iter() {
        writer.write_record([point.wavelength.to_string(), point.amplitude.to_string()])?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} points to {}", spectrum.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use daq_driver_santec::SweepParameters;
    use daq_sweep::map_to_wavelength;

    #[test]
    fn test_timestamped_path_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let path = timestamped_path(Path::new("/data"), at, None);
        assert_eq!(path, PathBuf::from("/data/sweep_20240307_140509.csv"));

        let numbered = timestamped_path(Path::new("/data"), at, Some(7));
        assert_eq!(numbered, PathBuf::from("/data/sweep_20240307_140509_007.csv"));
    }

    #[test]
    fn test_write_spectrum_round_trips_through_csv_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");

        let params = SweepParameters {
            start_wavelength: 1500.0,
            stop_wavelength: 1600.0,
            speed: 100.0,
            power: 1.0,
        };
        let samples: Vec<f64> = (0..200).map(|i| i as f64 * 0.01).collect();
        let spectrum = map_to_wavelength(&samples, 2.0, &params).unwrap();

        write_spectrum(&path, &spectrum, DataUnits::Volts).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "Wavelength (nm)");
        assert_eq!(&headers[1], "Voltage (V)");

        let rows: Vec<(f64, f64)> = reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                (r[0].parse().unwrap(), r[1].parse().unwrap())
            })
            .collect();
        assert_eq!(rows.len(), spectrum.len());
        assert_eq!(rows.last().unwrap().0, 1600.0);
    }

    #[test]
    fn test_raw_units_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        write_spectrum(&path, &SweptSpectrum::default(), DataUnits::Raw).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), "Wavelength (nm),Amplitude (counts)");
    }
}
