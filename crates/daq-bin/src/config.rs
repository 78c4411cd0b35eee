//! Layered configuration for the `sts` binary.
//!
//! Layers, later ones winning:
//!
//! 1. Library defaults ([`Settings::default`])
//! 2. TOML file (`config/sts.toml` or `--config`), skipped if missing
//! 3. Environment variables prefixed `STS_`, nested with `__`
//!    (`STS_RED_PITAYA__HOST=10.0.0.5`, `STS_ENGINE__POLL_INTERVAL_MS=5`)

use anyhow::{Context, Result};
use daq_core::error::{AppResult, DaqError};
use daq_driver_red_pitaya::AcquisitionConfig;
use daq_driver_santec::{SweepParameters, TslModel};
use daq_sweep::EngineConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sts.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "STS_";

/// Red Pitaya connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedPitayaSettings {
    /// Host name or IP address
    pub host: String,
    /// SCPI server port
    pub port: u16,
    /// Reply timeout (ms)
    pub timeout_ms: u64,
    /// Pause after each write-only command (ms)
    pub write_delay_ms: u64,
    /// Use the simulated digitizer
    pub mock: bool,
}

impl Default for RedPitayaSettings {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: daq_core::scpi::DEFAULT_PORT,
            timeout_ms: daq_core::scpi::DEFAULT_TIMEOUT_MS,
            write_delay_ms: 0,
            mock: false,
        }
    }
}

/// How the laser is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaserTransport {
    /// SCPI over the LAN port
    Tcp,
    /// GPIB/USB through VISA (requires the `visa` feature)
    Visa,
}

/// Santec TSL connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSettings {
    /// Transport
    pub transport: LaserTransport,
    /// Host for the `tcp` transport
    pub host: String,
    /// Port for the `tcp` transport
    pub port: u16,
    /// VISA resource for the `visa` transport
    pub resource: String,
    /// Laser model
    pub model: TslModel,
    /// Reply timeout (ms)
    pub timeout_ms: u64,
    /// Pause after each write-only command (ms); the TSL needs a short gap
    pub write_delay_ms: u64,
    /// Use the simulated laser
    pub mock: bool,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            transport: LaserTransport::Tcp,
            host: "192.168.1.101".to_string(),
            port: daq_core::scpi::DEFAULT_PORT,
            resource: "GPIB0::1::INSTR".to_string(),
            model: TslModel::Tsl770,
            timeout_ms: daq_core::scpi::DEFAULT_TIMEOUT_MS,
            write_delay_ms: 10,
            mock: false,
        }
    }
}

/// Where exported spectra go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory for timestamped CSV files
    pub directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data"),
        }
    }
}

/// Complete application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Digitizer connection
    pub red_pitaya: RedPitayaSettings,
    /// Laser connection
    pub laser: LaserSettings,
    /// Capture settings applied every sweep
    pub acquisition: AcquisitionConfig,
    /// Engine timing and routing
    pub engine: EngineConfig,
    /// Default sweep parameters (overridable on the command line)
    pub sweep: SweepParameters,
    /// Export settings
    pub output: OutputSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            red_pitaya: RedPitayaSettings::default(),
            laser: LaserSettings::default(),
            acquisition: AcquisitionConfig::default(),
            engine: EngineConfig::default(),
            sweep: SweepParameters::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Settings::default()).data()
    }
}

impl Settings {
    /// Load defaults, then the TOML file, then `STS_` environment variables,
    /// and validate the result.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Settings::default());

        if file_path.exists() {
            figment = figment.merge(Toml::file(&file_path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", file_path.display());
        } else {
            // Tracing is not up yet; the log level comes from this file
            eprintln!(
                "Config file not found: {}. Using defaults.",
                file_path.display()
            );
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(figment)
    }

    /// Extract and validate settings from an assembled figment.
    pub fn extract(figment: Figment) -> Result<Self> {
        let settings: Settings = figment
            .extract()
            .map_err(DaqError::from)
            .context("Failed to extract configuration from Figment")?;

        settings
            .validate()
            .context("Configuration validation failed")?;

        Ok(settings)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.log_level.parse::<tracing_subscriber::filter::EnvFilter>().is_err() {
            return Err(DaqError::Configuration(format!(
                "log_level '{}' is not a valid filter",
                self.log_level
            )));
        }

        validate_timeout(self.red_pitaya.timeout_ms, "red_pitaya.timeout_ms")?;
        validate_timeout(self.laser.timeout_ms, "laser.timeout_ms")?;
        validate_write_delay(self.red_pitaya.write_delay_ms, "red_pitaya.write_delay_ms")?;
        validate_write_delay(self.laser.write_delay_ms, "laser.write_delay_ms")?;

        if !self.red_pitaya.mock {
            validate_endpoint(&self.red_pitaya.host, self.red_pitaya.port, "red_pitaya")?;
        }
        if !self.laser.mock {
            match self.laser.transport {
                LaserTransport::Tcp => {
                    validate_endpoint(&self.laser.host, self.laser.port, "laser")?
                }
                LaserTransport::Visa if self.laser.resource.trim().is_empty() => {
                    return Err(DaqError::Configuration(
                        "laser.resource must be set for the visa transport".to_string(),
                    ))
                }
                LaserTransport::Visa => {}
            }
        }

        self.acquisition
            .validate()
            .map_err(|e| section_error("acquisition", e))?;
        self.engine
            .validate()
            .map_err(|e| section_error("engine", e))?;
        self.sweep
            .validate()
            .map_err(|e| section_error("sweep", e))?;

        let buffer_period = self
            .engine
            .buffer_period(self.acquisition.decimation)
            .map_err(|e| section_error("engine", e))?;
        if self.engine.poll_interval() >= buffer_period {
            return Err(DaqError::Configuration(format!(
                "engine.poll_interval_ms = {} is not shorter than one buffer period ({} ms); samples would be overwritten",
                self.engine.poll_interval_ms,
                buffer_period.as_millis()
            )));
        }

        Ok(())
    }
}

fn section_error(section: &str, err: DaqError) -> DaqError {
    match err {
        DaqError::InvalidParameter { field, message } => {
            DaqError::Configuration(format!("{}.{}: {}", section, field, message))
        }
        other => other,
    }
}

fn validate_timeout(value: u64, name: &str) -> AppResult<()> {
    if !(100..=60_000).contains(&value) {
        return Err(DaqError::Configuration(format!(
            "Timeout '{}' = {}ms is out of valid range (100ms - 60000ms)",
            name, value
        )));
    }
    Ok(())
}

fn validate_write_delay(value: u64, name: &str) -> AppResult<()> {
    if value > 1000 {
        return Err(DaqError::Configuration(format!(
            "'{}' = {}ms is out of valid range (0ms - 1000ms)",
            name, value
        )));
    }
    Ok(())
}

fn validate_endpoint(host: &str, port: u16, section: &str) -> AppResult<()> {
    if host.trim().is_empty() {
        return Err(DaqError::Configuration(format!(
            "{}.host must not be empty",
            section
        )));
    }
    if port == 0 {
        return Err(DaqError::Configuration(format!(
            "{}.port must not be 0",
            section
        )));
    }
    Ok(())
}
