//! Red Pitaya acquisition buffer controller.
//!
//! The STEMlab digitizer writes samples into a fixed-size circular buffer
//! (16384 samples per channel on the reference board). This module configures
//! the capture (decimation, units, trigger level/delay, averaging), arms the
//! hardware trigger, exposes the write pointer and trigger status, and reads
//! segments of the buffer by absolute offset.
//!
//! # Wire format
//!
//! | Operation        | Command                               | Reply          |
//! |------------------|---------------------------------------|----------------|
//! | reset            | `ACQ:RST`                             |                |
//! | decimation       | `ACQ:DEC 2048`                        |                |
//! | units            | `ACQ:DATA:UNITS VOLTS`                |                |
//! | trigger level    | `ACQ:TRIG:LEV 1`                      |                |
//! | averaging        | `ACQ:AVG OFF`                         |                |
//! | trigger delay    | `ACQ:TRIG:DLY -8192`                  |                |
//! | arm trigger      | `ACQ:TRIG CH2_NE`                     |                |
//! | start/stop       | `ACQ:START` / `ACQ:STOP`              |                |
//! | write pointer    | `ACQ:WPOS?`                           | `4096`         |
//! | trigger status   | `ACQ:TRIG:STAT?`                      | `TD` / `WAIT`  |
//! | segment          | `ACQ:SOUR1:DATA:STA:N? 100,3`         | `{0.1,0.2,0.3}`|

use daq_core::channel::{query_u32, SharedChannel};
use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Samples per channel in the reference board's circular buffer.
pub const BUFFER_SIZE: u32 = 16384;

/// ADC sample rate of the reference board before decimation.
pub const SAMPLE_RATE_HZ: f64 = 125e6;

/// Largest decimation factor the acquisition core accepts.
pub const MAX_DECIMATION: u32 = 65536;

/// Trigger delay that places the trigger at the end of the captured data.
pub const END_OF_BUFFER_TRIGGER_DELAY: i32 = -8192;

// =============================================================================
// Wire enumerations
// =============================================================================

/// Units of the values returned by data queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataUnits {
    /// Calibrated volts
    Volts,
    /// Raw ADC counts
    Raw,
}

impl DataUnits {
    /// Wire code for `ACQ:DATA:UNITS`.
    pub fn code(self) -> &'static str {
        match self {
            DataUnits::Volts => "VOLTS",
            DataUnits::Raw => "RAW",
        }
    }
}

/// Analog input the data is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Input 1
    Ch1,
    /// Input 2
    Ch2,
}

impl Source {
    /// Wire code used inside data queries.
    pub fn code(self) -> &'static str {
        match self {
            Source::Ch1 => "SOUR1",
            Source::Ch2 => "SOUR2",
        }
    }
}

/// Hardware trigger source selected with `ACQ:TRIG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    /// Trigger disabled
    #[serde(rename = "DISABLED")]
    Disabled,
    /// Trigger immediately
    #[serde(rename = "NOW")]
    Now,
    /// Input 1, rising edge
    #[serde(rename = "CH1_PE")]
    Ch1PositiveEdge,
    /// Input 1, falling edge
    #[serde(rename = "CH1_NE")]
    Ch1NegativeEdge,
    /// Input 2, rising edge
    #[serde(rename = "CH2_PE")]
    Ch2PositiveEdge,
    /// Input 2, falling edge
    #[serde(rename = "CH2_NE")]
    Ch2NegativeEdge,
    /// External trigger input, rising edge
    #[serde(rename = "EXT_PE")]
    ExtPositiveEdge,
    /// External trigger input, falling edge
    #[serde(rename = "EXT_NE")]
    ExtNegativeEdge,
    /// Signal generator, rising edge
    #[serde(rename = "AWG_PE")]
    AwgPositiveEdge,
    /// Signal generator, falling edge
    #[serde(rename = "AWG_NE")]
    AwgNegativeEdge,
}

impl TriggerSource {
    /// Wire code for `ACQ:TRIG`.
    pub fn code(self) -> &'static str {
        match self {
            TriggerSource::Disabled => "DISABLED",
            TriggerSource::Now => "NOW",
            TriggerSource::Ch1PositiveEdge => "CH1_PE",
            TriggerSource::Ch1NegativeEdge => "CH1_NE",
            TriggerSource::Ch2PositiveEdge => "CH2_PE",
            TriggerSource::Ch2NegativeEdge => "CH2_NE",
            TriggerSource::ExtPositiveEdge => "EXT_PE",
            TriggerSource::ExtNegativeEdge => "EXT_NE",
            TriggerSource::AwgPositiveEdge => "AWG_PE",
            TriggerSource::AwgNegativeEdge => "AWG_NE",
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        let source = match code.trim() {
            "DISABLED" => TriggerSource::Disabled,
            "NOW" => TriggerSource::Now,
            "CH1_PE" => TriggerSource::Ch1PositiveEdge,
            "CH1_NE" => TriggerSource::Ch1NegativeEdge,
            "CH2_PE" => TriggerSource::Ch2PositiveEdge,
            "CH2_NE" => TriggerSource::Ch2NegativeEdge,
            "EXT_PE" => TriggerSource::ExtPositiveEdge,
            "EXT_NE" => TriggerSource::ExtNegativeEdge,
            "AWG_PE" => TriggerSource::AwgPositiveEdge,
            "AWG_NE" => TriggerSource::AwgNegativeEdge,
            _ => return None,
        };
        Some(source)
    }
}

/// Trigger state reported by `ACQ:TRIG:STAT?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    /// `TD` - the armed trigger fired
    Triggered,
    /// `WAIT` - still waiting for the trigger
    Waiting,
}

impl TriggerStatus {
    /// Classify a raw status reply. Unknown codes are a protocol error.
    pub fn from_reply(reply: &str) -> AppResult<Self> {
        match reply.trim() {
            "TD" => Ok(TriggerStatus::Triggered),
            "WAIT" => Ok(TriggerStatus::Waiting),
            other => Err(DaqError::unexpected_reply("ACQ:TRIG:STAT?", other)),
        }
    }
}

// =============================================================================
// AcquisitionConfig
// =============================================================================

/// Capture settings applied at the start of every sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Decimation factor (nonzero power of two)
    pub decimation: u32,
    /// Units of returned samples
    pub units: DataUnits,
    /// Trigger level in volts
    pub trigger_level: f64,
    /// Hardware averaging over decimated samples
    pub averaging: bool,
    /// Trigger delay in samples, left untouched when `None`
    pub trigger_delay: Option<i32>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            decimation: 2048,
            units: DataUnits::Volts,
            trigger_level: 1.0,
            averaging: false,
            trigger_delay: None,
        }
    }
}

impl AcquisitionConfig {
    /// Check every field without touching the instrument.
    pub fn validate(&self) -> AppResult<()> {
        validate_decimation(self.decimation)?;
        validate_trigger_level(self.trigger_level)?;
        Ok(())
    }
}

fn validate_decimation(decimation: u32) -> AppResult<()> {
    if !decimation.is_power_of_two() {
        return Err(DaqError::invalid_parameter(
            "decimation",
            format!("{} is not a nonzero power of two", decimation),
        ));
    }
    if decimation > MAX_DECIMATION {
        return Err(DaqError::invalid_parameter(
            "decimation",
            format!("{} exceeds the maximum of {}", decimation, MAX_DECIMATION),
        ));
    }
    Ok(())
}

fn validate_trigger_level(level: f64) -> AppResult<()> {
    if !(-20.0..=20.0).contains(&level) {
        return Err(DaqError::invalid_parameter(
            "trigger_level",
            format!("{} V is outside -20..20 V", level),
        ));
    }
    Ok(())
}

// =============================================================================
// Data block parsing
// =============================================================================

/// Parse a bracketed, comma-separated data reply such as `{ 1.0, 2.0, 3.0, }`.
///
/// Braces and whitespace are stripped before splitting. A trailing empty token
/// left by a terminal comma is dropped; any other empty or non-numeric token is
/// a protocol error.
pub fn parse_data_block(reply: &str) -> AppResult<Vec<f64>> {
    let body: String = reply
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '{' && *c != '}')
        .collect();

    if body.is_empty() {
        return Ok(Vec::new());
    }

    let mut tokens: Vec<&str> = body.split(',').collect();
    if tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }

    tokens
        .into_iter()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                DaqError::Protocol(format!("unparsable sample {:?} in data block", token))
            })
        })
        .collect()
}

// =============================================================================
// RedPitayaAcquisition
// =============================================================================

/// Controller for the Red Pitaya acquisition buffer.
///
/// # Example
///
/// ```rust,ignore
/// let client = ScpiClient::connect("192.168.1.100", 5000).await?;
/// let acq = RedPitayaAcquisition::new(Arc::new(client));
///
/// acq.configure(&AcquisitionConfig::default()).await?;
/// acq.start_logging().await?;
/// let wpos = acq.write_pointer().await?;
/// let samples = acq.read_segment(Source::Ch1, 0, wpos).await?;
/// ```
pub struct RedPitayaAcquisition {
    channel: SharedChannel,
    buffer_size: u32,
}

impl RedPitayaAcquisition {
    /// Create a controller on an open command channel.
    pub fn new(channel: SharedChannel) -> Self {
        Self {
            channel,
            buffer_size: BUFFER_SIZE,
        }
    }

    /// Override the circular buffer size (samples per channel).
    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Circular buffer size in samples.
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Bring the board into the state the sweep expects after power-up:
    /// reset, averaging off, decimation 2048, trigger at the end of the buffer,
    /// volts, 1 V trigger level.
    pub async fn initialize(&self) -> AppResult<()> {
        self.reset().await?;
        self.set_averaging(false).await?;
        self.set_decimation(2048).await?;
        self.set_trigger_delay(END_OF_BUFFER_TRIGGER_DELAY).await?;
        self.set_data_units(DataUnits::Volts).await?;
        self.set_trigger_level(1.0).await?;
        Ok(())
    }

    /// Reset all acquisition settings to hardware defaults.
    pub async fn reset(&self) -> AppResult<()> {
        self.channel.send("ACQ:RST").await
    }

    /// Apply `cfg`: decimation, units, trigger level, averaging and optional
    /// trigger delay, in that order. All fields are validated before the first
    /// command is sent.
    pub async fn configure(&self, cfg: &AcquisitionConfig) -> AppResult<()> {
        cfg.validate()?;

        self.channel
            .send(&format!("ACQ:DEC {}", cfg.decimation))
            .await?;
        self.set_data_units(cfg.units).await?;
        self.channel
            .send(&format!("ACQ:TRIG:LEV {}", cfg.trigger_level))
            .await?;
        self.set_averaging(cfg.averaging).await?;
        if let Some(delay) = cfg.trigger_delay {
            self.set_trigger_delay(delay).await?;
        }

        debug!(?cfg, "Applied acquisition config");
        Ok(())
    }

    /// Set the decimation factor.
    pub async fn set_decimation(&self, decimation: u32) -> AppResult<()> {
        validate_decimation(decimation)?;
        self.channel
            .send(&format!("ACQ:DEC {}", decimation))
            .await
    }

    /// Enable or disable hardware averaging.
    pub async fn set_averaging(&self, enabled: bool) -> AppResult<()> {
        let state = if enabled { "ON" } else { "OFF" };
        self.channel.send(&format!("ACQ:AVG {}", state)).await
    }

    /// Select the units of returned data.
    pub async fn set_data_units(&self, units: DataUnits) -> AppResult<()> {
        self.channel
            .send(&format!("ACQ:DATA:UNITS {}", units.code()))
            .await
    }

    /// Set the trigger level in volts.
    pub async fn set_trigger_level(&self, volts: f64) -> AppResult<()> {
        validate_trigger_level(volts)?;
        self.channel
            .send(&format!("ACQ:TRIG:LEV {}", volts))
            .await
    }

    /// Set the trigger delay in samples. `0` centres the trigger in the buffer.
    pub async fn set_trigger_delay(&self, samples: i32) -> AppResult<()> {
        self.channel
            .send(&format!("ACQ:TRIG:DLY {}", samples))
            .await
    }

    /// Arm the hardware trigger on `source`.
    pub async fn arm_trigger(&self, source: TriggerSource) -> AppResult<()> {
        self.channel
            .send(&format!("ACQ:TRIG {}", source.code()))
            .await
    }

    /// Begin writing samples into the circular buffer.
    pub async fn start_logging(&self) -> AppResult<()> {
        self.channel.send("ACQ:START").await
    }

    /// Halt buffer writes.
    pub async fn stop_logging(&self) -> AppResult<()> {
        self.channel.send("ACQ:STOP").await
    }

    /// Current write pointer position in the circular buffer.
    pub async fn write_pointer(&self) -> AppResult<u32> {
        query_u32(self.channel.as_ref(), "ACQ:WPOS?").await
    }

    /// Current trigger state.
    pub async fn trigger_status(&self) -> AppResult<TriggerStatus> {
        let reply = self.channel.query("ACQ:TRIG:STAT?").await?;
        TriggerStatus::from_reply(&reply)
    }

    /// Read `count` samples starting at absolute buffer offset `start`.
    ///
    /// A zero-length read returns an empty vector without touching the
    /// instrument.
    pub async fn read_segment(&self, source: Source, start: u32, count: u32) -> AppResult<Vec<f64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if u64::from(start) + u64::from(count) > u64::from(self.buffer_size) {
            return Err(DaqError::invalid_parameter(
                "count",
                format!(
                    "segment [{}, {}) exceeds the {}-sample buffer",
                    start,
                    u64::from(start) + u64::from(count),
                    self.buffer_size
                ),
            ));
        }

        let command = format!("ACQ:{}:DATA:STA:N? {},{}", source.code(), start, count);
        let reply = self.channel.query(&command).await?;
        let samples = parse_data_block(&reply)?;

        if samples.len() != count as usize {
            return Err(DaqError::Protocol(format!(
                "{:?} returned {} samples, expected {}",
                command,
                samples.len(),
                count
            )));
        }
        Ok(samples)
    }

    /// Read the whole buffer of `source`.
    pub async fn read_buffer(&self, source: Source) -> AppResult<Vec<f64>> {
        let reply = self
            .channel
            .query(&format!("ACQ:{}:DATA?", source.code()))
            .await?;
        parse_data_block(&reply)
    }
}
