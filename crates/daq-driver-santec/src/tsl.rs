//! Santec TSL-770 / TSL-550 tunable laser driver
//!
//! # Protocol Overview
//!
//! - Transport: GPIB (VISA) or LAN (SCPI over TCP, port 5000)
//! - Terminator: CR+LF
//! - Values are written with unit suffixes on the TSL-770 (`:WAV 1550nm`) and
//!   bare on the TSL-550 (`:WAV 1550`)
//! - Wavelength, step and speed queries reply in SI units (m, m/s)
//!
//! # Sweep commands
//!
//! - `:WAV:SWE:STAR 1500nm` / `:WAV:SWE:STOP 1600nm` - sweep span
//! - `:WAV:SWE:SPE 50nm/s` - continuous sweep speed
//! - `:WAV:SWE:MOD 1` - one-way continuous
//! - `:TRIG:INP:STAN 1` - hold the sweep until a trigger arrives
//! - `:TRIG:INP:SOFT` - software trigger
//! - `:WAV:SWE 1` / `:WAV:SWE 0` - start / stop
//! - `:WAV:SWE?` - 0 stopped, 1 running, 2 standing by trigger, 3 preparing
//!
//! Every setter validates its argument before anything is written; an
//! out-of-range value returns `InvalidParameter` and sends nothing.

use crate::params::{
    check_power, check_speed, check_step, check_wavelength, SweepParameters,
};
use crate::types::{
    PowerUnit, SweepMode, SweepStatus, TriggerEdge, TriggerInput, TriggerOutput, TslModel,
    WavelengthUnit, WireCode,
};
use daq_core::channel::{query_bool, query_f64, query_u32, SharedChannel};
use daq_core::error::AppResult;
use tracing::{debug, info, instrument};

const METRES_TO_NM: f64 = 1e9;
const METRES_TO_PM: f64 = 1e12;

/// Driver for a Santec TSL tunable laser.
pub struct TslDriver {
    channel: SharedChannel,
    model: TslModel,
}

impl TslDriver {
    /// Create a driver on an open command channel.
    pub fn new(channel: SharedChannel, model: TslModel) -> Self {
        Self { channel, model }
    }

    /// Laser model this driver formats commands for.
    pub fn model(&self) -> TslModel {
        self.model
    }

    fn suffixed(&self, value: f64, unit: &str) -> String {
        match self.model {
            TslModel::Tsl770 => format!("{}{}", value, unit),
            TslModel::Tsl550 => value.to_string(),
        }
    }

    async fn send_code<T: WireCode>(&self, header: &str, value: T) -> AppResult<()> {
        self.channel
            .send(&format!("{} {}", header, value.code()))
            .await
    }

    async fn query_code<T: WireCode>(&self, command: &str) -> AppResult<T> {
        let reply = self.channel.query(command).await?;
        T::from_reply(command, &reply)
    }

    /// Apply the power-up defaults: nm and mW units, external rising-edge
    /// trigger with an output pulse at sweep end, one-way continuous sweep over
    /// 1500-1600 nm with a 0.1 pm step and no repeat cycles.
    #[instrument(skip(self), err)]
    pub async fn initialize(&self) -> AppResult<()> {
        self.set_wavelength_unit(WavelengthUnit::Nm).await?;
        self.set_power_unit(PowerUnit::Mw).await?;
        self.set_trigger_input(TriggerInput::External).await?;
        self.set_trigger_edge(TriggerEdge::Rising).await?;
        self.set_trigger_output(TriggerOutput::Stop).await?;
        self.set_sweep_mode(SweepMode::OneWayContinuous).await?;
        self.set_start_wavelength(1500.0).await?;
        self.set_stop_wavelength(1600.0).await?;
        self.set_sweep_step(0.1).await?;
        self.set_sweep_cycles(0).await?;
        info!(model = ?self.model, "TSL initialized");
        Ok(())
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// `*IDN?` reply.
    pub async fn identify(&self) -> AppResult<String> {
        self.channel.query("*IDN?").await
    }

    /// GPIB address configured on the laser.
    pub async fn gpib_address(&self) -> AppResult<u32> {
        query_u32(self.channel.as_ref(), ":SYST:COMM:GPIB:ADDR?").await
    }

    // =========================================================================
    // CW output
    // =========================================================================

    /// Select nm or THz for the CW wavelength.
    pub async fn set_wavelength_unit(&self, unit: WavelengthUnit) -> AppResult<()> {
        self.send_code(":WAV:UNIT", unit).await
    }

    /// Current CW wavelength in nm.
    pub async fn wavelength(&self) -> AppResult<f64> {
        Ok(query_f64(self.channel.as_ref(), ":WAV?").await? * METRES_TO_NM)
    }

    /// Tune the CW wavelength (1480-1640 nm).
    pub async fn set_wavelength(&self, nm: f64) -> AppResult<()> {
        check_wavelength("wavelength", nm)?;
        self.channel
            .send(&format!(":WAV {}", self.suffixed(nm, "nm")))
            .await
    }

    /// Switch the laser diode on or off.
    pub async fn set_diode(&self, on: bool) -> AppResult<()> {
        self.channel
            .send(&format!(":POW:STAT {}", u8::from(on)))
            .await
    }

    /// Select dBm or mW for the output power.
    pub async fn set_power_unit(&self, unit: PowerUnit) -> AppResult<()> {
        self.send_code(":POW:UNIT", unit).await
    }

    /// Set the output power in mW (at most 13 mW).
    pub async fn set_power(&self, mw: f64) -> AppResult<()> {
        check_power(mw)?;
        self.channel
            .send(&format!(":POW {}", self.suffixed(mw, "mW")))
            .await
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Select the sweep start trigger input.
    pub async fn set_trigger_input(&self, input: TriggerInput) -> AppResult<()> {
        self.send_code(":TRIG:INP:EXT", input).await
    }

    /// Currently selected trigger input.
    pub async fn trigger_input(&self) -> AppResult<TriggerInput> {
        self.query_code(":TRIG:INP:EXT?").await
    }

    /// Take sweep start triggers from the rear input.
    pub async fn arm_external_trigger(&self) -> AppResult<()> {
        self.set_trigger_input(TriggerInput::External).await
    }

    /// Select the active edge of the external trigger.
    pub async fn set_trigger_edge(&self, edge: TriggerEdge) -> AppResult<()> {
        self.send_code(":TRIG:INP:ACT", edge).await
    }

    /// Hold a started sweep until a trigger arrives.
    pub async fn set_trigger_standby(&self, enabled: bool) -> AppResult<()> {
        self.channel
            .send(&format!(":TRIG:INP:STAN {}", u8::from(enabled)))
            .await
    }

    /// Whether trigger standby is enabled.
    pub async fn trigger_standby(&self) -> AppResult<bool> {
        query_bool(self.channel.as_ref(), ":TRIG:INP:STAN?").await
    }

    /// Choose when the output trigger pulse is emitted.
    pub async fn set_trigger_output(&self, output: TriggerOutput) -> AppResult<()> {
        self.send_code(":TRIG:OUTP", output).await
    }

    /// Current output trigger timing.
    pub async fn trigger_output(&self) -> AppResult<TriggerOutput> {
        self.query_code(":TRIG:OUTP?").await
    }

    /// Issue a software trigger.
    pub async fn send_software_trigger(&self) -> AppResult<()> {
        self.channel.send(":TRIG:INP:SOFT").await
    }

    // =========================================================================
    // Sweep settings
    // =========================================================================

    /// Number of repeat cycles; 0 runs a single sweep.
    pub async fn set_sweep_cycles(&self, cycles: u32) -> AppResult<()> {
        self.channel
            .send(&format!(":WAV:SWE:CYCL {}", cycles))
            .await
    }

    /// Set the step size in pm (0.1-160000 pm).
    pub async fn set_sweep_step(&self, pm: f64) -> AppResult<()> {
        check_step(pm)?;
        let command = match self.model {
            TslModel::Tsl770 => format!(":WAV:SWE:STEP {}pm", pm),
            TslModel::Tsl550 => format!(":WAV:SWE:STEP {}", pm / 1000.0),
        };
        self.channel.send(&command).await
    }

    /// Step size in pm.
    pub async fn sweep_step(&self) -> AppResult<f64> {
        Ok(query_f64(self.channel.as_ref(), ":WAV:SWE:STEP?").await? * METRES_TO_PM)
    }

    /// Set the first wavelength of the sweep.
    pub async fn set_start_wavelength(&self, nm: f64) -> AppResult<()> {
        check_wavelength("start_wavelength", nm)?;
        self.channel
            .send(&format!(":WAV:SWE:STAR {}", self.suffixed(nm, "nm")))
            .await
    }

    /// First wavelength of the sweep in nm.
    pub async fn start_wavelength(&self) -> AppResult<f64> {
        Ok(query_f64(self.channel.as_ref(), ":WAV:SWE:STAR?").await? * METRES_TO_NM)
    }

    /// Set the last wavelength of the sweep.
    pub async fn set_stop_wavelength(&self, nm: f64) -> AppResult<()> {
        check_wavelength("stop_wavelength", nm)?;
        self.channel
            .send(&format!(":WAV:SWE:STOP {}", self.suffixed(nm, "nm")))
            .await
    }

    /// Last wavelength of the sweep in nm.
    pub async fn stop_wavelength(&self) -> AppResult<f64> {
        Ok(query_f64(self.channel.as_ref(), ":WAV:SWE:STOP?").await? * METRES_TO_NM)
    }

    /// Select the sweep shape.
    pub async fn set_sweep_mode(&self, mode: SweepMode) -> AppResult<()> {
        self.send_code(":WAV:SWE:MOD", mode).await
    }

    /// Current sweep shape.
    pub async fn sweep_mode(&self) -> AppResult<SweepMode> {
        self.query_code(":WAV:SWE:MOD?").await
    }

    /// Set the continuous sweep speed (0.5-200 nm/s).
    pub async fn set_sweep_speed(&self, nm_per_s: f64) -> AppResult<()> {
        check_speed(nm_per_s)?;
        let command = match self.model {
            TslModel::Tsl770 => format!(":WAV:SWE:SPE {}nm/s", nm_per_s),
            TslModel::Tsl550 => format!(":WAVE:SWE:SPE {}", nm_per_s),
        };
        self.channel.send(&command).await
    }

    /// Continuous sweep speed in nm/s.
    pub async fn sweep_speed(&self) -> AppResult<f64> {
        Ok(query_f64(self.channel.as_ref(), ":WAV:SWE:SPE?").await? * METRES_TO_NM)
    }

    /// Apply all four sweep parameters: start wavelength, stop wavelength,
    /// speed, then power. Every field is validated first.
    #[instrument(skip(self), err)]
    pub async fn configure(&self, params: &SweepParameters) -> AppResult<()> {
        params.validate()?;
        self.set_start_wavelength(params.start_wavelength).await?;
        self.set_stop_wavelength(params.stop_wavelength).await?;
        self.set_sweep_speed(params.speed).await?;
        self.set_power(params.power).await?;
        debug!("Sweep parameters applied");
        Ok(())
    }

    // =========================================================================
    // Sweep execution
    // =========================================================================

    /// Start the sweep. With standby enabled the laser waits for a trigger.
    pub async fn start_sweep(&self) -> AppResult<()> {
        self.channel.send(":WAV:SWE 1").await
    }

    /// Stop the sweep.
    pub async fn stop_sweep(&self) -> AppResult<()> {
        self.channel.send(":WAV:SWE 0").await
    }

    /// Current sweep state.
    pub async fn sweep_status(&self) -> AppResult<SweepStatus> {
        self.query_code(":WAV:SWE?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::error::DaqError;
    use daq_core::testing::ScriptedChannel;
    use std::sync::Arc;

    fn driver(model: TslModel) -> (Arc<ScriptedChannel>, TslDriver) {
        let channel = Arc::new(ScriptedChannel::new());
        let tsl = TslDriver::new(channel.clone(), model);
        (channel, tsl)
    }

    fn params(start: f64, stop: f64, speed: f64, power: f64) -> SweepParameters {
        SweepParameters {
            start_wavelength: start,
            stop_wavelength: stop,
            speed,
            power,
        }
    }

    #[tokio::test]
    async fn test_configure_sends_four_commands_in_order() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        tsl.configure(&params(1500.0, 1600.0, 50.0, 1.0))
            .await
            .unwrap();
        assert_eq!(
            channel.commands(),
            vec![
                ":WAV:SWE:STAR 1500nm",
                ":WAV:SWE:STOP 1600nm",
                ":WAV:SWE:SPE 50nm/s",
                ":POW 1mW",
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_tsl550_uses_bare_values() {
        let (channel, tsl) = driver(TslModel::Tsl550);
        tsl.configure(&params(1510.5, 1590.0, 2.5, 0.5))
            .await
            .unwrap();
        assert_eq!(
            channel.commands(),
            vec![
                ":WAV:SWE:STAR 1510.5",
                ":WAV:SWE:STOP 1590",
                ":WAVE:SWE:SPE 2.5",
                ":POW 0.5",
            ]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_sends_nothing() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        let bad = [
            params(1479.0, 1600.0, 50.0, 1.0),
            params(1500.0, 1641.0, 50.0, 1.0),
            params(1500.0, 1600.0, 0.1, 1.0),
            params(1500.0, 1600.0, 201.0, 1.0),
            params(1500.0, 1600.0, 50.0, 14.0),
            params(1500.0, 1600.0, 50.0, f64::NAN),
        ];
        for p in bad {
            let err = tsl.configure(&p).await.unwrap_err();
            assert!(matches!(err, DaqError::InvalidParameter { .. }), "{:?}", p);
        }

        assert!(tsl.set_wavelength(1700.0).await.is_err());
        assert!(tsl.set_sweep_step(0.0).await.is_err());
        assert!(tsl.set_sweep_speed(0.0).await.is_err());
        assert!(tsl.set_power(20.0).await.is_err());
        assert!(channel.commands().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_commands() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        tsl.arm_external_trigger().await.unwrap();
        tsl.set_trigger_input(TriggerInput::Internal).await.unwrap();
        tsl.set_trigger_output(TriggerOutput::Stop).await.unwrap();
        tsl.set_trigger_standby(true).await.unwrap();
        tsl.set_trigger_edge(TriggerEdge::Falling).await.unwrap();
        tsl.send_software_trigger().await.unwrap();
        tsl.start_sweep().await.unwrap();
        tsl.stop_sweep().await.unwrap();
        assert_eq!(
            channel.commands(),
            vec![
                ":TRIG:INP:EXT 1",
                ":TRIG:INP:EXT 0",
                ":TRIG:OUTP 1",
                ":TRIG:INP:STAN 1",
                ":TRIG:INP:ACT 1",
                ":TRIG:INP:SOFT",
                ":WAV:SWE 1",
                ":WAV:SWE 0",
            ]
        );
    }

    #[tokio::test]
    async fn test_step_formatting_per_model() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        tsl.set_sweep_step(0.1).await.unwrap();
        assert_eq!(channel.commands(), vec![":WAV:SWE:STEP 0.1pm"]);

        let (channel, tsl) = driver(TslModel::Tsl550);
        tsl.set_sweep_step(1.0).await.unwrap();
        assert_eq!(channel.commands(), vec![":WAV:SWE:STEP 0.001"]);
    }

    #[tokio::test]
    async fn test_queries_convert_from_si_units() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        channel.push_reply(":WAV:SWE:STAR?", "1.5E-6");
        channel.push_reply(":WAV:SWE:STOP?", "1.6E-6");
        channel.push_reply(":WAV:SWE:STEP?", "1E-13");
        channel.push_reply(":WAV:SWE:SPE?", "5E-8");
        channel.push_reply(":WAV?", "1.55E-6");

        assert!((tsl.start_wavelength().await.unwrap() - 1500.0).abs() < 1e-6);
        assert!((tsl.stop_wavelength().await.unwrap() - 1600.0).abs() < 1e-6);
        assert!((tsl.sweep_step().await.unwrap() - 0.1).abs() < 1e-9);
        assert!((tsl.sweep_speed().await.unwrap() - 50.0).abs() < 1e-9);
        assert!((tsl.wavelength().await.unwrap() - 1550.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_sweep_status_query() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        channel.push_replies(":WAV:SWE?", &["0", "2", "9"]);
        assert_eq!(tsl.sweep_status().await.unwrap(), SweepStatus::Stopped);
        assert_eq!(
            tsl.sweep_status().await.unwrap(),
            SweepStatus::StandingByTrigger
        );
        assert!(matches!(
            tsl.sweep_status().await,
            Err(DaqError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_sequence() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        tsl.initialize().await.unwrap();
        assert_eq!(
            channel.commands(),
            vec![
                ":WAV:UNIT 0",
                ":POW:UNIT 1",
                ":TRIG:INP:EXT 1",
                ":TRIG:INP:ACT 0",
                ":TRIG:OUTP 1",
                ":WAV:SWE:MOD 1",
                ":WAV:SWE:STAR 1500nm",
                ":WAV:SWE:STOP 1600nm",
                ":WAV:SWE:STEP 0.1pm",
                ":WAV:SWE:CYCL 0",
            ]
        );
    }

    #[tokio::test]
    async fn test_trigger_standby_query() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        channel.push_replies(":TRIG:INP:STAN?", &["1", "0", "x"]);
        assert!(tsl.trigger_standby().await.unwrap());
        assert!(!tsl.trigger_standby().await.unwrap());
        assert!(tsl.trigger_standby().await.is_err());
    }

    #[tokio::test]
    async fn test_gpib_address_and_identity() {
        let (channel, tsl) = driver(TslModel::Tsl770);
        channel.push_reply(":SYST:COMM:GPIB:ADDR?", "1");
        channel.push_reply("*IDN?", "SANTEC,TSL-770,00000000,0001.0000");
        assert_eq!(tsl.gpib_address().await.unwrap(), 1);
        assert!(tsl.identify().await.unwrap().contains("TSL-770"));
    }
}
