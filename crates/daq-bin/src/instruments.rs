//! Opening instrument channels from [`Settings`].

use crate::config::{LaserTransport, Settings};
use anyhow::{Context, Result};
use daq_core::scpi::ScpiClient;
use daq_core::SharedChannel;
use daq_driver_red_pitaya::{MockRedPitaya, RedPitayaAcquisition};
use daq_driver_santec::{MockTsl, TslDriver};
use daq_sweep::SweepEngine;
use std::sync::Arc;
use std::time::Duration;

/// Connected controllers.
pub struct Instruments {
    /// Acquisition buffer controller
    pub acquisition: Arc<RedPitayaAcquisition>,
    /// Laser sweep controller
    pub laser: Arc<TslDriver>,
}

impl Instruments {
    /// Open both instruments. `force_mock` overrides the per-instrument
    /// `mock` flags.
    pub async fn connect(settings: &Settings, force_mock: bool) -> Result<Self> {
        let rp_channel = red_pitaya_channel(settings, force_mock).await?;
        let laser_channel = laser_channel(settings, force_mock).await?;

        Ok(Self {
            acquisition: Arc::new(
                RedPitayaAcquisition::new(rp_channel).with_buffer_size(settings.engine.buffer_size),
            ),
            laser: Arc::new(TslDriver::new(laser_channel, settings.laser.model)),
        })
    }

    /// Build a sweep engine over these instruments.
    pub fn engine(&self, settings: &Settings) -> Arc<SweepEngine> {
        Arc::new(SweepEngine::new(
            Arc::clone(&self.acquisition),
            Arc::clone(&self.laser),
            settings.engine.clone(),
        ))
    }
}

async fn red_pitaya_channel(settings: &Settings, force_mock: bool) -> Result<SharedChannel> {
    let rp = &settings.red_pitaya;
    if force_mock || rp.mock {
        tracing::info!("Using simulated Red Pitaya");
        return Ok(Arc::new(
            MockRedPitaya::new().with_buffer_size(settings.engine.buffer_size),
        ));
    }

    let client = ScpiClient::connect(&rp.host, rp.port)
        .await
        .context("Failed to connect to Red Pitaya")?
        .with_timeout(Duration::from_millis(rp.timeout_ms))
        .with_write_delay(Duration::from_millis(rp.write_delay_ms));
    Ok(Arc::new(client))
}

async fn laser_channel(settings: &Settings, force_mock: bool) -> Result<SharedChannel> {
    let laser = &settings.laser;
    if force_mock || laser.mock {
        tracing::info!("Using simulated {:?} laser", laser.model);
        return Ok(Arc::new(MockTsl::new(laser.model)));
    }

    match laser.transport {
        LaserTransport::Tcp => {
            let client = ScpiClient::connect(&laser.host, laser.port)
                .await
                .context("Failed to connect to laser")?
                .with_timeout(Duration::from_millis(laser.timeout_ms))
                .with_write_delay(Duration::from_millis(laser.write_delay_ms));
            Ok(Arc::new(client))
        }
        LaserTransport::Visa => visa_channel(&laser.resource, laser.timeout_ms).await,
    }
}

#[cfg(feature = "visa")]
async fn visa_channel(resource: &str, timeout_ms: u64) -> Result<SharedChannel> {
    let channel = daq_core::visa::VisaChannel::open(
        resource,
        Duration::from_millis(timeout_ms),
        daq_core::scpi::DEFAULT_TERMINATOR,
    )
    .await
    .with_context(|| format!("Failed to open VISA resource {}", resource))?;
    Ok(Arc::new(channel))
}

#[cfg(not(feature = "visa"))]
async fn visa_channel(resource: &str, _timeout_ms: u64) -> Result<SharedChannel> {
    anyhow::bail!(
        "Laser transport 'visa' ({}) requires building with --features visa",
        resource
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_force_mock_ignores_network_settings() {
        let settings = Settings::default();
        let instruments = Instruments::connect(&settings, true).await.unwrap();
        assert_eq!(instruments.acquisition.buffer_size(), 16384);
        assert!(instruments.laser.identify().await.unwrap().contains("TSL"));
    }

    #[cfg(not(feature = "visa"))]
    #[tokio::test]
    async fn test_visa_transport_needs_feature() {
        let mut settings = Settings::default();
        settings.red_pitaya.mock = true;
        settings.laser.transport = LaserTransport::Visa;
        assert!(Instruments::connect(&settings, false).await.is_err());
    }
}
