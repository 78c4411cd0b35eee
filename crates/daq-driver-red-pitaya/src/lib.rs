//! Red Pitaya STEMlab acquisition driver
//!
//! This crate controls the circular acquisition buffer of a Red Pitaya board
//! used as the photodiode digitizer during a laser sweep.
//!
//! # Communication
//!
//! The driver talks SCPI over TCP (default port 5000) through any
//! [`daq_core::CommandChannel`], usually a [`daq_core::scpi::ScpiClient`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_core::scpi::ScpiClient;
//! use daq_driver_red_pitaya::{AcquisitionConfig, RedPitayaAcquisition};
//!
//! let client = ScpiClient::connect("192.168.1.100", 5000).await?;
//! let acq = RedPitayaAcquisition::new(Arc::new(client));
//! acq.initialize().await?;
//! acq.configure(&AcquisitionConfig::default()).await?;
//! ```
//!
//! # Mock Mode
//!
//! [`MockRedPitaya`] simulates the buffer and trigger so sweeps can run
//! without hardware:
//!
//! ```rust,ignore
//! let acq = RedPitayaAcquisition::new(Arc::new(MockRedPitaya::new()));
//! ```

pub mod acquisition;
pub mod mock;

pub use acquisition::{
    parse_data_block, AcquisitionConfig, DataUnits, RedPitayaAcquisition, Source, TriggerSource,
    TriggerStatus, BUFFER_SIZE, MAX_DECIMATION, SAMPLE_RATE_HZ,
};
pub use mock::{MockAcquisitionState, MockRedPitaya};
