//! Santec TSL Tunable Laser Driver
//!
//! This crate drives Santec TSL-770 and TSL-550 tunable lasers as the sweep
//! source of a swept test system.
//!
//! # Communication
//!
//! Any [`daq_core::CommandChannel`] works: GPIB through VISA
//! (`daq_core::visa::VisaChannel`, feature `visa` of `daq-core`) or the LAN
//! port through [`daq_core::scpi::ScpiClient`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_santec::{SweepParameters, TslDriver, TslModel};
//!
//! let tsl = TslDriver::new(channel, TslModel::Tsl770);
//! tsl.initialize().await?;
//! tsl.configure(&SweepParameters {
//!     start_wavelength: 1500.0,
//!     stop_wavelength: 1600.0,
//!     speed: 50.0,
//!     power: 1.0,
//! }).await?;
//! tsl.start_sweep().await?;
//! ```
//!
//! # Mock Mode
//!
//! [`MockTsl`] tracks written settings and simulates trigger standby.

pub mod mock;
pub mod params;
pub mod tsl;
pub mod types;

pub use mock::{MockTsl, MockTslState};
pub use params::SweepParameters;
pub use tsl::TslDriver;
pub use types::{
    PowerUnit, SweepMode, SweepStatus, TriggerEdge, TriggerInput, TriggerOutput, TslModel,
    WavelengthUnit, WireCode,
};
