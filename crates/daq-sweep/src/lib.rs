//! Swept acquisition for a tunable laser and a circular-buffer digitizer.
//!
//! - [`engine`]: the sweep-and-acquire state machine ([`SweepEngine`])
//! - [`drain`]: circular buffer segment arithmetic
//! - [`spectrum`]: time-to-wavelength mapping ([`map_to_wavelength`])
//! - [`runner`]: background execution and looping ([`SweepRunner`])

pub mod drain;
pub mod engine;
pub mod runner;
pub mod spectrum;

pub use drain::DrainSegment;
pub use engine::{
    CancelHandle, EngineConfig, RawAcquisition, SweepEngine, SweepOutcome, SweepState,
};
pub use runner::{LoopOptions, RunnerStatus, SweepRunner};
pub use spectrum::{map_to_wavelength, SpectrumPoint, SweptSpectrum};
