//! `daq-core`
//!
//! Core types shared by the swept test system: the application error type and
//! the instrument command channel every controller is built on.
//!
//! ## Modules
//!
//! - [`error`]: [`DaqError`] taxonomy (invalid parameter, transport, protocol,
//!   busy, cancelled, configuration)
//! - [`channel`]: the [`CommandChannel`] trait plus typed query helpers
//! - [`scpi`]: SCPI over TCP client
//! - `visa`: GPIB/USB through VISA (feature `visa`)
//! - [`testing`]: scripted channel double used by the driver and engine tests

pub mod channel;
pub mod error;
pub mod scpi;
pub mod testing;
#[cfg(feature = "visa")]
pub mod visa;

pub use channel::{CommandChannel, SharedChannel};
pub use error::{AppResult, DaqError};
