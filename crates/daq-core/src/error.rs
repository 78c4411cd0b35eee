//! Error types shared by every crate in the swept test system.
//!
//! `DaqError` separates caller mistakes from environment faults so the sweep
//! engine can decide how to react:
//!
//! - **`InvalidParameter`**: a caller-supplied value is outside its documented
//!   range. Raised before any command reaches an instrument, so instrument state
//!   is unchanged.
//! - **`Transport`**: the command channel failed (socket closed, timeout, VISA
//!   I/O error).
//! - **`Protocol`**: the instrument answered, but the reply could not be parsed or
//!   did not match any recognised code.
//! - **`Busy`**: a second sweep was requested while one is still running.
//! - **`Cancelled`**: a sweep was cancelled cooperatively and the instruments were
//!   told to stop.
//! - **`Configuration`** / **`Config`**: semantic or syntactic problems in the
//!   configuration layers.
//!
//! `Transport` and `Protocol` are the faults that abort a running sweep.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the swept test system.
///
/// # Example
///
/// ```rust
/// use daq_core::error::DaqError;
///
/// fn validate_speed(speed: f64) -> Result<(), DaqError> {
///     if !(0.5..=200.0).contains(&speed) {
///         return Err(DaqError::invalid_parameter(
///             "speed",
///             format!("{} nm/s is outside 0.5-200 nm/s", speed),
///         ));
///     }
///     Ok(())
/// }
///
/// assert!(validate_speed(100.0).is_ok());
/// assert!(validate_speed(0.0).is_err());
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// Caller-supplied value outside a documented range.
    ///
    /// **Error Type**: Permanent - indicates invalid input.
    ///
    /// **Recovery Strategy**: Fix the value. No command was sent, so the
    /// instrument is in the same state as before the call.
    #[error("Invalid parameter '{field}': {message}")]
    InvalidParameter {
        /// Name of the offending field (e.g. `start_wavelength`)
        field: &'static str,
        /// Human-readable reason
        message: String,
    },

    /// Channel-level I/O failure.
    ///
    /// **Error Type**: Usually transient (network glitch, instrument busy) but may
    /// be permanent (cable unplugged, instrument powered off).
    ///
    /// **Recovery Strategy**: Retry the whole sweep at the caller level. The
    /// engine never retries internally.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reply could not be parsed or matched against the recognised code set.
    ///
    /// **Error Type**: Permanent for the current operation - the instrument
    /// speaks a dialect the driver does not understand, or the link corrupted the
    /// reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A sweep is already in flight on this engine.
    ///
    /// **Recovery Strategy**: Wait for the running sweep to finish, then retry.
    #[error("Sweep already in progress")]
    Busy,

    /// The sweep was cancelled before completion.
    #[error("Sweep cancelled")]
    Cancelled,

    /// Configuration values parsed correctly but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration layers could not be merged or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl DaqError {
    /// Build an [`DaqError::InvalidParameter`] for `field`.
    pub fn invalid_parameter(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            message: message.into(),
        }
    }

    /// Build a [`DaqError::Protocol`] describing an unexpected reply.
    pub fn unexpected_reply(command: &str, reply: &str) -> Self {
        Self::Protocol(format!("unexpected reply {:?} to {:?}", reply, command))
    }
}

impl From<std::io::Error> for DaqError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
