//! Instrument command channel abstraction.
//!
//! Every controller in the workspace talks to its instrument through a
//! [`CommandChannel`]: a line-oriented text transport with exactly one
//! outstanding request at a time. Controllers receive the channel as an explicit
//! session object (`Arc<dyn CommandChannel>`) in their constructor; there is no
//! process-wide instrument session.
//!
//! Implementations:
//!
//! - [`crate::scpi::ScpiClient`] - SCPI over TCP (Red Pitaya, TSL LAN port)
//! - `crate::visa::VisaChannel` - GPIB/USB through VISA (feature `visa`)
//! - [`crate::testing::ScriptedChannel`] - scripted double for tests
//! - the simulated instruments in the driver crates

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::sync::Arc;

/// Bidirectional text-command transport to a single instrument.
///
/// `send` writes one command line; `query` writes one command line and reads
/// one reply line (terminators stripped). Implementations must serialise
/// access internally so that a `query` reply is never interleaved with another
/// caller's command.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send a command without expecting a reply.
    async fn send(&self, command: &str) -> AppResult<()>;

    /// Send a command and read one reply line.
    async fn query(&self, command: &str) -> AppResult<String>;
}

#[async_trait]
impl<T: CommandChannel + ?Sized> CommandChannel for Arc<T> {
    async fn send(&self, command: &str) -> AppResult<()> {
        (**self).send(command).await
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        (**self).query(command).await
    }
}

/// Shared handle to a command channel.
pub type SharedChannel = Arc<dyn CommandChannel>;

/// Query and parse an integer reply.
pub async fn query_u32(channel: &dyn CommandChannel, command: &str) -> AppResult<u32> {
    let reply = channel.query(command).await?;
    reply
        .trim()
        .parse::<u32>()
        .map_err(|_| DaqError::unexpected_reply(command, &reply))
}

/// Query and parse a floating-point reply.
pub async fn query_f64(channel: &dyn CommandChannel, command: &str) -> AppResult<f64> {
    let reply = channel.query(command).await?;
    reply
        .trim()
        .parse::<f64>()
        .map_err(|_| DaqError::unexpected_reply(command, &reply))
}

/// Query a `0`/`1` (or `OFF`/`ON`) flag.
pub async fn query_bool(channel: &dyn CommandChannel, command: &str) -> AppResult<bool> {
    let reply = channel.query(command).await?;
    match reply.trim().to_uppercase().as_str() {
        "ON" | "1" => Ok(true),
        "OFF" | "0" => Ok(false),
        _ => Err(DaqError::unexpected_reply(command, &reply)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;

    #[tokio::test]
    async fn test_query_u32_parses_trimmed_reply() {
        let channel = ScriptedChannel::new();
        channel.push_reply("ACQ:WPOS?", " 4096\r\n");
        assert_eq!(query_u32(&channel, "ACQ:WPOS?").await.unwrap(), 4096);
    }

    #[tokio::test]
    async fn test_query_u32_rejects_garbage() {
        let channel = ScriptedChannel::new();
        channel.push_reply("ACQ:WPOS?", "ERR!");
        let err = query_u32(&channel, "ACQ:WPOS?").await.unwrap_err();
        assert!(matches!(err, DaqError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_query_bool_accepts_both_spellings() {
        let channel = ScriptedChannel::new();
        channel.push_reply(":TRIG:INP:STAN?", "1");
        channel.push_reply(":TRIG:INP:STAN?", "OFF");
        assert!(query_bool(&channel, ":TRIG:INP:STAN?").await.unwrap());
        assert!(!query_bool(&channel, ":TRIG:INP:STAN?").await.unwrap());
    }
}
