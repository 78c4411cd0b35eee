//! GPIB/USB command channel through a VISA installation.
//!
//! The Santec TSL is usually wired over GPIB. VISA I/O is blocking, so every
//! exchange runs on Tokio's blocking pool while holding the session lock.
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)

use crate::channel::CommandChannel;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::spawn_blocking;
use visa_rs::prelude::*;

/// VISA session implementing [`CommandChannel`].
pub struct VisaChannel {
    session: Arc<Mutex<Instrument>>,
    resource: String,
    terminator: String,
    // Keeps the resource manager alive for the lifetime of the session
    _rm: Arc<Mutex<DefaultRM>>,
}

impl VisaChannel {
    /// Open `resource` through the default VISA resource manager.
    pub async fn open(resource: &str, open_timeout: Duration, terminator: &str) -> AppResult<Self> {
        let resource_owned = resource.to_string();
        let (rm, instr) = spawn_blocking(move || -> AppResult<(DefaultRM, Instrument)> {
            let rm = DefaultRM::new().map_err(|e| {
                DaqError::Transport(format!("Failed to open VISA resource manager: {}", e))
            })?;
            let name = CString::new(resource_owned.clone()).map_err(|_| {
                DaqError::Configuration(format!("Invalid VISA resource {:?}", resource_owned))
            })?;
            let instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, open_timeout)
                .map_err(|e| {
                    DaqError::Transport(format!("Failed to open {}: {}", resource_owned, e))
                })?;
            Ok((rm, instr))
        })
        .await
        .map_err(|e| DaqError::Transport(format!("VISA open task failed: {}", e)))??;

        tracing::info!("Opened VISA session to {}", resource);

        Ok(Self {
            session: Arc::new(Mutex::new(instr)),
            resource: resource.to_string(),
            terminator: terminator.to_string(),
            _rm: Arc::new(Mutex::new(rm)),
        })
    }

    async fn exchange(&self, command: &str, read_reply: bool) -> AppResult<Option<String>> {
        let session = Arc::clone(&self.session);
        let line = format!("{}{}", command, self.terminator);
        let resource = self.resource.clone();

        spawn_blocking(move || -> AppResult<Option<String>> {
            let mut instr = session
                .lock()
                .map_err(|_| DaqError::Transport(format!("VISA session {} poisoned", resource)))?;
            instr.write_all(line.as_bytes())?;
            if !read_reply {
                return Ok(None);
            }
            let mut reply = String::new();
            BufReader::new(&*instr).read_line(&mut reply)?;
            Ok(Some(reply.trim().to_string()))
        })
        .await
        .map_err(|e| DaqError::Transport(format!("VISA I/O task failed: {}", e)))?
    }
}

#[async_trait]
impl CommandChannel for VisaChannel {
    async fn send(&self, command: &str) -> AppResult<()> {
        tracing::debug!(resource = %self.resource, "VISA write: {:?}", command);
        self.exchange(command, false).await.map(|_| ())
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        tracing::debug!(resource = %self.resource, "VISA query: {:?}", command);
        self.exchange(command, true)
            .await?
            .ok_or_else(|| DaqError::Protocol(format!("no reply to {:?}", command)))
    }
}
