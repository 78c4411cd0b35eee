//! Scripted command channel for tests.
//!
//! [`ScriptedChannel`] records every command it receives (writes and queries,
//! in order) and answers queries from per-command reply queues, falling back
//! to an optional responder closure. Commands can be made to fail with a
//! transport error to exercise abort paths, or to take a fixed time to
//! answer.
//!
//! ```rust
//! # tokio_test_block_on(async {
//! use daq_core::channel::CommandChannel;
//! use daq_core::testing::ScriptedChannel;
//!
//! let channel = ScriptedChannel::new();
//! channel.push_reply("ACQ:WPOS?", "42");
//! channel.send("ACQ:START").await.unwrap();
//! assert_eq!(channel.query("ACQ:WPOS?").await.unwrap(), "42");
//! assert_eq!(channel.commands(), vec!["ACQ:START", "ACQ:WPOS?"]);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::channel::CommandChannel;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

type Responder = Box<dyn Fn(&str) -> AppResult<String> + Send + Sync>;

/// Command channel double that records traffic and replays scripted replies.
#[derive(Default)]
pub struct ScriptedChannel {
    log: Mutex<Vec<String>>,
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    responder: Mutex<Option<Responder>>,
    failures: Mutex<Vec<String>>,
    latencies: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedChannel {
    /// Create an empty channel: writes succeed, queries fail until scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next query of exactly `command`.
    pub fn push_reply(&self, command: &str, reply: &str) {
        self.replies
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Queue several replies for `command`, answered in order.
    pub fn push_replies(&self, command: &str, replies: &[&str]) {
        for reply in replies {
            self.push_reply(command, reply);
        }
    }

    /// Answer queries that have no queued reply with `responder`.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str) -> AppResult<String> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Fail every command starting with `prefix` with a transport error.
    pub fn fail_on(&self, prefix: &str) {
        self.failures.lock().push(prefix.to_string());
    }

    /// Make every command starting with `prefix` take `latency` to complete.
    pub fn set_latency(&self, prefix: &str, latency: Duration) {
        self.latencies.lock().push((prefix.to_string(), latency));
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Commands received that start with `prefix`.
    pub fn commands_matching(&self, prefix: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn latency(&self, command: &str) -> Option<Duration> {
        self.latencies
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, latency)| *latency)
    }

    async fn record(&self, command: &str) -> AppResult<()> {
        self.log.lock().push(command.to_string());
        if let Some(latency) = self.latency(command) {
            tokio::time::sleep(latency).await;
        }
        let failing = self
            .failures
            .lock()
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()));
        if failing {
            return Err(DaqError::Transport(format!(
                "injected failure on {:?}",
                command
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn send(&self, command: &str) -> AppResult<()> {
        self.record(command).await
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        self.record(command).await?;

        let queued = self
            .replies
            .lock()
            .get_mut(command)
            .and_then(|queue| queue.pop_front());
        if let Some(reply) = queued {
            return Ok(reply);
        }

        match self.responder.lock().as_ref() {
            Some(responder) => responder(command),
            None => Err(DaqError::Transport(format!(
                "no scripted reply for {:?}",
                command
            ))),
        }
    }
}
