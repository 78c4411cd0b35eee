//! SCPI over TCP command channel.
//!
//! Both the Red Pitaya SCPI server and the Santec TSL LAN port accept
//! line-terminated SCPI text on a raw TCP socket. [`ScpiClient`] handles
//! connection management, command/query operations and reply framing, and
//! implements [`CommandChannel`].

use crate::channel::CommandChannel;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default SCPI port for Red Pitaya and the Santec TSL LAN interface
pub const DEFAULT_PORT: u16 = 5000;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default line terminator
pub const DEFAULT_TERMINATOR: &str = "\r\n";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Async SCPI client for TCP communication.
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    peer: String,
    timeout: Duration,
    write_delay: Duration,
}

impl ScpiClient {
    /// Connect to `host:port`.
    ///
    /// # Errors
    /// [`DaqError::Transport`] if the address cannot be resolved or the
    /// connection is refused or times out.
    pub async fn connect(host: &str, port: u16) -> AppResult<Self> {
        let peer = format!("{}:{}", host, port);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(peer.as_str()))
            .await
            .map_err(|_| DaqError::Transport(format!("Connection timeout to {}", peer)))?
            .map_err(|e| DaqError::Transport(format!("Failed to connect to {}: {}", peer, e)))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!("Connected to SCPI instrument at {}", peer);

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            peer,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            write_delay: Duration::ZERO,
        })
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Set the pause after each write-only command (none by default).
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    async fn write_line(&self, stream: &mut BufReader<TcpStream>, command: &str) -> AppResult<()> {
        let line = format!("{}{}", command, DEFAULT_TERMINATOR);
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| {
                DaqError::Transport(format!("Failed to write {:?} to {}: {}", command, self.peer, e))
            })?;
        stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| DaqError::Transport(format!("Failed to flush {}: {}", self.peer, e)))
    }

    /// Clear any pending data from the input buffer.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) {
        // Consume any data in BufReader's internal buffer
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!("Flushing {} bytes from buffer", buffered);
            stream.consume(buffered);
        }

        // Try to read any pending data from the socket
        let mut discard = vec![0u8; 256];
        loop {
            match timeout(Duration::from_millis(1), stream.get_mut().peek(&mut discard)).await {
                Ok(Ok(0)) | Err(_) | Ok(Err(_)) => break,
                Ok(Ok(n)) => {
                    let mut consume_buf = vec![0u8; n];
                    let _ = stream.get_mut().try_read(&mut consume_buf);
                    tracing::debug!("Flushed {} stale bytes from stream", n);
                }
            }
        }
    }
}

#[async_trait]
impl CommandChannel for ScpiClient {
    async fn send(&self, command: &str) -> AppResult<()> {
        let mut stream = self.stream.lock().await;
        tracing::debug!(peer = %self.peer, "SCPI write: {:?}", command);
        self.write_line(&mut stream, command).await?;

        // Small delay for command processing
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        Ok(())
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        let mut stream = self.stream.lock().await;

        Self::flush_input_buffer(&mut stream).await;

        tracing::debug!(peer = %self.peer, "SCPI query: {:?}", command);
        self.write_line(&mut stream, command).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(DaqError::Transport(format!(
                "Connection closed by {}",
                self.peer
            ))),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::trace!(peer = %self.peer, "SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(DaqError::Transport(format!(
                "Failed to read reply to {:?}: {}",
                command, e
            ))),
            Err(_) => Err(DaqError::Transport(format!(
                "Timeout waiting for response to: {}",
                command
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_query_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ACQ:WPOS?\r\n");
            socket.write_all(b"1234\r\n").await.unwrap();
            // Keep the socket open until the client is done
            let _ = socket.read(&mut buf).await;
        });

        let client = ScpiClient::connect("127.0.0.1", port).await.unwrap();
        assert_eq!(client.query("ACQ:WPOS?").await.unwrap(), "1234");
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let client = ScpiClient::connect("127.0.0.1", port)
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        server.await.unwrap();

        let err = client.query("ACQ:TRIG:STAT?").await.unwrap_err();
        assert!(matches!(err, DaqError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to find a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ScpiClient::connect("127.0.0.1", port).await.err().unwrap();
        assert!(matches!(err, DaqError::Transport(_)));
    }
}
