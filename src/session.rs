//! One TCP connection to the instrument service.
//!
//! A `Session` owns its socket and the command/response discipline of the
//! protocol: commands are suffixed with the `-d<secs>` retry budget and the
//! CRLF terminator, responses are single buffered reads, and a read timeout
//! maps to an empty response rather than an error — the service signals
//! "still working" by staying silent, so the retry budget lives server-side
//! and the client must not treat silence as failure.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::TERMINATOR;

const RECV_BUFFER: usize = 4096;

/// Returns true for transport errors that mean the peer went away, as opposed
/// to a slow or lossy exchange.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// A persistent connection to the instrument service plus its exchange rules.
pub struct Session {
    host: String,
    port: u16,
    name: &'static str,
    timeout: Duration,
    persistence_secs: u64,
    stream: Option<TcpStream>,
}

impl Session {
    /// Create a disconnected session. `name` identifies the session role in
    /// logs and errors ("command", "status", "data").
    pub fn new(
        host: String,
        port: u16,
        name: &'static str,
        timeout: Duration,
        persistence_secs: u64,
    ) -> Self {
        Self {
            host,
            port,
            name,
            timeout,
            persistence_secs,
            stream: None,
        }
    }

    /// Whether the session currently holds a socket.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establish or re-establish the connection. Idempotent: an existing
    /// socket is probed for liveness and kept when healthy; a failed probe
    /// closes it and reopens. On a fresh connect, one best-effort read
    /// discards the service's connect banner (a timeout here is fine).
    pub async fn connect(&mut self) -> GatewayResult<()> {
        if let Some(stream) = &self.stream {
            if stream.peer_addr().is_ok() {
                return Ok(());
            }
            self.close();
        }
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        self.stream = Some(stream);
        info!(
            session = self.name,
            host = %self.host,
            port = self.port,
            "connected"
        );
        let _ = self.read_with_timeout().await?;
        Ok(())
    }

    /// Send a command and, when `expect_response`, return the decoded,
    /// trimmed answer. A read timeout yields `Ok("")` — callers must treat
    /// an empty answer as "no confirmation", distinct from the explicit
    /// failure sentinel.
    pub async fn send_command(
        &mut self,
        command: &str,
        expect_response: bool,
    ) -> GatewayResult<String> {
        let message = format!(
            "{} -d{}{}",
            command.trim(),
            self.persistence_secs,
            TERMINATOR
        );
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GatewayError::NotConnected(self.name.to_string()))?;
        stream.write_all(message.as_bytes()).await?;
        if !expect_response {
            return Ok(String::new());
        }
        let response = self.read_with_timeout().await?;
        if response.is_empty() {
            warn!(
                session = self.name,
                command = command.trim(),
                "response timeout"
            );
        } else {
            debug!(
                session = self.name,
                command = command.trim(),
                response = %response,
                "exchange"
            );
        }
        Ok(response)
    }

    /// Raw single read, for unsolicited status pushes. The timeout-to-empty
    /// mapping of [`Session::send_command`] applies.
    pub async fn receive(&mut self) -> GatewayResult<String> {
        self.read_with_timeout().await
    }

    /// Release the socket. Idempotent.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(session = self.name, "closed");
        }
    }

    async fn read_with_timeout(&mut self) -> GatewayResult<String> {
        let timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GatewayError::NotConnected(self.name.to_string()))?;
        let mut buf = vec![0u8; RECV_BUFFER];
        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) => Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string()),
            Ok(Err(err)) => Err(err.into()),
            Err(_elapsed) => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn banner_listener() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_command_framing() {
        let (listener, host, port) = banner_listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ready\r\n").await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            let received = String::from_utf8_lossy(&buf[..n]).to_string();
            socket.write_all(b"pong\r\n").await.unwrap();
            received
        });

        let mut session = Session::new(host, port, "command", Duration::from_millis(200), 20);
        session.connect().await.unwrap();
        let response = session.send_command("PING", true).await.unwrap();
        assert_eq!(response, "pong");

        let received = server.await.unwrap();
        assert_eq!(received, "PING -d20\r\n");
    }

    #[tokio::test]
    async fn test_read_timeout_yields_empty_response() {
        let (listener, host, port) = banner_listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ready\r\n").await.unwrap();
            // Swallow the command and never answer.
            let mut buf = vec![0u8; 256];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut session = Session::new(host, port, "command", Duration::from_millis(100), 20);
        session.connect().await.unwrap();
        let response = session.send_command("SLOW", true).await.unwrap();
        assert_eq!(response, "");
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let mut session = Session::new(
            "127.0.0.1".to_string(),
            1,
            "command",
            Duration::from_millis(100),
            20,
        );
        let err = session.send_command("PING", true).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (listener, host, port) = banner_listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ready\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut session = Session::new(host, port, "data", Duration::from_millis(100), 20);
        session.connect().await.unwrap();
        assert!(session.is_connected());
        session.close();
        session.close();
        assert!(!session.is_connected());
    }
}
