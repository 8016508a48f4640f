//! In-process scripted stand-in for the instrument service.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use rga_gateway::acquire::{AcquisitionLoop, LoopState};
use rga_gateway::config::Settings;

/// What the mock does with one received command.
pub enum MockReply {
    /// Answer immediately with this text.
    Text(String),
    /// Answer immediately, then push a second message after the delay.
    TextThen(String, Duration, String),
    /// Do not answer; the client's read will time out.
    Silent,
    /// Reset the connection.
    Disconnect,
}

pub type Handler = dyn Fn(&str) -> MockReply + Send + Sync;

/// A TCP listener that speaks just enough of the service's protocol for the
/// tests: banner on connect, scripted reply per command line.
pub struct MockService {
    pub addr: SocketAddr,
    raw_lines: Arc<Mutex<Vec<String>>>,
}

impl MockService {
    pub async fn spawn(handler: Arc<Handler>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let raw_lines = Arc::new(Mutex::new(Vec::new()));
        let lines = Arc::clone(&raw_lines);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve(socket, Arc::clone(&handler), Arc::clone(&lines)));
            }
        });
        Self { addr, raw_lines }
    }

    /// Every command line received, terminator stripped, retry suffix intact.
    pub async fn raw_lines(&self) -> Vec<String> {
        self.raw_lines.lock().await.clone()
    }

    /// Commands received, with the ` -d<N>` retry suffix stripped.
    pub async fn commands(&self) -> Vec<String> {
        self.raw_lines
            .lock()
            .await
            .iter()
            .map(|line| strip_retry_suffix(line))
            .collect()
    }

    pub async fn count_of(&self, command: &str) -> usize {
        self.commands()
            .await
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }
}

fn strip_retry_suffix(line: &str) -> String {
    match line.rfind(" -d") {
        Some(pos) => line[..pos].to_string(),
        None => line.to_string(),
    }
}

async fn serve(mut socket: TcpStream, handler: Arc<Handler>, lines: Arc<Mutex<Vec<String>>>) {
    let _ = socket.write_all(b"connected\r\n").await;
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        while let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line_bytes: Vec<u8> = buf.drain(..pos + 2).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]).to_string();
            lines.lock().await.push(line.clone());
            match handler(&strip_retry_suffix(&line)) {
                MockReply::Text(text) => {
                    let _ = socket.write_all(text.as_bytes()).await;
                }
                MockReply::TextThen(text, delay, then) => {
                    let _ = socket.write_all(text.as_bytes()).await;
                    tokio::time::sleep(delay).await;
                    let _ = socket.write_all(then.as_bytes()).await;
                }
                MockReply::Silent => {}
                MockReply::Disconnect => {
                    let _ = socket.set_linger(Some(Duration::from_secs(0)));
                    return;
                }
            }
        }
    }
}

/// Settings pointed at the mock, with timing tightened for tests.
pub fn test_settings(addr: SocketAddr) -> Settings {
    let mut settings = Settings::for_endpoint("127.0.0.1", addr.port());
    settings.protocol.socket_timeout = Duration::from_millis(200);
    settings.acquisition.tick_period = Duration::from_millis(50);
    settings.acquisition.legend_retry_delay = Duration::from_millis(20);
    settings.acquisition.status_poll_period = Duration::from_millis(20);
    settings
}

/// Poll the loop state until `want` is reached or the timeout elapses.
pub async fn wait_for_state(acquisition: &AcquisitionLoop, want: LoopState, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if acquisition.state().await == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "state {want:?} not reached in {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
