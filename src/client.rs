//! Client for the instrument service's experiment lifecycle.
//!
//! `InstrumentClient` owns the three protocol sessions — command, status,
//! and data — and expresses every lifecycle operation (open, run, abort,
//! close, filename queries, legend retrieval, status monitoring) as an
//! exchange on the appropriate one. The shared failure rule applies
//! throughout: a response equal to the failure sentinel is converted to
//! [`GatewayError::CommandFailed`], while an empty response is
//! success-with-no-confirmation and only logged.

use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{self, ChannelLegend, FAILURE_SENTINEL};
use crate::session::Session;

/// Selects which session an open or filename operation runs on. The command
/// and data channels keep independently-opened files; they do not have to
/// reference the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The command session.
    Command,
    /// The data session.
    Data,
}

/// The protocol client: three sessions plus the current file association.
///
/// Each session is behind its own mutex so the client can be shared
/// (`Arc<InstrumentClient>`) between the control surface and the acquisition
/// task. The command/status/data partitioning means each mutex serves one
/// caller role and stays uncontended in normal operation.
pub struct InstrumentClient {
    command: Mutex<Session>,
    status: Mutex<Session>,
    data: Mutex<Session>,
    current_file: Mutex<Option<String>>,
    experiment_dir: String,
    last_file_macro: String,
    legend_retry_delay: Duration,
    legend_max_attempts: Option<u32>,
    status_poll_period: Duration,
}

impl InstrumentClient {
    /// Build a client from settings. No connection is made until
    /// [`InstrumentClient::initialize`].
    pub fn new(settings: &Settings) -> Self {
        let session = |name| {
            Session::new(
                settings.instrument.host.clone(),
                settings.instrument.port,
                name,
                settings.protocol.socket_timeout,
                settings.protocol.persistence_secs,
            )
        };
        Self {
            command: Mutex::new(session("command")),
            status: Mutex::new(session("status")),
            data: Mutex::new(session("data")),
            current_file: Mutex::new(None),
            experiment_dir: settings.experiment.directory.clone(),
            last_file_macro: settings.experiment.last_file_macro.clone(),
            legend_retry_delay: settings.acquisition.legend_retry_delay,
            legend_max_attempts: settings.acquisition.legend_max_attempts,
            status_poll_period: settings.acquisition.status_poll_period,
        }
    }

    /// Connect all three sessions.
    pub async fn initialize(&self) -> GatewayResult<()> {
        self.command.lock().await.connect().await?;
        self.status.lock().await.connect().await?;
        self.data.lock().await.connect().await?;
        Ok(())
    }

    /// Close all three sessions. Idempotent.
    pub async fn shutdown(&self) {
        self.command.lock().await.close();
        self.status.lock().await.close();
        self.data.lock().await.close();
    }

    /// The experiment file most recently associated by a successful open.
    pub async fn current_file(&self) -> Option<String> {
        self.current_file.lock().await.clone()
    }

    fn role_session(&self, role: SessionRole) -> &Mutex<Session> {
        match role {
            SessionRole::Command => &self.command,
            SessionRole::Data => &self.data,
        }
    }

    /// Open (associate) an experiment file on the given session.
    ///
    /// With `file_name` unset, the service is queried for its current
    /// filename on that session; otherwise the name is resolved against the
    /// configured experiment root using the service's own path convention.
    /// Returns the full remote-side path on success.
    pub async fn open_experiment(
        &self,
        file_name: Option<&str>,
        role: SessionRole,
    ) -> GatewayResult<String> {
        let full_path = match file_name {
            None => self.query_filename(role).await?,
            Some(name) => protocol::join_remote_path(&self.experiment_dir, name),
        };
        let command = protocol::open_file(&full_path);
        let response = self
            .role_session(role)
            .lock()
            .await
            .send_command(&command, true)
            .await?;
        if response == FAILURE_SENTINEL {
            return Err(GatewayError::CommandFailed { command });
        }
        *self.current_file.lock().await = Some(full_path.clone());
        info!(path = %full_path, ?role, "experiment file associated");
        Ok(full_path)
    }

    /// Query the filename currently associated with the given session.
    pub async fn query_filename(&self, role: SessionRole) -> GatewayResult<String> {
        let response = self
            .role_session(role)
            .lock()
            .await
            .send_command(protocol::FILENAME, true)
            .await?;
        if response == FAILURE_SENTINEL {
            return Err(GatewayError::CommandFailed {
                command: protocol::FILENAME.to_string(),
            });
        }
        Ok(response)
    }

    /// Start the experiment. An empty response is accepted — the service
    /// sometimes starts without confirming.
    pub async fn run_experiment(&self, mode: &str) -> GatewayResult<()> {
        let command = protocol::run(mode);
        let response = self
            .command
            .lock()
            .await
            .send_command(&command, true)
            .await?;
        if response == FAILURE_SENTINEL {
            return Err(GatewayError::CommandFailed { command });
        }
        if response.is_empty() {
            warn!("assuming experiment started despite missing confirmation");
        }
        Ok(())
    }

    /// Retrieve the column legend of a view, together with the remote path
    /// it belongs to.
    ///
    /// The service answers legend queries reliably only after the file
    /// association has been re-affirmed, so the current filename is resolved
    /// twice and the open command re-sent before polling. The poll retries at
    /// the configured delay until a non-sentinel response arrives; the
    /// optional attempt cap bounds the loop for callers that cannot wait
    /// indefinitely.
    pub async fn get_legends(&self, view: u32) -> GatewayResult<(ChannelLegend, String)> {
        let path = {
            let mut session = self.command.lock().await;
            let _ = session.send_command(protocol::FILENAME, true).await?;
            tokio::time::sleep(self.legend_retry_delay).await;
            let path = session.send_command(protocol::FILENAME, true).await?;
            session
                .send_command(&protocol::open_file(&path), true)
                .await?;
            path
        };

        let mut attempts = 0u32;
        loop {
            let raw = self
                .command
                .lock()
                .await
                .send_command(&protocol::legends(view), true)
                .await?;
            if raw != FAILURE_SENTINEL {
                return Ok((ChannelLegend::parse(&raw), path));
            }
            attempts += 1;
            if let Some(max) = self.legend_max_attempts {
                if attempts >= max {
                    return Err(GatewayError::LegendUnavailable(attempts));
                }
            }
            tokio::time::sleep(self.legend_retry_delay).await;
        }
    }

    /// Arm the push-style status feed for the current experiment file.
    pub async fn associate_status_link(&self, view: u32) -> GatewayResult<()> {
        let path = self
            .current_file()
            .await
            .ok_or(GatewayError::NoFileOpen)?;
        let mut session = self.status.lock().await;
        let command = protocol::open_file(&path);
        let response = session.send_command(&command, true).await?;
        if response == FAILURE_SENTINEL {
            return Err(GatewayError::CommandFailed { command });
        }
        session
            .send_command(&protocol::status_link(view), true)
            .await?;
        Ok(())
    }

    /// Listen on the status session until a status case-insensitively
    /// prefixed "stopped" arrives, or the timeout elapses.
    pub async fn monitor_until_stopped(&self, timeout: Duration) -> GatewayResult<()> {
        self.associate_status_link(1).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(GatewayError::MonitorTimeout(timeout));
            }
            let status = self.status.lock().await.receive().await?;
            if !status.is_empty() {
                info!(%status, "status update");
                if status.to_lowercase().starts_with("stopped") {
                    return Ok(());
                }
            }
            tokio::time::sleep(self.status_poll_period).await;
        }
    }

    /// Poll one data frame of a view on the data session. Returns the raw
    /// response; parsing is the acquisition loop's concern.
    pub async fn poll_data(&self, view: u32) -> GatewayResult<String> {
        self.data
            .lock()
            .await
            .send_command(&protocol::data(view), true)
            .await
    }

    /// Abort the running experiment.
    pub async fn abort_experiment(&self) -> GatewayResult<()> {
        self.simple_command(protocol::ABORT).await
    }

    /// Close the experiment file.
    pub async fn close_experiment(&self) -> GatewayResult<()> {
        self.simple_command(protocol::CLOSE).await
    }

    /// Re-associate the service-side most-recent-file macro and take over
    /// whatever file the service reports. Lets abort and close work after a
    /// gateway restart, when no open ever ran in this process.
    pub async fn recover_last_file(&self) -> GatewayResult<String> {
        let path = {
            let mut session = self.command.lock().await;
            session
                .send_command(&protocol::open_file(&self.last_file_macro), true)
                .await?;
            session.send_command(protocol::FILENAME, true).await?
        };
        if !path.is_empty() && path != FAILURE_SENTINEL {
            *self.current_file.lock().await = Some(path.clone());
        }
        Ok(path)
    }

    async fn simple_command(&self, command: &str) -> GatewayResult<()> {
        let response = self
            .command
            .lock()
            .await
            .send_command(command, true)
            .await?;
        if response == FAILURE_SENTINEL {
            return Err(GatewayError::CommandFailed {
                command: command.to_string(),
            });
        }
        Ok(())
    }
}
