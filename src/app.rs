//! Application facade: the control boundary of the gateway.
//!
//! `Gateway` wires the protocol client, the acquisition loop, and a sink
//! together and exposes the operations an external trigger is allowed to
//! drive. Abort and close stop the loop before touching the experiment.

use std::sync::Arc;
use std::time::Duration;

use crate::acquire::{AcquisitionLoop, LoopState};
use crate::client::{InstrumentClient, SessionRole};
use crate::config::Settings;
use crate::error::GatewayResult;
use crate::protocol::DEFAULT_RUN_MODE;
use crate::sink::ChannelSink;

/// The gateway's control surface.
pub struct Gateway {
    client: Arc<InstrumentClient>,
    acquisition: AcquisitionLoop,
}

impl Gateway {
    /// Build a gateway from settings and a sink. No connection is made until
    /// [`Gateway::initialize`].
    pub fn new(settings: &Settings, sink: Arc<dyn ChannelSink>) -> Self {
        let client = Arc::new(InstrumentClient::new(settings));
        let acquisition = AcquisitionLoop::new(Arc::clone(&client), sink, settings);
        Self {
            client,
            acquisition,
        }
    }

    /// Connect all protocol sessions.
    pub async fn initialize(&self) -> GatewayResult<()> {
        self.client.initialize().await
    }

    /// Open an experiment file on the command channel. With `name` unset the
    /// service's current file is adopted. Returns the remote-side path.
    pub async fn open_experiment(&self, name: Option<&str>) -> GatewayResult<String> {
        self.client
            .open_experiment(name, SessionRole::Command)
            .await
    }

    /// Start the experiment with the default mode switch.
    pub async fn run_experiment(&self) -> GatewayResult<()> {
        self.client.run_experiment(DEFAULT_RUN_MODE).await
    }

    /// Start the acquisition loop. Idempotent while streaming.
    pub async fn start_acquisition(&self) -> GatewayResult<()> {
        self.acquisition.start().await
    }

    /// Stop the acquisition loop and wait for it to acknowledge.
    pub async fn stop_acquisition(&self) {
        self.acquisition.stop().await;
    }

    /// Current acquisition loop state.
    pub async fn acquisition_state(&self) -> LoopState {
        self.acquisition.state().await
    }

    /// Abort the running experiment. Stops the loop first; when this process
    /// never opened a file itself, the service's most-recent-file macro is
    /// re-associated so the abort lands on the right experiment.
    pub async fn abort_experiment(&self) -> GatewayResult<()> {
        self.acquisition.stop().await;
        if self.client.current_file().await.is_none() {
            self.client.recover_last_file().await?;
        }
        self.client.abort_experiment().await
    }

    /// Close the experiment file. Stops the loop first.
    pub async fn close_experiment(&self) -> GatewayResult<()> {
        self.acquisition.stop().await;
        self.client.close_experiment().await
    }

    /// Listen for status pushes until the service reports a stopped state or
    /// the timeout elapses.
    pub async fn monitor_until_stopped(&self, timeout: Duration) -> GatewayResult<()> {
        self.client.monitor_until_stopped(timeout).await
    }

    /// Stop the loop and close every session.
    pub async fn shutdown(&self) {
        self.acquisition.stop().await;
        self.client.shutdown().await;
    }

    /// Access to the underlying protocol client, for diagnostics tooling.
    pub fn client(&self) -> &Arc<InstrumentClient> {
        &self.client
    }
}
