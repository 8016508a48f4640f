//! The acquisition loop: legend resolution plus the periodic data poll.
//!
//! One cancellable, single-flight task per client. Starting resolves the
//! channel legend for the currently open experiment, publishes the mass
//! values as an initial snapshot, associates the data-channel file, then
//! polls one data frame per tick and forwards accepted rows to the sink.
//! Stopping is cooperative: the shutdown signal is observed at the tick
//! boundary, before the next remote command is issued.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{InstrumentClient, SessionRole};
use crate::config::Settings;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{self, MAX_CHANNELS};
use crate::session;
use crate::sink::ChannelSink;

/// Observable loop states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// No task is running.
    Idle,
    /// Resolving the channel legend.
    Legending,
    /// Polling data once per tick.
    Streaming,
    /// The task ended on request or because the peer went away.
    Stopped,
    /// The task ended because legending or the file association failed.
    Faulted,
}

struct TaskSlot {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    state: Option<watch::Receiver<LoopState>>,
}

/// Handle owning the acquisition task for one client.
pub struct AcquisitionLoop {
    client: Arc<InstrumentClient>,
    sink: Arc<dyn ChannelSink>,
    tick_period: Duration,
    view: u32,
    task: Mutex<TaskSlot>,
}

impl AcquisitionLoop {
    /// Create an idle loop over the given client and sink.
    pub fn new(client: Arc<InstrumentClient>, sink: Arc<dyn ChannelSink>, settings: &Settings) -> Self {
        Self {
            client,
            sink,
            tick_period: settings.acquisition.tick_period,
            view: 1,
            task: Mutex::new(TaskSlot {
                handle: None,
                shutdown: None,
                state: None,
            }),
        }
    }

    /// Current loop state.
    pub async fn state(&self) -> LoopState {
        let slot = self.task.lock().await;
        match &slot.state {
            Some(rx) => *rx.borrow(),
            None => LoopState::Idle,
        }
    }

    /// Start the loop. Calling start while the task is already running is a
    /// no-op; a run that ended on its own is reaped first.
    pub async fn start(&self) -> GatewayResult<()> {
        let mut slot = self.task.lock().await;
        if let Some(handle) = &slot.handle {
            if !handle.is_finished() {
                debug!("acquisition already running; start ignored");
                return Ok(());
            }
            slot.handle = None;
            slot.shutdown = None;
            slot.state = None;
        }

        let (state_tx, state_rx) = watch::channel(LoopState::Legending);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let sink = Arc::clone(&self.sink);
        let tick_period = self.tick_period;
        let view = self.view;

        let handle = tokio::spawn(async move {
            let final_state =
                run_loop(client, sink, view, tick_period, shutdown_rx, &state_tx).await;
            info!(?final_state, "acquisition loop ended");
            let _ = state_tx.send(final_state);
        });

        slot.handle = Some(handle);
        slot.shutdown = Some(shutdown_tx);
        slot.state = Some(state_rx);
        info!("acquisition loop started");
        Ok(())
    }

    /// Request cancellation and wait for the task to acknowledge. When this
    /// returns, no further data command will be issued.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(tx) = slot.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = slot.handle.take() {
            let _ = handle.await;
            info!("acquisition loop stopped");
        }
        slot.state = None;
    }
}

async fn run_loop(
    client: Arc<InstrumentClient>,
    sink: Arc<dyn ChannelSink>,
    view: u32,
    tick_period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
    state_tx: &watch::Sender<LoopState>,
) -> LoopState {
    let (legend, path) = match client.get_legends(view).await {
        Ok(result) => result,
        Err(err) => {
            warn!(%err, "legend resolution failed");
            return LoopState::Faulted;
        }
    };
    let masses = legend.mass_values();
    info!(channels = masses.len(), path = %path, "legend resolved");

    for (idx, mass) in masses.iter().take(MAX_CHANNELS).enumerate() {
        if let Err(err) = sink.write(idx + 1, *mass).await {
            warn!(%err, channel = idx + 1, "mass snapshot write failed");
        }
    }

    if let Err(err) = client
        .open_experiment(Some(path.as_str()), SessionRole::Data)
        .await
    {
        warn!(%err, "data-channel file association failed");
        return LoopState::Faulted;
    }

    let _ = state_tx.send(LoopState::Streaming);
    let mut ticker = tokio::time::interval(tick_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                return LoopState::Stopped;
            }
            _ = ticker.tick() => {
                match client.poll_data(view).await {
                    Ok(raw) => {
                        if raw == protocol::FAILURE_SENTINEL {
                            continue;
                        }
                        publish_rows(&raw, &masses, sink.as_ref()).await;
                    }
                    Err(GatewayError::Io(err)) if session::is_disconnect(&err) => {
                        warn!(%err, "instrument service closed the data connection");
                        return LoopState::Stopped;
                    }
                    Err(err) => {
                        warn!(%err, "data poll failed; tick skipped");
                    }
                }
            }
        }
    }
}

async fn publish_rows(raw: &str, masses: &[f64], sink: &dyn ChannelSink) {
    for row in protocol::parse_data_rows(raw, masses.len()) {
        for (idx, value) in row.iter().take(MAX_CHANNELS).enumerate() {
            if let Err(err) = sink.write(idx + 1, *value).await {
                warn!(%err, channel = idx + 1, "sink write failed");
            }
        }
    }
}
