// src/session.rs - Connection lifecycle and the public engine surface
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};

use crate::config::Config;
use crate::device::{DeviceClient, HttpDeviceClient, TransportError};
use crate::poller::StatusPoller;
use crate::print_job::PrintJob;
use crate::status::{DeviceStatus, PrintPhase, SessionState};
use crate::transmit::TransmitLoop;

/// G-code handed to the box alongside a stop request: heaters off, home.
const STOP_GCODE: &str = "M104 S0\nG28";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Notifications published to the UI collaborator. Status events are
/// re-emitted on every successful poll cycle whether or not anything
/// changed, so consumers must be idempotent.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged {
        connected: bool,
    },
    StatusUpdated {
        phase: PrintPhase,
        progress: f64,
        printing: bool,
        hotend: f64,
        hotend_target: f64,
        bed: f64,
        bed_target: f64,
    },
}

/// Owns the connection to one printer box: the shared status snapshot, the
/// derived session state, the job slot, and the two background loops.
///
/// All operations are safe to call from any task; shared state lives behind
/// `RwLock`s and the loops stop on the shutdown broadcast, so `close()`
/// releases everything on any exit path.
pub struct PrinterSession {
    config: Config,
    client: Arc<dyn DeviceClient>,
    device: Arc<RwLock<DeviceStatus>>,
    session: Arc<RwLock<SessionState>>,
    job: Arc<RwLock<Option<PrintJob>>>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: broadcast::Sender<()>,
}

impl PrinterSession {
    pub fn new(config: Config, client: Arc<dyn DeviceClient>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            client,
            device: Arc::new(RwLock::new(DeviceStatus::default())),
            session: Arc::new(RwLock::new(SessionState::default())),
            job: Arc::new(RwLock::new(None)),
            events,
            shutdown,
        }
    }

    /// Build a session with the real HTTP client from a validated config.
    pub fn from_config(config: Config) -> Result<Self, SessionError> {
        config.validate()?;
        let client = HttpDeviceClient::new(&config.device.host, config.device.request_timeout())?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Subscribe to session notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Establish the connection and start the status poller. Idempotent:
    /// a connect while already connecting or connected is a no-op.
    ///
    /// The transport is HTTP, so there is no link to open here; an absent
    /// box surfaces later as the poller reporting `disconnected`.
    pub async fn connect(&self) {
        {
            let mut session = self.session.write().await;
            if session.is_connecting || session.is_connected {
                return;
            }
            session.is_connecting = true;
        }
        tracing::info!("Connecting to printer box at {}", self.config.device.host);

        {
            let mut session = self.session.write().await;
            session.is_connecting = false;
            session.is_connected = true;
        }
        let _ = self.events.send(SessionEvent::ConnectionChanged { connected: true });

        let poller = StatusPoller::new(
            self.client.clone(),
            self.device.clone(),
            self.session.clone(),
            self.events.clone(),
            self.shutdown.subscribe(),
            self.config.transport.poll_interval(),
            self.config.transport.poll_retry(),
            self.config.transport.reset_heated_on_idle,
        );
        tokio::spawn(poller.run());
    }

    /// Split the instruction text into a job and start transmitting it in
    /// the background. A no-op while another print is active; never blocks
    /// the caller on network traffic.
    pub async fn start_print(&self, instructions: &str) {
        // Guard and transition under one write lock so two concurrent
        // starts cannot both pass the check.
        {
            let mut session = self.session.write().await;
            if session.is_printing {
                tracing::warn!("A print is already active, ignoring start request");
                return;
            }
            session.is_printing = true;
            session.is_cancelling = false;
            session.progress = 0.0;
            session.heated_up = false;
        }

        let job = PrintJob::from_text(instructions, self.config.transport.block_size_limit);
        tracing::info!(
            "Starting print {}: {} blocks, {} executable lines",
            job.id,
            job.blocks.len(),
            job.total_lines
        );
        *self.job.write().await = Some(job);

        let transmit = TransmitLoop::new(
            self.client.clone(),
            self.device.clone(),
            self.session.clone(),
            self.job.clone(),
            self.shutdown.subscribe(),
            self.config.transport.buffer_ceiling,
            self.config.transport.send_retry(),
        );
        tokio::spawn(async move {
            let outcome = transmit.run().await;
            tracing::debug!("Transmission loop finished: {:?}", outcome);
        });
    }

    /// Cancel the active print. Always succeeds locally: the stop command to
    /// the box is best-effort and a transport failure is only logged.
    pub async fn cancel_print(&self) {
        {
            let mut session = self.session.write().await;
            session.is_cancelling = true;
            session.is_printing = false;
            session.progress = 0.0;
        }
        // The transmission loop rewinds the cursor when it observes the
        // flag; rewind here as well for the case where it already finished.
        if let Some(job) = self.job.write().await.as_mut() {
            job.current_block = 0;
        }
        tracing::info!("Cancelling print");

        if let Err(e) = self.client.stop_print(STOP_GCODE).await {
            tracing::warn!("Stop command did not reach the box: {}", e);
        }
    }

    /// Stop both loops and drop the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let was_connected = {
            let mut session = self.session.write().await;
            let was = session.is_connected;
            session.is_connected = false;
            session.is_connecting = false;
            session.is_printing = false;
            session.phase = PrintPhase::NotConnected;
            was
        };
        let _ = self.shutdown.send(());
        if was_connected {
            tracing::info!("Printer connection closed");
            let _ = self.events.send(SessionEvent::ConnectionChanged { connected: false });
        }
    }

    pub async fn state(&self) -> SessionState {
        self.session.read().await.clone()
    }

    pub async fn device_status(&self) -> DeviceStatus {
        self.device.read().await.clone()
    }

    pub async fn current_job(&self) -> Option<PrintJob> {
        self.job.read().await.clone()
    }

    pub async fn progress(&self) -> f64 {
        self.session.read().await.progress
    }

    pub async fn phase(&self) -> PrintPhase {
        self.session.read().await.phase
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_connected
    }

    pub async fn is_printing(&self) -> bool {
        self.session.read().await.is_printing
    }
}
