// src/poller.rs - Continuous device status polling
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::time::MissedTickBehavior;

use crate::device::{DeviceClient, TransportError};
use crate::session::SessionEvent;
use crate::status::{DeviceStatus, SessionState};

/// Polls the box on a fixed cadence for the lifetime of the connection,
/// replacing the shared snapshot wholesale on success and deriving the
/// session's phase/progress from it. A failed poll keeps the previous
/// snapshot (stale but valid) and holds off before the next attempt.
pub struct StatusPoller {
    client: Arc<dyn DeviceClient>,
    device: Arc<RwLock<DeviceStatus>>,
    session: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: broadcast::Receiver<()>,
    poll_interval: Duration,
    retry_delay: Duration,
    reset_heated_on_idle: bool,
}

impl StatusPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn DeviceClient>,
        device: Arc<RwLock<DeviceStatus>>,
        session: Arc<RwLock<SessionState>>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: broadcast::Receiver<()>,
        poll_interval: Duration,
        retry_delay: Duration,
        reset_heated_on_idle: bool,
    ) -> Self {
        Self {
            client,
            device,
            session,
            events,
            shutdown,
            poll_interval,
            retry_delay,
            reset_heated_on_idle,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Status poller shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!("Status poll failed: {}, keeping previous snapshot", e);
                        tokio::select! {
                            _ = self.shutdown.recv() => {
                                tracing::info!("Status poller shutting down");
                                break;
                            }
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), TransportError> {
        let envelope = self.client.fetch_status().await?;
        let status = DeviceStatus::from(envelope.data);

        *self.device.write().await = status.clone();

        let derived = {
            let mut session = self.session.write().await;
            session.apply_status(&status, self.reset_heated_on_idle);
            session.clone()
        };

        // Every successful cycle re-emits the full set of derived signals,
        // changed or not; consumers are idempotent.
        let _ = self.events.send(SessionEvent::StatusUpdated {
            phase: derived.phase,
            progress: derived.progress,
            printing: derived.is_printing,
            hotend: status.hotend,
            hotend_target: status.hotend_target,
            bed: status.bed,
            bed_target: status.bed_target,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PostReply, StatusEnvelope};
    use crate::status::{DeviceState, PrintPhase};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Status double: pops one canned poll result per call, repeating the
    /// last entry once the script runs dry.
    struct ScriptedStatus {
        script: Mutex<VecDeque<Result<String, ()>>>,
        last: Mutex<Option<String>>,
    }

    impl ScriptedStatus {
        fn new(script: Vec<Result<String, ()>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl DeviceClient for ScriptedStatus {
        async fn fetch_status(&self) -> Result<StatusEnvelope, TransportError> {
            let next = self.script.lock().unwrap().pop_front();
            let body = match next {
                Some(Ok(body)) => {
                    *self.last.lock().unwrap() = Some(body.clone());
                    body
                }
                Some(Err(())) => {
                    return Err(TransportError::Malformed("scripted failure".to_string()));
                }
                None => match self.last.lock().unwrap().clone() {
                    Some(body) => body,
                    None => return Err(TransportError::Malformed("script empty".to_string())),
                },
            };
            serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))
        }

        async fn send_block(&self, _gcode: &str, _first: bool) -> Result<PostReply, TransportError> {
            Err(TransportError::Malformed("not scripted".to_string()))
        }

        async fn stop_print(&self, _gcode: &str) -> Result<PostReply, TransportError> {
            Err(TransportError::Malformed("not scripted".to_string()))
        }
    }

    fn printing_body(current: u64, total: u64, buffered: u64) -> Result<String, ()> {
        Ok(format!(
            r#"{{"data":{{"state":"printing","hotend":210,"hotend_target":210,"current_line":{},"total_lines":{},"buffered_lines":{}}}}}"#,
            current, total, buffered
        ))
    }

    struct Harness {
        device: Arc<RwLock<DeviceStatus>>,
        session: Arc<RwLock<SessionState>>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: broadcast::Sender<()>,
    }

    impl Harness {
        fn new() -> Self {
            let (events, _) = broadcast::channel(64);
            let (shutdown, _) = broadcast::channel(1);
            Self {
                device: Arc::new(RwLock::new(DeviceStatus::default())),
                session: Arc::new(RwLock::new(SessionState::default())),
                events,
                shutdown,
            }
        }

        fn poller(&self, client: Arc<dyn DeviceClient>) -> StatusPoller {
            StatusPoller::new(
                client,
                self.device.clone(),
                self.session.clone(),
                self.events.clone(),
                self.shutdown.subscribe(),
                Duration::from_secs(1),
                Duration::from_secs(3),
                true,
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_poll_replaces_the_snapshot_and_derives_phase() {
        let harness = Harness::new();
        harness.session.write().await.is_printing = true;
        let client = ScriptedStatus::new(vec![printing_body(50, 200, 1200)]);
        let mut events = harness.events.subscribe();

        let handle = tokio::spawn(harness.poller(client).run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let device = harness.device.read().await.clone();
        assert_eq!(device.state, DeviceState::Printing);
        assert_eq!(device.buffered_lines, 1200);

        let session = harness.session.read().await.clone();
        assert_eq!(session.phase, PrintPhase::Printing);
        assert_eq!(session.progress, 25.0);

        match events.recv().await.unwrap() {
            SessionEvent::StatusUpdated { phase, progress, printing, hotend, .. } => {
                assert_eq!(phase, PrintPhase::Printing);
                assert_eq!(progress, 25.0);
                assert!(printing);
                assert_eq!(hotend, 210.0);
            }
            other => panic!("unexpected event {:?}", other),
        }

        harness.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_the_stale_snapshot() {
        let harness = Harness::new();
        let client = ScriptedStatus::new(vec![printing_body(50, 200, 1200), Err(()), Err(())]);

        let handle = tokio::spawn(harness.poller(client).run());
        // First cycle succeeds, the next two fail with a 3s hold-off each.
        tokio::time::sleep(Duration::from_secs(9)).await;

        let device = harness.device.read().await.clone();
        assert_eq!(device.state, DeviceState::Printing);
        assert_eq!(device.current_line, 50);

        harness.shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn signals_are_re_emitted_every_cycle() {
        let harness = Harness::new();
        let client = ScriptedStatus::new(vec![printing_body(50, 200, 1200)]);
        let mut events = harness.events.subscribe();

        let handle = tokio::spawn(harness.poller(client).run());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        harness.shutdown.send(()).unwrap();
        handle.await.unwrap();

        // Identical status polled repeatedly still produces one event per cycle.
        let mut seen = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::StatusUpdated { .. }) {
                seen += 1;
            }
        }
        assert!(seen >= 3, "only {} status events", seen);
    }
}
