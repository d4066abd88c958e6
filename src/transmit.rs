// src/transmit.rs - Sequential block transmission with backpressure and retry
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};

use crate::device::DeviceClient;
use crate::print_job::PrintJob;
use crate::status::{DeviceStatus, PrintPhase, SessionState};

/// How often the backpressure gate re-reads the polled buffer level while
/// the box's buffer is above the ceiling.
const GATE_RECHECK: Duration = Duration::from_millis(500);

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    /// Every block was accepted by the box. The box may still be executing;
    /// the poller declares `Completed` once it reports idle again.
    Completed,
    /// A cancel request was observed; the cursor was reset and the
    /// cancelling flag cleared. Not an error.
    Cancelled,
    /// The session shut down mid-job.
    Shutdown,
}

/// Sends a job's blocks to the box, strictly in order: block N+1 is never
/// posted before block N is confirmed. One instance runs per job.
///
/// Failed or rejected sends are retried against the same block after a fixed
/// delay, without bound; the cancel flag is checked before every buffer wait
/// and before every retry, so cancellation latency is capped by one delay
/// interval.
pub struct TransmitLoop {
    client: Arc<dyn DeviceClient>,
    device: Arc<RwLock<DeviceStatus>>,
    session: Arc<RwLock<SessionState>>,
    job: Arc<RwLock<Option<PrintJob>>>,
    shutdown: broadcast::Receiver<()>,
    buffer_ceiling: u64,
    retry_delay: Duration,
}

impl TransmitLoop {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        device: Arc<RwLock<DeviceStatus>>,
        session: Arc<RwLock<SessionState>>,
        job: Arc<RwLock<Option<PrintJob>>>,
        shutdown: broadcast::Receiver<()>,
        buffer_ceiling: u64,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            device,
            session,
            job,
            shutdown,
            buffer_ceiling,
            retry_delay,
        }
    }

    pub async fn run(mut self) -> TransmitOutcome {
        let (empty, id) = {
            let job = self.job.read().await;
            match job.as_ref() {
                Some(job) => (job.is_empty(), job.id.clone()),
                None => return TransmitOutcome::Completed,
            }
        };

        if empty {
            // Nothing to execute: succeed on the spot, no network traffic.
            let mut session = self.session.write().await;
            session.progress = 100.0;
            session.phase = PrintPhase::Completed;
            session.is_printing = false;
            tracing::info!("Job {} has no instructions, completing immediately", id);
            return TransmitOutcome::Completed;
        }

        tracing::info!("Transmission started for job {}", id);

        loop {
            if self.cancel_requested().await {
                return self.unwind_cancel().await;
            }

            let next = {
                let job = self.job.read().await;
                job.as_ref().and_then(|job| {
                    job.blocks
                        .get(job.current_block)
                        .map(|block| (block.clone(), job.current_block, job.blocks.len()))
                })
            };
            let Some((block, index, total)) = next else {
                tracing::info!("All blocks of job {} sent, box is executing the tail", id);
                return TransmitOutcome::Completed;
            };

            // Backpressure gate: hold the block until the box's buffer
            // drains below the ceiling.
            loop {
                let buffered = self.device.read().await.buffered_lines;
                if buffered <= self.buffer_ceiling {
                    break;
                }
                tracing::debug!(
                    "Buffer at {} lines (ceiling {}), holding block {}",
                    buffered,
                    self.buffer_ceiling,
                    index + 1
                );
                if self.cancel_requested().await {
                    return self.unwind_cancel().await;
                }
                if !self.wait(GATE_RECHECK).await {
                    return TransmitOutcome::Shutdown;
                }
            }

            match self.client.send_block(&block, index == 0).await {
                Ok(reply) if reply.is_success() => {
                    if let Some(job) = self.job.write().await.as_mut() {
                        job.current_block += 1;
                    }
                    tracing::debug!("Block {}/{} accepted", index + 1, total);
                }
                Ok(reply) => {
                    tracing::warn!(
                        "Box rejected block {} with status '{}', resending",
                        index + 1,
                        reply.status
                    );
                    if self.cancel_requested().await {
                        return self.unwind_cancel().await;
                    }
                    if !self.wait(self.retry_delay).await {
                        return TransmitOutcome::Shutdown;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to send block {}: {}, resending", index + 1, e);
                    if self.cancel_requested().await {
                        return self.unwind_cancel().await;
                    }
                    if !self.wait(self.retry_delay).await {
                        return TransmitOutcome::Shutdown;
                    }
                }
            }
        }
    }

    async fn cancel_requested(&self) -> bool {
        self.session.read().await.is_cancelling
    }

    /// Stop sending, rewind the job, and acknowledge the cancel.
    async fn unwind_cancel(&self) -> TransmitOutcome {
        if let Some(job) = self.job.write().await.as_mut() {
            job.current_block = 0;
        }
        let mut session = self.session.write().await;
        session.is_cancelling = false;
        session.progress = 0.0;
        tracing::info!("Print cancelled, transmission stopped");
        TransmitOutcome::Cancelled
    }

    /// Sleep unless the session shuts down first. Returns false on shutdown.
    async fn wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
