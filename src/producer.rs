//! Fault-injecting load generator.
//!
//! A single background task publishes to the [`Queue`] at the pace set by the
//! current [`FaultModel`]. `start`, `stop`, `status` and `publish_once` are the
//! whole surface; state is never exposed for direct mutation.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use rand::{SeedableRng, rngs::StdRng};
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::queue::Queue,
    error::HubError,
    models::{
        fault::{CycleOutcome, FaultModel},
        message::OutboundMessage,
        producer::{ProducerState, ProducerStats, StartOutcome, StopOutcome},
    },
};

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LoadGenerator {
    queue: Arc<dyn Queue>,
    state: Arc<RwLock<ProducerState>>,
    worker: Mutex<Option<Worker>>,
    seed: Option<u64>,
}

impl LoadGenerator {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self {
            queue,
            state: Arc::new(RwLock::new(ProducerState::default())),
            worker: Mutex::new(None),
            seed: None,
        }
    }

    /// Fixes the fault draws so that a run can be replayed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub async fn start(&self, model: FaultModel) -> Result<StartOutcome, HubError> {
        model.validate()?;

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            warn!("Load generator is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        update(&self.state, |state| state.model = model.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_cycles(
            Arc::clone(&self.queue),
            Arc::clone(&self.state),
            cancel.clone(),
            rng,
        ));
        *worker = Some(Worker { cancel, handle });

        update(&self.state, |state| state.running = true);

        info!(
            rpm = model.requests_per_minute,
            error_rate = model.error_rate_percent,
            latency_ms = model.latency_ms,
            corruption_rate = model.corruption_rate_percent,
            "Load generator started"
        );

        Ok(StartOutcome::Started)
    }

    /// Signals the loop and waits for it to exit. Returns once the loop is gone.
    pub async fn stop(&self) -> StopOutcome {
        let mut worker = self.worker.lock().await;
        let Some(Worker { cancel, handle }) = worker.take() else {
            warn!("Load generator is not running");
            return StopOutcome::NotRunning;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Load generator task ended abnormally");
        }

        update(&self.state, |state| state.running = false);
        info!("Load generator stopped");

        StopOutcome::Stopped
    }

    pub fn status(&self) -> ProducerState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes one single-shot message regardless of the loop state.
    pub async fn publish_once(&self) -> Result<Uuid, HubError> {
        let message = OutboundMessage::single_shot();
        info!(message_id = %message.dedup_id, "Sending single-invoke message");

        match self.queue.publish(&message).await {
            Ok(()) => {
                info!(message_id = %message.dedup_id, "Single message sent");
                Ok(message.dedup_id)
            }
            Err(e) => {
                error!(error = %e, "Failed to send single message");
                Err(e)
            }
        }
    }
}

fn update(state: &RwLock<ProducerState>, apply: impl FnOnce(&mut ProducerState)) {
    let mut guard = state.write().unwrap_or_else(PoisonError::into_inner);
    apply(&mut guard);
}

fn record(state: &RwLock<ProducerState>, apply: impl FnOnce(&mut ProducerStats)) {
    update(state, |state| apply(&mut state.stats));
}

/// Sleeps for `duration` unless cancelled first. Returns `false` on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

async fn run_cycles(
    queue: Arc<dyn Queue>,
    state: Arc<RwLock<ProducerState>>,
    cancel: CancellationToken,
    mut rng: StdRng,
) {
    let mut sequence: u64 = 0;

    while !cancel.is_cancelled() {
        let model = state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .model
            .clone();

        if let Some(latency) = model.injected_latency() {
            info!(latency_ms = model.latency_ms, "Injecting latency");
            if !pause(&cancel, latency).await {
                break;
            }
        }

        record(&state, |stats| stats.cycles += 1);

        match model.roll(&mut rng) {
            CycleOutcome::SimulatedFailure => {
                error!("Simulating a message send failure");
                record(&state, |stats| stats.simulated_failures += 1);
            }
            CycleOutcome::Corrupted => {
                let message = OutboundMessage::corrupted();
                warn!(message_id = %message.dedup_id, "Sending corrupted message");
                if send(queue.as_ref(), &message).await {
                    record(&state, |stats| {
                        stats.published += 1;
                        stats.corrupted += 1;
                    });
                } else {
                    record(&state, |stats| stats.publish_failures += 1);
                }
            }
            CycleOutcome::Normal => {
                sequence += 1;
                let message = OutboundMessage::normal(sequence);
                info!(message_id = %message.dedup_id, "Sending message");
                if send(queue.as_ref(), &message).await {
                    record(&state, |stats| stats.published += 1);
                } else {
                    record(&state, |stats| stats.publish_failures += 1);
                }
            }
        }

        if !pause(&cancel, model.send_interval()).await {
            break;
        }
    }
}

async fn send(queue: &dyn Queue, message: &OutboundMessage) -> bool {
    match queue.publish(message).await {
        Ok(()) => {
            info!(message_id = %message.dedup_id, group = %message.group, "Message sent");
            true
        }
        Err(e) => {
            error!(message_id = %message.dedup_id, error = %e, "Failed to send message to queue");
            false
        }
    }
}
