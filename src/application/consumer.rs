//! Long-running subscribers that keep the profile replica current.
//!
//! Each delivery is settled exactly once: acknowledged after it is applied,
//! terminated when it can never be applied, and requeued otherwise.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::application::{
    events::{PoisonMessage, ProfileChangeEvent, UserCreatedEvent},
    profiles::ProfileService,
};
use crate::domain::entities::CachedProfile;

const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
#[error("broker {operation} failed: {message}")]
pub struct BrokerError {
    pub operation: &'static str,
    pub message: String,
}

impl BrokerError {
    pub fn new(operation: &'static str, err: impl fmt::Display) -> Self {
        Self {
            operation,
            message: err.to_string(),
        }
    }
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Never redeliver.
    Term,
    Requeue,
}

impl Settlement {
    pub fn as_str(self) -> &'static str {
        match self {
            Settlement::Ack => "ack",
            Settlement::Term => "term",
            Settlement::Requeue => "requeue",
        }
    }
}

/// One message handed out by a [`MessageSource`].
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    async fn settle(&self, settlement: Settlement) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Waits a bounded time for messages; an empty batch is not an error.
    async fn next_batch(&self) -> Result<Vec<Box<dyn Delivery>>, BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    /// Partial profile updates keyed by `user_id`.
    ProfileUpdates,
    /// Full profiles of newly registered users.
    UserCreated,
}

impl ConsumerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerKind::ProfileUpdates => "profile_updates",
            ConsumerKind::UserCreated => "user_created",
        }
    }
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies one payload and decides how to settle it.
pub async fn handle_message(
    profiles: &ProfileService,
    kind: ConsumerKind,
    payload: &[u8],
) -> Settlement {
    let outcome = match kind {
        ConsumerKind::ProfileUpdates => match ProfileChangeEvent::parse(payload) {
            Ok(event) => profiles.update_fields(event.user_id, &event.fields).await,
            Err(err) => return poison(kind, &err),
        },
        ConsumerKind::UserCreated => match UserCreatedEvent::parse(payload) {
            Ok(event) => profiles.create(&CachedProfile::from(event)).await,
            Err(err) => return poison(kind, &err),
        },
    };

    match outcome {
        Ok(()) => Settlement::Ack,
        Err(err) if err.is_validation() => {
            warn!(consumer = %kind, error = %err, "dropping event rejected by validation");
            Settlement::Term
        }
        Err(err) => {
            warn!(consumer = %kind, error = %err, "event failed; requeueing");
            Settlement::Requeue
        }
    }
}

fn poison(kind: ConsumerKind, err: &PoisonMessage) -> Settlement {
    warn!(consumer = %kind, error = %err, "dropping malformed event");
    Settlement::Term
}

struct Worker {
    kind: ConsumerKind,
    source: Arc<dyn MessageSource>,
    profiles: Arc<ProfileService>,
}

impl Worker {
    async fn poll_once(&self) -> Result<usize, BrokerError> {
        let batch = self.source.next_batch().await?;
        Ok(self.settle_batch(batch).await)
    }

    async fn settle_batch(&self, batch: Vec<Box<dyn Delivery>>) -> usize {
        let received = batch.len();
        for delivery in batch {
            let settlement = handle_message(&self.profiles, self.kind, delivery.payload()).await;
            counter!(
                "postline_profile_events_total",
                "consumer" => self.kind.as_str(),
                "outcome" => settlement.as_str()
            )
            .increment(1);
            if let Err(err) = delivery.settle(settlement).await {
                // The broker redelivers once the ack deadline passes.
                warn!(consumer = %self.kind, settlement = settlement.as_str(), error = %err, "failed to settle event");
            }
        }
        received
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, idle_backoff: Duration) {
        info!("profile consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            // Only the fetch is cancelled on shutdown; a received batch is
            // always settled.
            let fetched = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                fetched = self.source.next_batch() => fetched,
            };
            match fetched {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => {
                    let count = self.settle_batch(batch).await;
                    debug!(count, "processed event batch");
                    continue;
                }
                Err(err) => warn!(error = %err, "failed to fetch events; backing off"),
            }
            // An idle queue or a failed fetch waits before the next pull.
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(idle_backoff) => {}
            }
        }
        info!("profile consumer stopped");
    }
}

/// Owned handle for one subscription loop.
pub struct ProfileConsumer {
    worker: Arc<Worker>,
    idle_backoff: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl ProfileConsumer {
    pub fn new(
        kind: ConsumerKind,
        source: Arc<dyn MessageSource>,
        profiles: Arc<ProfileService>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                kind,
                source,
                profiles,
            }),
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            running: None,
        }
    }

    /// Delay after an empty or failed fetch before polling again.
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn kind(&self) -> ConsumerKind {
        self.worker.kind
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Fetches and settles a single batch on the caller's task.
    pub async fn poll_once(&self) -> Result<usize, BrokerError> {
        self.worker.poll_once().await
    }

    /// Spawns the subscription loop; a second call while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let span = info_span!("profile_consumer", consumer = %self.worker.kind);
        let handle = tokio::spawn(worker.run(rx, self.idle_backoff).instrument(span));
        self.running = Some((tx, handle));
    }

    /// Signals the loop and waits for the in-flight batch to settle.
    pub async fn stop(&mut self) {
        let Some((tx, handle)) = self.running.take() else {
            return;
        };
        let _ = tx.send(true);
        if let Err(err) = handle.await {
            warn!(consumer = %self.worker.kind, error = %err, "profile consumer task ended abnormally");
        }
    }
}
