//! crates/xengage_core/src/scheduler.rs
//!
//! The Scheduling Queue and its dispatcher. The queue only holds deferred
//! post/reply/thread items; the dispatcher decides when they are due and hands
//! each one to an `ActionDispatch` implementation, recording the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    Credentials, ScheduledAction, ScheduledPayload, ScheduledResult, ScheduledStatus,
};
use crate::error::{AutomationError, QueueError};
use crate::ports::Clock;

/// Completed items are kept this long so callers can still read their outcome.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Everything needed to queue one deferred action.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub user_id: Option<Uuid>,
    pub payload: ScheduledPayload,
    pub schedule_time: DateTime<Utc>,
    pub account: String,
    pub credentials: Option<Credentials>,
}

/// Scheduled items split by kind, each list ordered by schedule time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduledListing {
    pub posts: Vec<ScheduledAction>,
    pub threads: Vec<ScheduledAction>,
}

#[derive(Default)]
struct QueueState {
    items: HashMap<String, ScheduledAction>,
    /// Items handed to the dispatcher whose outcome is not recorded yet.
    in_flight: HashSet<String>,
}

pub struct SchedulingQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
}

impl SchedulingQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            clock,
        }
    }

    /// Queues an action. The schedule time must be strictly after now; anything
    /// else belongs on the immediate path.
    pub async fn enqueue(&self, request: ScheduleRequest) -> Result<String, QueueError> {
        let now = self.clock.now();
        if request.schedule_time <= now {
            return Err(QueueError::NotInFuture {
                requested: request.schedule_time,
                now,
            });
        }
        if let ScheduledPayload::Thread { segments, .. } = &request.payload {
            if segments.is_empty() {
                return Err(QueueError::EmptyThread);
            }
        }

        let id = format!("{}-{}", request.payload.id_prefix(), Uuid::new_v4());
        let item = ScheduledAction {
            id: id.clone(),
            user_id: request.user_id,
            payload: request.payload,
            schedule_time: request.schedule_time,
            account: request.account,
            credentials: request.credentials,
            status: ScheduledStatus::Pending,
            result: None,
            completed_at: None,
        };
        info!("Scheduled {} for {}", id, item.schedule_time);
        self.state.lock().await.items.insert(id.clone(), item);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<ScheduledAction> {
        self.state.lock().await.items.get(id).cloned()
    }

    /// Every item still held by the queue, split into posts and threads.
    pub async fn list(&self) -> ScheduledListing {
        let state = self.state.lock().await;
        let mut listing = ScheduledListing::default();
        for item in state.items.values() {
            if item.payload.is_thread() {
                listing.threads.push(item.clone());
            } else {
                listing.posts.push(item.clone());
            }
        }
        listing.posts.sort_by_key(|item| item.schedule_time);
        listing.threads.sort_by_key(|item| item.schedule_time);
        listing
    }

    /// Removes a pending item. Items that already ran, or are running right
    /// now, cannot be cancelled.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let cancellable = state
            .items
            .get(id)
            .map(|item| item.status == ScheduledStatus::Pending)
            .unwrap_or(false)
            && !state.in_flight.contains(id);
        if cancellable {
            state.items.remove(id);
            info!("Cancelled scheduled item {}", id);
        } else {
            debug!("Scheduled item {} is not cancellable", id);
        }
        cancellable
    }

    /// Claims every pending item due at `now`. Claimed items stay pending but
    /// are neither cancellable nor claimable again until their outcome is recorded.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledAction> {
        let mut state = self.state.lock().await;
        let due: Vec<ScheduledAction> = state
            .items
            .values()
            .filter(|item| {
                item.status == ScheduledStatus::Pending
                    && item.schedule_time <= now
                    && !state.in_flight.contains(&item.id)
            })
            .cloned()
            .collect();
        for item in &due {
            state.in_flight.insert(item.id.clone());
        }
        due
    }

    pub async fn record(
        &self,
        id: &str,
        outcome: Result<ScheduledResult, AutomationError>,
        at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
        let Some(item) = state.items.get_mut(id) else {
            warn!("Scheduled item {} vanished before its outcome was recorded", id);
            return;
        };
        match outcome {
            Ok(result) => {
                item.status = ScheduledStatus::Posted;
                item.result = Some(result);
            }
            Err(e) => {
                item.status = ScheduledStatus::Failed;
                item.result = Some(ScheduledResult::Failed(e.report()));
            }
        }
        item.completed_at = Some(at);
        // Credentials are only needed to run the item.
        item.credentials = None;
    }

    /// Drops finished items completed more than `retention` before `now`.
    pub async fn purge_completed(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut state = self.state.lock().await;
        let before = state.items.len();
        state.items.retain(|_, item| match item.completed_at {
            Some(done) if item.status != ScheduledStatus::Pending => now - done <= retention,
            _ => true,
        });
        before - state.items.len()
    }
}

//=========================================================================================
// Dispatcher
//=========================================================================================

/// Runs one due scheduled item. The engine implements this on top of the
/// action executor.
#[async_trait]
pub trait ActionDispatch: Send + Sync {
    async fn dispatch(&self, item: &ScheduledAction) -> Result<ScheduledResult, AutomationError>;
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub posted: usize,
    pub failed: usize,
    pub purged: usize,
}

pub struct Dispatcher {
    queue: Arc<SchedulingQueue>,
    target: Arc<dyn ActionDispatch>,
    retention: Duration,
}

impl Dispatcher {
    pub fn new(queue: Arc<SchedulingQueue>, target: Arc<dyn ActionDispatch>) -> Self {
        Self {
            queue,
            target,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Dispatches every item due at `now`, one after another. Each item runs in
    /// its own task, so a failure (or a panic) in one is recorded against that
    /// item only and the rest of the tick carries on. Nothing is retried.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        for item in self.queue.take_due(now).await {
            let target = self.target.clone();
            let running = item.clone();
            let outcome = match tokio::spawn(async move { target.dispatch(&running).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(AutomationError::Unexpected(format!(
                    "dispatch task aborted: {}",
                    e
                ))),
            };
            match &outcome {
                Ok(_) => {
                    info!("Scheduled item {} posted", item.id);
                    summary.posted += 1;
                }
                Err(e) => {
                    warn!("Scheduled item {} failed [{}]: {}", item.id, e.code(), e);
                    summary.failed += 1;
                }
            }
            self.queue.record(&item.id, outcome, now).await;
        }

        summary.purged = self.queue.purge_completed(now, self.retention).await;
        if summary.purged > 0 {
            info!("Purged {} finished scheduled items", summary.purged);
        }
        summary
    }
}

/// Calls `tick` every `interval` until `shutdown` is cancelled.
pub fn spawn_dispatcher(
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Dispatcher started, ticking every {:?}", interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Dispatcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = dispatcher.tick(clock.now()).await;
                    if summary.posted + summary.failed > 0 {
                        info!(
                            "Dispatch tick: {} posted, {} failed",
                            summary.posted, summary.failed
                        );
                    }
                }
            }
        }
    })
}
