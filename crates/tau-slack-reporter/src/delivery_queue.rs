//! Ordered, single-consumer delivery of Slack requests.
//!
//! Producers enqueue synchronously from lifecycle callbacks. A worker task
//! wakes on a fixed interval or on an enqueue notification and drains the
//! queue strictly in FIFO order with at most one request in flight. The
//! queue also owns the run's thread anchor: the timestamp that later posts
//! reply under.
//!
//! Once [`DeliveryQueue::stop`] has been called and the queue drains, the
//! queue flips to *ended* exactly once and the worker exits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::slack_payloads::ThreadPlacement;
use crate::transport::{DeliveryKind, DeliveryReceipt, DeliveryRequest, DeliveryTransport};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transport `{transport}` does not support `{kind}` requests")]
    Unsupported {
        transport: &'static str,
        kind: &'static str,
    },
    #[error("slack delivery failed: {0}")]
    Transport(String),
    #[error("delivery queue has already ended")]
    QueueEnded,
    #[error("delivery task was dropped before completion")]
    Dropped,
}

pub type DeliveryResult = std::result::Result<DeliveryReceipt, DeliveryError>;

#[derive(Debug)]
pub struct DeliveryTask {
    pub id: u64,
    pub request: DeliveryRequest,
    responder: Option<oneshot::Sender<DeliveryResult>>,
}

impl DeliveryTask {
    pub fn kind(&self) -> DeliveryKind {
        self.request.kind()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadAnchor {
    /// Timestamp of the first successful post of the run.
    pub first: Option<String>,
    /// Anchor that `Reply` posts and uploads thread under.
    pub current: Option<String>,
    /// Timestamp of the most recent successful post.
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing queued.
    Idle,
    /// Another drain is running or a request is in flight.
    Busy,
    Drained { attempted: usize },
    /// The queue has ended and holds no tasks.
    Ended,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<DeliveryTask>,
    next_id: u64,
    in_flight: usize,
    draining: bool,
    stop_requested: bool,
    ended: bool,
    anchor: ThreadAnchor,
    stats: DeliveryStats,
}

impl QueueState {
    fn is_synchronised(&self) -> bool {
        self.in_flight == 0 && self.tasks.is_empty() && !self.draining
    }

    fn thread_for(&self, request: &DeliveryRequest) -> Option<String> {
        if let Some(explicit) = request.explicit_thread_ts() {
            return Some(explicit.to_string());
        }
        match request {
            DeliveryRequest::PostMessage(message) => match message.placement {
                ThreadPlacement::Reply => self.anchor.current.clone(),
                ThreadPlacement::TopLevel => None,
            },
            DeliveryRequest::UploadFile(_) => self.anchor.current.clone(),
            DeliveryRequest::WebhookSend(_) => None,
        }
    }

    fn record_posted(&mut self, request: &DeliveryRequest, ts: &str) {
        let DeliveryRequest::PostMessage(message) = request else {
            return;
        };
        self.anchor.latest = Some(ts.to_string());
        if request.explicit_thread_ts().is_some() {
            return;
        }
        if self.anchor.first.is_none() {
            self.anchor.first = Some(ts.to_string());
            self.anchor.current = Some(ts.to_string());
        } else if message.placement == ThreadPlacement::TopLevel {
            self.anchor.current = Some(ts.to_string());
        }
    }
}

pub struct DeliveryQueue {
    transport: Arc<dyn DeliveryTransport>,
    state: Mutex<QueueState>,
    wakeup: Notify,
    ended_tx: watch::Sender<bool>,
}

impl DeliveryQueue {
    pub fn new(transport: Arc<dyn DeliveryTransport>) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            transport,
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            ended_tx,
        }
    }

    pub fn transport(&self) -> &Arc<dyn DeliveryTransport> {
        &self.transport
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a task and wakes the worker. Never blocks and never rejects.
    pub fn enqueue(&self, request: DeliveryRequest) -> u64 {
        let kind = request.kind();
        let (id, ended) = {
            let mut state = self.lock_state();
            let ended = state.ended;
            (Self::push_locked(&mut state, request, None), ended)
        };
        if ended {
            tracing::warn!(
                task_id = id,
                kind = kind.as_str(),
                "task enqueued after the delivery queue ended; it will only be sent by an explicit tick"
            );
        } else {
            tracing::debug!(task_id = id, kind = kind.as_str(), "slack request enqueued");
        }
        self.wakeup.notify_one();
        id
    }

    fn push_locked(
        state: &mut QueueState,
        request: DeliveryRequest,
        responder: Option<oneshot::Sender<DeliveryResult>>,
    ) -> u64 {
        state.next_id = state.next_id.saturating_add(1);
        let id = state.next_id;
        state.tasks.push_back(DeliveryTask {
            id,
            request,
            responder,
        });
        id
    }

    /// Enqueues a request and waits for its own outcome. Fails with
    /// [`DeliveryError::QueueEnded`] once the queue has ended, since no
    /// worker would pick the task up.
    pub async fn request(&self, request: DeliveryRequest) -> DeliveryResult {
        let kind = request.kind();
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.lock_state();
            if state.ended {
                return Err(DeliveryError::QueueEnded);
            }
            Self::push_locked(&mut state, request, Some(tx))
        };
        tracing::debug!(task_id = id, kind = kind.as_str(), "slack request enqueued");
        self.wakeup.notify_one();
        rx.await.unwrap_or(Err(DeliveryError::Dropped))
    }

    /// Signals that no further tasks will be produced.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            state.stop_requested = true;
            self.finish_if_drained(&mut state);
        }
        self.wakeup.notify_one();
    }

    fn finish_if_drained(&self, state: &mut QueueState) {
        if state.ended || !state.stop_requested || !state.is_synchronised() {
            return;
        }
        state.ended = true;
        self.ended_tx.send_replace(true);
        tracing::debug!(
            delivered = state.stats.delivered,
            failed = state.stats.failed,
            "delivery queue ended"
        );
    }

    pub fn is_synchronised(&self) -> bool {
        self.lock_state().is_synchronised()
    }

    pub fn is_ended(&self) -> bool {
        self.lock_state().ended
    }

    pub fn pending_len(&self) -> usize {
        self.lock_state().tasks.len()
    }

    pub fn thread_anchor(&self) -> ThreadAnchor {
        self.lock_state().anchor.clone()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.lock_state().stats
    }

    pub async fn wait_until_ended(&self) {
        let mut ended_rx = self.ended_tx.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = ended_rx.wait_for(|ended| *ended).await;
    }

    /// Drains the queue unless it is empty or a drain is already running.
    pub async fn tick(&self) -> TickOutcome {
        {
            let mut state = self.lock_state();
            if state.tasks.is_empty() {
                self.finish_if_drained(&mut state);
                return if state.ended {
                    TickOutcome::Ended
                } else {
                    TickOutcome::Idle
                };
            }
            if state.draining || state.in_flight > 0 {
                return TickOutcome::Busy;
            }
            state.draining = true;
        }
        tracing::debug!("start synchronisation");

        let mut guard = DrainGuard {
            queue: self,
            in_flight: false,
        };
        let mut attempted = 0_usize;
        loop {
            let (task, thread_ts) = {
                let mut state = self.lock_state();
                let Some(task) = state.tasks.pop_front() else {
                    break;
                };
                state.in_flight = state.in_flight.saturating_add(1);
                let thread_ts = state.thread_for(&task.request);
                (task, thread_ts)
            };
            guard.in_flight = true;

            let outcome = self.deliver_one(&task, thread_ts.as_deref()).await;

            {
                let mut state = self.lock_state();
                state.in_flight = state.in_flight.saturating_sub(1);
                match &outcome {
                    Ok(receipt) => {
                        state.stats.delivered = state.stats.delivered.saturating_add(1);
                        if let Some(ts) = receipt.posted_ts() {
                            state.record_posted(&task.request, ts);
                        }
                    }
                    Err(_) => state.stats.failed = state.stats.failed.saturating_add(1),
                }
            }
            guard.in_flight = false;
            attempted = attempted.saturating_add(1);

            if let Some(responder) = task.responder {
                let _ = responder.send(outcome);
            }
        }
        drop(guard);
        tracing::debug!(attempted, "end synchronisation");
        TickOutcome::Drained { attempted }
    }

    async fn deliver_one(&self, task: &DeliveryTask, thread_ts: Option<&str>) -> DeliveryResult {
        let kind = task.kind();
        if !self.transport.supports(kind) {
            tracing::warn!(
                task_id = task.id,
                kind = kind.as_str(),
                transport = self.transport.name(),
                "dropping slack request the transport does not support"
            );
            return Err(DeliveryError::Unsupported {
                transport: self.transport.name(),
                kind: kind.as_str(),
            });
        }
        tracing::debug!(
            task_id = task.id,
            kind = kind.as_str(),
            thread_ts = thread_ts.unwrap_or_default(),
            "sending slack request"
        );
        self.transport
            .deliver(&task.request, thread_ts)
            .await
            .map_err(|error| {
                tracing::warn!(
                    task_id = task.id,
                    kind = kind.as_str(),
                    error = %format!("{error:#}"),
                    "slack delivery failed"
                );
                DeliveryError::Transport(format!("{error:#}"))
            })
    }

    /// Starts the background worker. It holds only a weak reference and
    /// exits once the queue ends or is dropped.
    pub fn spawn_worker(self: &Arc<Self>, interval: Duration) -> Result<DeliveryWorkerHandle> {
        let handle = tokio::runtime::Handle::try_current()
            .context("slack delivery worker requires an active Tokio runtime")?;
        let queue = Arc::downgrade(self);
        let task = handle.spawn(run_delivery_worker(queue, interval));
        Ok(DeliveryWorkerHandle { task })
    }
}

/// Resets the drain flags if a drain is cancelled mid-flight.
struct DrainGuard<'a> {
    queue: &'a DeliveryQueue,
    in_flight: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.lock_state();
        if self.in_flight {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        state.draining = false;
        self.queue.finish_if_drained(&mut state);
    }
}

async fn run_delivery_worker(queue: Weak<DeliveryQueue>, period: Duration) {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        let Some(queue) = queue.upgrade() else {
            break;
        };
        if queue.is_ended() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {}
            _ = queue.wakeup.notified() => {}
        }
        if queue.tick().await == TickOutcome::Ended {
            break;
        }
    }
    tracing::debug!("slack delivery worker stopped");
}

pub struct DeliveryWorkerHandle {
    task: JoinHandle<()>,
}

impl DeliveryWorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) -> Result<()> {
        self.task.await.context("slack delivery worker panicked")
    }
}
