//! The [`WorkerPool`]: an elastic pool of executors draining a shared FIFO
//! queue of generation tasks.
//!
//! The pool keeps `min_workers` executors alive permanently and grows up to
//! `max_workers` while the queue is outrunning them; elastic executors
//! retire after sitting idle for the configured timeout. Each executor runs
//! at most one task at a time, so the pool never processes more than
//! `max_workers` tasks concurrently; excess tasks queue FIFO. Shutdown is
//! coordinated through a shared [`CancellationToken`].

use std::sync::Arc;
use std::time::Duration;

use portable_atomic::Ordering;
use serde::Serialize;
use serde_json::Value;
use synthd_core::{Error, Result};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::{GenTask, channel_error, worker::WorkerState, worker::worker_loop};

/// Observable pool state, consumed by `/pool-stats` and `/metrics`.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub alive_workers: usize,
    pub active_workers: usize,
    pub queued_tasks: usize,
    pub completed_tasks: u64,
    pub min_workers: usize,
    pub max_workers: usize,
}

/// A cooperative pool of asynchronous executors that process [`GenTask`]s.
///
/// Tasks are enqueued on a shared FIFO channel; idle workers race to pull
/// the next one. The pool is process-wide and singleton: constructed at
/// startup, injected into the HTTP layer, torn down on graceful shutdown.
pub struct WorkerPool {
    queue_tx: mpsc::UnboundedSender<GenTask>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<GenTask>>>,
    state: Arc<WorkerState>,
    min_workers: usize,
    max_workers: usize,
    idle_timeout: Duration,
    drain_timeout: Duration,
    shutdown_token: CancellationToken,
    next_worker_id: portable_atomic::AtomicUsize,
}

impl WorkerPool {
    /// Constructs the pool and spawns the `min_workers` core executors.
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        idle_timeout: Duration,
        drain_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let state = Arc::new(WorkerState::default());
        let shutdown_token = CancellationToken::new();

        let pool = Self {
            queue_tx,
            queue_rx,
            state,
            min_workers: min_workers.max(1),
            max_workers: max_workers.max(min_workers.max(1)),
            idle_timeout,
            drain_timeout,
            shutdown_token,
            next_worker_id: portable_atomic::AtomicUsize::new(0),
        };

        for _ in 0..pool.min_workers {
            pool.try_spawn_worker(None);
        }

        pool
    }

    /// Claims a live-executor slot below `max_workers` and spawns a worker
    /// into it. The claim is a single atomic update on `alive`, so two
    /// concurrent submitters can never push the pool past its bound; the
    /// loser simply leaves its task queued. Returns whether a worker was
    /// spawned.
    fn try_spawn_worker(&self, idle_timeout: Option<Duration>) -> bool {
        let claimed = self
            .state
            .alive
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |alive| {
                (alive < self.max_workers).then_some(alive + 1)
            });
        if claimed.is_err() {
            return false;
        }
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(worker_loop(
            worker_id,
            Arc::clone(&self.queue_rx),
            Arc::clone(&self.state),
            self.shutdown_token.clone(),
            idle_timeout,
        ));
        true
    }

    /// Enqueues a task and returns the receiver for its result.
    ///
    /// When the job's handle is already signaled, execution is skipped and
    /// the receiver resolves to a cancellation immediately. Submission order
    /// is FIFO; callers that need ordered aggregation await receivers in the
    /// order they submitted.
    pub fn submit(
        &self,
        schema: Arc<Value>,
        count: usize,
        fuzz: bool,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<Result<Vec<Value>>> {
        let (reply, receiver) = oneshot::channel();

        if self.shutdown_token.is_cancelled() {
            let _ = reply.send(Err(Error::ServiceShutdown));
            return receiver;
        }
        if cancel.is_cancelled() {
            let _ = reply.send(Err(Error::Cancelled));
            return receiver;
        }

        self.state.queued.fetch_add(1, Ordering::Relaxed);
        let task = GenTask {
            schema,
            count,
            fuzz,
            cancel,
            reply,
        };
        if self.queue_tx.send(task).is_err() {
            // The reply sender went down with the rejected task; the caller
            // observes a closed channel and maps it to a channel error.
            self.state.queued.fetch_sub(1, Ordering::Relaxed);
            return receiver;
        }

        self.maybe_grow();
        receiver
    }

    /// Submits a task and awaits its result.
    pub async fn run(
        &self,
        schema: Arc<Value>,
        count: usize,
        fuzz: bool,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>> {
        self.submit(schema, count, fuzz, cancel)
            .await
            .map_err(|_| channel_error("worker dropped the task reply"))?
    }

    /// Spawns an elastic worker when every live executor is busy and the
    /// queue is non-empty. The `max_workers` bound is enforced by the
    /// atomic slot claim in [`try_spawn_worker`](Self::try_spawn_worker).
    fn maybe_grow(&self) {
        let alive = self.state.alive.load(Ordering::Relaxed);
        let active = self.state.active.load(Ordering::Relaxed);
        let queued = self.state.queued.load(Ordering::Relaxed);
        if queued > 0 && active >= alive {
            self.try_spawn_worker(Some(self.idle_timeout));
        }
    }

    /// Number of live executors; the dispatcher sizes fan-outs from this.
    pub fn worker_count(&self) -> usize {
        self.state.alive.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            alive_workers: self.state.alive.load(Ordering::Relaxed),
            active_workers: self.state.active.load(Ordering::Relaxed),
            queued_tasks: self.state.queued.load(Ordering::Relaxed),
            completed_tasks: self.state.completed.load(Ordering::Relaxed),
            min_workers: self.min_workers,
            max_workers: self.max_workers,
        }
    }

    /// Gracefully shuts down the pool.
    ///
    /// - Waits (bounded) for queued and active work to drain.
    /// - Cancels the shared token so workers stop pulling new tasks.
    /// - Waits (bounded) for every worker to acknowledge by exiting.
    pub async fn shutdown(&self) {
        tracing::info!(
            active = self.state.active.load(Ordering::Relaxed),
            queued = self.state.queued.load(Ordering::Relaxed),
            "draining worker pool"
        );

        let drained = timeout(self.drain_timeout, async {
            while self.state.active.load(Ordering::Relaxed) > 0
                || self.state.queued.load(Ordering::Relaxed) > 0
            {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("worker pool drained"),
            Err(_) => tracing::warn!(
                active = self.state.active.load(Ordering::Relaxed),
                "graceful drain timed out"
            ),
        }

        self.shutdown_token.cancel();

        let stopped = timeout(Duration::from_secs(3), async {
            while self.state.alive.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        match stopped {
            Ok(()) => tracing::info!("worker pool shutdown complete"),
            Err(_) => tracing::warn!(
                alive = self.state.alive.load(Ordering::Relaxed),
                "worker shutdown timed out"
            ),
        }
    }
}
