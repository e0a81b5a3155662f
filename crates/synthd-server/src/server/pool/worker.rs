use std::sync::Arc;
use std::time::Duration;

use portable_atomic::{AtomicU64, AtomicUsize, Ordering};
use rand::{SeedableRng, rngs::StdRng};
use serde_json::Value;
use synthd_core::{Error, Result};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::GenTask;

/// How many records a worker produces between cooperative yields.
const YIELD_STRIDE: usize = 128;

/// Shared observable state, owned by the pool and updated by every worker.
#[derive(Debug, Default)]
pub struct WorkerState {
    pub alive: AtomicUsize,
    pub active: AtomicUsize,
    pub queued: AtomicUsize,
    pub completed: AtomicU64,
}

/// Worker task responsible for processing [`GenTask`]s.
///
/// Each worker pulls from the shared FIFO queue and executes at most one
/// task at a time. Core workers (`idle_timeout: None`) live until the
/// shutdown token fires; elastic workers retire after sitting idle for the
/// given timeout.
///
/// This function is designed to be spawned as a Tokio task and runs in a
/// loop until explicitly shut down or timed out.
pub async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<GenTask>>>,
    state: Arc<WorkerState>,
    shutdown: CancellationToken,
    idle_timeout: Option<Duration>,
) {
    tracing::trace!(worker_id, "worker started");

    loop {
        let task = match idle_timeout {
            None => tokio::select! {
                () = shutdown.cancelled() => break,
                task = next_task(&queue) => task,
            },
            Some(idle) => tokio::select! {
                () = shutdown.cancelled() => break,
                task = timeout(idle, next_task(&queue)) => match task {
                    Ok(task) => task,
                    Err(_) => {
                        tracing::trace!(worker_id, "idle timeout, retiring");
                        break;
                    }
                },
            },
        };

        let Some(task) = task else {
            // Queue sender dropped: the pool is gone.
            break;
        };

        state.queued.fetch_sub(1, Ordering::Relaxed);
        state.active.fetch_add(1, Ordering::Relaxed);
        let result = run_task(&task).await;
        state.active.fetch_sub(1, Ordering::Relaxed);
        // Cancelled and failed tasks stay out of the completed count.
        if result.is_ok() {
            state.completed.fetch_add(1, Ordering::Relaxed);
        }

        // A dropped receiver means the job's handler is gone; nothing to do.
        let _ = task.reply.send(result);
    }

    state.alive.fetch_sub(1, Ordering::Relaxed);
    tracing::trace!(worker_id, "worker stopped");
}

/// Receives the next task. The queue mutex is held only while waiting, so
/// exactly one idle worker camps on the channel at a time and the rest queue
/// fairly behind it.
async fn next_task(queue: &Mutex<mpsc::UnboundedReceiver<GenTask>>) -> Option<GenTask> {
    queue.lock().await.recv().await
}

/// Executes one generation task.
///
/// Cancellation is observed at record boundaries: the task unwinds with
/// [`Error::Cancelled`] before producing the next record, never mid-record.
/// Periodic yields keep long chunks cooperative with the runtime.
async fn run_task(task: &GenTask) -> Result<Vec<Value>> {
    let mut records = Vec::with_capacity(task.count);
    // StdRng keeps this future Send; the thread-local handle is not.
    let mut rng = StdRng::from_rng(&mut rand::rng());

    for produced in 0..task.count {
        if task.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        records.push(synthd_core::one(&task.schema, task.fuzz, &mut rng));
        if produced % YIELD_STRIDE == YIELD_STRIDE - 1 {
            tokio::task::yield_now().await;
        }
    }

    Ok(records)
}
