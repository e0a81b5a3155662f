//! The job dispatcher: inline-vs-pool decision, fan-out, and ordered
//! aggregation.
//!
//! Small buffered jobs run inline on the caller's executor; everything else
//! is split into chunks and fanned out over the worker pool. The fan-out
//! deliberately over-subscribes the pool (more chunks than executors) so the
//! queue stays non-empty while executors steal work.
//!
//! The dispatcher is also the sole writer of the engine counters: one
//! completion or one abort per job, never both, and nothing on failure.

use std::sync::Arc;
use std::time::Duration;

use rand::{SeedableRng, rngs::StdRng};
use serde_json::Value;
use synthd_core::{Error, Result};
use tokio_util::sync::CancellationToken;

use super::pool::manager::WorkerPool;
use super::telemetry::EngineCounters;

/// Buffered jobs below this count run inline on the caller's executor.
pub const INLINE_THRESHOLD: usize = 300;

/// Minimum records per fan-out chunk; `ceil(count / 25)` caps the number of
/// chunks for small jobs.
const MIN_CHUNK: usize = 25;

/// Over-subscription factor: the dispatcher submits up to five chunks per
/// live executor. More chunks than executors keeps the queue non-empty
/// under completion-time variance; tune with care, the factor trades queue
/// depth for aggregation latency.
const OVERSUBSCRIPTION: usize = 5;

/// How many records the inline path produces between cooperative yields.
const YIELD_STRIDE: usize = 128;

/// Splits `count` records into chunk sizes for fan-out over a pool with
/// `live_workers` executors. Chunk order is submission order; the last chunk
/// absorbs the remainder.
pub fn fan_out_plan(count: usize, live_workers: usize) -> Vec<usize> {
    let workers = (live_workers.max(1) * OVERSUBSCRIPTION)
        .min(count.div_ceil(MIN_CHUNK))
        .max(1);
    let chunk_size = count.div_ceil(workers);

    let mut plan = Vec::with_capacity(workers);
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(chunk_size);
        plan.push(chunk);
        remaining -= chunk;
    }
    plan
}

/// Decides where a job runs and aggregates its output.
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    counters: Arc<EngineCounters>,
}

impl Dispatcher {
    pub fn new(pool: Arc<WorkerPool>, counters: Arc<EngineCounters>) -> Self {
        Self { pool, counters }
    }

    /// Produces `count` records from a prepared schema, inline for small
    /// buffered jobs and fanned out across the pool otherwise. The returned
    /// order is the chunk submission order regardless of executor completion
    /// order.
    pub async fn run_batch(
        &self,
        schema: Arc<Value>,
        count: usize,
        fuzz: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        if count < INLINE_THRESHOLD {
            self.generate_inline(&schema, count, fuzz, cancel).await
        } else {
            self.fan_out(schema, count, fuzz, cancel).await
        }
    }

    async fn generate_inline(
        &self,
        schema: &Value,
        count: usize,
        fuzz: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let mut records = Vec::with_capacity(count);
        let mut rng = StdRng::from_rng(&mut rand::rng());
        for produced in 0..count {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            records.push(synthd_core::one(schema, fuzz, &mut rng));
            if produced % YIELD_STRIDE == YIELD_STRIDE - 1 {
                tokio::task::yield_now().await;
            }
        }
        Ok(records)
    }

    async fn fan_out(
        &self,
        schema: Arc<Value>,
        count: usize,
        fuzz: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let plan = fan_out_plan(count, self.pool.worker_count());
        tracing::debug!(count, chunks = plan.len(), "fanning out batch");

        // Submit everything up front, then await in submission order so the
        // concatenation preserves chunk order.
        let receivers: Vec<_> = plan
            .iter()
            .map(|&chunk| {
                self.pool
                    .submit(Arc::clone(&schema), chunk, fuzz, cancel.clone())
            })
            .collect();

        let mut records = Vec::with_capacity(count);
        let mut failure: Option<Error> = None;
        for receiver in receivers {
            let chunk = receiver.await.map_err(|_| Error::ChannelError {
                context: "worker dropped the task reply".to_string(),
            });
            match chunk {
                Ok(Ok(chunk)) => {
                    if failure.is_none() {
                        records.extend(chunk);
                    }
                }
                Ok(Err(e)) | Err(e) => {
                    // Keep draining remaining receivers so late chunks don't
                    // outlive the job, but surface the first error.
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(records),
        }
    }

    /// Records a successful job: delivered count, elapsed duration, one
    /// completion.
    pub fn job_completed(&self, delivered: u64, elapsed: Duration) {
        self.counters.record_completed(delivered, elapsed);
    }

    /// Records one aborted job.
    pub fn job_aborted(&self) {
        self.counters.record_aborted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn harness() -> (Arc<WorkerPool>, Arc<EngineCounters>, Dispatcher) {
        let pool = Arc::new(WorkerPool::new(
            2,
            4,
            Duration::from_millis(200),
            Duration::from_secs(1),
        ));
        let counters = Arc::new(EngineCounters::default());
        let dispatcher = Dispatcher::new(Arc::clone(&pool), Arc::clone(&counters));
        (pool, counters, dispatcher)
    }

    fn schema() -> Arc<Value> {
        Arc::new(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "n": { "type": "integer", "minimum": 0, "maximum": 9 } }
        }))
    }

    #[test]
    fn plan_covers_the_count_exactly() {
        for (count, workers) in [(300, 4), (1000, 1), (25_000, 8), (301, 3)] {
            let plan = fan_out_plan(count, workers);
            assert_eq!(plan.iter().sum::<usize>(), count);
            assert!(!plan.is_empty());
        }
    }

    #[test]
    fn plan_over_subscribes_but_respects_the_chunk_floor() {
        // 4 live workers → up to 20 chunks, but 300 records cap at 12.
        let plan = fan_out_plan(300, 4);
        assert_eq!(plan.len(), 12);

        // Large counts hit the 5×T ceiling.
        let plan = fan_out_plan(100_000, 4);
        assert_eq!(plan.len(), 20);
    }

    #[test]
    fn last_chunk_absorbs_the_remainder() {
        let plan = fan_out_plan(1001, 8);
        let full = plan[0];
        assert!(plan[..plan.len() - 1].iter().all(|&c| c == full));
        assert!(plan[plan.len() - 1] <= full);
    }

    #[tokio::test]
    async fn small_jobs_run_inline() {
        let (pool, _, dispatcher) = harness();
        let records = dispatcher
            .run_batch(schema(), 50, false, &CancellationToken::new())
            .await
            .expect("inline batch");
        assert_eq!(records.len(), 50);
        // Nothing reached the pool.
        assert_eq!(pool.stats().completed_tasks, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn large_jobs_fan_out_and_concatenate_fully() {
        let (pool, _, dispatcher) = harness();
        let records = dispatcher
            .run_batch(schema(), 5_000, false, &CancellationToken::new())
            .await
            .expect("fanned batch");
        assert_eq!(records.len(), 5_000);
        assert!(pool.stats().completed_tasks > 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_unwinds_a_fanned_job() {
        let (pool, _, dispatcher) = harness();
        let cancel = CancellationToken::new();
        let schema = schema();
        let task = {
            let cancel = cancel.clone();
            async move { dispatcher.run_batch(schema, 2_000_000, false, &cancel).await }
        };
        let handle = tokio::spawn(task);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = handle
            .await
            .expect("task joins")
            .expect_err("batch cancelled");
        assert!(err.is_cancelled());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn counters_see_exactly_one_outcome_per_job() {
        let (pool, counters, dispatcher) = harness();
        let records = dispatcher
            .run_batch(schema(), 400, false, &CancellationToken::new())
            .await
            .expect("batch");
        dispatcher.job_completed(records.len() as u64, Duration::from_millis(5));
        dispatcher.job_aborted();

        let snap = counters.snapshot();
        assert_eq!(snap.completed_jobs, 1);
        assert_eq!(snap.aborted_jobs, 1);
        assert_eq!(snap.total_generated, 400);
        pool.shutdown().await;
    }
}
