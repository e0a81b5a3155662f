//! The NDJSON streaming writer.
//!
//! Streams are driven one chunk at a time: exactly one pool task per chunk,
//! awaited before that chunk is emitted. This bounds memory to a single
//! chunk's worth of records; pre-generating chunks in parallel would trade
//! that bound away for throughput the pool already provides.
//!
//! Once a chunk has been flushed it is never retracted: aborts and
//! generation failures terminate the stream with a trailing error record,
//! not a status change.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::pool::manager::WorkerPool;

/// Chunk-size clamp for single-schema streams.
pub const SINGLE_CHUNK_BOUNDS: (usize, usize) = (500, 5000);

/// Chunk-size clamp applied per schema on multi-schema streams.
pub const MULTI_CHUNK_BOUNDS: (usize, usize) = (50, 1000);

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

pub fn clamp_chunk_size(requested: Option<usize>, bounds: (usize, usize)) -> usize {
    requested
        .unwrap_or(DEFAULT_CHUNK_SIZE)
        .clamp(bounds.0, bounds.1)
}

/// One schema within a stream job.
pub struct StreamSchema {
    pub schema: Arc<Value>,
    pub collection: Option<String>,
    pub count: usize,
}

/// A stream job: schemas iterated sequentially, never in parallel.
pub struct StreamJob {
    pub schemas: Vec<StreamSchema>,
    pub fuzz: bool,
    pub chunk_size: usize,
    pub cancel: CancellationToken,
    /// Multi-schema streams emit a `collectionComplete` record after each
    /// schema; single-schema streams do not.
    pub multi: bool,
}

/// How a stream ended; the caller settles counters and the registry from
/// this.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed { records: u64, elapsed: Duration },
    Aborted,
    Failed,
}

/// Drives a stream job, emitting newline-delimited JSON records into `tx`.
///
/// A send failure means the client went away; the job's handle is signaled
/// so outstanding pool work unwinds, and the stream counts as aborted.
pub async fn run_stream(
    pool: &WorkerPool,
    job: StreamJob,
    tx: &mpsc::Sender<Bytes>,
) -> StreamOutcome {
    let start = Instant::now();
    let mut total_sent: u64 = 0;
    let mut chunks_streamed: u64 = 0;
    let mut chunk_duration_ms: u64 = 0;

    for (index, entry) in job.schemas.iter().enumerate() {
        let mut completed = 0usize;
        let mut chunk_index = 0u64;

        while completed < entry.count {
            if job.cancel.is_cancelled() {
                let _ = send_line(tx, &aborted_record(total_sent)).await;
                return StreamOutcome::Aborted;
            }

            let size = (entry.count - completed).min(job.chunk_size);
            let chunk_start = Instant::now();
            match pool
                .run(
                    Arc::clone(&entry.schema),
                    size,
                    job.fuzz,
                    job.cancel.clone(),
                )
                .await
            {
                Ok(records) => {
                    let duration = chunk_start.elapsed().as_millis() as u64;
                    completed += records.len();
                    total_sent += records.len() as u64;
                    chunks_streamed += 1;
                    chunk_duration_ms += duration;

                    let line = json!({
                        "chunk": chunk_index,
                        "data": records,
                        "progress": {
                            "completed": completed,
                            "total": entry.count,
                            "percentage": completed * 100 / entry.count,
                        },
                        "chunkStats": { "size": size, "duration": duration },
                    });
                    chunk_index += 1;

                    if send_line(tx, &line).await.is_err() {
                        tracing::debug!("client went away mid-stream");
                        job.cancel.cancel();
                        return StreamOutcome::Aborted;
                    }
                }
                Err(e) if e.is_cancelled() => {
                    let _ = send_line(tx, &aborted_record(total_sent)).await;
                    return StreamOutcome::Aborted;
                }
                Err(e) => {
                    let line = json!({
                        "error": "generation_failed",
                        "message": e.to_string(),
                        "completed": total_sent,
                    });
                    let _ = send_line(tx, &line).await;
                    return StreamOutcome::Failed;
                }
            }
        }

        if job.multi {
            let collection = entry
                .collection
                .clone()
                .unwrap_or_else(|| format!("schema_{index}"));
            let line = json!({
                "collectionComplete": true,
                "collection": collection,
                "recordsSent": completed,
            });
            if send_line(tx, &line).await.is_err() {
                job.cancel.cancel();
                return StreamOutcome::Aborted;
            }
        }
    }

    let elapsed = start.elapsed();
    let duration_ms = elapsed.as_millis() as u64;
    let seconds = elapsed.as_secs_f64().max(0.001);
    let avg_chunk_duration = chunk_duration_ms.checked_div(chunks_streamed).unwrap_or(0);
    let done = json!({
        "done": true,
        "stats": {
            "totalRecords": total_sent,
            "chunksStreamed": chunks_streamed,
            "duration": duration_ms,
            "recordsPerSecond": (total_sent as f64 / seconds).round(),
            "avgChunkDuration": avg_chunk_duration,
        },
    });
    let _ = send_line(tx, &done).await;

    StreamOutcome::Completed {
        records: total_sent,
        elapsed,
    }
}

fn aborted_record(completed: u64) -> Value {
    json!({
        "error": "aborted",
        "message": "Job stopped by user",
        "completed": completed,
    })
}

async fn send_line(tx: &mpsc::Sender<Bytes>, line: &Value) -> Result<(), ()> {
    let mut buf = serde_json::to_vec(line).map_err(|_| ())?;
    buf.push(b'\n');
    tx.send(Bytes::from(buf)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool() -> WorkerPool {
        WorkerPool::new(2, 4, Duration::from_millis(200), Duration::from_secs(1))
    }

    fn schema() -> Arc<Value> {
        Arc::new(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "n": { "type": "integer", "minimum": 0, "maximum": 9 } }
        }))
    }

    async fn collect_lines(mut rx: mpsc::Receiver<Bytes>) -> Vec<Value> {
        let mut lines = Vec::new();
        while let Some(chunk) = rx.recv().await {
            for line in chunk.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
                lines.push(serde_json::from_slice(line).expect("valid NDJSON line"));
            }
        }
        lines
    }

    #[tokio::test]
    async fn emits_ceil_count_over_chunk_size_data_records_plus_done() {
        let pool = pool();
        let (tx, rx) = mpsc::channel(64);
        let job = StreamJob {
            schemas: vec![StreamSchema {
                schema: schema(),
                collection: None,
                count: 1200,
            }],
            fuzz: false,
            chunk_size: 500,
            cancel: CancellationToken::new(),
            multi: false,
        };

        let outcome = run_stream(&pool, job, &tx).await;
        drop(tx);
        assert!(matches!(
            outcome,
            StreamOutcome::Completed { records: 1200, .. }
        ));

        let lines = collect_lines(rx).await;
        assert_eq!(lines.len(), 4);
        for (i, line) in lines[..3].iter().enumerate() {
            assert_eq!(line["chunk"], i as u64);
            assert_eq!(line["progress"]["total"], 1200);
        }
        assert_eq!(lines[2]["chunkStats"]["size"], 200);
        assert_eq!(lines[2]["progress"]["percentage"], 100);
        assert_eq!(lines[3]["done"], true);
        assert_eq!(lines[3]["stats"]["totalRecords"], 1200);
        assert_eq!(lines[3]["stats"]["chunksStreamed"], 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pre_cancelled_job_yields_only_the_aborted_record() {
        let pool = pool();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = StreamJob {
            schemas: vec![StreamSchema {
                schema: schema(),
                collection: None,
                count: 10_000,
            }],
            fuzz: false,
            chunk_size: 500,
            cancel,
            multi: false,
        };

        let outcome = run_stream(&pool, job, &tx).await;
        drop(tx);
        assert!(matches!(outcome, StreamOutcome::Aborted));

        let lines = collect_lines(rx).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["error"], "aborted");
        assert_eq!(lines[0]["message"], "Job stopped by user");
        assert_eq!(lines[0]["completed"], 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn mid_stream_cancellation_ends_with_partial_completed_count() {
        let pool = pool();
        let (tx, mut rx) = mpsc::channel::<Bytes>(1);
        let cancel = CancellationToken::new();
        let job = StreamJob {
            schemas: vec![StreamSchema {
                schema: schema(),
                collection: None,
                count: 1_000_000,
            }],
            fuzz: false,
            chunk_size: 500,
            cancel: cancel.clone(),
            multi: false,
        };

        let writer = {
            let pool_stats_before = pool.stats().completed_tasks;
            assert_eq!(pool_stats_before, 0);
            tokio::spawn(async move { run_stream(&pool, job, &tx).await })
        };

        // Read one chunk off the stream, then stop the job.
        let first = rx.recv().await.expect("first chunk");
        assert!(!first.is_empty());
        cancel.cancel();

        let mut lines = Vec::new();
        while let Some(chunk) = rx.recv().await {
            for line in chunk.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
                lines.push(serde_json::from_slice::<Value>(line).expect("line"));
            }
        }
        let outcome = writer.await.expect("writer joins");
        assert!(matches!(outcome, StreamOutcome::Aborted));

        let last = lines.last().expect("terminal record");
        assert_eq!(last["error"], "aborted");
        let completed = last["completed"].as_u64().expect("completed");
        assert!(completed < 1_000_000);
    }

    #[tokio::test]
    async fn multi_schema_streams_emit_collection_markers_sequentially() {
        let pool = pool();
        let (tx, rx) = mpsc::channel(64);
        let job = StreamJob {
            schemas: vec![
                StreamSchema {
                    schema: schema(),
                    collection: Some("users".to_string()),
                    count: 120,
                },
                StreamSchema {
                    schema: schema(),
                    collection: None,
                    count: 60,
                },
            ],
            fuzz: false,
            chunk_size: 100,
            cancel: CancellationToken::new(),
            multi: true,
        };

        let outcome = run_stream(&pool, job, &tx).await;
        drop(tx);
        assert!(matches!(
            outcome,
            StreamOutcome::Completed { records: 180, .. }
        ));

        let lines = collect_lines(rx).await;
        // users: 2 chunks + marker; schema_1: 1 chunk + marker; done.
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2]["collectionComplete"], true);
        assert_eq!(lines[2]["collection"], "users");
        assert_eq!(lines[2]["recordsSent"], 120);
        assert_eq!(lines[4]["collection"], "schema_1");
        assert_eq!(lines[4]["recordsSent"], 60);
        assert_eq!(lines[5]["done"], true);
        pool.shutdown().await;
    }
}
