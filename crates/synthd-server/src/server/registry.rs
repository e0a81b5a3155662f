//! The job registry: external job-id ↔ internal request-id ↔ cancellation
//! handle.
//!
//! The registry exclusively owns job entries; handlers hold only a
//! request-id token and a clone of the job's cancellation handle. Every
//! entry referenced from the external-id index exists in the request-id map.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// One active job as reported by `/requests`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub request_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,
    pub count: u64,
    pub started_at: DateTime<Utc>,
    /// Milliseconds since the job was registered.
    pub elapsed: u64,
}

struct JobEntry {
    external_job_id: Option<String>,
    count: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_request_id: u64,
    jobs: HashMap<u64, JobEntry>,
    by_external: HashMap<String, u64>,
}

/// Process-wide registry of active jobs.
///
/// Constructed once at startup and injected into the HTTP layer. All state
/// lives behind one internal mutex; callers never hold references to
/// interior values.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job and returns its request id plus the job's
    /// cancellation handle. Request ids are strictly increasing for the
    /// process lifetime; concurrent registrations never collide.
    ///
    /// When an external id is reused, the index points at the most recent
    /// registration; superseded jobs stay cancellable by request id.
    pub fn register(
        &self,
        external_job_id: Option<String>,
        count: u64,
    ) -> (u64, CancellationToken) {
        let cancel = CancellationToken::new();
        let mut inner = self.inner.lock();
        inner.next_request_id += 1;
        let request_id = inner.next_request_id;

        if let Some(external) = &external_job_id {
            inner.by_external.insert(external.clone(), request_id);
        }
        inner.jobs.insert(
            request_id,
            JobEntry {
                external_job_id,
                count,
                started: Instant::now(),
                started_at: Utc::now(),
                cancel: cancel.clone(),
            },
        );
        (request_id, cancel)
    }

    /// Removes a job without touching its cancellation handle. Idempotent.
    pub fn unregister(&self, request_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.jobs.remove(&request_id) {
            if let Some(external) = entry.external_job_id {
                // Only drop the index entry if it still points at this job;
                // a reused external id may have been rebound since.
                if inner.by_external.get(&external) == Some(&request_id) {
                    inner.by_external.remove(&external);
                }
            }
        }
    }

    /// Signals and removes the job with the given request id.
    pub fn cancel_by_request_id(&self, request_id: u64) -> bool {
        let entry = {
            let mut inner = self.inner.lock();
            inner.jobs.remove(&request_id).inspect(|entry| {
                if let Some(external) = &entry.external_job_id {
                    if inner.by_external.get(external) == Some(&request_id) {
                        inner.by_external.remove(external);
                    }
                }
            })
        };
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Signals and removes the job with the given external id. No-op
    /// (returning `false`) when the id is unknown.
    pub fn cancel_by_external_job_id(&self, external: &str) -> bool {
        let request_id = { self.inner.lock().by_external.get(external).copied() };
        match request_id {
            Some(request_id) => self.cancel_by_request_id(request_id),
            None => false,
        }
    }

    /// Signals every active job, empties the registry, and resets the
    /// request-id counter (the registry is guaranteed empty afterwards).
    /// Returns the number of jobs cancelled.
    pub fn cancel_all(&self) -> usize {
        let entries: Vec<JobEntry> = {
            let mut inner = self.inner.lock();
            inner.by_external.clear();
            let drained: Vec<JobEntry> = inner.jobs.drain().map(|(_, entry)| entry).collect();
            // A partial cancel must not reset the counter; this one emptied
            // the registry, so the reset is safe.
            inner.next_request_id = 0;
            drained
        };
        for entry in &entries {
            entry.cancel.cancel();
        }
        entries.len()
    }

    pub fn list(&self) -> Vec<JobInfo> {
        let inner = self.inner.lock();
        let mut jobs: Vec<JobInfo> = inner
            .jobs
            .iter()
            .map(|(request_id, entry)| JobInfo {
                request_id: *request_id,
                external_job_id: entry.external_job_id.clone(),
                count: entry.count,
                started_at: entry.started_at,
                elapsed: entry.started.elapsed().as_millis() as u64,
            })
            .collect();
        jobs.sort_unstable_by_key(|job| job.request_id);
        jobs
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_strictly_increasing() {
        let registry = JobRegistry::new();
        let (a, _) = registry.register(None, 1);
        let (b, _) = registry.register(Some("job".to_string()), 2);
        let (c, _) = registry.register(None, 3);
        assert!(a < b && b < c);
    }

    #[test]
    fn cancel_by_external_id_signals_and_removes() {
        let registry = JobRegistry::new();
        let (_, cancel) = registry.register(Some("stream-1".to_string()), 100);
        assert!(registry.cancel_by_external_job_id("stream-1"));
        assert!(cancel.is_cancelled());
        assert_eq!(registry.active_count(), 0);
        // Second cancel is a no-op.
        assert!(!registry.cancel_by_external_job_id("stream-1"));
    }

    #[test]
    fn unknown_external_id_is_a_no_op() {
        let registry = JobRegistry::new();
        registry.register(None, 1);
        assert!(!registry.cancel_by_external_job_id("missing"));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn cancel_all_resets_the_counter_only_when_emptying() {
        let registry = JobRegistry::new();
        let (first, _) = registry.register(None, 1);
        registry.register(None, 2);
        assert_eq!(registry.cancel_all(), 2);

        // Counter reset: the next id starts over.
        let (restarted, _) = registry.register(None, 3);
        assert_eq!(restarted, first);
    }

    #[test]
    fn partial_cancel_does_not_reset_the_counter() {
        let registry = JobRegistry::new();
        let (a, _) = registry.register(None, 1);
        registry.register(None, 2);
        assert!(registry.cancel_by_request_id(a));

        let (next, _) = registry.register(None, 3);
        assert!(next > a + 1);
    }

    #[test]
    fn external_index_never_dangles() {
        let registry = JobRegistry::new();
        let (first, _) = registry.register(Some("dup".to_string()), 1);
        let (second, _) = registry.register(Some("dup".to_string()), 2);

        // Unregistering the superseded job must not evict the rebound index.
        registry.unregister(first);
        assert!(registry.cancel_by_external_job_id("dup"));
        assert_eq!(registry.active_count(), 0);
        let _ = second;
    }

    #[test]
    fn list_reports_registered_jobs_in_id_order() {
        let registry = JobRegistry::new();
        registry.register(Some("a".to_string()), 10);
        registry.register(None, 20);
        let jobs = registry.list();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].request_id < jobs[1].request_id);
        assert_eq!(jobs[0].external_job_id.as_deref(), Some("a"));
        assert_eq!(jobs[1].count, 20);
    }
}
