//! Optional distributed abort-signal store.
//!
//! Stop requests are authoritative in-process (the registry signals the
//! job's cancellation handle); the store exists so a replica that later
//! processes the same external job id starts pre-cancelled. Writes are best
//! effort: failures are logged and otherwise ignored, and reads fall back
//! to "not stopped" when the store is unreachable. Running jobs never poll
//! the store.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

pub struct AbortStore {
    conn: ConnectionManager,
    prefix: String,
}

impl AbortStore {
    /// Connects to the store. Called once at process start; the connection
    /// manager reconnects on its own for the process lifetime.
    pub async fn connect(url: &str, prefix: String) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("abort store connected");
        Ok(Self { conn, prefix })
    }

    /// `<prefix>stop:<jobId>`
    pub fn key(&self, external_job_id: &str) -> String {
        stop_key(&self.prefix, external_job_id)
    }

    /// Marks an external job id as stopped, with a TTL. Best effort.
    pub async fn set_stop(&self, external_job_id: &str, ttl_seconds: u64) {
        let key = self.key(external_job_id);
        let result: redis::RedisResult<()> =
            self.conn.clone().set_ex(&key, "1", ttl_seconds).await;
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "failed to persist stop mark");
        }
    }

    /// Whether an external job id carries a stop mark. Returns `false` when
    /// the store is unavailable.
    pub async fn is_stopped(&self, external_job_id: &str) -> bool {
        let key = self.key(external_job_id);
        match self.conn.clone().get::<_, Option<String>>(&key).await {
            Ok(mark) => mark.is_some(),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read stop mark");
                false
            }
        }
    }
}

fn stop_key(prefix: &str, external_job_id: &str) -> String {
    format!("{prefix}stop:{external_job_id}")
}

impl core::fmt::Debug for AbortStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AbortStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Key shaping is the only logic that runs without a live store.
    #[test]
    fn keys_are_namespaced() {
        assert_eq!(stop_key("synthd:", "job-42"), "synthd:stop:job-42");
        assert_eq!(stop_key("", "j"), "stop:j");
    }
}
