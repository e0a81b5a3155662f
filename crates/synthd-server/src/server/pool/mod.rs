//! Asynchronous worker pool for chunked record generation.
//!
//! ## Structure
//!
//! - [`manager`] - the [`WorkerPool`](manager::WorkerPool): submission,
//!   elastic sizing, observable state, and coordinated shutdown.
//! - [`worker`] - the executor loop that pulls tasks off the shared queue.

pub mod manager;
pub mod worker;

use std::sync::Arc;

use serde_json::Value;
use synthd_core::{Error, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One unit of pool work: generate `count` records from a prepared schema.
///
/// Tasks are stateless beyond their arguments. The `cancel` handle is shared
/// by every task belonging to the same job; workers observe it between
/// records. A task that completed with a cancellation error is never
/// resubmitted.
pub struct GenTask {
    pub schema: Arc<Value>,
    pub count: usize,
    pub fuzz: bool,
    pub cancel: CancellationToken,
    pub reply: oneshot::Sender<Result<Vec<Value>>>,
}

impl core::fmt::Debug for GenTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GenTask")
            .field("count", &self.count)
            .field("fuzz", &self.fuzz)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

pub(crate) fn channel_error(context: impl Into<String>) -> Error {
    Error::ChannelError {
        context: context.into(),
    }
}
