//! Error types for the record generation engine.
//!
//! This module defines the central `Error` enum, which captures all
//! recoverable and reportable error cases within the generation system. The
//! HTTP layer maps these onto its response envelope; the engine itself only
//! ever signals through this type.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between tasks or
//!   workers.
//! - `InvalidSchema`: The submitted schema failed the well-formedness check
//!   or did not compile.
//! - `Generation`: Record production failed inside a generator or pool task.
//! - `Cancelled`: The job's cancellation handle was signaled mid-flight.
//! - `InvalidRequest`: The request was malformed or exceeded bounds.
//! - `ServiceShutdown`: A request arrived while the service was shutting
//!   down.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the record generation engine.
#[derive(Clone, thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The schema is not well-formed or failed to compile.
    #[error("Invalid schema: {reason}")]
    InvalidSchema { reason: String },

    /// Record production failed inside the generator or a pool task.
    #[error("Generation failed: {reason}")]
    Generation { reason: String },

    /// The job was cancelled via its cancellation handle.
    #[error("Job was cancelled")]
    Cancelled,

    /// The request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Whether this error is the cancellation signal. Pool tasks and the
    /// dispatcher use this to keep cancellations out of the failure path.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
