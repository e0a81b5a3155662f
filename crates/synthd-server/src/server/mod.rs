//! Service internals: the job execution engine and its HTTP surface.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`pool`] - the elastic worker pool executing generation tasks.
//! - [`registry`] - job-id bookkeeping and the cancellation fabric.
//! - [`dispatch`] - inline-vs-pool decisions, fan-out, counters.
//! - [`streaming`] - the NDJSON chunk writer.
//! - [`abort`] - the optional distributed stop-mark store.
//! - [`http`] - router, handlers, and the per-job lifecycle guard.
//! - [`auth`] - API-key and IP-whitelist middleware.
//! - [`error`] - the HTTP error envelope.
//! - [`telemetry`] - logging init and process counters.

pub mod abort;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod pool;
pub mod registry;
pub mod streaming;
pub mod telemetry;
