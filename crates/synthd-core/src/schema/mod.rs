//! Schema preparation, caching, and validation.
//!
//! A submitted schema passes through [`prepare`](prepare::prepare) before it
//! ever reaches the generator: nested `$id` identifiers are stripped and the
//! additional-property policy is fixed for the requested mode. Prepared
//! schemas and compiled validators are memoized in [`SchemaCache`]
//! (bounded LRU, soft TTL), keyed by the schema's canonical serialization.
//!
//! ## Structure
//!
//! - [`prepare`] - the deep transform and canonical key derivation.
//! - [`cache`] - the TTL'd LRU cache and the engine-facing [`SchemaCache`].
//! - [`validate`] - well-formedness checks and compiled-validator plumbing.
//!
//! [`SchemaCache`]: cache::SchemaCache

pub mod cache;
pub mod prepare;
pub mod validate;
