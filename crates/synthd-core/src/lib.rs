#![doc = include_str!("../README.md")]

mod error;
pub mod faker;
mod generate;
pub mod schema;

pub use crate::error::{Error, Result};
pub use crate::generate::{FuzzTuning, fuzz_record, one, random_primitive, retain_declared};
pub use crate::schema::cache::{CacheStats, SchemaCache, SchemaCacheStats, TtlLruCache};
pub use crate::schema::prepare::{Mode, cache_key, canonical_string, prepare};
pub use crate::schema::validate::{validate_schema, well_formed};
