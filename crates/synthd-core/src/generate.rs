//! Single-record generation: strict closure and fuzz mutations.
//!
//! [`one`] is the engine's per-record entry point. Strict mode drives the
//! faker and then drops every property the schema does not declare, at every
//! object node (the prepared schema already closed objects with
//! `additionalProperties: false`; the post-pass guards against faker
//! overreach). Fuzz mode skips the post-pass entirely and instead applies
//! randomized mutations after baseline generation.

use rand::Rng;
use serde_json::{Number, Value};

use crate::faker::{self, lorem};

/// Mutation probabilities for fuzz mode.
///
/// The defaults are load-bearing for downstream fuzz tests and must not
/// drift: 0.5 value-mutation, 0.4 key-deletion (rolled only when the value
/// survived unmutated), 0.7 fresh-property append. Callers may supply their
/// own tuning explicitly; the HTTP surface never does.
#[derive(Clone, Copy, Debug)]
pub struct FuzzTuning {
    pub mutate: f64,
    pub delete: f64,
    pub append: f64,
}

impl Default for FuzzTuning {
    fn default() -> Self {
        Self {
            mutate: 0.5,
            delete: 0.4,
            append: 0.7,
        }
    }
}

const PRIMITIVE_MAGNITUDE: i64 = 100_000_000;
const MAX_APPENDED_PROPERTIES: usize = 5;

/// Produces one record from a prepared schema. The schema is never mutated.
pub fn one<R: Rng + ?Sized>(prepared: &Value, fuzz: bool, rng: &mut R) -> Value {
    let mut record = faker::fake(prepared, rng);
    if fuzz {
        fuzz_record(&mut record, FuzzTuning::default(), rng);
    } else {
        retain_declared(&mut record, prepared);
    }
    record
}

/// Recursively drops every property the schema does not declare.
///
/// Applies at object nodes that carry a `properties` map; arrays descend
/// into their item schemas. Union-typed nodes (e.g. `["object","null"]`)
/// take the object branch only when the actual value is a non-null object,
/// which the value match already guarantees.
pub fn retain_declared(value: &mut Value, schema: &Value) {
    match value {
        Value::Object(record) => {
            let Some(Value::Object(props)) = schema.get("properties") else {
                return;
            };
            record.retain(|key, _| props.contains_key(key));
            for (key, child) in record.iter_mut() {
                if let Some(sub) = props.get(key) {
                    retain_declared(child, sub);
                }
            }
        }
        Value::Array(items) => match schema.get("items") {
            Some(Value::Array(subs)) => {
                for (item, sub) in items.iter_mut().zip(subs) {
                    retain_declared(item, sub);
                }
            }
            Some(sub @ Value::Object(_)) => {
                for item in items {
                    retain_declared(item, sub);
                }
            }
            _ => {}
        },
        _ => {}
    }
}

/// Applies the fuzz mutation pass to a freshly generated record:
///
/// - each existing key has its value replaced by a random primitive with
///   probability `mutate`, or is deleted with probability `delete` otherwise;
/// - with probability `append`, up to [`MAX_APPENDED_PROPERTIES`] fresh
///   properties (lorem-word + index names) are added.
pub fn fuzz_record<R: Rng + ?Sized>(record: &mut Value, tuning: FuzzTuning, rng: &mut R) {
    let Value::Object(map) = record else {
        return;
    };

    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        if rng.random_bool(tuning.mutate) {
            map.insert(key, random_primitive(rng));
        } else if rng.random_bool(tuning.delete) {
            map.remove(&key);
        }
    }

    if rng.random_bool(tuning.append) {
        let extra = rng.random_range(0..=MAX_APPENDED_PROPERTIES);
        for i in 0..extra {
            map.insert(format!("{}_{i}", lorem::word(rng)), random_primitive(rng));
        }
    }
}

/// Draws a random primitive from the fuzz distribution:
/// int 0.30, boolean 0.20, lorem words 0.20, float 0.15, null 0.15.
pub fn random_primitive<R: Rng + ?Sized>(rng: &mut R) -> Value {
    let roll: f64 = rng.random();
    if roll < 0.30 {
        Value::Number(Number::from(
            rng.random_range(-PRIMITIVE_MAGNITUDE..=PRIMITIVE_MAGNITUDE),
        ))
    } else if roll < 0.50 {
        Value::Bool(rng.random_bool(0.5))
    } else if roll < 0.70 {
        Value::String({
            let word_count = rng.random_range(1..=3);
            lorem::words(rng, word_count)
        })
    } else if roll < 0.85 {
        let magnitude = PRIMITIVE_MAGNITUDE as f64;
        Number::from_f64(rng.random_range(-magnitude..magnitude))
            .map_or(Value::Null, Value::Number)
    } else {
        Value::Null
    }
}
