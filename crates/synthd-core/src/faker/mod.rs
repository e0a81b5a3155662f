//! The `fake(schema) → record` primitive.
//!
//! One function, [`fake`], turns a prepared schema node into a single JSON
//! value. The rest of the engine treats this module as a pluggable seam:
//! the generator calls [`fake`] once per record and applies its own
//! post-processing (declared-property closure or fuzz mutations) on top.
//!
//! Coverage is deliberately practical rather than exhaustive: `const`,
//! `enum`, type unions, the common string `format`s, numeric bounds
//! (inclusive and exclusive), string length bounds, and array item counts.
//! Every declared property is generated, including optional ones; `required`
//! adds nothing beyond what the schema already declares.

pub mod lorem;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde_json::{Map, Number, Value};
use uuid::Uuid;

const DEFAULT_INT_MIN: i64 = 0;
const DEFAULT_INT_MAX: i64 = 1000;
const DEFAULT_NUMBER_MIN: f64 = 0.0;
const DEFAULT_NUMBER_MAX: f64 = 1000.0;
const DEFAULT_MIN_ITEMS: usize = 1;
const DEFAULT_MAX_ITEMS: usize = 3;

/// Produces one value conforming to `schema`. The schema is never mutated.
pub fn fake<R: Rng + ?Sized>(schema: &Value, rng: &mut R) -> Value {
    let Some(node) = schema.as_object() else {
        return Value::Null;
    };

    if let Some(fixed) = node.get("const") {
        return fixed.clone();
    }
    if let Some(options) = node.get("enum").and_then(Value::as_array) {
        if options.is_empty() {
            return Value::Null;
        }
        return options[rng.random_range(0..options.len())].clone();
    }

    match pick_type(node, rng) {
        "object" => fake_object(node, rng),
        "array" => fake_array(node, rng),
        "string" => Value::String(fake_string(node, rng)),
        "integer" => fake_integer(node, rng),
        "number" => fake_number(node, rng),
        "boolean" => Value::Bool(rng.random_bool(0.5)),
        _ => Value::Null,
    }
}

/// Resolves the effective type of a schema node. Unions pick a branch at
/// random; an absent `type` falls back to whatever structural keywords are
/// present.
fn pick_type<'a, R: Rng + ?Sized>(node: &'a Map<String, Value>, rng: &mut R) -> &'a str {
    match node.get("type") {
        Some(Value::String(ty)) => ty.as_str(),
        Some(Value::Array(tys)) if !tys.is_empty() => tys[rng.random_range(0..tys.len())]
            .as_str()
            .unwrap_or("null"),
        _ => {
            if node.contains_key("properties") {
                "object"
            } else if node.contains_key("items") {
                "array"
            } else {
                "null"
            }
        }
    }
}

fn fake_object<R: Rng + ?Sized>(node: &Map<String, Value>, rng: &mut R) -> Value {
    let mut out = Map::new();
    if let Some(Value::Object(props)) = node.get("properties") {
        for (name, sub) in props {
            out.insert(name.clone(), fake(sub, rng));
        }
    }
    Value::Object(out)
}

fn fake_array<R: Rng + ?Sized>(node: &Map<String, Value>, rng: &mut R) -> Value {
    let min = usize_field(node, "minItems").unwrap_or(DEFAULT_MIN_ITEMS);
    let max = usize_field(node, "maxItems").unwrap_or(DEFAULT_MAX_ITEMS).max(min);
    let len = rng.random_range(min..=max);

    match node.get("items") {
        // Tuple form: one value per positional schema.
        Some(Value::Array(subs)) => {
            Value::Array(subs.iter().map(|sub| fake(sub, rng)).collect())
        }
        Some(sub @ Value::Object(_)) => {
            Value::Array((0..len).map(|_| fake(sub, rng)).collect())
        }
        _ => Value::Array((0..len).map(|_| Value::String(lorem::word(rng).to_string())).collect()),
    }
}

fn fake_string<R: Rng + ?Sized>(node: &Map<String, Value>, rng: &mut R) -> String {
    if let Some(format) = node.get("format").and_then(Value::as_str) {
        match format {
            "uuid" => return Uuid::new_v4().to_string(),
            "email" => {
                return format!("{}.{}@example.com", lorem::word(rng), lorem::word(rng));
            }
            "date-time" => {
                let back = ChronoDuration::seconds(rng.random_range(0..=86_400 * 365));
                return (Utc::now() - back).to_rfc3339();
            }
            "date" => {
                let back = ChronoDuration::days(rng.random_range(0..=365 * 10));
                return (Utc::now() - back).format("%Y-%m-%d").to_string();
            }
            "uri" | "url" => return format!("https://example.com/{}", lorem::word(rng)),
            "ipv4" => {
                return format!(
                    "{}.{}.{}.{}",
                    rng.random_range(1..=254u8),
                    rng.random_range(0..=255u8),
                    rng.random_range(0..=255u8),
                    rng.random_range(1..=254u8)
                );
            }
            "hostname" => return format!("{}.example.com", lorem::word(rng)),
            _ => {}
        }
    }

    let min = usize_field(node, "minLength").unwrap_or(0);
    let max = usize_field(node, "maxLength").map(|m| m.max(min));

    let word_count = rng.random_range(1..=3);
    let mut text = lorem::words(rng, word_count);
    while text.len() < min {
        text.push('x');
    }
    if let Some(max) = max {
        text.truncate(max);
    }
    text
}

fn fake_integer<R: Rng + ?Sized>(node: &Map<String, Value>, rng: &mut R) -> Value {
    let mut min = i64_field(node, "minimum").unwrap_or(DEFAULT_INT_MIN);
    let mut max = i64_field(node, "maximum").unwrap_or(DEFAULT_INT_MAX);
    if let Some(excl) = i64_field(node, "exclusiveMinimum") {
        min = min.max(excl.saturating_add(1));
    }
    if let Some(excl) = i64_field(node, "exclusiveMaximum") {
        max = max.min(excl.saturating_sub(1));
    }
    if min > max {
        max = min;
    }
    Value::Number(Number::from(rng.random_range(min..=max)))
}

fn fake_number<R: Rng + ?Sized>(node: &Map<String, Value>, rng: &mut R) -> Value {
    let mut min = f64_field(node, "minimum")
        .or_else(|| f64_field(node, "exclusiveMinimum"))
        .unwrap_or(DEFAULT_NUMBER_MIN);
    let max = f64_field(node, "maximum")
        .or_else(|| f64_field(node, "exclusiveMaximum"))
        .unwrap_or(DEFAULT_NUMBER_MAX);
    if min > max {
        min = max;
    }
    let sample = if min == max {
        min
    } else {
        rng.random_range(min..max)
    };
    Number::from_f64(sample).map_or(Value::Null, Value::Number)
}

fn usize_field(node: &Map<String, Value>, key: &str) -> Option<usize> {
    node.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

fn i64_field(node: &Map<String, Value>, key: &str) -> Option<i64> {
    node.get(key).and_then(Value::as_i64)
}

fn f64_field(node: &Map<String, Value>, key: &str) -> Option<f64> {
    node.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn honors_integer_bounds() {
        let schema = json!({ "type": "integer", "minimum": 1, "maximum": 10 });
        let mut rng = rand::rng();
        for _ in 0..200 {
            let n = fake(&schema, &mut rng).as_i64().expect("integer");
            assert!((1..=10).contains(&n));
        }
    }

    #[test]
    fn honors_exclusive_bounds() {
        let schema = json!({ "type": "integer", "exclusiveMinimum": 0, "exclusiveMaximum": 3 });
        let mut rng = rand::rng();
        for _ in 0..100 {
            let n = fake(&schema, &mut rng).as_i64().expect("integer");
            assert!((1..=2).contains(&n));
        }
    }

    #[test]
    fn uuid_format_produces_parseable_ids() {
        let schema = json!({ "type": "string", "format": "uuid" });
        let mut rng = rand::rng();
        let id = fake(&schema, &mut rng);
        let id = id.as_str().expect("string");
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn generates_every_declared_property() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "format": "uuid" },
                "n": { "type": "integer", "minimum": 1, "maximum": 10 },
                "opt": { "type": "boolean" }
            },
            "required": ["id"]
        });
        let mut rng = rand::rng();
        let record = fake(&schema, &mut rng);
        let obj = record.as_object().expect("object");
        assert_eq!(obj.len(), 3);
        assert!(obj.contains_key("opt"));
    }

    #[test]
    fn enum_values_are_drawn_verbatim() {
        let schema = json!({ "enum": ["red", "green", "blue"] });
        let mut rng = rand::rng();
        for _ in 0..50 {
            let v = fake(&schema, &mut rng);
            assert!(["red", "green", "blue"].contains(&v.as_str().expect("string")));
        }
    }

    #[test]
    fn string_length_bounds_are_respected() {
        let schema = json!({ "type": "string", "minLength": 8, "maxLength": 12 });
        let mut rng = rand::rng();
        for _ in 0..100 {
            let s = fake(&schema, &mut rng);
            let len = s.as_str().expect("string").len();
            assert!((8..=12).contains(&len), "length {len} out of bounds");
        }
    }

    #[test]
    fn array_item_counts_are_respected() {
        let schema = json!({
            "type": "array",
            "items": { "type": "integer" },
            "minItems": 2,
            "maxItems": 4
        });
        let mut rng = rand::rng();
        for _ in 0..50 {
            let len = fake(&schema, &mut rng).as_array().expect("array").len();
            assert!((2..=4).contains(&len));
        }
    }

    #[test]
    fn schema_is_not_mutated() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } }
        });
        let before = schema.clone();
        let mut rng = rand::rng();
        let _ = fake(&schema, &mut rng);
        assert_eq!(schema, before);
    }
}
