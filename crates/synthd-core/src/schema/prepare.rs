//! Deep schema transformation and canonical key derivation.
//!
//! Preparation is deterministic and idempotent: preparing an
//! already-prepared schema yields an equal value. The transform walks schema
//! positions only (`properties`, `items`, object-valued
//! `additionalProperties`, combinators, definitions) so that data-carrying
//! values such as `enum` and `const` members are never touched.

use core::fmt::Write;

use serde_json::Value;

/// Generation mode, fixed per job at registration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Produced records carry only declared properties.
    Strict,
    /// Baseline generation followed by randomized mutations.
    Fuzz,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Strict => "strict",
            Mode::Fuzz => "fuzz",
        }
    }
}

/// Keywords whose value is a map of subschemas.
const SCHEMA_MAPS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

/// Keywords whose value is a subschema or a list of subschemas.
const SCHEMA_VALUES: &[&str] = &["items", "not", "oneOf", "anyOf", "allOf"];

/// Returns the transformed schema per the preparation rules:
///
/// - every nested `$id` field is removed (prevents validator caching
///   collisions between otherwise-distinct submissions);
/// - for every object node carrying a `properties` map, strict mode forces
///   `additionalProperties: false`, while fuzz mode promotes an unset or
///   `false` policy to `true` (object-valued policies are left in place and
///   descended into);
/// - the walk descends into `properties`, `items` (both forms),
///   object-valued `additionalProperties`, combinators, and definitions.
pub fn prepare(schema: &Value, mode: Mode) -> Value {
    let mut out = schema.clone();
    transform(&mut out, mode);
    out
}

fn transform(node: &mut Value, mode: Mode) {
    let Some(map) = node.as_object_mut() else {
        return;
    };

    map.remove("$id");

    if map.contains_key("properties") {
        match mode {
            Mode::Strict => {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            Mode::Fuzz => {
                let open = matches!(
                    map.get("additionalProperties"),
                    Some(Value::Bool(true)) | Some(Value::Object(_))
                );
                if !open {
                    map.insert("additionalProperties".to_string(), Value::Bool(true));
                }
            }
        }
    }

    for key in SCHEMA_MAPS {
        if let Some(Value::Object(subs)) = map.get_mut(*key) {
            for sub in subs.values_mut() {
                transform(sub, mode);
            }
        }
    }

    for key in SCHEMA_VALUES {
        match map.get_mut(*key) {
            Some(Value::Array(subs)) => {
                for sub in subs.iter_mut() {
                    transform(sub, mode);
                }
            }
            Some(sub @ Value::Object(_)) => transform(sub, mode),
            _ => {}
        }
    }

    if let Some(policy @ Value::Object(_)) = map.get_mut("additionalProperties") {
        transform(policy, mode);
    }
}

/// Deterministic serialization of a JSON value: object keys are emitted in
/// sorted order at every depth, so two structurally-equal schemas always map
/// to the same cache key regardless of submission order.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are plain strings; escaping mirrors serde_json.
                let _ = write!(out, "{}", Value::String((*key).clone()));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Cache key for a prepared schema: the mode tag concatenated with the
/// canonical serialization of the *input* schema.
pub fn cache_key(schema: &Value, mode: Mode) -> String {
    format!("{}:{}", mode.as_str(), canonical_string(schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn strict_mode_closes_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "nested": {
                    "type": "object",
                    "properties": { "x": { "type": "integer" } }
                }
            }
        });
        let prepared = prepare(&schema, Mode::Strict);
        assert_eq!(prepared["additionalProperties"], json!(false));
        assert_eq!(
            prepared["properties"]["nested"]["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn fuzz_mode_opens_objects() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "id": { "type": "string" } }
        });
        let prepared = prepare(&schema, Mode::Fuzz);
        assert_eq!(prepared["additionalProperties"], json!(true));
    }

    #[test]
    fn fuzz_mode_keeps_object_valued_policy() {
        let schema = json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "additionalProperties": { "type": "string", "$id": "inner" }
        });
        let prepared = prepare(&schema, Mode::Fuzz);
        assert_eq!(
            prepared["additionalProperties"],
            json!({ "type": "string" })
        );
    }

    #[test]
    fn strips_identifiers_at_every_depth() {
        let schema = json!({
            "$id": "root",
            "type": "object",
            "properties": {
                "a": { "$id": "a", "type": "array", "items": { "$id": "item", "type": "string" } }
            },
            "definitions": {
                "b": { "$id": "b", "oneOf": [{ "$id": "branch", "type": "null" }] }
            }
        });
        let prepared = prepare(&schema, Mode::Strict);
        let rendered = canonical_string(&prepared);
        assert!(!rendered.contains("$id"));
    }

    #[test]
    fn enum_members_are_not_schema_positions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tag": { "enum": [{ "$id": "data-not-schema" }] }
            }
        });
        let prepared = prepare(&schema, Mode::Strict);
        assert_eq!(
            prepared["properties"]["tag"]["enum"][0],
            json!({ "$id": "data-not-schema" })
        );
    }

    #[test]
    fn canonical_string_is_order_insensitive() {
        let a = json!({ "b": 1, "a": { "y": [1, 2], "x": null } });
        let b = json!({ "a": { "x": null, "y": [1, 2] }, "b": 1 });
        assert_eq!(canonical_string(&a), canonical_string(&b));
    }

    #[test]
    fn cache_keys_differ_by_mode() {
        let schema = json!({ "type": "object" });
        assert_ne!(cache_key(&schema, Mode::Strict), cache_key(&schema, Mode::Fuzz));
    }

    fn arb_schema() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(json!({ "type": "string" })),
            Just(json!({ "type": "integer", "minimum": 0, "maximum": 9 })),
            Just(json!({ "$id": "leaf", "type": "boolean" })),
            Just(json!({ "type": "null" })),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::hash_map("[a-z]{1,6}", inner.clone(), 1..4).prop_map(|props| {
                    json!({ "type": "object", "properties": props })
                }),
                inner.prop_map(|items| json!({ "type": "array", "items": items })),
            ]
        })
    }

    proptest! {
        #[test]
        fn preparation_is_idempotent(schema in arb_schema(), fuzz in any::<bool>()) {
            let mode = if fuzz { Mode::Fuzz } else { Mode::Strict };
            let once = prepare(&schema, mode);
            let twice = prepare(&once, mode);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn preparation_is_deterministic(schema in arb_schema()) {
            prop_assert_eq!(prepare(&schema, Mode::Strict), prepare(&schema, Mode::Strict));
        }
    }
}
