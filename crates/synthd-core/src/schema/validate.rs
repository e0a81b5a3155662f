//! Schema well-formedness checks and compiled-validator plumbing.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::error::{Error, Result};

/// The JSON-Schema `type` values this engine accepts.
const VALID_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

/// Checks that `schema` is well-formed enough to drive generation,
/// short-circuiting on the first problem:
///
/// 1. the value must be a JSON object;
/// 2. a present `type` must name (or list) only known JSON-Schema types;
/// 3. the schema must compile under the underlying validator.
pub fn well_formed(schema: &Value) -> Result<()> {
    if !schema.is_object() {
        return Err(Error::InvalidSchema {
            reason: "schema must be a JSON object".to_string(),
        });
    }

    if let Some(declared) = schema.get("type") {
        match declared {
            Value::String(ty) => check_type(ty)?,
            Value::Array(tys) => {
                for ty in tys {
                    match ty.as_str() {
                        Some(ty) => check_type(ty)?,
                        None => {
                            return Err(Error::InvalidSchema {
                                reason: format!("{ty} is not a valid JSON Schema type"),
                            });
                        }
                    }
                }
            }
            other => {
                return Err(Error::InvalidSchema {
                    reason: format!("{other} is not a valid JSON Schema type"),
                });
            }
        }
    }

    compile(schema).map(|_| ())
}

fn check_type(ty: &str) -> Result<()> {
    if VALID_TYPES.contains(&ty) {
        Ok(())
    } else {
        Err(Error::InvalidSchema {
            reason: format!("\"{ty}\" is not a valid JSON Schema type"),
        })
    }
}

/// Runs the full well-formedness check and reports every collected error.
/// Currently the check short-circuits, so the list holds at most one entry;
/// the shape exists for the HTTP validation surface.
pub fn validate_schema(schema: &Value) -> core::result::Result<(), Vec<String>> {
    well_formed(schema).map_err(|e| vec![e.to_string()])
}

/// Compiles `schema` into a reusable validator.
pub fn compile(schema: &Value) -> Result<JSONSchema> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| Error::InvalidSchema {
            reason: format!("schema failed to compile: {e}"),
        })
}

/// Collects human-readable validation errors for `record`, empty when the
/// record conforms.
pub fn collect_errors(validator: &JSONSchema, record: &Value) -> Vec<String> {
    match validator.validate(record) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_a_plain_object_schema() {
        let schema = json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        });
        assert!(well_formed(&schema).is_ok());
    }

    #[test]
    fn rejects_unknown_type_names() {
        let schema = json!({ "type": "banana" });
        let err = well_formed(&schema).expect_err("banana is not a type");
        assert!(err.to_string().contains("banana"));
        assert!(err.to_string().contains("not a valid JSON Schema type"));
    }

    #[test]
    fn rejects_non_object_schemas() {
        for schema in [json!(42), json!("object"), json!([1, 2]), json!(null)] {
            assert!(well_formed(&schema).is_err(), "{schema} should be rejected");
        }
    }

    #[test]
    fn rejects_type_unions_with_unknown_members() {
        let schema = json!({ "type": ["object", "banana"] });
        assert!(well_formed(&schema).is_err());
    }

    #[test]
    fn accepts_type_unions_of_known_members() {
        let schema = json!({ "type": ["object", "null"] });
        assert!(well_formed(&schema).is_ok());
    }

    #[test]
    fn compile_failure_is_reported() {
        // Nested invalid type is only caught by the underlying compiler.
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "banana" } }
        });
        assert!(well_formed(&schema).is_err());
    }

    #[test]
    fn collect_errors_names_the_offending_path() {
        let schema = json!({
            "type": "object",
            "properties": { "n": { "type": "integer", "minimum": 1 } },
            "required": ["n"]
        });
        let validator = compile(&schema).expect("schema compiles");
        let errors = collect_errors(&validator, &json!({ "n": 0 }));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("/n"));
        assert!(collect_errors(&validator, &json!({ "n": 3 })).is_empty());
    }
}
