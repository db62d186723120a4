//! JSON Schema wrapper used for input, result, agent output and resume data.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::Value;

use crate::error::WorkflowError;

/// A compiled JSON Schema.
#[derive(Clone)]
pub struct Schema {
    raw: Arc<Value>,
    validator: Arc<jsonschema::Validator>,
}

impl Schema {
    /// Compile a schema document.
    pub fn new(schema: Value) -> Result<Self, WorkflowError> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| WorkflowError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            raw: Arc::new(schema),
            validator: Arc::new(validator),
        })
    }

    /// Derive the schema from a Rust type.
    pub fn of<T: JsonSchema>() -> Result<Self, WorkflowError> {
        let root = schemars::schema_for!(T);
        let value = serde_json::to_value(root)
            .map_err(|e| WorkflowError::InvalidSchema(e.to_string()))?;
        Self::new(value)
    }

    /// The schema document as supplied.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Validate an instance, collecting every violation.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Greeting {
        greeting: String,
    }

    #[test]
    fn test_validate_accepts_conforming_value() {
        let schema = Schema::new(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }))
        .unwrap();
        assert!(schema.validate(&json!({"name": "Alice"})).is_ok());
        assert!(schema.is_valid(&json!({"name": "Alice"})));
    }

    #[test]
    fn test_validate_reports_violations() {
        let schema = Schema::new(json!({
            "type": "object",
            "required": ["name"]
        }))
        .unwrap();
        let errors = schema.validate(&json!({"other": 1})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("name"));
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        let result = Schema::new(json!({"type": "not-a-type"}));
        assert!(matches!(result, Err(WorkflowError::InvalidSchema(_))));
    }

    #[test]
    fn test_schema_derived_from_type() {
        let schema = Schema::of::<Greeting>().unwrap();
        assert!(schema.is_valid(&json!({"greeting": "HELLO"})));
        assert!(!schema.is_valid(&json!({"greeting": 42})));
        assert!(!schema.is_valid(&json!({})));
    }
}
