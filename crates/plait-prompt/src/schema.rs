//! Payload validation against a prompt's JSON schema.

use plait_core::error::{DataValidateError, PlaitError, Result, ValidationIssue};

/// Validate `payload` against `schema`. Failures surface as a structured
/// [`DataValidateError`].
pub fn validate_payload(schema: &serde_json::Value, payload: &serde_json::Value) -> Result<()> {
    let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| PlaitError::Config {
        name: "payload_schema".to_string(),
        message: e.to_string(),
    })?;
    let issues: Vec<ValidationIssue> = match compiled.validate(payload) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| ValidationIssue {
                instance_path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect(),
    };
    if issues.is_empty() {
        Ok(())
    } else {
        Err(DataValidateError::new(issues).into())
    }
}
