use jsonschema::JSONSchema;
use log::debug;
use serde_json::Value;

use crate::config::ConfigError;

/// included configuration schema
static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/config.json"));

pub fn load_schema() -> Result<JSONSchema, ConfigError> {
    let schema: Value = serde_json::from_str(SCHEMA).map_err(ConfigError::Decode)?;
    JSONSchema::compile(&schema).map_err(|err| ConfigError::Schema(err.to_string()))
}

/// Check a raw configuration document, collecting every violation
pub fn validate(compiled: &JSONSchema, json: &Value) -> Result<(), ConfigError> {
    debug!("Validating configuration against JSON schema");
    match compiled.validate(json) {
        Ok(_) => Ok(()),
        Err(errors) => {
            let errors = errors
                .map(|err| {
                    let path = err.instance_path.to_string();
                    if path.is_empty() { err.to_string() } else { format!("{path}: {err}") }
                })
                .collect();
            Err(ConfigError::Invalid(errors))
        }
    }
}
