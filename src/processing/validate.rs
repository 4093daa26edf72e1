//! Output contract checks: top-level key presence and optional cross references.

use serde_json::Value;
use thiserror::Error;

use super::types::ReferenceRule;

/// Contract violations reported per attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Parsed value is not a JSON object.
    #[error("response is not a JSON object")]
    NotAnObject,
    /// Required top-level keys are absent, in configured order.
    #[error("missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    /// References that do not name a key of their target map.
    #[error("dangling references: {}", .0.join(", "))]
    DanglingReferences(Vec<String>),
}

/// Accept any object that carries every key in `required_keys`.
pub fn validate(value: &Value, required_keys: &[String]) -> Result<(), ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;
    let missing: Vec<String> = required_keys
        .iter()
        .filter(|key| !object.contains_key(key.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingKeys(missing))
    }
}

/// Check every rule; missing lists or maps count as empty.
pub fn check_references(value: &Value, rules: &[ReferenceRule]) -> Result<(), ValidationError> {
    let mut dangling = Vec::new();
    for rule in rules {
        let Some(items) = value.get(rule.list).and_then(Value::as_array) else {
            continue;
        };
        let target = value.get(rule.target).and_then(Value::as_object);
        for (index, item) in items.iter().enumerate() {
            let reference = item.get(rule.field).and_then(Value::as_str);
            let resolved = match (reference, target) {
                (Some(key), Some(map)) => map.contains_key(key),
                _ => false,
            };
            if !resolved {
                dangling.push(format!(
                    "{}[{index}].{}={}",
                    rule.list,
                    rule.field,
                    reference.unwrap_or("<missing>")
                ));
            }
        }
    }
    if dangling.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::DanglingReferences(dangling))
    }
}
