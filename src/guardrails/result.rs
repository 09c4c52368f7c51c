use serde_json::Value;
use std::fs;
use std::path::Path;

pub const RESULT_SCHEMA_VERSION: &str = "1.0";

const ALLOWED_FIELDS: [&str; 5] = [
    "schema_version",
    "summary",
    "proposed_changes",
    "kr_targets",
    "kr_impact_claim",
];

/// Validates an agent result file against the closed five-field schema.
/// The field set is exact: missing and unknown fields are both rejected,
/// `schema_version` must equal "1.0", `summary` and `kr_impact_claim` must
/// be non-empty after trimming, and both lists must be arrays of strings.
pub fn validate_result_file(path: &Path) -> Result<(), String> {
    let data = fs::read(path).map_err(|err| format!("read result.json: {err}"))?;
    let value: Value =
        serde_json::from_slice(&data).map_err(|err| format!("parse result.json: {err}"))?;
    validate_result_value(&value)
}

pub fn validate_result_value(value: &Value) -> Result<(), String> {
    let object = value
        .as_object()
        .ok_or_else(|| "result.json must be a JSON object".to_string())?;

    let mut extra_fields: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|key| !ALLOWED_FIELDS.contains(key))
        .collect();
    extra_fields.sort_unstable();
    if !extra_fields.is_empty() {
        return Err(format!(
            "result.json contains disallowed fields: [{}] (only {} are allowed)",
            extra_fields.join(", "),
            ALLOWED_FIELDS.join(", ")
        ));
    }

    for field in ALLOWED_FIELDS {
        if !object.contains_key(field) {
            return Err(format!("missing required field: {field}"));
        }
    }

    let schema_version = object
        .get("schema_version")
        .and_then(Value::as_str)
        .ok_or_else(|| "schema_version must be a string".to_string())?;
    if schema_version != RESULT_SCHEMA_VERSION {
        return Err(format!(
            "schema_version must be \"{RESULT_SCHEMA_VERSION}\", got: \"{schema_version}\""
        ));
    }

    require_nonempty_string(object, "summary")?;
    require_string_array(object, "proposed_changes")?;
    require_string_array(object, "kr_targets")?;
    require_nonempty_string(object, "kr_impact_claim")?;

    Ok(())
}

fn require_nonempty_string(
    object: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<(), String> {
    let value = object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{field} must be a non-empty string"))?;
    if value.trim().is_empty() {
        return Err(format!("{field} must be a non-empty string"));
    }
    Ok(())
}

fn require_string_array(
    object: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<(), String> {
    let values = object
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| format!("{field} must be an array of strings (can be empty)"))?;
    if values.iter().any(|entry| !entry.is_string()) {
        return Err(format!("{field} must be an array of strings (can be empty)"));
    }
    Ok(())
}
