//! Request payload helpers: JSON object keyed by column names.

use serde_json::{Map, Value};

use crate::errors::StoreError;

use super::schema::ActiveFlag;

pub type Payload = Map<String, Value>;

/// Field carrying the sheet row number for position-verified updates
pub const ROW_INDEX_FIELD: &str = "rowIndex";

/// Parse a request body into a payload object.
/// Empty bodies yield `None`; anything but a JSON object is an error.
pub fn parse_body(body: &[u8]) -> Result<Option<Payload>, StoreError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(Some(map)),
        other => Err(StoreError::Internal(format!("expected a JSON object, got {}", json_kind(&other)))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Cell text for a payload value. `null` counts as absent.
pub fn cell_value(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some(ActiveFlag::ACTIVE.to_string()),
        Value::Bool(false) => Some(ActiveFlag::INACTIVE.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// `true`, `"true"` in any casing → `TRUE`; everything else → `FALSE`.
pub fn normalize_flag(v: &Value) -> &'static str {
    let on = match v {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    };
    if on { ActiveFlag::ACTIVE } else { ActiveFlag::INACTIVE }
}

/// Read a stored flag cell as a boolean.
pub fn flag_is_set(cell: &str) -> bool { cell.trim().eq_ignore_ascii_case(ActiveFlag::ACTIVE) }

/// Identifier carried in the payload (`ID`, then `id`).
pub fn payload_id(payload: &Payload) -> Option<String> {
    ["ID", "id"]
        .iter()
        .filter_map(|k| payload.get(*k).and_then(cell_value))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// `rowIndex` as a sheet row number; must be a positive integer.
pub fn row_index(payload: &Payload) -> Result<usize, StoreError> {
    payload
        .get(ROW_INDEX_FIELD)
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .ok_or_else(|| StoreError::InvalidReference("rowIndex (number) is required for update in the payload.".into()))
}
