use serde_json::Value;

use super::{json_scalar_text, scalar_text};
use crate::value::SourceValue;

/// Email, link, linked-record and member fields: an array of non-empty strings.
pub fn string_list(value: &SourceValue) -> Result<Value, String> {
    let items: Vec<String> = match value {
        SourceValue::Json(Value::Array(items)) => items
            .iter()
            .map(json_scalar_text)
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![scalar_text(other)?],
    };

    Ok(Value::Array(
        items
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(Value::String)
            .collect(),
    ))
}
