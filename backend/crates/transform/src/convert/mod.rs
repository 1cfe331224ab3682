//! One conversion function per destination field kind.
//!
//! Every function receives a non-null value (null handling lives in
//! [`crate::rules::FieldRule::null_value`]) and returns the destination JSON
//! or a message describing why the value does not fit the kind.

pub mod auto;
pub mod boolean;
pub mod choice;
pub mod date;
pub mod lists;
pub mod number;
pub mod phone;
pub mod text;

use serde_json::Value;

use crate::value::SourceValue;

/// Text form of a scalar value. Composite JSON is rejected.
pub(crate) fn scalar_text(value: &SourceValue) -> Result<String, String> {
    match value {
        SourceValue::Json(v) => json_scalar_text(v),
        other => other.to_text(),
    }
}

pub(crate) fn json_scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(_) => Err("expected a single value, got a list".to_owned()),
        Value::Object(_) => Err("expected a single value, got an object".to_owned()),
    }
}
