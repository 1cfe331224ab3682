use serde_json::Value;

use crate::value::SourceValue;

pub fn to_text(value: &SourceValue) -> Result<Value, String> {
    value.to_text().map(Value::String)
}
