use serde_json::Value;

use super::date;
use crate::value::SourceValue;

/// Conversion for fields without an explicit rule, chosen by runtime type.
pub fn infer(value: &SourceValue) -> Result<Value, String> {
    Ok(match value {
        SourceValue::Null => Value::Null,
        SourceValue::Bool(b) => Value::Bool(*b),
        SourceValue::Int(_)
        | SourceValue::UInt(_)
        | SourceValue::Float(_)
        | SourceValue::Decimal(_)
        | SourceValue::Bytes(_) => Value::String(value.to_text()?),
        SourceValue::Text(s) => Value::String(s.clone()),
        SourceValue::Date(_) | SourceValue::DateTime(_) | SourceValue::Timestamp(_) => {
            date::to_date(value, false)?
        }
        SourceValue::Json(v) => v.clone(),
    })
}
