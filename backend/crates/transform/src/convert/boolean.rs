use serde_json::Value;

use crate::value::SourceValue;

const TRUTHY: &[&str] = &["true", "yes", "1", "t", "y", "on"];
const FALSY: &[&str] = &["false", "no", "0", "f", "n", "off", ""];

pub fn yes_no(value: &SourceValue) -> Result<Value, String> {
    let flag = match value {
        SourceValue::Bool(b) | SourceValue::Json(Value::Bool(b)) => *b,
        SourceValue::Int(i) => *i != 0,
        SourceValue::UInt(u) => *u != 0,
        SourceValue::Float(f) => *f != 0.0,
        SourceValue::Decimal(d) => !d.is_zero(),
        // BIT(1) columns arrive as raw bytes
        SourceValue::Bytes(bytes) => bytes.iter().any(|b| *b != 0),
        SourceValue::Text(s) | SourceValue::Json(Value::String(s)) => parse_flag(s)?,
        SourceValue::Json(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        other => return Err(format!("expected a yes/no value, got {}", other.kind())),
    };
    Ok(Value::Bool(flag))
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    let normalized = raw.trim().to_lowercase();
    if TRUTHY.contains(&normalized.as_str()) {
        Ok(true)
    } else if FALSY.contains(&normalized.as_str()) {
        Ok(false)
    } else {
        Err(format!("{raw:?} is not a yes/no value"))
    }
}
