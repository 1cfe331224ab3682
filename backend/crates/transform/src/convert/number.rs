use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::value::SourceValue;

/// Numeric kinds (number, currency, percent) are sent as strings.
pub fn to_numeric_string(value: &SourceValue) -> Result<Value, String> {
    let text = match value {
        SourceValue::Int(i) => i.to_string(),
        SourceValue::UInt(u) => u.to_string(),
        SourceValue::Float(f) => finite(*f)?,
        SourceValue::Decimal(d) => d.normalize().to_string(),
        SourceValue::Bool(b) => (if *b { "1" } else { "0" }).to_owned(),
        SourceValue::Text(s) | SourceValue::Json(Value::String(s)) => parse_numeric_text(s)?,
        SourceValue::Json(Value::Number(n)) => n.to_string(),
        SourceValue::Bytes(_) => parse_numeric_text(&value.to_text()?)?,
        other => return Err(format!("expected a number, got {}", other.kind())),
    };
    Ok(Value::String(text))
}

fn finite(f: f64) -> Result<String, String> {
    if f.is_finite() {
        Ok(f.to_string())
    } else {
        Err(format!("{f} is not a finite number"))
    }
}

fn parse_numeric_text(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if let Ok(d) = Decimal::from_str(trimmed) {
        return Ok(d.normalize().to_string());
    }
    match trimmed.parse::<f64>() {
        Ok(f) => finite(f),
        Err(_) => Err(format!("{raw:?} is not a number")),
    }
}
