use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use serde_json::{json, Value};

use crate::value::{iso_naive, SourceValue};

/// `{"date": ..., "include_time": ...}`, the destination's date shape.
pub fn date_object(date: Option<String>, include_time: bool) -> Value {
    json!({ "date": date, "include_time": include_time })
}

/// Date-time input always carries its time. Date-only input and parsed text
/// take the configured `include_time`.
pub fn to_date(value: &SourceValue, include_time: bool) -> Result<Value, String> {
    match value {
        SourceValue::DateTime(dt) => Ok(date_object(Some(iso_naive(dt)), true)),
        SourceValue::Timestamp(ts) => Ok(date_object(
            Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            true,
        )),
        SourceValue::Date(d) => Ok(date_object(Some(midnight(d)), include_time)),
        SourceValue::Text(s) | SourceValue::Json(Value::String(s)) => {
            parse_date_text(s).map(|iso| date_object(Some(iso), include_time))
        }
        other => Err(format!("expected a date, got {}", other.kind())),
    }
}

fn midnight(d: &NaiveDate) -> String {
    format!("{}T00:00:00", d.format("%Y-%m-%d"))
}

fn parse_date_text(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(iso_naive(&dt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(midnight(&d));
    }
    Err(format!("{raw:?} is not an ISO-8601 date"))
}
