use serde_json::{json, Map, Value};

use super::{json_scalar_text, scalar_text};
use crate::value::SourceValue;

pub const DEFAULT_COUNTRY: &str = "US";
/// 1=office, 2=mobile, 4=home, 5=fax, 8=other
pub const DEFAULT_TYPE: u8 = 2;

const NUMBER_KEYS: &[&str] = &["phone_number", "number", "phone", "value"];
const COUNTRY_KEYS: &[&str] = &["phone_country", "country"];
const EXTENSION_KEYS: &[&str] = &["phone_extension", "extension"];
const TYPE_KEYS: &[&str] = &["phone_type", "type"];

/// Normalize a scalar, an object, or a list of either into phone objects.
/// `sys_root` / `sys_title` are filled in by the destination, never here.
pub fn phones(value: &SourceValue, default_country: &str, default_type: u8) -> Result<Value, String> {
    let entries: Vec<Value> = match value {
        SourceValue::Json(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(phone) = from_json(item, default_country, default_type)? {
                    out.push(phone);
                }
            }
            out
        }
        SourceValue::Json(item) => from_json(item, default_country, default_type)?
            .into_iter()
            .collect(),
        other => {
            let number = scalar_text(other)?;
            if number.trim().is_empty() {
                Vec::new()
            } else {
                vec![phone_object(number, default_country.to_owned(), String::new(), default_type)]
            }
        }
    };
    Ok(Value::Array(entries))
}

fn from_json(item: &Value, default_country: &str, default_type: u8) -> Result<Option<Value>, String> {
    match item {
        Value::Object(map) => from_object(map, default_country, default_type).map(Some),
        other => {
            let number = json_scalar_text(other)?;
            if number.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(phone_object(
                    number,
                    default_country.to_owned(),
                    String::new(),
                    default_type,
                )))
            }
        }
    }
}

fn from_object(map: &Map<String, Value>, default_country: &str, default_type: u8) -> Result<Value, String> {
    let number = first_text(map, NUMBER_KEYS)
        .ok_or_else(|| "phone object has no number".to_owned())?;
    let country = first_text(map, COUNTRY_KEYS).unwrap_or_else(|| default_country.to_owned());
    let extension = first_text(map, EXTENSION_KEYS).unwrap_or_default();
    let kind = TYPE_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .find_map(phone_type)
        .unwrap_or(default_type);

    Ok(phone_object(number, country, extension, kind))
}

/// First key holding a non-empty scalar.
fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(|v| json_scalar_text(v).ok())
        .find(|s| !s.trim().is_empty())
}

fn phone_type(value: &Value) -> Option<u8> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u8>().ok(),
        _ => None,
    };
    parsed.filter(|t| *t != 0)
}

fn phone_object(number: String, country: String, extension: String, kind: u8) -> Value {
    json!({
        "phone_country": country,
        "phone_number": number,
        "phone_extension": extension,
        "phone_type": kind,
    })
}
