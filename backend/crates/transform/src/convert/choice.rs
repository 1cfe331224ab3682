use std::collections::HashMap;

use serde_json::Value;

use super::{json_scalar_text, scalar_text};
use crate::value::SourceValue;

/// Values missing from the lookup table pass through unchanged.
fn lookup(value_map: &HashMap<String, String>, key: String) -> String {
    value_map.get(&key).cloned().unwrap_or(key)
}

pub fn single_select(
    value: &SourceValue,
    value_map: &HashMap<String, String>,
) -> Result<Value, String> {
    let key = scalar_text(value)?;
    Ok(Value::String(lookup(value_map, key)))
}

pub fn multiple_select(
    value: &SourceValue,
    value_map: &HashMap<String, String>,
) -> Result<Value, String> {
    let keys: Vec<String> = match value {
        SourceValue::Json(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(json_scalar_text)
            .collect::<Result<_, _>>()?,
        other => vec![scalar_text(other)?],
    };

    Ok(Value::Array(
        keys.into_iter()
            .map(|k| Value::String(lookup(value_map, k)))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statuses() -> HashMap<String, String> {
        HashMap::from([
            ("A".to_owned(), "Active".to_owned()),
            ("I".to_owned(), "Inactive".to_owned()),
            ("1".to_owned(), "Gold".to_owned()),
        ])
    }

    #[test]
    fn single_select_maps_known_values() {
        assert_eq!(single_select(&"A".into(), &statuses()).unwrap(), json!("Active"));
        assert_eq!(single_select(&SourceValue::Int(1), &statuses()).unwrap(), json!("Gold"));
    }

    #[test]
    fn single_select_passes_unknown_values_through() {
        assert_eq!(single_select(&"X".into(), &statuses()).unwrap(), json!("X"));
        assert_eq!(single_select(&"A".into(), &HashMap::new()).unwrap(), json!("A"));
    }

    #[test]
    fn multiple_select_accepts_scalar_or_list() {
        assert_eq!(multiple_select(&"I".into(), &statuses()).unwrap(), json!(["Inactive"]));
        let list = SourceValue::Json(json!(["A", null, "Z", 1]));
        assert_eq!(
            multiple_select(&list, &statuses()).unwrap(),
            json!(["Active", "Z", "Gold"])
        );
    }

    #[test]
    fn rejects_objects() {
        let obj = SourceValue::Json(json!({ "a": 1 }));
        assert!(single_select(&obj, &statuses()).is_err());
        assert!(multiple_select(&SourceValue::Json(json!([{ "a": 1 }])), &statuses()).is_err());
    }
}
