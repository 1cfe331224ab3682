use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::convert::auto;
use crate::error::TransformError;
use crate::rules::FieldRule;
use crate::value::SourceRecord;

/// Source field → destination field, in configuration order.
pub type FieldMappings = IndexMap<String, String>;
/// Rules keyed by source field (or destination field) name.
pub type TypeRules = HashMap<String, FieldRule>;
/// The JSON object sent to the destination.
pub type Payload = Map<String, Value>;

/// Build a destination payload from one source row.
///
/// Only mapped fields are emitted; a mapped field missing from the row is
/// omitted rather than sent as null. A field's rule is looked up by its source
/// name first, then by its destination name; without a rule the value's
/// runtime type picks the conversion.
pub fn transform(
    record: &SourceRecord,
    mappings: &FieldMappings,
    rules: &TypeRules,
) -> Result<Payload, TransformError> {
    let mut payload = Payload::new();

    for (source_field, dest_field) in mappings {
        let Some(value) = record.get(source_field) else {
            continue;
        };

        let rule = rules.get(source_field).or_else(|| rules.get(dest_field));
        let converted = match rule {
            Some(rule) => rule
                .apply(value)
                .map_err(|message| format!("{} rule: {message}", rule.name())),
            None => auto::infer(value),
        }
        .map_err(|message| TransformError {
            field: dest_field.clone(),
            source_field: source_field.clone(),
            message,
        })?;

        payload.insert(dest_field.clone(), converted);
    }

    Ok(payload)
}
