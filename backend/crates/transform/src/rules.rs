use std::collections::HashMap;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::convert::{boolean, choice, date, lists, number, phone, text};
use crate::value::SourceValue;

/// Destination field kind. Configured in YAML as `type: <tag>` plus the
/// variant's options; an unknown tag fails deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldRule {
    #[serde(alias = "title")]
    Text,
    Textarea,
    Number,
    Currency,
    Percent,
    Date {
        #[serde(default)]
        include_time: bool,
    },
    #[serde(alias = "singleselect", alias = "choice")]
    SingleSelect {
        #[serde(default, deserialize_with = "lookup_table")]
        value_map: HashMap<String, String>,
    },
    #[serde(alias = "multipleselectfield")]
    MultipleSelect {
        #[serde(default, deserialize_with = "lookup_table")]
        value_map: HashMap<String, String>,
    },
    #[serde(alias = "yesno", alias = "boolean")]
    YesNo,
    #[serde(alias = "emailfield")]
    Email,
    #[serde(alias = "phonefield")]
    Phone {
        #[serde(default = "default_country")]
        default_country: String,
        #[serde(default = "default_phone_type")]
        default_type: u8,
    },
    #[serde(alias = "linkfield")]
    Link,
    #[serde(alias = "linkedrecordfield")]
    LinkedRecord,
    #[serde(alias = "memberfield", alias = "assigned_to")]
    Member,
}

fn default_country() -> String {
    phone::DEFAULT_COUNTRY.to_owned()
}

fn default_phone_type() -> u8 {
    phone::DEFAULT_TYPE
}

impl FieldRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Number => "number",
            Self::Currency => "currency",
            Self::Percent => "percent",
            Self::Date { .. } => "date",
            Self::SingleSelect { .. } => "single_select",
            Self::MultipleSelect { .. } => "multiple_select",
            Self::YesNo => "yes_no",
            Self::Email => "email",
            Self::Phone { .. } => "phone",
            Self::Link => "link",
            Self::LinkedRecord => "linked_record",
            Self::Member => "member",
        }
    }

    /// Convert one source value into this field's destination format.
    pub fn apply(&self, value: &SourceValue) -> Result<Value, String> {
        if value.is_null() {
            return Ok(self.null_value());
        }

        match self {
            Self::Text | Self::Textarea => text::to_text(value),
            Self::Number | Self::Currency | Self::Percent => number::to_numeric_string(value),
            Self::Date { include_time } => date::to_date(value, *include_time),
            Self::SingleSelect { value_map } => choice::single_select(value, value_map),
            Self::MultipleSelect { value_map } => choice::multiple_select(value, value_map),
            Self::YesNo => boolean::yes_no(value),
            Self::Email | Self::Link | Self::LinkedRecord | Self::Member => {
                lists::string_list(value)
            }
            Self::Phone {
                default_country,
                default_type,
            } => phone::phones(value, default_country, *default_type),
        }
    }

    /// What a null source value becomes under this rule.
    pub fn null_value(&self) -> Value {
        match self {
            Self::MultipleSelect { .. }
            | Self::Email
            | Self::Phone { .. }
            | Self::Link
            | Self::LinkedRecord
            | Self::Member => Value::Array(Vec::new()),
            Self::YesNo => Value::Bool(false),
            Self::Number | Self::Currency | Self::Percent => Value::String("0".to_owned()),
            Self::Date { include_time } => date::date_object(None, *include_time),
            Self::Text | Self::Textarea | Self::SingleSelect { .. } => {
                Value::String(String::new())
            }
        }
    }
}

/// Lookup-table key or value. YAML writes `1: Active` as well as `"1": Active`,
/// so every scalar is accepted and stringified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LookupScalar(String);

impl<'de> Deserialize<'de> for LookupScalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = LookupScalar;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(LookupScalar(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(LookupScalar(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(LookupScalar(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(LookupScalar(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(LookupScalar(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(LookupScalar(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

fn lookup_table<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<LookupScalar, LookupScalar> = HashMap::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k.0, v.0)).collect())
}
