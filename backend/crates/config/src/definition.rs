use std::collections::HashSet;
use std::path::Path;

use rowsync_common::{SyncError, SyncResult};
use indexmap::IndexMap;
use rowsync_transform::{FieldMappings, FieldRule, TypeRules};
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::template::QueryTemplate;

/// What happens to the watermark when some records in a run failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPolicy {
    /// Advance to the newest observed row regardless of failures.
    #[default]
    Advance,
    /// Stop at the oldest failed row so it is fetched again next run.
    HoldOnError,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceSpec {
    pub query: String,
    pub primary_key: String,
    /// Incremental timestamp column; absent means full sync every run.
    #[serde(default)]
    pub updated_at_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawDestinationSpec")]
pub struct DestinationSpec {
    pub table_id: String,
    /// Source field -> destination field, in configuration order.
    pub field_mappings: FieldMappings,
    /// Destination field that receives the stringified source key on create.
    pub external_id_field: Option<String>,
    pub field_types: TypeRules,
}

/// On-disk form. The legacy `transformations` table may sit next to
/// `field_types`; entries in `field_types` win.
#[derive(Deserialize)]
struct RawDestinationSpec {
    table_id: String,
    field_mappings: FieldMappings,
    #[serde(default)]
    external_id_field: Option<String>,
    #[serde(default, deserialize_with = "rule_table")]
    field_types: TypeRules,
    #[serde(default, deserialize_with = "rule_table")]
    transformations: TypeRules,
}

impl From<RawDestinationSpec> for DestinationSpec {
    fn from(raw: RawDestinationSpec) -> Self {
        let mut field_types = raw.transformations;
        field_types.extend(raw.field_types);
        Self {
            table_id: raw.table_id,
            field_mappings: raw.field_mappings,
            external_id_field: raw.external_id_field,
            field_types,
        }
    }
}

/// Rule tags are matched case-insensitively (`SingleSelect`, `YESNO`).
fn rule_table<'de, D>(deserializer: D) -> Result<TypeRules, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, serde_yaml::Value> = IndexMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(field, mut rule)| {
            if let Some(serde_yaml::Value::String(tag)) = rule.get_mut("type") {
                *tag = tag.to_ascii_lowercase();
            }
            let rule: FieldRule = serde_yaml::from_value(rule)
                .map_err(|e| de::Error::custom(format!("field_types.{field}: {e}")))?;
            Ok((field, rule))
        })
        .collect()
}

/// One named pipeline from a source query to a destination table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncDefinition {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    pub source: SourceSpec,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub watermark_policy: WatermarkPolicy,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    syncs: Vec<SyncDefinition>,
}

impl SyncDefinition {
    pub fn validate(&self) -> SyncResult<()> {
        let fail = |msg: String| Err(SyncError::Config(format!("sync {:?}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(SyncError::Config("sync name must not be empty".to_owned()));
        }
        if self.source.query.trim().is_empty() {
            return fail("source.query must not be empty".to_owned());
        }
        if self.source.primary_key.trim().is_empty() {
            return fail("source.primary_key must not be empty".to_owned());
        }
        if matches!(&self.source.updated_at_field, Some(f) if f.trim().is_empty()) {
            return fail("source.updated_at_field must not be empty when set".to_owned());
        }

        let template = QueryTemplate::parse(&self.source.query);
        let unsupported = template.unsupported_params();
        if !unsupported.is_empty() {
            return fail(format!(
                "unsupported query parameter(s): {}; only :last_sync_time is available",
                unsupported
                    .iter()
                    .map(|p| format!(":{p}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let dest = &self.destination;
        if dest.table_id.trim().is_empty() {
            return fail("destination.table_id must not be empty".to_owned());
        }
        if dest.field_mappings.is_empty() {
            return fail("destination.field_mappings must not be empty".to_owned());
        }

        let mut targets = HashSet::new();
        for (source, target) in &dest.field_mappings {
            if source.trim().is_empty() || target.trim().is_empty() {
                return fail("field mapping names must not be empty".to_owned());
            }
            if !targets.insert(target.as_str()) {
                return fail(format!("destination field {target:?} is mapped more than once"));
            }
        }

        if let Some(ext) = &dest.external_id_field {
            if ext.trim().is_empty() {
                return fail("destination.external_id_field must not be empty when set".to_owned());
            }
            if targets.contains(ext.as_str()) {
                return fail(format!(
                    "external_id_field {ext:?} collides with a mapped destination field"
                ));
            }
        }

        for key in dest.field_types.keys() {
            let known = dest.field_mappings.contains_key(key) || targets.contains(key.as_str());
            if !known {
                return fail(format!(
                    "field_types entry {key:?} matches no mapped source or destination field"
                ));
            }
        }

        Ok(())
    }
}

/// Parse and validate every definition in a YAML document.
pub fn parse_definitions(yaml: &str) -> SyncResult<Vec<SyncDefinition>> {
    let file: DefinitionFile = serde_yaml::from_str(yaml)
        .map_err(|e| SyncError::Config(format!("invalid sync configuration: {e}")))?;

    let mut seen = HashSet::new();
    for def in &file.syncs {
        def.validate()?;
        if !seen.insert(def.name.as_str()) {
            return Err(SyncError::Config(format!(
                "duplicate sync name {:?}",
                def.name
            )));
        }
    }

    Ok(file.syncs)
}

pub fn load_definitions(path: impl AsRef<Path>) -> SyncResult<Vec<SyncDefinition>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SyncError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;

    let defs = parse_definitions(&raw)?;
    tracing::debug!(path = %path.display(), count = defs.len(), "loaded sync definitions");
    Ok(defs)
}
