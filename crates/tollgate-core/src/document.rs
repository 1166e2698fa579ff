//! Dataset configuration documents
//!
//! A dataset is described by one YAML document. The document is deserialized
//! with [Figment] into [`DatasetDocument`] (field names and nesting mirror the
//! YAML exactly), then validated into an immutable [`DatasetDefinition`].
//!
//! ```yaml
//! version: v1
//! kind: writable_storage
//! name: eap_items
//! schema:
//!   columns:
//!     - { name: organization_id, type: UInt, args: { size: 64 } }
//!     - { name: trace_id, type: UUID }
//!   local_table_name: eap_items_local
//!   dist_table_name: eap_items_dist
//! query_processors:
//!   - processor: UUIDColumnProcessor
//!     args: { columns: [trace_id] }
//! ```
//!
//! Stage arguments (`args` of processors, checkers and policies) are kept as
//! free-form JSON values here; each stage parses its own arguments when the
//! engine activates the dataset.
//!
//! [Figment]: https://docs.rs/figment

use figment::{
    providers::{Format as _, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::validation::{validate_column_name, validate_dataset_key, validate_table_name};
use crate::{
    Column, ColumnType, DatasetDefinition, FloatWidth, IntWidth, Result, SchemaError,
    StorageKind, MAX_DATETIME_PRECISION,
};

/// Only supported document version
pub const DOCUMENT_VERSION: &str = "v1";

/// Raw dataset document as written in YAML
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetDocument {
    pub version: String,
    pub kind: String,
    /// Dataset key
    pub name: String,
    #[serde(default)]
    pub storage: Option<StorageBinding>,
    #[serde(default)]
    pub readiness_state: Option<String>,
    pub schema: SchemaDocument,
    #[serde(default)]
    pub allocation_policies: Vec<PolicySpec>,
    #[serde(default)]
    pub query_processors: Vec<ProcessorSpec>,
    #[serde(default)]
    pub mandatory_condition_checkers: Vec<CheckerSpec>,
    #[serde(default)]
    pub stream_loader: Option<StreamLoaderBinding>,
}

/// `storage:` block
#[derive(Debug, Clone, Deserialize)]
pub struct StorageBinding {
    pub key: String,
    #[serde(default)]
    pub set_key: Option<String>,
}

/// `schema:` block
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    pub columns: Vec<ColumnDocument>,
    pub local_table_name: String,
    pub dist_table_name: String,
    #[serde(default)]
    pub partition_format: Vec<String>,
}

/// One entry of `schema.columns`
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub args: TypeArgs,
}

/// Nested type reference used by `Map` keys and values
#[derive(Debug, Clone, Deserialize)]
pub struct TypeDocument {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub args: TypeArgs,
}

/// Type arguments; which fields are meaningful depends on the type tag
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeArgs {
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub key: Option<Box<TypeDocument>>,
    #[serde(default)]
    pub value: Option<Box<TypeDocument>>,
    #[serde(default)]
    pub schema_modifiers: Vec<String>,
}

/// `query_processors` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSpec {
    pub processor: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// `mandatory_condition_checkers` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerSpec {
    pub condition: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// `allocation_policies` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// `stream_loader` block; the ingestion runtime consumes it, the query path
/// only exposes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLoaderBinding {
    pub processor: String,
    pub default_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_log_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_topic: Option<String>,
}

impl DatasetDocument {
    /// Parse a document from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Figment::new()
            .merge(Yaml::string(contents))
            .extract()
            .map_err(|e| SchemaError::ConfigValidation(format!("Invalid dataset document: {}", e)))
    }

    /// Parse a document from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents).map_err(|e| match e {
            SchemaError::ConfigValidation(msg) => {
                SchemaError::ConfigValidation(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Validate the document and produce an immutable definition
    pub fn into_definition(self) -> Result<DatasetDefinition> {
        if self.version != DOCUMENT_VERSION {
            return Err(SchemaError::ConfigValidation(format!(
                "Unsupported document version '{}' (expected {})",
                self.version, DOCUMENT_VERSION
            )));
        }

        let kind: StorageKind = self.kind.parse()?;
        validate_dataset_key(&self.name)?;
        validate_table_name(&self.schema.local_table_name)?;
        validate_table_name(&self.schema.dist_table_name)?;

        if self.schema.columns.is_empty() {
            return Err(SchemaError::ConfigValidation(format!(
                "Dataset '{}' declares no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.schema.columns.len());
        for column in &self.schema.columns {
            validate_column_name(&column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::ConfigValidation(format!(
                    "Duplicate column '{}' in dataset '{}'",
                    column.name, self.name
                )));
            }
            columns.push(parse_column(column)?);
        }

        for part in &self.schema.partition_format {
            if part.trim().is_empty() {
                return Err(SchemaError::ConfigValidation(format!(
                    "Empty partition_format entry in dataset '{}'",
                    self.name
                )));
            }
        }

        if kind == StorageKind::WritableStorage && self.stream_loader.is_none() {
            return Err(SchemaError::ConfigValidation(format!(
                "Writable dataset '{}' has no stream_loader",
                self.name
            )));
        }

        debug!(
            dataset = %self.name,
            columns = columns.len(),
            processors = self.query_processors.len(),
            policies = self.allocation_policies.len(),
            "Validated dataset document"
        );

        let (storage_set, readiness_state) = (
            self.storage.and_then(|s| s.set_key),
            self.readiness_state,
        );

        Ok(DatasetDefinition {
            key: self.name,
            kind,
            storage_set,
            readiness_state,
            columns,
            local_table_name: self.schema.local_table_name,
            dist_table_name: self.schema.dist_table_name,
            partition_format: self.schema.partition_format,
            query_processors: self.query_processors,
            mandatory_condition_checkers: self.mandatory_condition_checkers,
            allocation_policies: self.allocation_policies,
            stream_loader: self.stream_loader,
        })
    }
}

fn parse_column(column: &ColumnDocument) -> Result<Column> {
    let mut nullable = false;
    for modifier in &column.args.schema_modifiers {
        match modifier.as_str() {
            "nullable" => nullable = true,
            other => {
                return Err(SchemaError::ConfigValidation(format!(
                    "Unknown schema modifier '{}' on column '{}'",
                    other, column.name
                )))
            }
        }
    }

    let column_type = parse_type(&column.type_name, &column.args)
        .map_err(|e| with_column_context(e, &column.name))?;

    Ok(Column {
        name: column.name.clone(),
        column_type,
        nullable,
    })
}

fn parse_type(type_name: &str, args: &TypeArgs) -> Result<ColumnType> {
    let size = || {
        args.size.ok_or_else(|| {
            SchemaError::ConfigValidation(format!("Type '{}' requires args.size", type_name))
        })
    };

    match type_name {
        "UInt" => Ok(ColumnType::UInt(IntWidth::try_from(size()?)?)),
        "Int" => Ok(ColumnType::Int(IntWidth::try_from(size()?)?)),
        "Float" => Ok(ColumnType::Float(FloatWidth::try_from(size()?)?)),
        "String" => Ok(ColumnType::String),
        "UUID" => Ok(ColumnType::Uuid),
        "DateTime" => Ok(ColumnType::DateTime),
        "DateTime64" => {
            let precision = args.precision.ok_or_else(|| {
                SchemaError::ConfigValidation("Type 'DateTime64' requires args.precision".into())
            })?;
            if precision > u32::from(MAX_DATETIME_PRECISION) {
                return Err(SchemaError::ConfigValidation(format!(
                    "DateTime64 precision {} out of range (0..={})",
                    precision, MAX_DATETIME_PRECISION
                )));
            }
            Ok(ColumnType::DateTime64(precision as u8))
        }
        "Map" => {
            let (key, value) = match (&args.key, &args.value) {
                (Some(key), Some(value)) => (key, value),
                _ => {
                    return Err(SchemaError::ConfigValidation(
                        "Type 'Map' requires args.key and args.value".into(),
                    ))
                }
            };
            let key_type = parse_type(&key.type_name, &key.args)?;
            if key_type != ColumnType::String {
                return Err(SchemaError::ConfigValidation(format!(
                    "Map keys must be String, got {}",
                    key_type
                )));
            }
            let value_type = parse_type(&value.type_name, &value.args)?;
            Ok(ColumnType::Map {
                key: Box::new(key_type),
                value: Box::new(value_type),
            })
        }
        other => Err(SchemaError::ConfigValidation(format!(
            "Unknown column type '{}'",
            other
        ))),
    }
}

fn with_column_context(err: SchemaError, column: &str) -> SchemaError {
    match err {
        SchemaError::ConfigValidation(msg) => {
            SchemaError::ConfigValidation(format!("column '{}': {}", column, msg))
        }
        other => other,
    }
}

/// Load and validate a single dataset file
pub fn load_definition(path: &Path) -> Result<DatasetDefinition> {
    DatasetDocument::from_yaml_file(path)?.into_definition()
}

/// List the dataset documents (`*.yaml`, `*.yml`) in a directory, sorted by
/// file name so activation order is stable
pub fn document_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SchemaError::ConfigValidation(format!(
            "Dataset config directory not found: {}",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if is_yaml && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load every dataset document in a directory
///
/// Fails on the first invalid document; nothing is returned partially.
pub fn load_dir(dir: &Path) -> Result<Vec<DatasetDefinition>> {
    document_paths(dir)?
        .iter()
        .map(|path| load_definition(path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SPANS_YAML: &str = r#"
version: v1
kind: writable_storage
name: spans
storage:
  key: spans
  set_key: events_analytics_platform
readiness_state: complete
schema:
  columns:
    - { name: organization_id, type: UInt, args: { size: 64 } }
    - { name: project_id, type: UInt, args: { size: 64 } }
    - { name: trace_id, type: UUID }
    - { name: span_id, type: UInt, args: { size: 64 } }
    - { name: duration_ms, type: Float, args: { size: 64 } }
    - { name: parent_span_id, type: UInt, args: { size: 64, schema_modifiers: [nullable] } }
    - { name: start_timestamp, type: DateTime64, args: { precision: 6 } }
    - { name: end_timestamp, type: DateTime }
    - name: attr_str
      type: Map
      args:
        key: { type: String }
        value: { type: String }
  local_table_name: spans_local
  dist_table_name: spans_dist
  partition_format: [retention_days, date]
query_processors:
  - processor: UUIDColumnProcessor
    args:
      columns: [trace_id]
mandatory_condition_checkers:
  - condition: OrgIdEnforcer
    args:
      field_name: organization_id
allocation_policies:
  - name: ConcurrentRateLimitAllocationPolicy
    args:
      required_tenant_types: [organization_id, referrer]
      default_config_overrides:
        is_enforced: 0
stream_loader:
  processor: SpansMessageProcessor
  default_topic: snuba-spans
"#;

    fn replace_column_line(yaml: &str, from: &str, to: &str) -> String {
        assert!(yaml.contains(from), "fixture missing {}", from);
        yaml.replace(from, to)
    }

    #[test]
    fn test_parse_full_document() {
        let definition = DatasetDocument::from_yaml_str(SPANS_YAML)
            .unwrap()
            .into_definition()
            .unwrap();

        assert_eq!(definition.key, "spans");
        assert_eq!(definition.kind, StorageKind::WritableStorage);
        assert_eq!(definition.storage_set.as_deref(), Some("events_analytics_platform"));
        assert_eq!(definition.columns.len(), 9);
        assert_eq!(definition.dist_table_name, "spans_dist");
        assert_eq!(definition.partition_format, vec!["retention_days", "date"]);

        assert_eq!(
            definition.column("span_id").unwrap().column_type,
            ColumnType::UInt(IntWidth::W64)
        );
        assert_eq!(
            definition.column("start_timestamp").unwrap().column_type,
            ColumnType::DateTime64(6)
        );
        assert!(definition.column("parent_span_id").unwrap().nullable);
        assert!(!definition.column("span_id").unwrap().nullable);

        assert_eq!(definition.query_processors[0].processor, "UUIDColumnProcessor");
        assert_eq!(
            definition.query_processors[0].args["columns"][0],
            serde_json::json!("trace_id")
        );
        assert_eq!(definition.mandatory_condition_checkers[0].condition, "OrgIdEnforcer");
        assert_eq!(
            definition.allocation_policies[0].args["default_config_overrides"]["is_enforced"],
            serde_json::json!(0)
        );

        let loader = definition.stream_loader.as_ref().unwrap();
        assert_eq!(loader.processor, "SpansMessageProcessor");
        assert_eq!(loader.default_topic, "snuba-spans");
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let yaml = replace_column_line(
            SPANS_YAML,
            "{ name: trace_id, type: UUID }",
            "{ name: trace_id, type: Uuid128 }",
        );
        let err = DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(err.to_string().contains("Unknown column type"));
        assert!(err.to_string().contains("trace_id"));
    }

    #[test]
    fn test_bad_width_rejected() {
        let yaml = replace_column_line(
            SPANS_YAML,
            "{ name: project_id, type: UInt, args: { size: 64 } }",
            "{ name: project_id, type: UInt, args: { size: 24 } }",
        );
        let result = DatasetDocument::from_yaml_str(&yaml).unwrap().into_definition();
        assert!(matches!(result, Err(SchemaError::ConfigValidation(_))));
    }

    #[test]
    fn test_missing_width_rejected() {
        let yaml = replace_column_line(
            SPANS_YAML,
            "{ name: project_id, type: UInt, args: { size: 64 } }",
            "{ name: project_id, type: UInt }",
        );
        assert!(DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .is_err());
    }

    #[test]
    fn test_precision_out_of_range_rejected() {
        let yaml = replace_column_line(
            SPANS_YAML,
            "args: { precision: 6 }",
            "args: { precision: 12 }",
        );
        assert!(DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .is_err());
    }

    #[test]
    fn test_non_string_map_key_rejected() {
        let yaml = replace_column_line(
            SPANS_YAML,
            "key: { type: String }",
            "key: { type: UInt, args: { size: 64 } }",
        );
        let err = DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(err.to_string().contains("Map keys must be String"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let yaml = replace_column_line(
            SPANS_YAML,
            "{ name: project_id, type: UInt, args: { size: 64 } }",
            "{ name: organization_id, type: UInt, args: { size: 64 } }",
        );
        let err = DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate column"));
    }

    #[test]
    fn test_unknown_modifier_rejected() {
        let yaml = replace_column_line(SPANS_YAML, "[nullable]", "[low_cardinality_v2]");
        assert!(DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .is_err());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let yaml = SPANS_YAML.replace("version: v1", "version: v2");
        assert!(DatasetDocument::from_yaml_str(&yaml)
            .unwrap()
            .into_definition()
            .is_err());
    }

    #[test]
    fn test_writable_storage_requires_stream_loader() {
        let cut = SPANS_YAML.find("stream_loader:").unwrap();
        let yaml = &SPANS_YAML[..cut];
        let err = DatasetDocument::from_yaml_str(yaml)
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(err.to_string().contains("stream_loader"));

        let readable = yaml.replace("kind: writable_storage", "kind: readable_storage");
        assert!(DatasetDocument::from_yaml_str(&readable)
            .unwrap()
            .into_definition()
            .is_ok());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let result = DatasetDocument::from_yaml_str("version: v1\nschema: [unterminated");
        assert!(matches!(result, Err(SchemaError::ConfigValidation(_))));
    }

    #[test]
    fn test_load_dir_sorted() {
        let dir = TempDir::new().unwrap();
        for key in ["zeta", "alpha"] {
            let mut file = std::fs::File::create(dir.path().join(format!("{}.yaml", key))).unwrap();
            let yaml = SPANS_YAML.replace("name: spans\n", &format!("name: {}\n", key));
            file.write_all(yaml.as_bytes()).unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "not a dataset").unwrap();

        let definitions = load_dir(dir.path()).unwrap();
        let keys: Vec<_> = definitions.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_load_dir_missing() {
        assert!(load_dir(Path::new("/nonexistent/tollgate/datasets")).is_err());
    }
}
