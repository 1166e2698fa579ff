//! Tollgate Core
//!
//! Column types, dataset definitions, tenant identity and the schema registry
//! shared by every Tollgate crate.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

pub mod document;
pub mod registry;
pub mod tenant;
pub mod validation;

pub use document::{CheckerSpec, DatasetDocument, PolicySpec, ProcessorSpec, StreamLoaderBinding};
pub use registry::{RegistryEntry, SchemaRegistry};
pub use tenant::{TenantContext, TenantDimension};

/// Bit width of an integer column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(&self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

impl TryFrom<u32> for IntWidth {
    type Error = SchemaError;

    fn try_from(bits: u32) -> std::result::Result<Self, Self::Error> {
        match bits {
            8 => Ok(IntWidth::W8),
            16 => Ok(IntWidth::W16),
            32 => Ok(IntWidth::W32),
            64 => Ok(IntWidth::W64),
            _ => Err(SchemaError::ConfigValidation(format!(
                "Unsupported integer width: {} (allowed: 8, 16, 32, 64)",
                bits
            ))),
        }
    }
}

/// Bit width of a floating point column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

impl FloatWidth {
    pub fn bits(&self) -> u32 {
        match self {
            FloatWidth::F32 => 32,
            FloatWidth::F64 => 64,
        }
    }
}

impl TryFrom<u32> for FloatWidth {
    type Error = SchemaError;

    fn try_from(bits: u32) -> std::result::Result<Self, Self::Error> {
        match bits {
            32 => Ok(FloatWidth::F32),
            64 => Ok(FloatWidth::F64),
            _ => Err(SchemaError::ConfigValidation(format!(
                "Unsupported float width: {} (allowed: 32, 64)",
                bits
            ))),
        }
    }
}

/// Highest sub-second precision accepted for `DateTime64`
pub const MAX_DATETIME_PRECISION: u8 = 9;

/// Logical type of a column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    UInt(IntWidth),
    Int(IntWidth),
    Float(FloatWidth),
    String,
    Uuid,
    DateTime,
    /// Timestamp with sub-second precision (number of fractional digits)
    DateTime64(u8),
    /// Map keyed by strings
    Map {
        key: Box<ColumnType>,
        value: Box<ColumnType>,
    },
}

impl ColumnType {
    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, ColumnType::UInt(_))
    }

    pub fn is_uuid(&self) -> bool {
        matches!(self, ColumnType::Uuid)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::UInt(_) | ColumnType::Int(_))
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::UInt(w) => write!(f, "UInt{}", w.bits()),
            ColumnType::Int(w) => write!(f, "Int{}", w.bits()),
            ColumnType::Float(w) => write!(f, "Float{}", w.bits()),
            ColumnType::String => write!(f, "String"),
            ColumnType::Uuid => write!(f, "UUID"),
            ColumnType::DateTime => write!(f, "DateTime"),
            ColumnType::DateTime64(precision) => write!(f, "DateTime64({})", precision),
            ColumnType::Map { key, value } => write!(f, "Map({}, {})", key, value),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A column in a dataset schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Column name, unique within the dataset
    pub name: String,
    /// Logical type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the physical column is wrapped in `Nullable`
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Kind of storage a dataset document describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Readable and fed by a stream loader
    WritableStorage,
    /// Query-only
    ReadableStorage,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::WritableStorage => write!(f, "writable_storage"),
            StorageKind::ReadableStorage => write!(f, "readable_storage"),
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "writable_storage" => Ok(StorageKind::WritableStorage),
            "readable_storage" => Ok(StorageKind::ReadableStorage),
            _ => Err(SchemaError::ConfigValidation(format!(
                "Unknown storage kind: {}",
                s
            ))),
        }
    }
}

/// Validated, immutable definition of a logical dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetDefinition {
    /// Dataset key used by callers to address the dataset
    pub key: String,
    pub kind: StorageKind,
    /// Storage set the physical tables belong to
    pub storage_set: Option<String>,
    pub readiness_state: Option<String>,
    pub columns: Vec<Column>,
    /// Per-shard table name
    pub local_table_name: String,
    /// Distributed table name queries are sent to
    pub dist_table_name: String,
    /// Partition key expression components
    pub partition_format: Vec<String>,
    /// Declared processor pipeline, in order
    pub query_processors: Vec<ProcessorSpec>,
    pub mandatory_condition_checkers: Vec<CheckerSpec>,
    /// Declared allocation policy chain, in order
    pub allocation_policies: Vec<PolicySpec>,
    /// Ingestion binding (exposed read-only)
    pub stream_loader: Option<StreamLoaderBinding>,
}

impl DatasetDefinition {
    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Errors raised while loading or resolving dataset definitions
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Config validation error: {0}")]
    ConfigValidation(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Dataset already registered: {0}")]
    DuplicateDataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;
