//! Query processors.
//!
//! A processor is a pure `Query -> Query` rewrite configured once from its
//! static `args` when the dataset is activated. Processors are looked up by
//! the name used in the dataset document:
//!
//! | name | rewrite |
//! |------|---------|
//! | `UniqInSelectAndHavingProcessor` | collapse HAVING uniq aggregates onto their SELECT alias |
//! | `UUIDColumnProcessor` | validate and canonicalise UUID literals in conditions |
//! | `HexIntColumnProcessor` | decode hex literals in conditions, hex-encode reads |
//! | `TupleUnaliaser` | strip aliases nested in `tuple(..)` |
//! | `ClickhouseSettingsOverride` | merge static backend settings |

use serde::de::DeserializeOwned;
use tollgate_core::{ColumnType, DatasetDefinition, ProcessorSpec};

use crate::error::{QueryError, Result};
use crate::query::Query;

mod hex_int;
mod settings_override;
mod tuple_unaliaser;
mod uniq;
mod uuid_column;

pub use hex_int::{hex_to_uint, uint_to_hex, HexIntColumnProcessor};
pub use settings_override::ClickhouseSettingsOverride;
pub use tuple_unaliaser::TupleUnaliaser;
pub use uniq::{UniqInSelectAndHavingProcessor, UNIQ_FUNCTIONS};
pub use uuid_column::UUIDColumnProcessor;

/// A single rewrite stage
pub trait QueryProcessor {
    /// Name used in dataset documents
    const NAME: &'static str;

    fn process_query(&self, query: Query) -> Result<Query>;
}

/// A configured pipeline stage
#[derive(Debug, Clone)]
pub enum Processor {
    UniqInSelectAndHaving(UniqInSelectAndHavingProcessor),
    UuidColumn(UUIDColumnProcessor),
    HexIntColumn(HexIntColumnProcessor),
    TupleUnaliaser(TupleUnaliaser),
    SettingsOverride(ClickhouseSettingsOverride),
}

type Constructor = fn(&serde_json::Value, &DatasetDefinition) -> Result<Processor>;

/// Named constructors
const PROCESSORS: &[(&str, Constructor)] = &[
    (UniqInSelectAndHavingProcessor::NAME, build_uniq),
    (UUIDColumnProcessor::NAME, build_uuid_column),
    (HexIntColumnProcessor::NAME, build_hex_int_column),
    (TupleUnaliaser::NAME, build_tuple_unaliaser),
    (ClickhouseSettingsOverride::NAME, build_settings_override),
];

fn build_uniq(_: &serde_json::Value, _: &DatasetDefinition) -> Result<Processor> {
    Ok(Processor::UniqInSelectAndHaving(UniqInSelectAndHavingProcessor))
}

fn build_uuid_column(args: &serde_json::Value, definition: &DatasetDefinition) -> Result<Processor> {
    let args: ColumnsArgs = parse_args(UUIDColumnProcessor::NAME, args)?;
    check_column_types(UUIDColumnProcessor::NAME, &args.columns, definition, ColumnType::is_uuid)?;
    Ok(Processor::UuidColumn(UUIDColumnProcessor::new(args.columns)))
}

fn build_hex_int_column(
    args: &serde_json::Value,
    definition: &DatasetDefinition,
) -> Result<Processor> {
    let args: ColumnsArgs = parse_args(HexIntColumnProcessor::NAME, args)?;
    check_column_types(
        HexIntColumnProcessor::NAME,
        &args.columns,
        definition,
        ColumnType::is_unsigned_integer,
    )?;
    Ok(Processor::HexIntColumn(HexIntColumnProcessor::new(args.columns)))
}

fn build_tuple_unaliaser(_: &serde_json::Value, _: &DatasetDefinition) -> Result<Processor> {
    Ok(Processor::TupleUnaliaser(TupleUnaliaser))
}

fn build_settings_override(args: &serde_json::Value, _: &DatasetDefinition) -> Result<Processor> {
    let args: SettingsArgs = parse_args(ClickhouseSettingsOverride::NAME, args)?;
    Ok(Processor::SettingsOverride(ClickhouseSettingsOverride::new(args.settings)))
}

#[derive(serde::Deserialize)]
struct ColumnsArgs {
    columns: Vec<String>,
}

#[derive(serde::Deserialize)]
struct SettingsArgs {
    settings: crate::query::QuerySettings,
}

impl Processor {
    /// Build a stage from its declaration, validating args against the schema
    pub fn from_spec(spec: &ProcessorSpec, definition: &DatasetDefinition) -> Result<Processor> {
        let constructor = PROCESSORS
            .iter()
            .find(|(name, _)| *name == spec.processor)
            .map(|(_, constructor)| constructor)
            .ok_or_else(|| {
                QueryError::InvalidConfig(format!("Unknown query processor '{}'", spec.processor))
            })?;
        constructor(&spec.args, definition)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Processor::UniqInSelectAndHaving(_) => UniqInSelectAndHavingProcessor::NAME,
            Processor::UuidColumn(_) => UUIDColumnProcessor::NAME,
            Processor::HexIntColumn(_) => HexIntColumnProcessor::NAME,
            Processor::TupleUnaliaser(_) => TupleUnaliaser::NAME,
            Processor::SettingsOverride(_) => ClickhouseSettingsOverride::NAME,
        }
    }

    pub fn process(&self, query: Query) -> Result<Query> {
        match self {
            Processor::UniqInSelectAndHaving(p) => p.process_query(query),
            Processor::UuidColumn(p) => p.process_query(query),
            Processor::HexIntColumn(p) => p.process_query(query),
            Processor::TupleUnaliaser(p) => p.process_query(query),
            Processor::SettingsOverride(p) => p.process_query(query),
        }
    }
}

/// Names accepted in `query_processors`
pub fn processor_names() -> Vec<&'static str> {
    PROCESSORS.iter().map(|(name, _)| *name).collect()
}

fn parse_args<T: DeserializeOwned>(processor: &str, args: &serde_json::Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| QueryError::InvalidConfig(format!("{}: invalid args: {}", processor, e)))
}

fn check_column_types(
    processor: &str,
    columns: &[String],
    definition: &DatasetDefinition,
    accepts: fn(&ColumnType) -> bool,
) -> Result<()> {
    if columns.is_empty() {
        return Err(QueryError::InvalidConfig(format!(
            "{}: args.columns is empty",
            processor
        )));
    }
    for name in columns {
        let column = definition.column(name).ok_or_else(|| {
            QueryError::InvalidConfig(format!(
                "{}: column '{}' is not in dataset '{}'",
                processor, name, definition.key
            ))
        })?;
        if !accepts(&column.column_type) {
            return Err(QueryError::InvalidConfig(format!(
                "{}: column '{}' has unsupported type {}",
                processor, name, column.column_type
            )));
        }
    }
    Ok(())
}
