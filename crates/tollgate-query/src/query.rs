//! The logical query handed through the processor pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::conditions::{combine_and_conditions, get_first_level_and_conditions};
use crate::error::{QueryError, Result};
use crate::expr::Expression;

/// Value of a backend setting (`max_threads`, `group_by_overflow_mode`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl SettingValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(v) => Some(*v),
            SettingValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // The backend expects 0/1 for boolean settings
            SettingValue::Bool(b) => write!(f, "{}", u8::from(*b)),
            SettingValue::Int(v) => write!(f, "{}", v),
            SettingValue::Float(v) => write!(f, "{}", v),
            SettingValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::String(v.to_string())
    }
}

/// Settings sent along with the query; ordered for deterministic output
pub type QuerySettings = BTreeMap<String, SettingValue>;

/// HTTP parameters that are not query settings. They select the database,
/// the credentials or the query text itself.
const RESERVED_SETTINGS: &[&str] = &[
    "query",
    "database",
    "default_format",
    "user",
    "password",
    "query_id",
    "session_id",
    "session_check",
    "session_timeout",
    "quota_key",
    "compress",
    "decompress",
    "readonly",
    "profile",
    "enable_http_compression",
];

/// Check that a setting key names a plain backend setting.
///
/// Keys must look like `[a-z_][a-z0-9_]*`. Transport parameters and
/// `param_*` query parameters are refused.
pub fn validate_setting_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| QueryError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = key.chars();
    let well_formed = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !well_formed {
        return Err(invalid("must match [a-z_][a-z0-9_]*"));
    }
    if key.starts_with("param_") {
        return Err(invalid("query parameters are not accepted"));
    }
    if RESERVED_SETTINGS.contains(&key) {
        return Err(invalid("reserved by the backend protocol"));
    }
    Ok(())
}

/// One entry of the SELECT list
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedExpression {
    /// Output name as seen by the caller
    pub name: Option<String>,
    pub expression: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub direction: OrderDirection,
    pub expression: Expression,
}

/// A single SELECT over one dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Dataset key named in FROM
    pub from: String,
    pub selected_columns: Vec<SelectedExpression>,
    pub condition: Option<Expression>,
    pub groupby: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub settings: QuerySettings,
}

impl Query {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            selected_columns: Vec::new(),
            condition: None,
            groupby: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            settings: QuerySettings::new(),
        }
    }

    pub fn select(mut self, name: Option<&str>, expression: Expression) -> Self {
        self.selected_columns.push(SelectedExpression {
            name: name.map(str::to_string),
            expression,
        });
        self
    }

    pub fn filter(mut self, condition: Expression) -> Self {
        self.add_condition(condition);
        self
    }

    /// AND a predicate onto the WHERE clause
    pub fn add_condition(&mut self, condition: Expression) {
        let mut conjuncts: Vec<Expression> = match self.condition.take() {
            Some(existing) => get_first_level_and_conditions(&existing)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        conjuncts.push(condition);
        self.condition = combine_and_conditions(conjuncts);
    }

    pub fn set_setting(&mut self, key: impl Into<String>, value: SettingValue) {
        self.settings.insert(key.into(), value);
    }

    /// Apply a bottom-up rewrite to every expression of every clause
    pub fn transform_expressions<F>(self, f: &mut F) -> Result<Query>
    where
        F: FnMut(Expression) -> Result<Expression>,
    {
        let selected_columns = self
            .selected_columns
            .into_iter()
            .map(|s| {
                Ok(SelectedExpression {
                    name: s.name,
                    expression: s.expression.transform(&mut *f)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let condition = self.condition.map(|c| c.transform(&mut *f)).transpose()?;
        let groupby = self
            .groupby
            .into_iter()
            .map(|g| g.transform(&mut *f))
            .collect::<Result<Vec<_>>>()?;
        let having = self.having.map(|h| h.transform(&mut *f)).transpose()?;
        let order_by = self
            .order_by
            .into_iter()
            .map(|o| {
                Ok(OrderBy {
                    direction: o.direction,
                    expression: o.expression.transform(&mut *f)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Query {
            selected_columns,
            condition,
            groupby,
            having,
            order_by,
            ..self
        })
    }

    /// `(backend name, caller name)` of every result column the backend
    /// returns under a different name than the caller asked for
    pub fn output_renames(&self) -> Vec<(String, String)> {
        self.selected_columns
            .iter()
            .filter_map(|s| {
                let alias = s.expression.alias()?;
                let name = s.name.as_deref()?;
                (alias != name).then(|| (alias.to_string(), name.to_string()))
            })
            .collect()
    }

    /// Every top-level expression of the query, clause by clause
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.selected_columns
            .iter()
            .map(|s| &s.expression)
            .chain(self.condition.iter())
            .chain(self.groupby.iter())
            .chain(self.having.iter())
            .chain(self.order_by.iter().map(|o| &o.expression))
    }
}
