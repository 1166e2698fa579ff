//! Mandatory condition checkers.
//!
//! A checker is the last gate before admission control: a query that does
//! not pin the tenant field in its top-level WHERE conjuncts never reaches
//! the policies or the backend. Only `equals(field, literal)` (either side)
//! and `in(field, tuple(literals..))` count. OR branches, `notEquals`,
//! NULL, empty strings and the `*` wildcard do not.

use serde::Deserialize;
use tollgate_core::{CheckerSpec, DatasetDefinition};
use tracing::warn;

use crate::conditions::{get_first_level_and_conditions, EQ, IN, TUPLE};
use crate::error::{QueryError, Result};
use crate::expr::{Expression, Literal};
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerKind {
    OrgIdEnforcer,
    ProjectIdEnforcer,
}

impl CheckerKind {
    pub fn name(&self) -> &'static str {
        match self {
            CheckerKind::OrgIdEnforcer => "OrgIdEnforcer",
            CheckerKind::ProjectIdEnforcer => "ProjectIdEnforcer",
        }
    }
}

const CHECKERS: &[CheckerKind] = &[CheckerKind::OrgIdEnforcer, CheckerKind::ProjectIdEnforcer];

/// Names accepted in `mandatory_condition_checkers`
pub fn checker_names() -> Vec<&'static str> {
    CHECKERS.iter().map(CheckerKind::name).collect()
}

#[derive(Deserialize)]
struct CheckerArgs {
    field_name: String,
}

/// A configured checker bound to one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionChecker {
    kind: CheckerKind,
    field_name: String,
}

impl ConditionChecker {
    pub fn new(kind: CheckerKind, field_name: impl Into<String>) -> Self {
        Self {
            kind,
            field_name: field_name.into(),
        }
    }

    /// Build from a declaration; the field must exist in the schema
    pub fn from_spec(spec: &CheckerSpec, definition: &DatasetDefinition) -> Result<Self> {
        let kind = CHECKERS
            .iter()
            .copied()
            .find(|kind| kind.name() == spec.condition)
            .ok_or_else(|| {
                QueryError::InvalidConfig(format!("Unknown condition checker '{}'", spec.condition))
            })?;
        let args: CheckerArgs = serde_json::from_value(spec.args.clone()).map_err(|e| {
            QueryError::InvalidConfig(format!("{}: invalid args: {}", kind.name(), e))
        })?;
        if !definition.has_column(&args.field_name) {
            return Err(QueryError::InvalidConfig(format!(
                "{}: field '{}' is not in dataset '{}'",
                kind.name(),
                args.field_name,
                definition.key
            )));
        }
        Ok(Self::new(kind, args.field_name))
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn check(&self, query: &Query) -> Result<()> {
        let satisfied = query
            .condition
            .as_ref()
            .map(|condition| {
                get_first_level_and_conditions(condition)
                    .into_iter()
                    .any(|conjunct| self.constrains(conjunct))
            })
            .unwrap_or(false);

        if satisfied {
            return Ok(());
        }

        warn!(
            target: "tollgate::security",
            checker = self.name(),
            field = %self.field_name,
            dataset = %query.from,
            "Query rejected: missing mandatory condition"
        );
        Err(QueryError::MissingCondition {
            checker: self.name().to_string(),
            field: self.field_name.clone(),
        })
    }

    fn is_field(&self, expr: &Expression) -> bool {
        expr.as_column()
            .map(|c| c.column_name == self.field_name)
            .unwrap_or(false)
    }

    fn constrains(&self, conjunct: &Expression) -> bool {
        let call = match conjunct.as_function() {
            Some(call) if call.parameters.len() == 2 => call,
            _ => return false,
        };
        let (lhs, rhs) = (&call.parameters[0], &call.parameters[1]);

        match call.function_name.as_str() {
            EQ => {
                (self.is_field(lhs) && is_concrete(rhs)) || (self.is_field(rhs) && is_concrete(lhs))
            }
            IN if self.is_field(lhs) => match rhs.as_function() {
                Some(tuple) if tuple.function_name == TUPLE => {
                    !tuple.parameters.is_empty() && tuple.parameters.iter().all(is_concrete)
                }
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_concrete(expr: &Expression) -> bool {
    match expr.as_literal() {
        Some(Literal::Int(_)) | Some(Literal::UInt(_)) => true,
        Some(Literal::String(s)) => !s.is_empty() && s != "*",
        _ => false,
    }
}

/// Run every checker; the first failure wins
pub fn check_all(checkers: &[ConditionChecker], query: &Query) -> Result<()> {
    checkers.iter().try_for_each(|checker| checker.check(query))
}
