//! Collapses uniq aggregates shared by SELECT and HAVING.
//!
//! The backend evaluates `uniq(x)` in HAVING independently of the same
//! aggregate in SELECT unless both carry the same alias, and a uniq aggregate
//! that appears only in HAVING is evaluated incorrectly. This processor gives
//! every matching HAVING occurrence the alias of its SELECT counterpart and
//! rejects the HAVING-only shape.

use super::QueryProcessor;
use crate::error::{QueryError, Result};
use crate::expr::Expression;
use crate::query::Query;

/// Aggregates treated as count-distinct
pub const UNIQ_FUNCTIONS: &[&str] = &[
    "uniq",
    "uniqExact",
    "uniqCombined",
    "uniqCombined64",
    "uniqHLL12",
    "uniqTheta",
    "countDistinct",
];

fn is_uniq(expr: &Expression) -> bool {
    expr.as_function()
        .map(|f| UNIQ_FUNCTIONS.contains(&f.function_name.as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct UniqInSelectAndHavingProcessor;

impl QueryProcessor for UniqInSelectAndHavingProcessor {
    const NAME: &'static str = "UniqInSelectAndHavingProcessor";

    fn process_query(&self, query: Query) -> Result<Query> {
        let having_has_uniq = query
            .having
            .as_ref()
            .map(|h| h.any(is_uniq))
            .unwrap_or(false);
        if !having_has_uniq {
            return Ok(query);
        }

        // Give every selected uniq aggregate an alias so HAVING can share it
        let mut generated = 0usize;
        let mut canonical: Vec<(Expression, String)> = Vec::new();
        let mut selected_columns = Vec::with_capacity(query.selected_columns.len());
        for mut selected in query.selected_columns {
            let top_level_name = selected.name.clone();
            let is_top_level_uniq = is_uniq(&selected.expression);
            let expression = selected.expression.transform(&mut |expr| {
                if !is_uniq(&expr) {
                    return Ok(expr);
                }
                let alias = match expr.alias() {
                    Some(alias) => alias.to_string(),
                    None => match (&top_level_name, is_top_level_uniq) {
                        (Some(name), true) => name.clone(),
                        _ => {
                            generated += 1;
                            format!("_uniq_{}", generated)
                        }
                    },
                };
                let key = expr.strip_aliases();
                if !canonical.iter().any(|(k, _)| *k == key) {
                    canonical.push((key, alias.clone()));
                }
                Ok(expr.with_alias(Some(alias)))
            })?;
            selected.expression = expression;
            selected_columns.push(selected);
        }

        let having = match query.having {
            Some(having) => Some(having.transform(&mut |expr| {
                if !is_uniq(&expr) {
                    return Ok(expr);
                }
                let key = expr.strip_aliases();
                match canonical.iter().find(|(k, _)| *k == key) {
                    Some((_, alias)) => Ok(expr.with_alias(Some(alias.clone()))),
                    None => Err(QueryError::processor(
                        Self::NAME,
                        format!(
                            "{} in HAVING must also appear in SELECT",
                            crate::format::format_expression(&key)
                        ),
                    )),
                }
            })?),
            None => None,
        };

        Ok(Query {
            selected_columns,
            having,
            ..query
        })
    }
}
