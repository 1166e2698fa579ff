//! Validates UUID literals compared against UUID columns.
//!
//! Callers send UUIDs in any textual form (`simple`, hyphenated, braced,
//! mixed case). Literals compared against the configured columns are parsed
//! and rewritten to the canonical lowercase hyphenated form; anything that
//! is not a UUID fails the query instead of reaching the backend as a
//! type error.

use std::collections::BTreeSet;
use uuid::Uuid;

use super::QueryProcessor;
use crate::conditions::{is_membership, EQ, NEQ, TUPLE};
use crate::error::{QueryError, Result};
use crate::expr::{Expression, FunctionCall, Literal, LiteralExpr};
use crate::query::Query;

#[derive(Debug, Clone)]
pub struct UUIDColumnProcessor {
    columns: BTreeSet<String>,
}

impl UUIDColumnProcessor {
    pub fn new(columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    fn is_uuid_column(&self, expr: &Expression) -> bool {
        expr.as_column()
            .map(|c| self.columns.contains(&c.column_name))
            .unwrap_or(false)
    }

    fn rewrite_condition(&self, expr: Expression) -> Result<Expression> {
        let call = match expr {
            Expression::FunctionCall(call) => call,
            other => return Ok(other),
        };

        let membership = is_membership(&call.function_name);
        let is_equality = call.function_name == EQ || call.function_name == NEQ;
        if !(is_equality || membership) || call.parameters.len() != 2 {
            return Ok(Expression::FunctionCall(call));
        }

        let (lhs_is_column, rhs_is_column) = (
            self.is_uuid_column(&call.parameters[0]),
            self.is_uuid_column(&call.parameters[1]),
        );
        if !lhs_is_column && !(is_equality && rhs_is_column) {
            return Ok(Expression::FunctionCall(call));
        }

        let value_index = if lhs_is_column { 1 } else { 0 };
        let mut parameters = call.parameters;
        let value = parameters.remove(value_index);
        let rewritten = if membership {
            self.canonicalize_tuple(value)?
        } else {
            self.canonicalize_value(value)?
        };
        parameters.insert(value_index, rewritten);

        Ok(Expression::FunctionCall(FunctionCall {
            parameters,
            ..call
        }))
    }

    fn canonicalize_tuple(&self, expr: Expression) -> Result<Expression> {
        match expr {
            Expression::FunctionCall(call) if call.function_name == TUPLE => {
                let parameters = call
                    .parameters
                    .into_iter()
                    .map(|p| self.canonicalize_value(p))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::FunctionCall(FunctionCall {
                    parameters,
                    ..call
                }))
            }
            other => self.canonicalize_value(other),
        }
    }

    fn canonicalize_value(&self, expr: Expression) -> Result<Expression> {
        match expr {
            Expression::Literal(LiteralExpr {
                alias,
                value: Literal::String(text),
            }) => {
                let uuid = Uuid::parse_str(&text).map_err(|_| {
                    QueryError::processor(Self::NAME, format!("'{}' is not a valid UUID", text))
                })?;
                Ok(Expression::Literal(LiteralExpr {
                    alias,
                    value: Literal::String(uuid.hyphenated().to_string()),
                }))
            }
            Expression::Literal(other) => Err(QueryError::processor(
                Self::NAME,
                format!("expected a UUID string, got {:?}", other.value),
            )),
            // Column-to-column comparisons and computed values pass through
            other => Ok(other),
        }
    }
}

impl QueryProcessor for UUIDColumnProcessor {
    const NAME: &'static str = "UUIDColumnProcessor";

    fn process_query(&self, query: Query) -> Result<Query> {
        let condition = query
            .condition
            .map(|c| c.transform(&mut |e| self.rewrite_condition(e)))
            .transpose()?;
        let having = query
            .having
            .map(|h| h.transform(&mut |e| self.rewrite_condition(e)))
            .transpose()?;
        Ok(Query {
            condition,
            having,
            ..query
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::get_first_level_and_conditions;
    use crate::parser::QueryParser;

    fn processor() -> UUIDColumnProcessor {
        UUIDColumnProcessor::new(vec!["trace_id".to_string()])
    }

    fn run(sql: &str) -> Result<Query> {
        processor().process_query(QueryParser::new().parse(sql).unwrap())
    }

    fn rhs(query: &Query, index: usize) -> Expression {
        let condition = query.condition.as_ref().unwrap();
        get_first_level_and_conditions(condition)[index]
            .as_function()
            .unwrap()
            .parameters[1]
            .clone()
    }

    #[test]
    fn test_simple_form_canonicalized() {
        let query = run(
            "SELECT a FROM spans WHERE organization_id = 1 AND trace_id = '7400045B25C443B885914600AA83AD04'",
        )
        .unwrap();
        assert_eq!(
            rhs(&query, 1),
            Expression::string("7400045b-25c4-43b8-8591-4600aa83ad04")
        );
    }

    #[test]
    fn test_in_list_canonicalized() {
        let query = run(
            "SELECT a FROM spans WHERE trace_id IN ('7400045b25c443b885914600aa83ad04', '{8ef4bc65-35eb-4a31-a8bc-8f1b9cc5ce4f}')",
        )
        .unwrap();
        let tuple = rhs(&query, 0);
        let values: Vec<_> = tuple
            .as_function()
            .unwrap()
            .parameters
            .iter()
            .map(|p| p.as_literal().unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            values,
            vec![
                "7400045b-25c4-43b8-8591-4600aa83ad04",
                "8ef4bc65-35eb-4a31-a8bc-8f1b9cc5ce4f"
            ]
        );
    }

    #[test]
    fn test_reversed_operands() {
        let query = run("SELECT a FROM spans WHERE '7400045b25c443b885914600aa83ad04' = trace_id").unwrap();
        let condition = query.condition.unwrap();
        assert_eq!(
            condition.as_function().unwrap().parameters[0],
            Expression::string("7400045b-25c4-43b8-8591-4600aa83ad04")
        );
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let err = run("SELECT a FROM spans WHERE trace_id = 'not-a-uuid'").unwrap_err();
        assert!(matches!(err, QueryError::Processor { processor, .. } if processor == "UUIDColumnProcessor"));
        assert!(run("SELECT a FROM spans WHERE trace_id = 42").is_err());
    }

    #[test]
    fn test_other_columns_untouched() {
        let query = run("SELECT a FROM spans WHERE username = 'not-a-uuid'").unwrap();
        assert_eq!(rhs(&query, 0), Expression::string("not-a-uuid"));
    }

    #[test]
    fn test_idempotent() {
        let once = run("SELECT a FROM spans WHERE trace_id = '7400045B25C443B885914600AA83AD04'").unwrap();
        let twice = processor().process_query(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
