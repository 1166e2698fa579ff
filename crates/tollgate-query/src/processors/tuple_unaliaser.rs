//! Strips aliases nested inside `tuple(..)`.
//!
//! Earlier stages and callers may leave aliases on tuple members
//! (`tuple((a AS x), b)`); the backend treats those as new global aliases,
//! which breaks queries that reference the same expression elsewhere. The
//! tuple itself keeps its alias.

use super::QueryProcessor;
use crate::conditions::TUPLE;
use crate::error::Result;
use crate::expr::{Expression, FunctionCall};
use crate::query::Query;

#[derive(Debug, Clone, Default)]
pub struct TupleUnaliaser;

fn unalias_tuple(expr: Expression) -> Result<Expression> {
    match expr {
        Expression::FunctionCall(call) if call.function_name == TUPLE => {
            Ok(Expression::FunctionCall(FunctionCall {
                parameters: call.parameters.iter().map(Expression::strip_aliases).collect(),
                ..call
            }))
        }
        other => Ok(other),
    }
}

impl QueryProcessor for TupleUnaliaser {
    const NAME: &'static str = "TupleUnaliaser";

    fn process_query(&self, query: Query) -> Result<Query> {
        query.transform_expressions(&mut unalias_tuple)
    }
}
