//! Condition function names and helpers for building and splitting predicates.

use crate::expr::Expression;

pub const AND: &str = "and";
pub const OR: &str = "or";
pub const NOT: &str = "not";
pub const EQ: &str = "equals";
pub const NEQ: &str = "notEquals";
pub const LT: &str = "less";
pub const GT: &str = "greater";
pub const LTE: &str = "lessOrEquals";
pub const GTE: &str = "greaterOrEquals";
pub const IN: &str = "in";
pub const NOT_IN: &str = "notIn";
pub const LIKE: &str = "like";
pub const NOT_LIKE: &str = "notLike";
pub const IS_NULL: &str = "isNull";
pub const IS_NOT_NULL: &str = "isNotNull";
pub const TUPLE: &str = "tuple";

/// Binary comparison operators, in the order they map from SQL
pub const COMPARISON_FUNCTIONS: &[&str] = &[EQ, NEQ, LT, GT, LTE, GTE];

pub fn is_comparison(function_name: &str) -> bool {
    COMPARISON_FUNCTIONS.contains(&function_name)
}

pub fn is_membership(function_name: &str) -> bool {
    function_name == IN || function_name == NOT_IN
}

pub fn binary_condition(function_name: &str, lhs: Expression, rhs: Expression) -> Expression {
    Expression::function(function_name, vec![lhs, rhs])
}

/// `column IN (values...)` in functional form
pub fn in_condition(lhs: Expression, values: Vec<Expression>) -> Expression {
    binary_condition(IN, lhs, Expression::function(TUPLE, values))
}

/// Fold conjuncts into a left-nested chain of binary `and` calls
pub fn combine_and_conditions(conditions: Vec<Expression>) -> Option<Expression> {
    conditions
        .into_iter()
        .reduce(|acc, next| binary_condition(AND, acc, next))
}

/// Top-level conjuncts of a predicate, flattening nested (and variadic) `and`
pub fn get_first_level_and_conditions(condition: &Expression) -> Vec<&Expression> {
    let mut conjuncts = Vec::new();
    collect_conjuncts(condition, &mut conjuncts);
    conjuncts
}

fn collect_conjuncts<'a>(condition: &'a Expression, out: &mut Vec<&'a Expression>) {
    match condition {
        Expression::FunctionCall(call) if call.function_name == AND && call.alias.is_none() => {
            for parameter in &call.parameters {
                collect_conjuncts(parameter, out);
            }
        }
        other => out.push(other),
    }
}
