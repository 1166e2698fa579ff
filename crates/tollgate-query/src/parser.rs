//! SQL frontend: turns a single SELECT into a logical [`Query`].
//!
//! Parsing uses sqlparser with the generic dialect. The frontend is strict:
//! anything it cannot map exactly (joins, subqueries, window functions,
//! wildcards, `PREWHERE`, `QUALIFY`, aggregate `FILTER`) is an error rather
//! than a best-effort translation, because a query has to be fully understood
//! before it can be gated.
//!
//! # Supported SQL Features
//!
//! - Columns and aliases; a qualifier naming the FROM table or its alias is
//!   dropped, any other qualifier is rejected
//! - Comparison, boolean and arithmetic operators (mapped to functional form)
//! - `IN`, `BETWEEN`, `LIKE`, `IS [NOT] NULL`, tuples and `CAST`
//! - Function calls, `COUNT(*)` and `COUNT(DISTINCT x)`
//! - `WHERE`, `GROUP BY`, `HAVING`, `ORDER BY`, `LIMIT`, `OFFSET`
//!
//! # Example
//!
//! ```
//! use tollgate_query::QueryParser;
//!
//! let query = QueryParser::new()
//!     .parse("SELECT count() AS c FROM spans WHERE organization_id = 1")
//!     .unwrap();
//!
//! assert_eq!(query.from, "spans");
//! assert_eq!(query.selected_columns[0].name.as_deref(), Some("c"));
//! ```

use sqlparser::ast::{
    BinaryOperator, DuplicateTreatment, Expr, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, Query as SqlQuery, Select, SelectItem, SetExpr, Statement, TableFactor,
    UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::conditions::{
    binary_condition, in_condition, AND, EQ, GT, GTE, IS_NOT_NULL, IS_NULL, LIKE, LT, LTE, NEQ,
    NOT, NOT_IN, NOT_LIKE, OR, TUPLE,
};
use crate::error::{QueryError, Result};
use crate::expr::{ColumnRef, Expression, Literal};
use crate::query::{OrderBy, OrderDirection, Query, SelectedExpression};

/// SQL functions whose names are normalised to the backend's lowercase form
const CASE_INSENSITIVE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max", "any"];

/// SQL-to-[`Query`] translator using the generic SQL dialect.
#[derive(Debug, Default)]
pub struct QueryParser {
    _private: (),
}

impl QueryParser {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Parse one SELECT statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL cannot be parsed, is not a single SELECT,
    /// or uses a construct the logical query cannot represent.
    pub fn parse(&self, sql: &str) -> Result<Query> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let statements = Parser::parse_sql(&GenericDialect {}, sql)?;

        if statements.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        if statements.len() > 1 {
            return Err(QueryError::MultipleStatements(statements.len()));
        }

        match &statements[0] {
            Statement::Query(query) => self.convert_query(query),
            other => Err(QueryError::UnsupportedStatement(format!(
                "only SELECT is supported, got: {}",
                statement_kind(other)
            ))),
        }
    }

    fn convert_query(&self, query: &SqlQuery) -> Result<Query> {
        if query.with.is_some() {
            return Err(QueryError::UnsupportedStatement("WITH clause".to_string()));
        }

        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            SetExpr::SetOperation { .. } => {
                return Err(QueryError::UnsupportedStatement(
                    "UNION/INTERSECT/EXCEPT".to_string(),
                ))
            }
            other => {
                return Err(QueryError::UnsupportedStatement(format!(
                    "query body: {}",
                    other
                )))
            }
        };

        if !query.limit_by.is_empty() {
            return Err(QueryError::UnsupportedStatement("LIMIT BY".to_string()));
        }
        if query.fetch.is_some() {
            return Err(QueryError::UnsupportedStatement("FETCH".to_string()));
        }
        if query.settings.is_some() {
            return Err(QueryError::UnsupportedStatement(
                "SETTINGS clause (pass settings with the request)".to_string(),
            ));
        }
        if query.format_clause.is_some() {
            return Err(QueryError::UnsupportedStatement("FORMAT clause".to_string()));
        }
        if query.for_clause.is_some() || !query.locks.is_empty() {
            return Err(QueryError::UnsupportedStatement("FOR clause".to_string()));
        }

        let (mut result, qualifiers) = self.convert_select(select)?;

        if let Some(order_by) = &query.order_by {
            for item in &order_by.exprs {
                result.order_by.push(OrderBy {
                    direction: match item.asc {
                        Some(false) => OrderDirection::Desc,
                        _ => OrderDirection::Asc,
                    },
                    expression: self.convert_expr(&item.expr)?,
                });
            }
        }

        if let Some(limit) = &query.limit {
            result.limit = Some(self.convert_count(limit, "LIMIT")?);
        }

        if let Some(offset) = &query.offset {
            result.offset = Some(self.convert_count(&offset.value, "OFFSET")?);
        }

        strip_qualifiers(result, &qualifiers)
    }

    /// Convert the SELECT body. Also returns the names columns may be
    /// qualified with: the FROM name and its alias.
    fn convert_select(&self, select: &Select) -> Result<(Query, Vec<String>)> {
        if select.distinct.is_some() {
            return Err(QueryError::UnsupportedStatement(
                "SELECT DISTINCT (use GROUP BY)".to_string(),
            ));
        }
        if select.top.is_some() {
            return Err(QueryError::UnsupportedStatement("TOP (use LIMIT)".to_string()));
        }
        if select.prewhere.is_some() {
            return Err(QueryError::UnsupportedStatement("PREWHERE".to_string()));
        }
        if select.qualify.is_some() {
            return Err(QueryError::UnsupportedStatement("QUALIFY".to_string()));
        }
        if select.into.is_some() {
            return Err(QueryError::UnsupportedStatement("SELECT INTO".to_string()));
        }
        if !select.lateral_views.is_empty() {
            return Err(QueryError::UnsupportedStatement("LATERAL VIEW".to_string()));
        }
        if !select.named_window.is_empty() {
            return Err(QueryError::UnsupportedStatement("WINDOW clause".to_string()));
        }
        if !select.cluster_by.is_empty()
            || !select.distribute_by.is_empty()
            || !select.sort_by.is_empty()
        {
            return Err(QueryError::UnsupportedStatement(
                "CLUSTER/DISTRIBUTE/SORT BY".to_string(),
            ));
        }
        if select.connect_by.is_some() {
            return Err(QueryError::UnsupportedStatement("CONNECT BY".to_string()));
        }

        let mut qualifiers = Vec::with_capacity(2);
        let from = match select.from.as_slice() {
            [table] if table.joins.is_empty() => match &table.relation {
                TableFactor::Table { name, alias, .. } => {
                    if let Some(alias) = alias {
                        if !alias.columns.is_empty() {
                            return Err(QueryError::UnsupportedStatement(format!(
                                "column list in table alias: {}",
                                alias
                            )));
                        }
                        qualifiers.push(alias.name.value.clone());
                    }
                    let from = name.to_string();
                    qualifiers.push(from.clone());
                    from
                }
                other => {
                    return Err(QueryError::UnsupportedStatement(format!(
                        "FROM must name a dataset, got: {}",
                        other
                    )))
                }
            },
            [] => {
                return Err(QueryError::UnsupportedStatement(
                    "SELECT without FROM".to_string(),
                ))
            }
            _ => return Err(QueryError::UnsupportedStatement("JOIN".to_string())),
        };

        let mut query = Query::new(from);

        for item in &select.projection {
            let selected = match item {
                SelectItem::UnnamedExpr(expr) => SelectedExpression {
                    name: Some(infer_column_name(expr)),
                    expression: self.convert_expr(expr)?,
                },
                SelectItem::ExprWithAlias { expr, alias } => SelectedExpression {
                    name: Some(alias.value.clone()),
                    expression: self
                        .convert_expr(expr)?
                        .with_alias(Some(alias.value.clone())),
                },
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    return Err(QueryError::UnsupportedExpression(
                        "SELECT * (list columns explicitly)".to_string(),
                    ))
                }
            };
            query.selected_columns.push(selected);
        }

        if let Some(selection) = &select.selection {
            query.condition = Some(self.convert_expr(selection)?);
        }

        match &select.group_by {
            GroupByExpr::Expressions(exprs, _) => {
                for expr in exprs {
                    query.groupby.push(self.convert_expr(expr)?);
                }
            }
            GroupByExpr::All(_) => {
                return Err(QueryError::UnsupportedStatement("GROUP BY ALL".to_string()))
            }
        }

        if let Some(having) = &select.having {
            query.having = Some(self.convert_expr(having)?);
        }

        Ok((query, qualifiers))
    }

    fn convert_count(&self, expr: &Expr, clause: &str) -> Result<u64> {
        match expr {
            Expr::Value(Value::Number(n, _)) => n.parse().map_err(|_| {
                QueryError::UnsupportedExpression(format!("{} must be a non-negative integer", clause))
            }),
            other => Err(QueryError::UnsupportedExpression(format!(
                "{} must be a literal, got: {}",
                clause, other
            ))),
        }
    }

    fn convert_expr(&self, expr: &Expr) -> Result<Expression> {
        match expr {
            Expr::Identifier(ident) => Ok(Expression::column(ident.value.clone())),

            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [table, column] => Ok(Expression::Column(ColumnRef {
                    alias: None,
                    table_name: Some(table.value.clone()),
                    column_name: column.value.clone(),
                })),
                _ => Err(QueryError::UnsupportedExpression(format!(
                    "identifier with {} parts: {}",
                    parts.len(),
                    expr
                ))),
            },

            Expr::Value(value) => Ok(Expression::literal(convert_value(value)?)),

            Expr::Nested(inner) => self.convert_expr(inner),

            Expr::BinaryOp { left, op, right } => {
                let function_name = match op {
                    BinaryOperator::Eq => EQ,
                    BinaryOperator::NotEq => NEQ,
                    BinaryOperator::Lt => LT,
                    BinaryOperator::Gt => GT,
                    BinaryOperator::LtEq => LTE,
                    BinaryOperator::GtEq => GTE,
                    BinaryOperator::And => AND,
                    BinaryOperator::Or => OR,
                    BinaryOperator::Plus => "plus",
                    BinaryOperator::Minus => "minus",
                    BinaryOperator::Multiply => "multiply",
                    BinaryOperator::Divide => "divide",
                    BinaryOperator::Modulo => "modulo",
                    other => {
                        return Err(QueryError::UnsupportedExpression(format!(
                            "operator {}",
                            other
                        )))
                    }
                };
                Ok(binary_condition(
                    function_name,
                    self.convert_expr(left)?,
                    self.convert_expr(right)?,
                ))
            }

            Expr::UnaryOp { op, expr: inner } => match op {
                UnaryOperator::Not => Ok(Expression::function(NOT, vec![self.convert_expr(inner)?])),
                UnaryOperator::Plus => self.convert_expr(inner),
                UnaryOperator::Minus => match self.convert_expr(inner)? {
                    Expression::Literal(lit) => Ok(Expression::literal(negate(lit.value)?)),
                    other => Ok(Expression::function("negate", vec![other])),
                },
                other => Err(QueryError::UnsupportedExpression(format!(
                    "unary operator {}",
                    other
                ))),
            },

            Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                let lhs = self.convert_expr(inner)?;
                let values = list
                    .iter()
                    .map(|e| self.convert_expr(e))
                    .collect::<Result<Vec<_>>>()?;
                if values.is_empty() {
                    return Err(QueryError::UnsupportedExpression("empty IN list".to_string()));
                }
                let condition = in_condition(lhs, values);
                Ok(if *negated {
                    rename_call(condition, NOT_IN)
                } else {
                    condition
                })
            }

            Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let subject = self.convert_expr(inner)?;
                let low = self.convert_expr(low)?;
                let high = self.convert_expr(high)?;
                if *negated {
                    Ok(binary_condition(
                        OR,
                        binary_condition(LT, subject.clone(), low),
                        binary_condition(GT, subject, high),
                    ))
                } else {
                    Ok(binary_condition(
                        AND,
                        binary_condition(GTE, subject.clone(), low),
                        binary_condition(LTE, subject, high),
                    ))
                }
            }

            Expr::Like {
                negated,
                expr: inner,
                pattern,
                ..
            } => Ok(binary_condition(
                if *negated { NOT_LIKE } else { LIKE },
                self.convert_expr(inner)?,
                self.convert_expr(pattern)?,
            )),

            Expr::IsNull(inner) => Ok(Expression::function(IS_NULL, vec![self.convert_expr(inner)?])),

            Expr::IsNotNull(inner) => Ok(Expression::function(
                IS_NOT_NULL,
                vec![self.convert_expr(inner)?],
            )),

            Expr::Tuple(items) => Ok(Expression::function(
                TUPLE,
                items
                    .iter()
                    .map(|e| self.convert_expr(e))
                    .collect::<Result<Vec<_>>>()?,
            )),

            Expr::Cast {
                expr: inner,
                data_type,
                ..
            } => Ok(Expression::function(
                "cast",
                vec![
                    self.convert_expr(inner)?,
                    Expression::string(data_type.to_string()),
                ],
            )),

            Expr::Function(func) => {
                if func.over.is_some() {
                    return Err(QueryError::UnsupportedExpression(format!(
                        "window function: {}",
                        expr
                    )));
                }
                if func.filter.is_some() {
                    return Err(QueryError::UnsupportedExpression(format!(
                        "aggregate FILTER: {}",
                        expr
                    )));
                }
                if !func.within_group.is_empty() {
                    return Err(QueryError::UnsupportedExpression(format!(
                        "WITHIN GROUP: {}",
                        expr
                    )));
                }
                if !matches!(func.parameters, FunctionArguments::None) {
                    return Err(QueryError::UnsupportedExpression(format!(
                        "parametric function: {}",
                        expr
                    )));
                }

                let function_name = normalize_function_name(&func.name.to_string());
                let (args, distinct) = match &func.args {
                    FunctionArguments::List(arg_list) => (
                        arg_list.args.as_slice(),
                        matches!(arg_list.duplicate_treatment, Some(DuplicateTreatment::Distinct)),
                    ),
                    FunctionArguments::None => (&[][..], false),
                    FunctionArguments::Subquery(_) => {
                        return Err(QueryError::UnsupportedExpression(format!(
                            "subquery argument: {}",
                            expr
                        )))
                    }
                };

                let mut parameters = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                            parameters.push(self.convert_expr(e)?)
                        }
                        // COUNT(*) is count() in the backend
                        FunctionArg::Unnamed(FunctionArgExpr::Wildcard)
                            if function_name == "count" => {}
                        other => {
                            return Err(QueryError::UnsupportedExpression(format!(
                                "function argument: {}",
                                other
                            )))
                        }
                    }
                }

                if distinct {
                    if function_name != "count" {
                        return Err(QueryError::UnsupportedExpression(format!(
                            "DISTINCT inside {}",
                            function_name
                        )));
                    }
                    return Ok(Expression::function("uniqExact", parameters));
                }

                Ok(Expression::function(function_name, parameters))
            }

            other => Err(QueryError::UnsupportedExpression(other.to_string())),
        }
    }
}

fn convert_value(value: &Value) -> Result<Literal> {
    match value {
        Value::Number(text, _) => parse_number(text),
        Value::SingleQuotedString(s) => Ok(Literal::String(s.clone())),
        Value::Boolean(b) => Ok(Literal::Bool(*b)),
        Value::Null => Ok(Literal::Null),
        other => Err(QueryError::UnsupportedExpression(format!("literal {}", other))),
    }
}

fn parse_number(text: &str) -> Result<Literal> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Literal::Int(v));
    }
    if let Ok(v) = text.parse::<u64>() {
        return Ok(Literal::UInt(v));
    }
    text.parse::<f64>()
        .map(Literal::Float)
        .map_err(|_| QueryError::UnsupportedExpression(format!("numeric literal {}", text)))
}

fn negate(value: Literal) -> Result<Literal> {
    match value {
        Literal::Int(v) => Ok(Literal::Int(-v)),
        Literal::Float(v) => Ok(Literal::Float(-v)),
        Literal::UInt(v) if v == i64::MAX as u64 + 1 => Ok(Literal::Int(i64::MIN)),
        other => Err(QueryError::UnsupportedExpression(format!(
            "cannot negate {:?}",
            other
        ))),
    }
}

fn rename_call(expr: Expression, function_name: &str) -> Expression {
    match expr {
        Expression::FunctionCall(mut call) => {
            call.function_name = function_name.to_string();
            Expression::FunctionCall(call)
        }
        other => other,
    }
}

fn normalize_function_name(name: &str) -> String {
    let lower = name.to_lowercase();
    if CASE_INSENSITIVE_FUNCTIONS.contains(&lower.as_str()) {
        lower
    } else {
        name.to_string()
    }
}

/// Drop column qualifiers that name the queried table. The query is
/// rendered against a different physical table, so a kept qualifier would
/// point nowhere; a qualifier naming any other table is an error.
fn strip_qualifiers(query: Query, qualifiers: &[String]) -> Result<Query> {
    query.transform_expressions(&mut |expr| match expr {
        Expression::Column(ColumnRef {
            alias,
            table_name: Some(table),
            column_name,
        }) => {
            if qualifiers.iter().any(|q| *q == table) {
                Ok(Expression::Column(ColumnRef {
                    alias,
                    table_name: None,
                    column_name,
                }))
            } else {
                Err(QueryError::UnsupportedExpression(format!(
                    "unknown table qualifier '{}' in {}.{}",
                    table, table, column_name
                )))
            }
        }
        other => Ok(other),
    })
}

/// Output name of an unaliased select item
fn infer_column_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.clone())
            .unwrap_or_else(|| expr.to_string()),
        _ => expr.to_string(),
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert(_) => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::Drop { .. } => "DROP",
        _ => "non-query statement",
    }
}
