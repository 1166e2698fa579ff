//! ClickHouse SQL formatter.
//!
//! Renders a processed [`Query`] against a physical table. Expressions are
//! emitted in functional notation (`equals(a, 1)`), aliased nodes as
//! `(expr AS alias)`, identifiers outside `[A-Za-z_][A-Za-z0-9_]*` are
//! backtick-quoted and string literals are escaped.

use crate::expr::{Expression, Literal};
use crate::query::{OrderDirection, Query};

/// SQL text ready for the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedQuery {
    pub sql: String,
    pub table: String,
}

impl std::fmt::Display for FormattedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Render the query against `table`
pub fn format_query(query: &Query, table: &str) -> FormattedQuery {
    let mut sql = String::from("SELECT ");

    let items: Vec<String> = query
        .selected_columns
        .iter()
        .map(|selected| {
            let rendered = format_expression(&selected.expression);
            match (&selected.name, selected.expression.alias()) {
                (Some(name), None) if *name != rendered => {
                    format!("{} AS {}", rendered, escape_identifier(name))
                }
                _ => rendered,
            }
        })
        .collect();
    sql.push_str(&items.join(", "));

    sql.push_str(" FROM ");
    sql.push_str(&escape_identifier(table));

    if let Some(condition) = &query.condition {
        sql.push_str(" WHERE ");
        sql.push_str(&format_expression(condition));
    }

    if !query.groupby.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&join_expressions(&query.groupby));
    }

    if let Some(having) = &query.having {
        sql.push_str(" HAVING ");
        sql.push_str(&format_expression(having));
    }

    if !query.order_by.is_empty() {
        let items: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    OrderDirection::Asc => "ASC",
                    OrderDirection::Desc => "DESC",
                };
                format!("{} {}", format_expression(&o.expression), direction)
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&items.join(", "));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    FormattedQuery {
        sql,
        table: table.to_string(),
    }
}

fn join_expressions(expressions: &[Expression]) -> String {
    expressions
        .iter()
        .map(format_expression)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_expression(expr: &Expression) -> String {
    let body = match expr {
        Expression::Column(c) => match &c.table_name {
            Some(table) => format!(
                "{}.{}",
                escape_identifier(table),
                escape_identifier(&c.column_name)
            ),
            None => escape_identifier(&c.column_name),
        },
        Expression::Literal(l) => format_literal(&l.value),
        Expression::FunctionCall(f) => format!(
            "{}({})",
            escape_identifier(&f.function_name),
            join_expressions(&f.parameters)
        ),
    };

    match expr.alias() {
        Some(alias) => format!("({} AS {})", body, escape_identifier(alias)),
        None => body,
    }
}

pub fn format_literal(value: &Literal) -> String {
    match value {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(v) => v.to_string(),
        Literal::UInt(v) => v.to_string(),
        // Debug keeps the decimal point on whole floats
        Literal::Float(v) => format!("{:?}", v),
        Literal::String(s) => escape_string(s),
    }
}

pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn escape_identifier(name: &str) -> String {
    let simple = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() + 2);
    out.push('`');
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '`' => out.push_str("\\`"),
            _ => out.push(c),
        }
    }
    out.push('`');
    out
}
