//! Hex encoding for integer identifiers.
//!
//! Identifiers such as `span_id` are stored as `UInt64` but callers see and
//! send them as hex strings. On the write path (conditions) hex literals
//! are decoded to integers so the backend can use its primary key; on the
//! read path (SELECT, GROUP BY, ORDER BY) top-level references are encoded
//! as `lower(hex(col))`.
//!
//! An encoded SELECT item is aliased `_hex_<col>`, never `<col>` itself: the
//! backend resolves a bare name to a same-named SELECT alias before the
//! column, which would turn WHERE and GROUP BY into string comparisons. The
//! caller still sees `<col>` through [`Query::output_renames`].
//!
//! Leading zeros do not survive the round trip: `"001a"` decodes to `26`
//! and is read back as `"1a"`.

use std::collections::BTreeSet;

use super::QueryProcessor;
use crate::conditions::{is_comparison, is_membership, TUPLE};
use crate::error::{QueryError, Result};
use crate::expr::{ColumnRef, Expression, FunctionCall, Literal, LiteralExpr};
use crate::query::{OrderBy, Query, SelectedExpression};

/// Prefix of the alias given to an encoded column in the SELECT list
pub const ENCODED_ALIAS_PREFIX: &str = "_hex_";

/// Decode a hex identifier (optional `0x` prefix, case-insensitive)
pub fn hex_to_uint(text: &str) -> std::result::Result<u64, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 16 {
        return Err(format!("'{}' is not a 64-bit hex value", text));
    }
    // from_str_radix alone would also take a leading sign
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("'{}' is not a hex value", text));
    }
    u64::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a hex value", text))
}

/// Encode an integer identifier the way `lower(hex(col))` does for reads
pub fn uint_to_hex(value: u64) -> String {
    format!("{:x}", value)
}

#[derive(Debug, Clone)]
pub struct HexIntColumnProcessor {
    columns: BTreeSet<String>,
}

impl HexIntColumnProcessor {
    pub fn new(columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    fn hex_column<'a>(&self, expr: &'a Expression) -> Option<&'a ColumnRef> {
        expr.as_column()
            .filter(|c| self.columns.contains(&c.column_name))
    }

    /// `lower(hex(col))` over one of our columns
    fn is_encoded(&self, expr: &Expression) -> bool {
        let lower = match expr.as_function() {
            Some(f) if f.function_name == "lower" && f.parameters.len() == 1 => f,
            _ => return false,
        };
        match lower.parameters[0].as_function() {
            Some(hex) if hex.function_name == "hex" && hex.parameters.len() == 1 => {
                self.hex_column(&hex.parameters[0]).is_some()
            }
            _ => false,
        }
    }

    fn encode(&self, expr: Expression, keep_name: bool) -> Expression {
        if self.is_encoded(&expr) {
            return expr;
        }
        match expr {
            Expression::Column(column) if self.columns.contains(&column.column_name) => {
                let alias = match (&column.alias, keep_name) {
                    (Some(alias), _) => Some(alias.clone()),
                    (None, true) => Some(column.column_name.clone()),
                    (None, false) => None,
                }
                .map(|alias| {
                    if self.columns.contains(&alias) {
                        format!("{}{}", ENCODED_ALIAS_PREFIX, alias)
                    } else {
                        alias
                    }
                });
                let inner = Expression::Column(ColumnRef {
                    alias: None,
                    ..column
                });
                Expression::function("lower", vec![Expression::function("hex", vec![inner])])
                    .with_alias(alias)
            }
            other => other,
        }
    }

    fn decode_condition(&self, expr: Expression) -> Result<Expression> {
        let call = match expr {
            Expression::FunctionCall(call)
                if (is_comparison(&call.function_name) || is_membership(&call.function_name))
                    && call.parameters.len() == 2 =>
            {
                call
            }
            other => return Ok(other),
        };

        let membership = is_membership(&call.function_name);
        let value_index = if self.hex_column(&call.parameters[0]).is_some() {
            1
        } else if !membership && self.hex_column(&call.parameters[1]).is_some() {
            0
        } else {
            return Ok(Expression::FunctionCall(call));
        };

        let mut parameters = call.parameters;
        let value = parameters.remove(value_index);
        let decoded = match value {
            Expression::FunctionCall(tuple) if membership && tuple.function_name == TUPLE => {
                let items = tuple
                    .parameters
                    .into_iter()
                    .map(|p| self.decode_value(p))
                    .collect::<Result<Vec<_>>>()?;
                Expression::FunctionCall(FunctionCall {
                    parameters: items,
                    ..tuple
                })
            }
            other => self.decode_value(other)?,
        };
        parameters.insert(value_index, decoded);

        Ok(Expression::FunctionCall(FunctionCall {
            parameters,
            ..call
        }))
    }

    fn decode_value(&self, expr: Expression) -> Result<Expression> {
        match expr {
            Expression::Literal(LiteralExpr {
                alias,
                value: Literal::String(text),
            }) => {
                let value = hex_to_uint(&text).map_err(|e| QueryError::processor(Self::NAME, e))?;
                Ok(Expression::Literal(LiteralExpr {
                    alias,
                    value: Literal::UInt(value),
                }))
            }
            // Already decoded
            Expression::Literal(LiteralExpr {
                value: Literal::UInt(_),
                ..
            }) => Ok(expr),
            Expression::Literal(LiteralExpr {
                alias,
                value: Literal::Int(v),
            }) if v >= 0 => Ok(Expression::Literal(LiteralExpr {
                alias,
                value: Literal::UInt(v as u64),
            })),
            Expression::Literal(other) => Err(QueryError::processor(
                Self::NAME,
                format!("expected a hex string, got {:?}", other.value),
            )),
            other => Ok(other),
        }
    }
}

impl QueryProcessor for HexIntColumnProcessor {
    const NAME: &'static str = "HexIntColumnProcessor";

    fn process_query(&self, query: Query) -> Result<Query> {
        let condition = query
            .condition
            .map(|c| c.transform(&mut |e| self.decode_condition(e)))
            .transpose()?;
        let having = query
            .having
            .map(|h| h.transform(&mut |e| self.decode_condition(e)))
            .transpose()?;

        let selected_columns = query
            .selected_columns
            .into_iter()
            .map(|s| SelectedExpression {
                expression: self.encode(s.expression, true),
                name: s.name,
            })
            .collect();
        let groupby = query
            .groupby
            .into_iter()
            .map(|g| self.encode(g, false))
            .collect();
        let order_by = query
            .order_by
            .into_iter()
            .map(|o| OrderBy {
                direction: o.direction,
                expression: self.encode(o.expression, false),
            })
            .collect();

        Ok(Query {
            selected_columns,
            condition,
            groupby,
            having,
            order_by,
            ..query
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_query;
    use crate::parser::QueryParser;

    fn processor() -> HexIntColumnProcessor {
        HexIntColumnProcessor::new(vec!["span_id".to_string()])
    }

    fn run(sql: &str) -> Result<Query> {
        processor().process_query(QueryParser::new().parse(sql).unwrap())
    }

    #[test]
    fn test_hex_round_trip() {
        let decoded = hex_to_uint("1a2b").unwrap();
        assert_eq!(decoded, 6699);
        assert_eq!(uint_to_hex(decoded), "1a2b");
        assert_eq!(hex_to_uint("0xFF").unwrap(), 255);
        assert_eq!(hex_to_uint("ffffffffffffffff").unwrap(), u64::MAX);
        assert_eq!(hex_to_uint("001a").unwrap(), 26);
    }

    #[test]
    fn test_hex_rejects_garbage() {
        assert!(hex_to_uint("").is_err());
        assert!(hex_to_uint("xyz").is_err());
        assert!(hex_to_uint("+1a").is_err());
        assert!(hex_to_uint("-1").is_err());
        assert!(hex_to_uint("0x+1").is_err());
        assert!(hex_to_uint(" 1a").is_err());
        assert!(hex_to_uint("1ffffffffffffffff").is_err()); // 17 digits
    }

    #[test]
    fn test_condition_literal_decoded() {
        let query = run("SELECT span_id FROM spans WHERE span_id = '1a2b'").unwrap();
        let condition = query.condition.as_ref().unwrap().as_function().unwrap();
        assert_eq!(
            condition.parameters,
            vec![
                Expression::column("span_id"),
                Expression::literal(Literal::UInt(6699))
            ]
        );
    }

    #[test]
    fn test_read_path_encoded() {
        let query = run("SELECT span_id, count() AS c FROM spans WHERE span_id IN ('1a2b', 'ff') GROUP BY span_id")
            .unwrap();
        assert_eq!(
            format_query(&query, "spans_dist").sql,
            "SELECT (lower(hex(span_id)) AS _hex_span_id), (count() AS c) FROM spans_dist \
             WHERE in(span_id, tuple(6699, 255)) GROUP BY lower(hex(span_id))"
        );
        assert_eq!(
            query.output_renames(),
            vec![("_hex_span_id".to_string(), "span_id".to_string())]
        );
    }

    #[test]
    fn test_encoded_alias_never_shadows_column() {
        let query = run("SELECT span_id AS span_id FROM spans WHERE span_id = 'ff' ORDER BY span_id").unwrap();
        let sql = format_query(&query, "spans_dist").sql;
        assert!(sql.starts_with("SELECT (lower(hex(span_id)) AS _hex_span_id) FROM"), "{}", sql);
        assert!(sql.contains("WHERE equals(span_id, 255)"), "{}", sql);
        assert!(!sql.contains("AS span_id"), "{}", sql);
        assert_eq!(query.selected_columns[0].name.as_deref(), Some("span_id"));
    }

    #[test]
    fn test_aliased_column_keeps_alias() {
        let query = run("SELECT span_id AS id FROM spans").unwrap();
        assert_eq!(query.selected_columns[0].expression.alias(), Some("id"));
        assert!(processor().is_encoded(&query.selected_columns[0].expression));
    }

    #[test]
    fn test_bad_hex_rejected() {
        let err = run("SELECT span_id FROM spans WHERE span_id = 'zz'").unwrap_err();
        assert!(matches!(err, QueryError::Processor { processor, .. } if processor == "HexIntColumnProcessor"));
    }

    #[test]
    fn test_idempotent() {
        let once = run("SELECT span_id FROM spans WHERE span_id = '1a2b' ORDER BY span_id").unwrap();
        let twice = processor().process_query(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
