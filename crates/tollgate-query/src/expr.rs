//! Expression tree of the logical query.
//!
//! Every node may carry an alias. Conditions are ordinary function calls
//! (`equals`, `and`, `in`, ...), which keeps rewriting uniform: a processor
//! only ever matches on columns, literals and named calls.

use crate::error::Result;

/// A constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl Literal {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Reference to a column, optionally qualified by a table name
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: Option<String>,
    pub table_name: Option<String>,
    pub column_name: String,
}

/// Literal node
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralExpr {
    pub alias: Option<String>,
    pub value: Literal,
}

/// Function call node; conditions and operators are function calls too
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub alias: Option<String>,
    pub function_name: String,
    pub parameters: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column(ColumnRef),
    Literal(LiteralExpr),
    FunctionCall(FunctionCall),
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(ColumnRef {
            alias: None,
            table_name: None,
            column_name: name.into(),
        })
    }

    pub fn literal(value: Literal) -> Self {
        Expression::Literal(LiteralExpr { alias: None, value })
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::literal(Literal::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Expression::literal(Literal::Int(value))
    }

    pub fn function(name: impl Into<String>, parameters: Vec<Expression>) -> Self {
        Expression::FunctionCall(FunctionCall {
            alias: None,
            function_name: name.into(),
            parameters,
        })
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Expression::Column(c) => c.alias.as_deref(),
            Expression::Literal(l) => l.alias.as_deref(),
            Expression::FunctionCall(f) => f.alias.as_deref(),
        }
    }

    /// Replace this node's alias (not its children's)
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        match &mut self {
            Expression::Column(c) => c.alias = alias,
            Expression::Literal(l) => l.alias = alias,
            Expression::FunctionCall(f) => f.alias = alias,
        }
        self
    }

    /// Copy of the tree with every alias removed, used for structural equality
    pub fn strip_aliases(&self) -> Expression {
        match self {
            Expression::Column(c) => Expression::Column(ColumnRef {
                alias: None,
                ..c.clone()
            }),
            Expression::Literal(l) => Expression::literal(l.value.clone()),
            Expression::FunctionCall(f) => Expression::FunctionCall(FunctionCall {
                alias: None,
                function_name: f.function_name.clone(),
                parameters: f.parameters.iter().map(Expression::strip_aliases).collect(),
            }),
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expression::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expression::Literal(l) => Some(&l.value),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionCall> {
        match self {
            Expression::FunctionCall(f) => Some(f),
            _ => None,
        }
    }

    /// True if this is a call to `name` (exact match)
    pub fn is_call(&self, name: &str) -> bool {
        self.as_function()
            .map(|f| f.function_name == name)
            .unwrap_or(false)
    }

    /// Rewrite the tree bottom-up: children first, then `f` on the rebuilt node
    pub fn transform<F>(self, f: &mut F) -> Result<Expression>
    where
        F: FnMut(Expression) -> Result<Expression>,
    {
        let rebuilt = match self {
            Expression::FunctionCall(call) => {
                let parameters = call
                    .parameters
                    .into_iter()
                    .map(|p| p.transform(&mut *f))
                    .collect::<Result<Vec<_>>>()?;
                Expression::FunctionCall(FunctionCall {
                    parameters,
                    ..call
                })
            }
            leaf => leaf,
        };
        f(rebuilt)
    }

    /// Visit every node top-down
    pub fn visit<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        f(self);
        if let Expression::FunctionCall(call) = self {
            for parameter in &call.parameters {
                parameter.visit(&mut *f);
            }
        }
    }

    /// True if any node satisfies the predicate
    pub fn any<F>(&self, predicate: F) -> bool
    where
        F: Fn(&Expression) -> bool,
    {
        let mut found = false;
        self.visit(&mut |e| found = found || predicate(e));
        found
    }
}
