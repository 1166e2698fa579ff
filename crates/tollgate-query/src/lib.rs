//! Logical query model and the per-dataset query path.
//!
//! SQL text is parsed into a [`Query`] by [`QueryParser`], rewritten by the
//! dataset's [`QueryPipeline`], gated by its [`ConditionChecker`]s and
//! rendered for the backend with [`format_query`].

pub mod checkers;
pub mod conditions;
pub mod error;
pub mod expr;
pub mod format;
pub mod parser;
pub mod pipeline;
pub mod processors;
pub mod query;

pub use checkers::{check_all, checker_names, CheckerKind, ConditionChecker};
pub use error::{QueryError, Result};
pub use expr::{ColumnRef, Expression, FunctionCall, Literal, LiteralExpr};
pub use format::{format_expression, format_query, FormattedQuery};
pub use parser::QueryParser;
pub use pipeline::QueryPipeline;
pub use processors::{processor_names, Processor, QueryProcessor};
pub use query::{
    validate_setting_key, OrderBy, OrderDirection, Query, QuerySettings, SelectedExpression,
    SettingValue,
};
