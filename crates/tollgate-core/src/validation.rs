//! Input validation for Tollgate dataset documents
//!
//! Names that end up inside generated SQL (dataset keys, column names, table
//! names) are restricted to a safe identifier alphabet so the formatter never
//! has to trust configuration text.

use crate::{Result, SchemaError};

/// Maximum length for dataset keys
pub const MAX_DATASET_KEY_LEN: usize = 128;

/// Maximum length for column names
pub const MAX_COLUMN_NAME_LEN: usize = 255;

/// Maximum length for physical table names
pub const MAX_TABLE_NAME_LEN: usize = 255;

/// Maximum length for tenant dimension and stage names
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Maximum length of a referrer string
pub const MAX_REFERRER_LEN: usize = 256;

/// Validate a dataset key
///
/// Requirements:
/// - Not empty
/// - <= 128 characters
/// - Lowercase ASCII letters, digits and underscore only
/// - Starts with a letter
pub fn validate_dataset_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SchemaError::ConfigValidation(
            "Dataset key cannot be empty".to_string(),
        ));
    }

    if key.len() > MAX_DATASET_KEY_LEN {
        return Err(SchemaError::ConfigValidation(format!(
            "Dataset key too long: {} > {} characters",
            key.len(),
            MAX_DATASET_KEY_LEN
        )));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(SchemaError::ConfigValidation(format!(
            "Dataset key '{}' contains invalid characters (allowed: a-z, 0-9, _)",
            key
        )));
    }

    if !key.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(SchemaError::ConfigValidation(format!(
            "Dataset key '{}' must start with a letter",
            key
        )));
    }

    Ok(())
}

/// Validate a column name
///
/// Requirements:
/// - Not empty
/// - <= 255 characters
/// - ASCII alphanumeric and underscore only
/// - Does not start with a digit
pub fn validate_column_name(name: &str) -> Result<()> {
    validate_sql_identifier("Column name", name, MAX_COLUMN_NAME_LEN)
}

/// Validate a physical table name (local or distributed)
pub fn validate_table_name(name: &str) -> Result<()> {
    validate_sql_identifier("Table name", name, MAX_TABLE_NAME_LEN)
}

/// Validate a tenant dimension or pipeline stage identifier
pub fn validate_identifier(name: &str) -> Result<()> {
    validate_sql_identifier("Identifier", name, MAX_IDENTIFIER_LEN)
}

/// Validate a caller-supplied referrer
///
/// Referrers are free-form labels (`api.trace-explorer.list`) but must be
/// printable and bounded since they become tenant keys.
pub fn validate_referrer(referrer: &str) -> Result<()> {
    if referrer.is_empty() {
        return Err(SchemaError::ConfigValidation(
            "Referrer cannot be empty".to_string(),
        ));
    }

    if referrer.len() > MAX_REFERRER_LEN {
        return Err(SchemaError::ConfigValidation(format!(
            "Referrer too long: {} > {} characters",
            referrer.len(),
            MAX_REFERRER_LEN
        )));
    }

    if referrer.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(SchemaError::ConfigValidation(
            "Referrer contains whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_sql_identifier(what: &str, name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(SchemaError::ConfigValidation(format!(
            "{} cannot be empty",
            what
        )));
    }

    if name.len() > max_len {
        return Err(SchemaError::ConfigValidation(format!(
            "{} too long: {} > {} characters",
            what,
            name.len(),
            max_len
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SchemaError::ConfigValidation(format!(
            "{} '{}' contains invalid characters (allowed: alphanumeric, _)",
            what, name
        )));
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(SchemaError::ConfigValidation(format!(
            "{} '{}' cannot start with a digit",
            what, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dataset_keys() {
        assert!(validate_dataset_key("eap_items").is_ok());
        assert!(validate_dataset_key("spans").is_ok());
        assert!(validate_dataset_key("events2").is_ok());
    }

    #[test]
    fn test_invalid_dataset_keys() {
        assert!(validate_dataset_key("").is_err()); // Empty
        assert!(validate_dataset_key(&"a".repeat(129)).is_err()); // Too long
        assert!(validate_dataset_key("EapItems").is_err()); // Uppercase
        assert!(validate_dataset_key("eap-items").is_err()); // Hyphen
        assert!(validate_dataset_key("2spans").is_err()); // Leading digit
        assert!(validate_dataset_key("_spans").is_err()); // Leading underscore
    }

    #[test]
    fn test_valid_column_names() {
        assert!(validate_column_name("organization_id").is_ok());
        assert!(validate_column_name("attributes_string_0").is_ok());
        assert!(validate_column_name("_sort_timestamp").is_ok());
    }

    #[test]
    fn test_invalid_column_names() {
        assert!(validate_column_name("").is_err()); // Empty
        assert!(validate_column_name("span id").is_err()); // Space
        assert!(validate_column_name("span`id").is_err()); // Backtick
        assert!(validate_column_name("0span").is_err()); // Leading digit
        assert!(validate_column_name(&"c".repeat(256)).is_err()); // Too long
    }

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("eap_items_1_dist").is_ok());
        assert!(validate_table_name("db.table").is_err()); // Dot
        assert!(validate_table_name("items; DROP").is_err());
    }

    #[test]
    fn test_referrers() {
        assert!(validate_referrer("api.trace-explorer.list").is_ok());
        assert!(validate_referrer("").is_err()); // Empty
        assert!(validate_referrer("two words").is_err()); // Whitespace
        assert!(validate_referrer("line\nbreak").is_err()); // Control
        assert!(validate_referrer(&"r".repeat(257)).is_err()); // Too long
    }
}
