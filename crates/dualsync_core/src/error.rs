//! Error types for descriptors, values and row transformations.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building or validating sync configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("invalid descriptor document: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("cannot read descriptor file: {0}")]
    Io(#[from] std::io::Error),

    /// Two descriptors share a logical name.
    #[error("duplicate table descriptor '{0}'")]
    DuplicateTable(String),

    /// A required field is empty.
    #[error("table '{table}': field '{field}' must not be empty")]
    EmptyField {
        /// Logical table name.
        table: String,
        /// Offending field.
        field: &'static str,
    },

    /// A column is declared twice where it must be unique.
    #[error("table '{table}': column '{column}' declared more than once")]
    DuplicateColumn {
        /// Logical table name.
        table: String,
        /// Offending column.
        column: String,
    },

    /// Any other inconsistency in a descriptor.
    #[error("table '{table}': {message}")]
    Invalid {
        /// Logical table name.
        table: String,
        /// What is wrong.
        message: String,
    },
}

/// Errors raised by value parsing and row transformation.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A value could not be parsed from its text form.
    #[error("cannot parse {text:?} as {column_type}")]
    ValueParse {
        /// Target column type.
        column_type: String,
        /// Raw text.
        text: String,
    },

    /// A row could not be coerced to the destination schema.
    #[error("column '{column}': {message}")]
    Coercion {
        /// Offending column.
        column: String,
        /// What went wrong.
        message: String,
    },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Creates a coercion error.
    pub fn coercion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Coercion {
            column: column.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConfigError::EmptyField {
            table: "orders".into(),
            field: "source_table",
        };
        assert_eq!(
            err.to_string(),
            "table 'orders': field 'source_table' must not be empty"
        );

        let err = CoreError::coercion("visit_time", "missing date");
        assert!(err.to_string().contains("visit_time"));
    }
}
