//! Column values and rows.

use derive_more::From;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// A scalar stored in a row column. Values also serve as batch keys, so
/// they are hashable and totally ordered.
///
/// SQL `NULL` has no variant: a null column is simply absent from its row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A text string.
    Text(String),
}

impl Value {
    /// The SQL type of this value.
    pub fn ty(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int8",
            Self::Text(_) => "text",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}

/// Formats the value as a SQL literal.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// A row returned by the store: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Build a row from `(column, value)` pairs.
pub fn row<C: Into<String>>(columns: impl IntoIterator<Item = (C, Value)>) -> Row {
    columns
        .into_iter()
        .map(|(column, value)| (column.into(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(Value::from(7).to_string(), "7");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::from("O'Hara").to_string(), "'O''Hara'");
    }

    #[test]
    fn sql_types() {
        assert_eq!(Value::from(7).ty(), "int8");
        assert_eq!(Value::from("7").ty(), "text");
        assert_eq!(Value::from(false).ty(), "bool");
    }

    #[test]
    fn build_row() {
        let row = row([("id", Value::from(1)), ("name", "acme".into())]);
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("name"), Some(&Value::Text("acme".into())));
        assert_eq!(row.get("missing"), None);
    }
}
