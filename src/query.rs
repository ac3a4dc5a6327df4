//! The executable query handed to a [`PersistenceAdapter`].
//!
//! A [`Query`] is a `SELECT` against one table refined by a conjunction of
//! [`Predicate`]s and optional pagination. Predicates always restrict rows
//! before `OFFSET`/`LIMIT` are applied, whatever order they were added in.
//!
//! [`PersistenceAdapter`]: crate::PersistenceAdapter

use crate::value::Value;
use std::fmt::{self, Display, Formatter};

/// The columns selected by a query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SelectColumn {
    /// Select all columns.
    All,
    /// A named column.
    Col(String),
}

impl Display for SelectColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Col(column) => write!(f, "{}", Ident(column)),
        }
    }
}

/// A condition a row must satisfy to be selected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// `column = value`
    Eq { column: String, value: Value },

    /// `column IN (values)`. An empty list matches nothing.
    In { column: String, values: Vec<Value> },

    /// `column IN (subquery)`. The subquery must project a single column.
    InSubquery {
        column: String,
        subquery: Box<Query>,
    },

    /// `EXISTS (subquery)`
    Exists(Box<Query>),
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { column, value } => write!(f, "{} = {}", Ident(column), value),
            Self::In { values, .. } if values.is_empty() => write!(f, "false"),
            Self::In { column, values } => {
                write!(f, "{} in (", Ident(column))?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
            Self::InSubquery { column, subquery } => {
                write!(f, "{} in ({})", Ident(column), subquery)
            }
            Self::Exists(subquery) => write!(f, "exists ({subquery})"),
        }
    }
}

/// A `SELECT` statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub projection: SelectColumn,
    pub predicates: Vec<Predicate>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    /// `SELECT * FROM table`
    pub fn select(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: SelectColumn::All,
            predicates: vec![],
            limit: None,
            offset: None,
        }
    }

    /// Select only `column`.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.projection = SelectColumn::Col(column.into());
        self
    }

    /// Add a predicate to the `WHERE` clause.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The values of the first `column IN (..)` predicate, if there is one.
    pub fn in_values(&self, column: &str) -> Option<&[Value]> {
        self.predicates.iter().find_map(|predicate| match predicate {
            Predicate::In { column: c, values } if c == column => Some(values.as_slice()),
            _ => None,
        })
    }
}

/// Renders the query as SQL, with values inlined as literals.
impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "select {} from {}", self.projection, Ident(&self.table))?;
        for (i, predicate) in self.predicates.iter().enumerate() {
            let keyword = if i == 0 { "where" } else { "and" };
            write!(f, " {keyword} {predicate}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " offset {offset}")?;
        }
        Ok(())
    }
}

struct Ident<'a>(&'a str);

impl Display for Ident<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}
