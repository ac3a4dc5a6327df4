//! Static per-field wiring, built once when the schema is loaded.

use crate::{auth::AuthPolicy, error::Error};
use derive_more::Display;

/// Whether a field resolves to one row or to a list of rows per parent.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Cardinality {
    #[display(fmt = "one")]
    One,
    #[display(fmt = "many")]
    Many,
}

/// How a field is resolved.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// The parent row holds a foreign key to exactly one row of the table,
    /// looked up by primary key.
    #[display(fmt = "belongs-to")]
    OneToOne,

    /// Rows of the table hold a foreign key back to the parent's primary key.
    #[display(fmt = "has-many")]
    OneToMany,

    /// A paginated listing of the whole table, for root fields.
    #[display(fmt = "table")]
    Table,
}

impl BindingKind {
    pub fn cardinality(self) -> Cardinality {
        match self {
            Self::OneToOne => Cardinality::One,
            Self::OneToMany | Self::Table => Cardinality::Many,
        }
    }
}

/// Where a field's rows come from.
///
/// Defaults follow the schema conventions: the table is named after the
/// field, the primary key is `id`, and the foreign key is `<field>_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldBinding {
    pub field: String,
    pub table: String,
    pub primary_key: String,
    pub foreign_key: String,
    pub kind: BindingKind,
    pub auth: Option<AuthPolicy>,
}

impl FieldBinding {
    pub fn new(field: impl Into<String>, kind: BindingKind) -> Self {
        let field = field.into();
        Self {
            table: field.clone(),
            primary_key: "id".into(),
            foreign_key: format!("{field}_id"),
            field,
            kind,
            auth: None,
        }
    }

    #[must_use]
    pub fn table(self, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..self
        }
    }

    #[must_use]
    pub fn primary_key(self, primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            ..self
        }
    }

    #[must_use]
    pub fn foreign_key(self, foreign_key: impl Into<String>) -> Self {
        Self {
            foreign_key: foreign_key.into(),
            ..self
        }
    }

    #[must_use]
    pub fn auth(self, policy: AuthPolicy) -> Self {
        Self {
            auth: Some(policy),
            ..self
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        self.kind.cardinality()
    }

    /// Validate the binding against the shape of the field it is attached to.
    ///
    /// Single-row bindings can't serve list fields and vice versa; these are
    /// wiring errors and should be reported when the schema is built.
    pub fn check(&self, returns_list: bool) -> Result<(), Error> {
        let reason = match (self.cardinality(), returns_list) {
            (Cardinality::One, true) => "a single-row lookup cannot resolve a list field",
            (Cardinality::Many, false) => "a multi-row lookup cannot resolve a scalar field",
            _ => return Ok(()),
        };

        Err(Error::Binding {
            field: self.field.clone(),
            kind: self.kind,
            reason,
        })
    }
}
