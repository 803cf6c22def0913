//! Table declarations with closed column sets.
//!
//! Every generated statement names its table and columns through these
//! types, so identifiers are fixed at compile time and request input can
//! only ever reach a statement as a bound parameter.

use serde_json::Value as JsonValue;

/// A column of a declared table.
pub trait Column: Copy + Send + Sync + 'static {
    fn name(self) -> &'static str;
}

/// A declared table.
pub trait Table: Send + Sync + 'static {
    const NAME: &'static str;
    const PRIMARY_KEY: &'static str = "id";
    /// Column set to the current time on every update.
    const UPDATED_AT: &'static str = "updated_at";
    type Column: Column;
}

/// Tables whose rows are retired by status rather than removed.
pub trait SoftDelete: Table {
    const STATUS: &'static str = "status";
    const DELETED: &'static str = "deleted";
}

/// Declare a table type and its column enum.
///
/// ```
/// dashboard_core::table! {
///     /// Saved reports
///     pub Reports => "reports", columns ReportColumn {
///         Title => "title",
///         Status => "status",
///     }
/// }
/// assert_eq!(<Reports as dashboard_core::db::Table>::NAME, "reports");
/// ```
#[macro_export]
macro_rules! table {
    (
        $(#[$meta:meta])*
        $vis:vis $table:ident => $name:literal, columns $column:ident {
            $($variant:ident => $col:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis struct $table;

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $column {
            $($variant),+
        }

        impl $crate::db::Column for $column {
            fn name(self) -> &'static str {
                match self {
                    $($column::$variant => $col),+
                }
            }
        }

        impl $crate::db::Table for $table {
            const NAME: &'static str = $name;
            type Column = $column;
        }
    };
}

/// Ordered column/value assignments for one table.
///
/// Setting a column twice replaces its value in place, so the first
/// assignment fixes the column's position.
#[derive(Debug, Clone)]
pub struct FieldMap<T: Table> {
    fields: Vec<(T::Column, JsonValue)>,
}

impl<T: Table> Default for FieldMap<T> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<T: Table> FieldMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn set(mut self, column: T::Column, value: impl Into<JsonValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: T::Column, value: impl Into<JsonValue>) {
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(c, _)| c.name() == column.name())
        {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &JsonValue)> {
        self.fields.iter().map(|(c, v)| (c.name(), v))
    }
}

crate::table! {
    /// Customer accounts
    pub Clients => "clients", columns ClientColumn {
        Name => "name",
        Email => "email",
        Company => "company",
        Phone => "phone",
        Status => "status",
        CreatedAt => "created_at",
        UpdatedAt => "updated_at",
    }
}

impl SoftDelete for Clients {}

crate::table! {
    /// Client engagements
    pub Projects => "projects", columns ProjectColumn {
        ClientId => "client_id",
        Name => "name",
        Description => "description",
        Budget => "budget",
        Status => "status",
        CreatedAt => "created_at",
        UpdatedAt => "updated_at",
    }
}

impl SoftDelete for Projects {}

crate::table! {
    /// Billing documents
    pub Invoices => "invoices", columns InvoiceColumn {
        ClientId => "client_id",
        ProjectId => "project_id",
        Number => "number",
        Amount => "amount",
        Currency => "currency",
        Status => "status",
        DueDate => "due_date",
        CreatedAt => "created_at",
        UpdatedAt => "updated_at",
    }
}

impl SoftDelete for Invoices {}

crate::table! {
    /// Per-tool usage records for analytics
    pub ToolUsage => "tool_usage", columns ToolUsageColumn {
        ToolId => "tool_id",
        ToolName => "tool_name",
        UserId => "user_id",
        UsageType => "usage_type",
        ExecutionTimeMs => "execution_time_ms",
        Success => "success",
        ErrorMessage => "error_message",
        CreatedAt => "created_at",
        UpdatedAt => "updated_at",
    }
}
