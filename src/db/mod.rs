//! Data access layer.
//!
//! # Architecture
//!
//! - `pool`: bounded connection pool with an explicit lifecycle
//! - `statement`: parameterized statements and row decoding
//! - `table`: table declarations with closed column sets
//! - `builder`: statement synthesis for the generic CRUD operations
//! - `query`: the [`Database`] engine handed to request handlers
//! - `transaction`: flat transactions on one borrowed connection

mod builder;
mod error;
mod pool;
mod query;
mod statement;
mod table;
mod transaction;
mod utils;

#[cfg(test)]
mod query_test;
#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{
    delete_statement, insert_statement, select_by_id_statement, soft_delete_statement,
    update_statement,
};
pub use error::{DbError, DbResult, QueryErrorKind, UNAVAILABLE_MESSAGE};
pub use pool::{DatabasePool, PoolState, PoolStats, PooledConnection};
pub use query::Database;
pub use statement::{Row, RowSet, Statement, placeholders};
pub use table::{
    ClientColumn, Clients, Column, FieldMap, InvoiceColumn, Invoices, ProjectColumn, Projects,
    SoftDelete, Table, ToolUsage, ToolUsageColumn,
};
pub use utils::current_timestamp;
