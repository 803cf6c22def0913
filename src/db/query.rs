//! Generic query engine over the pool.
//!
//! Every call is one borrow-run-release cycle. The connection is returned
//! before the result is inspected, so a failing statement never holds it.

use serde_json::Value as JsonValue;
use tracing::debug;

use super::builder::{
    delete_statement, insert_statement, select_by_id_statement, soft_delete_statement,
    update_statement,
};
use super::pool::DatabasePool;
use super::statement::{Row, RowSet, Statement, decode_row};
use super::table::{FieldMap, SoftDelete, Table};
use super::utils::current_timestamp;
use super::{DbError, DbResult};
use crate::realtime::{ChangeEvent, ChangeNotifier, ChangeOperation};

/// Data access entry point handed to request handlers.
///
/// Field names in the generic mutations come from [`Table::Column`]
/// types only; values are always bound as parameters. Raw statement
/// entry points ([`execute`](Self::execute) and friends) trust their
/// text: callers must never build it from request input.
#[derive(Clone, Debug)]
pub struct Database {
    pool: DatabasePool,
    notifier: Option<ChangeNotifier>,
}

impl Database {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            notifier: None,
        }
    }

    /// Emit a [`ChangeEvent`] after every successful generic mutation.
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Run one statement and return all rows it produced.
    pub async fn execute(&self, sql: &str, params: Vec<JsonValue>) -> DbResult<RowSet> {
        self.run(&Statement::new(sql, params)).await
    }

    /// First row, or `None` when the statement produced no rows.
    pub async fn fetch_one(&self, sql: &str, params: Vec<JsonValue>) -> DbResult<Option<Row>> {
        let rows = self.execute(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// All rows in the order the engine returned them.
    pub async fn fetch_many(&self, sql: &str, params: Vec<JsonValue>) -> DbResult<RowSet> {
        self.execute(sql, params).await
    }

    /// Run a prepared [`Statement`].
    pub async fn run(&self, statement: &Statement) -> DbResult<RowSet> {
        debug!("Executing: {}", statement.sql());
        if statement.controls_transaction() {
            return Err(DbError::InvalidStatement {
                message: "use run_transaction instead of transaction control".to_string(),
            });
        }

        let mut conn = self.pool.acquire().await?;
        let result = statement.query().fetch_all(conn.connection()?).await;
        conn.release();

        let rows = result.map_err(|e| DbError::query(statement.sql(), e))?;
        rows.iter().map(decode_row).collect()
    }

    async fn run_returning(&self, statement: &Statement) -> DbResult<Option<Row>> {
        Ok(self.run(statement).await?.into_iter().next())
    }

    /// Insert a row and return it with engine-assigned defaults.
    pub async fn insert<T: Table>(&self, fields: &FieldMap<T>) -> DbResult<Row> {
        let statement = insert_statement(fields);
        let row = self
            .run_returning(&statement)
            .await?
            .ok_or_else(|| DbError::InvalidStatement {
                message: format!("insert into {} returned no row", T::NAME),
            })?;
        self.emit::<T>(&row, ChangeOperation::Created);
        Ok(row)
    }

    /// Update by primary key. `None` when no row has that key.
    pub async fn update<T: Table>(
        &self,
        id: impl Into<JsonValue>,
        fields: &FieldMap<T>,
    ) -> DbResult<Option<Row>> {
        let statement = update_statement(id.into(), fields, &current_timestamp());
        let row = self.run_returning(&statement).await?;
        if let Some(row) = &row {
            self.emit::<T>(row, ChangeOperation::Updated);
        }
        Ok(row)
    }

    /// Remove by primary key, returning the removed row.
    pub async fn delete<T: Table>(&self, id: impl Into<JsonValue>) -> DbResult<Option<Row>> {
        let row = self.run_returning(&delete_statement::<T>(id.into())).await?;
        if let Some(row) = &row {
            self.emit::<T>(row, ChangeOperation::Deleted);
        }
        Ok(row)
    }

    /// Mark a row deleted by status. The row stays readable by key.
    pub async fn soft_delete<T: SoftDelete>(
        &self,
        id: impl Into<JsonValue>,
    ) -> DbResult<Option<Row>> {
        let statement = soft_delete_statement::<T>(id.into(), &current_timestamp());
        let row = self.run_returning(&statement).await?;
        if let Some(row) = &row {
            self.emit::<T>(row, ChangeOperation::Deleted);
        }
        Ok(row)
    }

    pub async fn find_by_id<T: Table>(&self, id: impl Into<JsonValue>) -> DbResult<Option<Row>> {
        self.run_returning(&select_by_id_statement::<T>(id.into()))
            .await
    }

    fn emit<T: Table>(&self, row: &Row, operation: ChangeOperation) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let entity_id = match row.get(T::PRIMARY_KEY) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => return,
            Some(other) => other.to_string(),
        };
        notifier.notify(ChangeEvent::new(T::NAME, entity_id, operation));
    }
}
