//! Flat transactions over a single borrowed connection.

use sqlx::SqliteConnection;
use tracing::{debug, error};

use super::query::Database;
use super::statement::{RowSet, Statement, decode_row};
use super::{DbError, DbResult};

impl Database {
    /// Run `statements` in order inside one transaction.
    ///
    /// Either every statement's effect is committed or, on the first
    /// failure, the transaction is rolled back and the failure returned
    /// with the index of the failing statement. A rollback failure is
    /// reported alongside the original error. The connection is released
    /// exactly once, after commit or rollback was attempted; a connection
    /// whose rollback failed is closed instead of being reused.
    ///
    /// Statements that begin, end or nest a transaction themselves are
    /// rejected with [`DbError::InvalidStatement`] before anything runs.
    pub async fn run_transaction(&self, statements: &[Statement]) -> DbResult<Vec<RowSet>> {
        if let Some(index) = statements.iter().position(Statement::controls_transaction) {
            return Err(DbError::InvalidStatement {
                message: format!("statement {} would end the enclosing transaction", index),
            });
        }

        let mut conn = self.pool().acquire().await?;
        conn.set_dirty(true);

        let outcome = run_statements(conn.connection()?, statements).await;
        if !matches!(
            &outcome,
            Err(DbError::Transaction {
                rollback: Some(_),
                ..
            })
        ) {
            conn.set_dirty(false);
        }
        conn.release();

        outcome
    }
}

async fn run_statements(
    conn: &mut SqliteConnection,
    statements: &[Statement],
) -> DbResult<Vec<RowSet>> {
    sqlx::query("BEGIN")
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::query("BEGIN", e))?;
    debug!("Transaction started ({} statements)", statements.len());

    let mut results = Vec::with_capacity(statements.len());
    for (index, statement) in statements.iter().enumerate() {
        let rows = match statement.query().fetch_all(&mut *conn).await {
            Ok(rows) => rows,
            Err(e) => {
                let source = DbError::query(statement.sql(), e);
                return Err(rollback(conn, index, source).await);
            }
        };
        match rows.iter().map(decode_row).collect::<DbResult<RowSet>>() {
            Ok(decoded) => results.push(decoded),
            Err(source) => return Err(rollback(conn, index, source).await),
        }
    }

    if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
        let source = DbError::query("COMMIT", e);
        return Err(rollback(conn, statements.len(), source).await);
    }
    debug!("Transaction committed");

    Ok(results)
}

async fn rollback(conn: &mut SqliteConnection, index: usize, source: DbError) -> DbError {
    let rollback = match sqlx::query("ROLLBACK").execute(&mut *conn).await {
        Ok(_) => {
            debug!("Transaction rolled back after statement {} failed", index);
            None
        }
        Err(e) => {
            error!(
                "Rollback failed after statement {} failed ({}): {}",
                index, source, e
            );
            Some(Box::new(DbError::query("ROLLBACK", e)))
        }
    };
    DbError::Transaction {
        index,
        source: Box::new(source),
        rollback,
    }
}
