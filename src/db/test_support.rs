//! Shared fixtures for database tests.

use std::time::Duration;

use tempfile::TempDir;

use super::{Database, DatabasePool};
use crate::config::PoolConfig;

const SCHEMA: &[&str] = &[
    "CREATE TABLE clients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT UNIQUE,
        company TEXT,
        phone TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id INTEGER REFERENCES clients(id),
        name TEXT NOT NULL,
        description TEXT,
        budget REAL,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE invoices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id INTEGER NOT NULL REFERENCES clients(id),
        project_id INTEGER REFERENCES projects(id),
        number TEXT NOT NULL UNIQUE,
        amount REAL NOT NULL CHECK (amount >= 0),
        currency TEXT NOT NULL DEFAULT 'USD',
        status TEXT NOT NULL DEFAULT 'draft',
        due_date TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE tool_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tool_id TEXT NOT NULL,
        tool_name TEXT,
        user_id TEXT,
        usage_type TEXT,
        execution_time_ms INTEGER,
        success BOOLEAN NOT NULL DEFAULT 1,
        error_message TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
];

/// Pool config for a file database inside `dir`.
///
/// File databases are used because every `sqlite::memory:` connection
/// opens its own empty database.
pub(crate) fn file_config(dir: &TempDir, capacity: u32) -> PoolConfig {
    PoolConfig {
        url: format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("dashboard.db").display()
        ),
        max_connections: capacity,
        idle_timeout: Duration::from_secs(30),
        connect_timeout: Duration::from_millis(500),
        max_waiters: 64,
    }
}

pub(crate) async fn test_pool(capacity: u32) -> (DatabasePool, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let pool = DatabasePool::connect(file_config(&dir, capacity))
        .await
        .expect("Failed to initialize pool");
    (pool, dir)
}

/// Initialized database with the dashboard tables created.
pub(crate) async fn test_db() -> (Database, TempDir) {
    let (pool, dir) = test_pool(4).await;
    let db = Database::new(pool);
    for ddl in SCHEMA {
        db.execute(ddl, vec![])
            .await
            .expect("Schema creation should succeed");
    }
    (db, dir)
}
