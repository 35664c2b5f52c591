//! SQLite adapter for the database port.
//!
//! The table schema is owned by the operator (one REAL column per
//! expected snapshot key plus a `timestamp` TEXT column); the daemon
//! only inserts. Identifier validation happens in the writer before
//! statements are built, so names are interpolated and values bound.

use crate::core::error::DbError;
use crate::storage::database::{Connector, Database};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::ErrorCode;
use std::path::{Path, PathBuf};

pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Connector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn Database>, DbError> {
        let conn = rusqlite::Connection::open(&self.path)
            .map_err(|err| DbError::Connection(err.to_string()))?;
        Ok(Box::new(SqliteDatabase { conn }))
    }
}

pub struct SqliteDatabase {
    conn: rusqlite::Connection,
}

impl Database for SqliteDatabase {
    fn execute_insert(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[f64],
        timestamp: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(classify)?;

        let column_list = columns.join(", ");
        let placeholders = (0..=columns.len())
            .map(|i| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql =
            format!("INSERT INTO {table} (timestamp, {column_list}) VALUES ({placeholders})");

        let mut params: Vec<SqlValue> = Vec::with_capacity(values.len() + 1);
        params.push(SqlValue::Text(timestamp.to_rfc3339()));
        params.extend(values.iter().map(|v| SqlValue::Real(*v)));

        self.conn
            .execute(&sql, rusqlite::params_from_iter(params))
            .map(|_| ())
            .map_err(classify)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT").map_err(classify)
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("ROLLBACK").map_err(classify)
    }
}

/// Split sqlite failures by recovery strategy: storage-level codes tear
/// the connection down, everything else is a statement problem.
fn classify(err: rusqlite::Error) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure => DbError::Connection(err.to_string()),
            _ => DbError::Statement(err.to_string()),
        },
        _ => DbError::Statement(err.to_string()),
    }
}
