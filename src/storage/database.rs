//! Database port and the persistence retry policy.
//!
//! The readout loop hands every snapshot to [`PersistenceWriter`]. The
//! writer never returns an error: the controller keeps regulating with
//! or without a database, so every failure here degrades to a log line.
//!
//! Reconnection is deliberately lazy. While disconnected, a counter is
//! bumped per skipped write and every tenth consecutive miss performs
//! exactly one reconnect attempt, which keeps a dead database from
//! being hammered every cycle.

use crate::core::error::DbError;
use crate::core::settings::Settings;
use crate::io::Snapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes skipped while disconnected before one reconnect attempt.
pub const RECONNECT_THRESHOLD: u32 = 10;

/// One open database connection.
pub trait Database: Send {
    /// Insert one row: `timestamp` plus one column per snapshot key,
    /// all values bound as parameters.
    fn execute_insert(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[f64],
        timestamp: DateTime<Utc>,
    ) -> Result<(), DbError>;

    fn commit(&mut self) -> Result<(), DbError>;

    fn rollback(&mut self) -> Result<(), DbError>;

    fn close(&mut self) {}
}

/// Factory producing fresh connections.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Database>, DbError>;
}

/// Connector for hosts with persistence disabled: never connects.
pub struct NullConnector;

impl Connector for NullConnector {
    fn connect(&self) -> Result<Box<dyn Database>, DbError> {
        Err(DbError::Connection("persistence disabled".into()))
    }
}

/// Snapshot writer with the reconnect backoff policy.
pub struct PersistenceWriter {
    connector: Arc<dyn Connector>,
    settings: Arc<Settings>,
    db: Option<Box<dyn Database>>,
    tries: u32,
}

impl PersistenceWriter {
    /// Create the writer and make the initial connection attempt.
    pub fn connect(connector: Arc<dyn Connector>, settings: Arc<Settings>) -> Self {
        let mut writer = Self {
            connector,
            settings,
            db: None,
            tries: 0,
        };
        writer.reconnect();
        writer
    }

    pub fn connected(&self) -> bool {
        self.db.is_some()
    }

    /// Consecutive writes skipped since the connection was lost.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Persist one snapshot. Infallible by contract; all failures are
    /// logged and absorbed.
    pub fn write(&mut self, snapshot: &Snapshot, timestamp: DateTime<Utc>) {
        if self.db.is_none() {
            self.tries += 1;
            if self.tries >= RECONNECT_THRESHOLD {
                self.tries = 0;
                self.reconnect();
            }
            return;
        }

        if snapshot.is_empty() {
            return;
        }

        let table = self.settings.get_str("database/table", "");
        if table.is_empty() {
            warn!("No database table configured.");
            return;
        }
        if !valid_identifier(&table) || !snapshot.keys().all(|k| valid_identifier(k)) {
            warn!(table, "refusing insert with non-identifier table or column name");
            return;
        }

        let columns: Vec<&str> = snapshot.keys().map(String::as_str).collect();
        let values: Vec<f64> = snapshot.values().copied().collect();

        let result = match self.db.as_mut() {
            Some(db) => db
                .execute_insert(&table, &columns, &values, timestamp)
                .and_then(|()| db.commit()),
            None => return,
        };
        match result {
            Ok(()) => debug!(table, columns = columns.len(), "snapshot persisted"),
            Err(err) => self.handle_failure(err),
        }
    }

    fn handle_failure(&mut self, err: DbError) {
        if err.is_connection() {
            warn!(error = %err, "database connection lost");
            if let Some(mut db) = self.db.take() {
                db.close();
            }
            self.tries = 0;
            self.reconnect();
        } else {
            warn!(error = %err, "Database write error.");
            if let Some(db) = self.db.as_mut() {
                if let Err(err) = db.rollback() {
                    warn!(error = %err, "rollback failed");
                }
            }
        }
    }

    /// One connection attempt. Failure is logged, never returned.
    pub fn reconnect(&mut self) {
        match self.connector.connect() {
            Ok(db) => {
                self.db = Some(db);
                self.tries = 0;
                debug!("database connected");
            }
            Err(err) => {
                warn!(error = %err, "database connection attempt failed");
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(mut db) = self.db.take() {
            db.close();
        }
    }
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        inserts: Mutex<Vec<(String, Vec<String>, Vec<f64>)>>,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail_insert: Mutex<Option<DbError>>,
    }

    struct RecordingDb(Arc<Recorder>);

    impl Database for RecordingDb {
        fn execute_insert(
            &mut self,
            table: &str,
            columns: &[&str],
            values: &[f64],
            _timestamp: DateTime<Utc>,
        ) -> Result<(), DbError> {
            if let Some(err) = self.0.fail_insert.lock().take() {
                return Err(err);
            }
            self.0.inserts.lock().push((
                table.to_string(),
                columns.iter().map(|c| c.to_string()).collect(),
                values.to_vec(),
            ));
            Ok(())
        }

        fn commit(&mut self) -> Result<(), DbError> {
            self.0.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), DbError> {
            self.0.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingConnector {
        attempts: AtomicUsize,
        recorder: Arc<Recorder>,
        available: Mutex<bool>,
    }

    impl CountingConnector {
        fn new(available: bool) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                recorder: Arc::new(Recorder::default()),
                available: Mutex::new(available),
            }
        }
    }

    impl Connector for CountingConnector {
        fn connect(&self) -> Result<Box<dyn Database>, DbError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if *self.available.lock() {
                Ok(Box::new(RecordingDb(self.recorder.clone())))
            } else {
                Err(DbError::Connection("unavailable".into()))
            }
        }
    }

    fn settings_with_table() -> Arc<Settings> {
        let settings = Arc::new(Settings::in_memory());
        settings.set("database/table", json!("measurements"));
        settings
    }

    fn snapshot() -> Snapshot {
        let mut snap = Snapshot::new();
        snap.insert("sensor0".into(), 21.5);
        snap.insert("pidOutput0".into(), 0.7);
        snap
    }

    #[test]
    fn successful_write_inserts_and_commits() {
        let connector = Arc::new(CountingConnector::new(true));
        let mut writer = PersistenceWriter::connect(connector.clone(), settings_with_table());
        assert!(writer.connected());

        writer.write(&snapshot(), Utc::now());

        let inserts = connector.recorder.inserts.lock();
        assert_eq!(inserts.len(), 1);
        let (table, columns, values) = &inserts[0];
        assert_eq!(table, "measurements");
        assert_eq!(columns, &["pidOutput0", "sensor0"]);
        assert_eq!(values, &[0.7, 21.5]);
        assert_eq!(connector.recorder.commits.load(Ordering::SeqCst), 1);
        assert_eq!(connector.recorder.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_connection_backs_off_for_ten_writes() {
        let connector = Arc::new(CountingConnector::new(false));
        let mut writer = PersistenceWriter::connect(connector.clone(), settings_with_table());
        assert!(!writer.connected());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        for i in 1..RECONNECT_THRESHOLD {
            writer.write(&snapshot(), Utc::now());
            assert_eq!(writer.tries(), i);
            assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        }

        // Tenth consecutive miss: exactly one reconnect, counter reset.
        writer.write(&snapshot(), Utc::now());
        assert_eq!(writer.tries(), 0);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tenth_write_reconnects_and_resumes() {
        let connector = Arc::new(CountingConnector::new(false));
        let mut writer = PersistenceWriter::connect(connector.clone(), settings_with_table());

        *connector.available.lock() = true;
        for _ in 0..RECONNECT_THRESHOLD {
            writer.write(&snapshot(), Utc::now());
        }
        assert!(writer.connected());

        writer.write(&snapshot(), Utc::now());
        assert_eq!(connector.recorder.inserts.lock().len(), 1);
    }

    #[test]
    fn statement_failure_rolls_back_and_keeps_connection() {
        let connector = Arc::new(CountingConnector::new(true));
        let mut writer = PersistenceWriter::connect(connector.clone(), settings_with_table());

        *connector.recorder.fail_insert.lock() = Some(DbError::Statement("bad column".into()));
        writer.write(&snapshot(), Utc::now());

        assert!(writer.connected());
        assert_eq!(connector.recorder.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(connector.recorder.commits.load(Ordering::SeqCst), 0);

        // The connection still works for the next snapshot.
        writer.write(&snapshot(), Utc::now());
        assert_eq!(connector.recorder.commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_failure_drops_and_reconnects_once() {
        let connector = Arc::new(CountingConnector::new(true));
        let mut writer = PersistenceWriter::connect(connector.clone(), settings_with_table());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        *connector.recorder.fail_insert.lock() = Some(DbError::Connection("gone".into()));
        writer.write(&snapshot(), Utc::now());

        // One immediate reconnect attempt followed the drop.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(connector.recorder.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_table_skips_the_write() {
        let connector = Arc::new(CountingConnector::new(true));
        let settings = Arc::new(Settings::in_memory());
        let mut writer = PersistenceWriter::connect(connector.clone(), settings);

        writer.write(&snapshot(), Utc::now());
        assert!(connector.recorder.inserts.lock().is_empty());
    }

    #[test]
    fn hostile_table_name_is_rejected() {
        let connector = Arc::new(CountingConnector::new(true));
        let settings = Arc::new(Settings::in_memory());
        settings.set("database/table", json!("measurements; DROP TABLE x"));
        let mut writer = PersistenceWriter::connect(connector.clone(), settings);

        writer.write(&snapshot(), Utc::now());
        assert!(connector.recorder.inserts.lock().is_empty());
    }

    #[test]
    fn null_connector_never_connects() {
        let writer =
            PersistenceWriter::connect(Arc::new(NullConnector), Arc::new(Settings::in_memory()));
        assert!(!writer.connected());
    }
}
