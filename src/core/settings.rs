//! Runtime configuration store.
//!
//! Settings are a flat map of dotted/slashed key paths (e.g.
//! `pid0/setpoint`) to JSON values, shared between the intercom handlers
//! and the readout loop. Every write is persisted to a JSON file so the
//! controller resumes with the values it last saw; persistence failures
//! are logged and never surfaced to the caller.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Thread-safe key/value store with write-through JSON persistence.
pub struct Settings {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, Value>>,
}

impl Settings {
    /// Store without a backing file. Used by tests and the `stop`/`get`
    /// client paths that never persist anything.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open a store backed by `path`, loading existing values if the
    /// file exists. A missing file is a fresh store, not an error.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice::<BTreeMap<String, Value>>(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    /// Look up a key. `None` if the key was never set.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Store a key and persist the whole map.
    pub fn set(&self, key: &str, value: Value) {
        {
            let mut values = self.values.write();
            values.insert(key.to_string(), value);
        }
        self.persist();
    }

    /// Snapshot of every stored key.
    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.values.read().clone()
    }

    /// Float getter with default. Accepts JSON numbers, bools and
    /// numeric strings, matching what remote peers actually send.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| coerce_f64(&v)).unwrap_or(default)
    }

    /// Float getter where absence (or null) means "unset".
    pub fn get_opt_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| coerce_f64(&v))
    }

    /// Unsigned integer getter with default.
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| coerce_f64(&v))
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
            .unwrap_or(default)
    }

    /// Signed integer getter with default.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| coerce_f64(&v))
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
            .unwrap_or(default)
    }

    /// Bool getter with default. `"true"`/`"false"` strings and 0/1
    /// numbers coerce.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// String getter with default.
    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let values = self.values.read();
        let result = serde_json::to_vec_pretty(&*values)
            .map_err(std::io::Error::other)
            .and_then(|raw| std::fs::write(path, raw));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "failed to persist settings");
        }
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_key_yields_default() {
        let settings = Settings::in_memory();
        assert_eq!(settings.get("pid0/Kp"), None);
        assert_eq!(settings.get_f64("pid0/Kp", 1.0), 1.0);
        assert!(settings.get_bool("pid0/autoMode", true));
    }

    #[test]
    fn typed_getters_coerce_strings() {
        let settings = Settings::in_memory();
        settings.set("pid0/Kp", json!("2.5"));
        settings.set("pid0/state", json!("2"));
        settings.set("pid0/autoMode", json!("false"));
        assert_eq!(settings.get_f64("pid0/Kp", 0.0), 2.5);
        assert_eq!(settings.get_i64("pid0/state", 0), 2);
        assert!(!settings.get_bool("pid0/autoMode", true));
    }

    #[test]
    fn null_counts_as_unset_for_limits() {
        let settings = Settings::in_memory();
        settings.set("pid0/lowerLimit", Value::Null);
        assert_eq!(settings.get_opt_f64("pid0/lowerLimit"), None);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = Settings::open(&path).unwrap();
        settings.set("pid0/setpoint", json!(25.0));
        settings.set("pid0/sensor", json!("sensor0,sensor1"));
        drop(settings);

        let reloaded = Settings::open(&path).unwrap();
        assert_eq!(reloaded.get_f64("pid0/setpoint", 0.0), 25.0);
        assert_eq!(
            reloaded.get_str("pid0/sensor", ""),
            "sensor0,sensor1".to_string()
        );
    }

    #[test]
    fn opening_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::open(dir.path().join("nothing.json")).unwrap();
        assert!(settings.dump().is_empty());
    }
}
