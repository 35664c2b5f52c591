//! Lifecycle tests: settings survive restarts, configs load from disk.

mod common;

use common::{config_toml, spawn_daemon};
use serde_json::json;
use thermod::Config;

#[tokio::test]
async fn settings_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let toml = config_toml(&dir, 50, None);

    let daemon = spawn_daemon(dir, &toml).await;
    daemon
        .intercom()
        .set(&json!({"pid0/setpoint": 37.5, "pid0/sensor": "sensor1"}))
        .await
        .unwrap();
    let dir = daemon.stop().await;

    // Same state directory, fresh process.
    let daemon = spawn_daemon(dir, &toml).await;
    let values = daemon
        .intercom()
        .get(&["pid0/setpoint".into(), "pid0/sensor".into()])
        .await
        .unwrap();
    assert_eq!(
        values,
        json!({"pid0/setpoint": 37.5, "pid0/sensor": "sensor1"})
    );
    daemon.stop().await;
}

#[tokio::test]
async fn config_file_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermod.toml");
    std::fs::write(&path, config_toml(&dir, 1234, None)).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.readout.interval_ms, 1234);
    assert_eq!(config.listener.port, 0);

    assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
}
