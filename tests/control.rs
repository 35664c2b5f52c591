//! Closed-loop behavior of a live daemon with the simulated plant.

mod common;

use common::{config_toml, seed_settings, spawn_daemon};
use serde_json::json;
use std::time::Duration;
use thermod::Snapshot;

async fn nth_snapshot(
    rx: &mut tokio::sync::broadcast::Receiver<Snapshot>,
    n: usize,
) -> Snapshot {
    let mut last = None;
    for _ in 0..n {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("snapshot should arrive")
            .expect("publisher should stay alive");
        last = Some(snapshot);
    }
    last.expect("at least one snapshot requested")
}

#[tokio::test]
async fn auto_loop_heats_the_simulated_plant() {
    let dir = tempfile::tempdir().unwrap();
    seed_settings(
        &dir,
        json!({
            "pid0/sensor": "sensor0",
            "pid0/state": 2,
            "pid0/setpoint": 25.0,
            "pid0/Kp": 2.0,
            "pid0/Ki": 0.5,
            "pid0/lowerLimit": 0.0,
            "pid0/upperLimit": 100.0
        }),
    );
    let toml = config_toml(&dir, 20, None);
    let mut daemon = spawn_daemon(dir, &toml).await;

    let first = nth_snapshot(&mut daemon.snapshots, 1).await;
    let later = nth_snapshot(&mut daemon.snapshots, 30).await;

    // The plant starts at the 20.0 baseline and the loop drives it up.
    assert!(later["sensor0"] > first["sensor0"]);
    assert!(later["pidOutput0"] > 0.0);

    daemon.stop().await;
}

#[tokio::test]
async fn off_loop_records_output_but_never_drives() {
    let dir = tempfile::tempdir().unwrap();
    seed_settings(
        &dir,
        json!({
            "pid0/sensor": "sensor0",
            "pid0/state": 0,
            "pid0/setpoint": 30.0,
            "pid0/Kp": 10.0
        }),
    );
    let toml = config_toml(&dir, 20, None);
    let mut daemon = spawn_daemon(dir, &toml).await;

    let snapshot = nth_snapshot(&mut daemon.snapshots, 20).await;
    // Output is computed and recorded, but nothing heats the plant.
    assert!(snapshot["pidOutput0"] > 0.0);
    assert!((snapshot["sensor0"] - 20.0).abs() < 0.01);

    daemon.stop().await;
}

#[tokio::test]
async fn remote_retuning_takes_effect_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    seed_settings(
        &dir,
        json!({
            "pid0/sensor": "sensor0",
            "pid0/state": 1,
            "pid0/setpoint": 20.0,
            "pid0/Kp": 1.0,
            "pid0/Ki": 0.0
        }),
    );
    let toml = config_toml(&dir, 20, None);
    let mut daemon = spawn_daemon(dir, &toml).await;
    let intercom = daemon.intercom();

    // Plant sits at the baseline, setpoint 20: output ~0.
    let snapshot = nth_snapshot(&mut daemon.snapshots, 3).await;
    assert!(snapshot["pidOutput0"].abs() < 0.1);

    intercom
        .set(&json!({"pid0/setpoint": 30.0}))
        .await
        .unwrap();

    // After reconfigure the error is ~10 at Kp 1.
    let snapshot = nth_snapshot(&mut daemon.snapshots, 3).await;
    assert!((snapshot["pidOutput0"] - 10.0).abs() < 0.5);

    daemon.stop().await;
}

#[tokio::test]
async fn sensor_fallback_uses_the_second_sensor() {
    let dir = tempfile::tempdir().unwrap();
    seed_settings(
        &dir,
        json!({
            "pid0/sensor": "sensorMissing,sensor1",
            "pid0/state": 1,
            "pid0/setpoint": 22.0
        }),
    );
    let toml = config_toml(&dir, 20, None);
    let mut daemon = spawn_daemon(dir, &toml).await;

    let snapshot = nth_snapshot(&mut daemon.snapshots, 2).await;
    // sensor1 sits at the 20.0 baseline: error 2.0 at default Kp 1.
    assert!((snapshot["pidOutput0"] - 2.0).abs() < 0.1);

    daemon.stop().await;
}

#[tokio::test]
async fn interval_change_applies_at_the_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    seed_settings(&dir, json!({"pid0/sensor": "sensor0"}));
    // Glacial initial interval: no snapshots on their own.
    let toml = config_toml(&dir, 600_000, None);
    let mut daemon = spawn_daemon(dir, &toml).await;

    assert!(
        tokio::time::timeout(Duration::from_millis(300), daemon.snapshots.recv())
            .await
            .is_err(),
        "no snapshot expected at the initial interval"
    );

    daemon
        .intercom()
        .set(&json!({"readoutInterval": 20}))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), daemon.snapshots.recv())
        .await
        .expect("snapshot should arrive after the interval change")
        .unwrap();

    daemon.stop().await;
}
