//! Shared fixtures for the integration tests: a daemon running on an
//! OS-assigned port with its state in a temp directory.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thermod::core::logbuf::{LogBuffer, LogHandle};
use thermod::net::client::Intercom;
use thermod::{Config, Runtime, Snapshot};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct Daemon {
    pub addr: SocketAddr,
    pub snapshots: broadcast::Receiver<Snapshot>,
    pub handle: JoinHandle<anyhow::Result<()>>,
    pub dir: TempDir,
}

impl Daemon {
    pub fn intercom(&self) -> Intercom {
        Intercom::new(self.addr)
    }

    /// Remote shutdown followed by a bounded wait for the runtime task.
    /// Returns the state directory so a test can restart on top of it.
    pub async fn stop(self) -> TempDir {
        let intercom = self.intercom();
        intercom.off().await.expect("daemon should acknowledge OFF");
        intercom.poke().await;
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("daemon should stop within the accept timeout")
            .unwrap()
            .unwrap();
        self.dir
    }
}

/// TOML for a loopback daemon with everything under `dir`.
pub fn config_toml(dir: &TempDir, interval_ms: u64, database: Option<&str>) -> String {
    let mut toml = format!(
        r#"
[listener]
host = "127.0.0.1"
port = 0

[readout]
interval_ms = {interval_ms}

[io]
driver = "simulated"

[paths]
settings_file = "{}/settings.json"

[pids]
ids = ["0"]
"#,
        dir.path().display()
    );
    if let Some(path) = database {
        toml.push_str(&format!("\n[database]\npath = \"{path}\"\n"));
    }
    toml
}

/// Seed the settings file before the daemon opens it.
pub fn seed_settings(dir: &TempDir, values: serde_json::Value) {
    std::fs::write(
        dir.path().join("settings.json"),
        serde_json::to_vec_pretty(&values).unwrap(),
    )
    .unwrap();
}

pub async fn spawn_daemon(dir: TempDir, toml: &str) -> Daemon {
    let config = Config::from_toml(toml).expect("test config should be valid");
    let logs = Arc::new(LogBuffer::new(64));
    let mut runtime =
        Runtime::new(config, logs, LogHandle::noop()).expect("runtime should build");
    runtime.start().await.expect("runtime should start");
    let addr = runtime.local_addr().expect("listener should be bound");
    let snapshots = runtime.snapshots();
    let handle = tokio::spawn(runtime.run());
    Daemon {
        addr,
        snapshots,
        handle,
        dir,
    }
}

/// Daemon with default wiring: simulated io, 50 ms readout, no database.
pub async fn default_daemon() -> Daemon {
    let dir = tempfile::tempdir().unwrap();
    let toml = config_toml(&dir, 50, None);
    spawn_daemon(dir, &toml).await
}
