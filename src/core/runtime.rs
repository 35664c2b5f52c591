//! Daemon runtime: owns every long-lived component and the start/stop
//! order.
//!
//! Start order: settings store, io driver, control plane, persistence,
//! readout loop, listener. Stop reverses it: raise the shutdown flag,
//! wait (bounded) for the listener and the readout loop, then release
//! the hardware. The readout loop closes the database itself on exit.

use crate::control::plane::ControlPlane;
use crate::control::readout::ReadoutLoop;
use crate::core::config::Config;
use crate::core::logbuf::{LogBuffer, LogHandle};
use crate::core::settings::Settings;
use crate::io::{self, InputOutput, Snapshot};
use crate::net::handler::HandlerContext;
use crate::net::listener::IntercomListener;
use crate::ops::publisher::{BroadcastPublisher, Publisher};
use crate::storage::database::{Connector, NullConnector, PersistenceWriter};
#[cfg(feature = "sqlite")]
use crate::storage::sqlite::SqliteConnector;
use anyhow::Context;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Runtime {
    config: Config,
    settings: Arc<Settings>,
    plane: Arc<ControlPlane>,
    io: Arc<dyn InputOutput>,
    logs: Arc<LogBuffer>,
    log_handle: LogHandle,
    publisher: Arc<BroadcastPublisher>,
    latest: Arc<RwLock<Snapshot>>,
    interval_tx: watch::Sender<u64>,
    shutdown_tx: watch::Sender<bool>,
    listener_handle: Option<JoinHandle<()>>,
    readout_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Runtime {
    pub fn new(config: Config, logs: Arc<LogBuffer>, log_handle: LogHandle) -> anyhow::Result<Self> {
        config.validate()?;

        let settings_file = Path::new(&config.paths.settings_file);
        if let Some(parent) = settings_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("cannot create settings directory {}", parent.display())
                })?;
            }
        }
        let settings = Arc::new(Settings::open(settings_file)?);
        let io: Arc<dyn InputOutput> = Arc::from(io::make_driver(&config.io.driver)?);
        let plane = Arc::new(ControlPlane::new(settings.clone()));

        let initial_interval = settings.get_u64("readoutInterval", config.readout.interval_ms);
        let (interval_tx, _) = watch::channel(initial_interval);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            settings,
            plane,
            io,
            logs,
            log_handle,
            publisher: Arc::new(BroadcastPublisher::new(16)),
            latest: Arc::new(RwLock::new(Snapshot::new())),
            interval_tx,
            shutdown_tx,
            listener_handle: None,
            readout_handle: None,
            local_addr: None,
        })
    }

    /// Bring every component up. Idempotence is not needed; the caller
    /// starts once and runs until shutdown.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        for id in &self.config.pids.ids {
            self.plane.register(id);
        }

        let connector: Arc<dyn Connector> = match &self.config.database.path {
            #[cfg(feature = "sqlite")]
            Some(path) => Arc::new(SqliteConnector::new(path)),
            #[cfg(not(feature = "sqlite"))]
            Some(_) => {
                warn!("built without the sqlite feature, persistence disabled");
                Arc::new(NullConnector)
            }
            None => Arc::new(NullConnector),
        };
        let writer = PersistenceWriter::connect(connector, self.settings.clone());
        if !writer.connected() && self.config.database.path.is_some() {
            warn!("database not reachable at startup, writes will retry");
        }

        let publisher: Arc<dyn Publisher> = self.publisher.clone();
        let readout = ReadoutLoop::new(
            self.plane.clone(),
            self.io.clone(),
            writer,
            publisher,
            self.latest.clone(),
            self.interval_tx.subscribe(),
            self.shutdown_tx.subscribe(),
        );
        self.readout_handle = Some(tokio::spawn(readout.run()));

        let listener =
            IntercomListener::bind(self.config.listener_host(), self.config.listener.port)
                .await?;
        self.local_addr = Some(listener.local_addr());

        let ctx = Arc::new(HandlerContext {
            settings: self.settings.clone(),
            plane: self.plane.clone(),
            io: self.io.clone(),
            logs: self.logs.clone(),
            log_handle: self.log_handle.clone(),
            latest: self.latest.clone(),
            interval_tx: self.interval_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        });
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.listener_handle = Some(tokio::spawn(listener.run(ctx, shutdown_rx)));

        info!("runtime started");
        Ok(())
    }

    /// Address the listener actually bound to. `None` before `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Subscribe to readout snapshots.
    pub fn snapshots(&self) -> tokio::sync::broadcast::Receiver<Snapshot> {
        self.publisher.subscribe()
    }

    /// Block until ctrl-c or a remote OFF, then stop everything.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("cannot listen for ctrl-c")?;
                info!("interrupt received");
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown requested over the intercom");
            }
        }
        self.stop().await;
        Ok(())
    }

    /// Raise the shutdown flag and wait (bounded) for the tasks.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in [
            ("listener", self.listener_handle.take()),
            ("readout loop", self.readout_handle.take()),
        ] {
            let Some(handle) = handle else { continue };
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(task = name, error = %err, "task ended abnormally"),
                Err(_) => warn!(task = name, "task did not stop in time"),
            }
        }

        self.io.close();
        info!("runtime stopped");
    }
}
