//! Readout loop: the periodic heart of the controller.
//!
//! One task owns the whole cycle: read all sensors, advance every PID
//! loop, dispatch AUTO outputs, persist, publish, and store the
//! snapshot for `GET data`. Running as a single task with sequential
//! awaits makes overlapping cycles impossible; a cycle that takes
//! longer than the interval simply delays the next one.

use crate::control::plane::ControlPlane;
use crate::core::error::IoError;
use crate::io::{InputOutput, Snapshot};
use crate::ops::publisher::Publisher;
use crate::storage::database::PersistenceWriter;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

pub struct ReadoutLoop {
    plane: Arc<ControlPlane>,
    io: Arc<dyn InputOutput>,
    writer: PersistenceWriter,
    publisher: Arc<dyn Publisher>,
    latest: Arc<RwLock<Snapshot>>,
    interval_rx: watch::Receiver<u64>,
    shutdown_rx: watch::Receiver<bool>,
}

enum Step {
    Cycle,
    Rearm,
    Stop,
}

impl ReadoutLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plane: Arc<ControlPlane>,
        io: Arc<dyn InputOutput>,
        writer: PersistenceWriter,
        publisher: Arc<dyn Publisher>,
        latest: Arc<RwLock<Snapshot>>,
        interval_rx: watch::Receiver<u64>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            plane,
            io,
            writer,
            publisher,
            latest,
            interval_rx,
            shutdown_rx,
        }
    }

    /// Run until the shutdown flag is raised. Interval changes arriving
    /// on the watch channel re-arm the timer immediately.
    pub async fn run(mut self) {
        debug!(interval_ms = *self.interval_rx.borrow(), "readout loop started");
        loop {
            let interval = Duration::from_millis((*self.interval_rx.borrow()).max(1));
            let step = tokio::select! {
                _ = tokio::time::sleep(interval) => Step::Cycle,
                changed = self.interval_rx.changed() => match changed {
                    Ok(()) => Step::Rearm,
                    Err(_) => Step::Stop,
                },
                changed = self.shutdown_rx.changed() => match changed {
                    Ok(()) if !*self.shutdown_rx.borrow() => Step::Rearm,
                    // Flag raised, or the runtime dropped the sender.
                    _ => Step::Stop,
                }
            };
            match step {
                Step::Cycle => self.cycle(Instant::now()),
                Step::Rearm => {
                    debug!(interval_ms = *self.interval_rx.borrow(), "readout interval changed");
                }
                Step::Stop => break,
            }
        }
        self.writer.close();
        debug!("readout loop stopped");
    }

    /// One complete readout cycle. Synchronous so the semantics can be
    /// exercised without a timer.
    fn cycle(&mut self, now: Instant) {
        let mut snapshot = match self.io.read_all() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "sensor readout failed");
                Snapshot::new()
            }
        };

        for cycle_output in self.plane.run_cycle(&snapshot, now) {
            snapshot.insert(
                format!("pidOutput{}", cycle_output.id),
                cycle_output.output,
            );
            if let Some(channel) = cycle_output.channel {
                match self.io.write(&channel, cycle_output.output) {
                    Ok(()) => {}
                    Err(IoError::ChannelUnknown(name)) => {
                        warn!("Output '{name}' is unknown.");
                    }
                    Err(err) => warn!(channel, error = %err, "output dispatch failed"),
                }
            }
        }

        self.writer.write(&snapshot, chrono::Utc::now());
        self.publisher.publish(&snapshot);
        *self.latest.write() = snapshot;
    }
}
