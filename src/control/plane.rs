//! Control plane: the registry of configured PID loops.
//!
//! Each loop is described entirely by runtime settings under the
//! `pid<id>/` prefix. `reconfigure` rebuilds a loop's regulator from
//! those keys; the intercom handler calls it after every SET that
//! touched the loop's prefix, so remote tuning takes effect on the next
//! readout cycle without a restart.

use crate::control::pid::{Pid, PidState};
use crate::core::settings::Settings;
use crate::io::Snapshot;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Minimum spacing between `lastOutput` persistence writes per loop.
/// Gates persistence only; the in-snapshot output is recorded every cycle.
const LAST_OUTPUT_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

struct LoopDescriptor {
    pid: Pid,
    state: PidState,
    sensors: Vec<String>,
    output_channel: String,
    last_persist: Option<Instant>,
}

/// One computed loop output for a readout cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutput {
    pub id: String,
    pub output: f64,
    /// Output channel to drive; `None` when the loop state forbids
    /// dispatch (OFF or MANUAL).
    pub channel: Option<String>,
}

pub struct ControlPlane {
    settings: Arc<Settings>,
    loops: RwLock<BTreeMap<String, LoopDescriptor>>,
}

impl ControlPlane {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            loops: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a loop id and load its configuration.
    pub fn register(&self, id: &str) {
        self.loops.write().insert(
            id.to_string(),
            LoopDescriptor {
                pid: Pid::new(1.0, 0.0, 0.0, 22.2),
                state: PidState::Off,
                sensors: Vec::new(),
                output_channel: format!("out{id}"),
                last_persist: None,
            },
        );
        self.reconfigure(id);
    }

    /// Rebuild a loop's regulator from the current settings. Unknown
    /// ids are ignored.
    pub fn reconfigure(&self, id: &str) {
        let mut loops = self.loops.write();
        let Some(descriptor) = loops.get_mut(id) else {
            return;
        };
        let key = |name: &str| format!("pid{id}/{name}");

        let mut pid = Pid::new(
            self.settings.get_f64(&key("Kp"), 1.0),
            self.settings.get_f64(&key("Ki"), 0.0),
            self.settings.get_f64(&key("Kd"), 0.0),
            self.settings.get_f64(&key("setpoint"), 22.2),
        );
        pid.set_output_limits(
            self.settings.get_opt_f64(&key("lowerLimit")),
            self.settings.get_opt_f64(&key("upperLimit")),
        );
        let auto_mode = self.settings.get_bool(&key("autoMode"), true);
        let last_output = self.settings.get_opt_f64(&key("lastOutput"));
        pid.set_auto_mode(false, None);
        pid.set_auto_mode(auto_mode, last_output);

        let sensors: Vec<String> = self
            .settings
            .get_str(&key("sensor"), "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if sensors.is_empty() {
            warn!("PID '{id}' does not have sensors configured.");
        }

        descriptor.pid = pid;
        descriptor.state =
            PidState::from_code(self.settings.get_i64(&key("state"), 0));
        descriptor.sensors = sensors;
        descriptor.output_channel = self
            .settings
            .get_str(&key("output"), &format!("out{id}"));
    }

    /// Registered loop ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.loops.read().keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.loops.read().contains_key(id)
    }

    /// (P, I, D) contributions of a loop's last update.
    pub fn components(&self, id: &str) -> Option<(f64, f64, f64)> {
        self.loops.read().get(id).map(|d| d.pid.components())
    }

    /// Clear a loop's regulator state.
    pub fn reset(&self, id: &str) -> Option<()> {
        self.loops.write().get_mut(id).map(|d| d.pid.reset())
    }

    /// Advance every loop with the given sensor snapshot.
    ///
    /// Sensor fallback is first-match-wins over the configured list; a
    /// loop whose sensors are all absent is skipped with a warning.
    /// AUTO loops additionally persist `lastOutput`, rate limited per
    /// loop to one write per minute.
    pub fn run_cycle(&self, snapshot: &Snapshot, now: Instant) -> Vec<CycleOutput> {
        let mut outputs = Vec::new();
        let mut pending_persists = Vec::new();
        {
            let mut loops = self.loops.write();
            for (id, descriptor) in loops.iter_mut() {
                let Some(input) = descriptor
                    .sensors
                    .iter()
                    .find_map(|s| snapshot.get(s).copied())
                else {
                    warn!("PID '{id}' does not have sensors configured.");
                    continue;
                };

                let Some(output) = descriptor.pid.update(input, now) else {
                    continue;
                };

                let dispatch = descriptor.state.dispatches();
                if dispatch {
                    let due = descriptor
                        .last_persist
                        .map(|t| now.saturating_duration_since(t) >= LAST_OUTPUT_PERSIST_INTERVAL)
                        .unwrap_or(true);
                    if due {
                        pending_persists.push((format!("pid{id}/lastOutput"), output));
                        descriptor.last_persist = Some(now);
                    }
                }

                outputs.push(CycleOutput {
                    id: id.clone(),
                    output,
                    channel: dispatch.then(|| descriptor.output_channel.clone()),
                });
            }
        }
        // Persist after releasing the registry lock; set() touches the
        // disk and must not block intercom handlers.
        for (key, output) in pending_persists {
            self.settings.set(&key, json!(output));
        }
        outputs
    }
}
