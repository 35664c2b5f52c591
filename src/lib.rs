//! thermod: an unattended lab temperature-control daemon.
//!
//! The daemon runs a periodic readout loop that samples every sensor,
//! advances a set of PID loops, drives heater outputs, persists each
//! snapshot to a database and publishes it to subscribers. A small TCP
//! intercom protocol (one request frame, one response frame, close)
//! lets operators retune loops, inspect data and logs, drive outputs
//! manually and shut the daemon down, all without touching the host.
//!
//! Module map:
//!
//! - [`core`]: configuration, settings store, errors, log capture and
//!   the runtime orchestrator
//! - [`control`]: PID math, the loop registry and the readout loop
//! - [`net`]: intercom wire codec, listener, connection handler, client
//! - [`io`]: sensor/output hardware port and its drivers
//! - [`storage`]: database port, retry policy and the SQLite adapter
//! - [`ops`]: snapshot publishing

pub mod cli;
pub mod control;
pub mod core;
pub mod io;
pub mod net;
pub mod ops;
pub mod storage;

pub use crate::core::config::Config;
pub use crate::core::runtime::Runtime;
pub use crate::io::Snapshot;
pub use crate::net::codec::{Command, Frame};
