//! Log capture for the intercom `GET log` command.
//!
//! A fixed-capacity ring buffer holds the most recent formatted log
//! lines. It is fed by a [`tracing_subscriber::Layer`] installed next to
//! the normal stderr layer, so remote operators can pull the recent log
//! without shell access to the host. `SET logLevel` swaps the env filter
//! at runtime through the reload handle.

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

/// Bounded ring of formatted log lines, oldest dropped first.
pub struct LogBuffer {
    inner: Mutex<Ring>,
}

struct Ring {
    slots: Vec<Option<String>>,
    write: usize,
    len: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Ring {
                slots: vec![None; capacity],
                write: 0,
                len: 0,
            }),
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        let mut ring = self.inner.lock();
        let write = ring.write;
        ring.slots[write] = Some(line);
        ring.write = (write + 1) % ring.slots.len();
        ring.len = (ring.len + 1).min(ring.slots.len());
    }

    /// All retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        let ring = self.inner.lock();
        let capacity = ring.slots.len();
        let start = (ring.write + capacity - ring.len) % capacity;
        (0..ring.len)
            .filter_map(|i| ring.slots[(start + i) % capacity].clone())
            .collect()
    }

    /// Drop everything (intercom `DEL log`).
    pub fn clear(&self) {
        let mut ring = self.inner.lock();
        ring.slots.iter_mut().for_each(|s| *s = None);
        ring.write = 0;
        ring.len = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Layer that mirrors every accepted event into a [`LogBuffer`].
pub struct RingBufferLayer {
    buffer: Arc<LogBuffer>,
}

impl RingBufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for RingBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.buffer.push(format!(
            "{} {} {}: {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            meta.level(),
            meta.target(),
            visitor.render()
        ));
    }
}

/// Collects the `message` field and everything else separately; field
/// visit order is not guaranteed.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    extras: String,
}

impl MessageVisitor {
    fn render(self) -> String {
        match (self.message.is_empty(), self.extras.is_empty()) {
            (false, false) => format!("{} {}", self.message, self.extras),
            (false, true) => self.message,
            _ => self.extras,
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            if !self.extras.is_empty() {
                self.extras.push(' ');
            }
            let _ = write!(self.extras, "{}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.extras.is_empty() {
                self.extras.push(' ');
            }
            let _ = write!(self.extras, "{}={value}", field.name());
        }
    }
}

/// Handle for runtime log-level changes.
///
/// Holds the reload handle of the installed env filter; [`LogHandle::noop`]
/// is used in tests that never install a global subscriber.
#[derive(Clone)]
pub struct LogHandle {
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogHandle {
    pub fn noop() -> Self {
        Self { reload: None }
    }

    /// Replace the active filter, e.g. `"debug"` or `"thermod=trace"`.
    pub fn set_level(&self, directive: &str) -> anyhow::Result<()> {
        let Some(handle) = &self.reload else {
            return Ok(());
        };
        let filter = directive.parse::<EnvFilter>()?;
        handle.reload(filter)?;
        Ok(())
    }
}

/// Install the global subscriber: env-filtered stderr output plus the
/// ring buffer layer. Returns the handle used for `SET logLevel`.
pub fn init(level: &str, buffer: Arc<LogBuffer>) -> anyhow::Result<LogHandle> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| level.parse::<EnvFilter>())?;
    let (filter, reload_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(RingBufferLayer::new(buffer))
        .try_init()?;
    Ok(LogHandle {
        reload: Some(reload_handle),
    })
}
