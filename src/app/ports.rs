//! Port traits: the hexagonal boundary between decision logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlService / DeliveryLoop (domain)
//! ```
//!
//! Driven adapters (record store, pub/sub broker, relay state file, event
//! sinks) implement these traits.  The domain consumes them via generics,
//! so the decision engine never touches SQLite, MQTT or GPIO directly.
//!
//! ## Contract notes
//!
//! - **RecordStore** appends MUST be atomic: a reader never observes a
//!   partially written record.
//! - Every port error is recoverable at the call site.  A failed call turns
//!   the current cycle into a no-op; the next cycle retries.

use core::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::records::{Baseline, Reading, Signal, SignalLog, Source, SwitchState};

// ───────────────────────────────────────────────────────────────
// Record store (driven adapter: domain ↔ append-only database)
// ───────────────────────────────────────────────────────────────

/// Append-only store for readings, baselines and the three control logs.
pub trait RecordStore {
    /// Append one sensor reading.
    fn insert_reading(&mut self, reading: &Reading) -> Result<(), StoreError>;

    /// Readings from `source` with `timestamp >= since`, oldest first.
    fn readings_since(&self, source: Source, since: DateTime<Utc>)
    -> Result<Vec<Reading>, StoreError>;

    /// Append one baseline.
    fn insert_baseline(&mut self, baseline: &Baseline) -> Result<(), StoreError>;

    /// The newest baseline, if any was ever adopted.
    fn latest_baseline(&self) -> Result<Option<Baseline>, StoreError>;

    /// Up to `limit` newest baselines, oldest first.
    fn recent_baselines(&self, limit: usize) -> Result<Vec<Baseline>, StoreError>;

    /// Append one entry to a control log.
    fn append_signal(&mut self, log: SignalLog, signal: &Signal) -> Result<(), StoreError>;

    /// The newest entry of a control log.
    fn latest_signal(&self, log: SignalLog) -> Result<Option<Signal>, StoreError>;

    /// Entries of a control log with `timestamp >= since`, oldest first.
    fn signals_since(&self, log: SignalLog, since: DateTime<Utc>)
    -> Result<Vec<Signal>, StoreError>;

    // ── Named conveniences ────────────────────────────────────

    fn insert_system_control(&mut self, signal: &Signal) -> Result<(), StoreError> {
        self.append_signal(SignalLog::System, signal)
    }

    fn insert_user_control(&mut self, signal: &Signal) -> Result<(), StoreError> {
        self.append_signal(SignalLog::User, signal)
    }

    fn read_latest_user_control(&self) -> Result<Option<Signal>, StoreError> {
        self.latest_signal(SignalLog::User)
    }

    fn insert_filter_command(&mut self, signal: &Signal) -> Result<(), StoreError> {
        self.append_signal(SignalLog::Filter, signal)
    }
}

// ───────────────────────────────────────────────────────────────
// Command publisher (driven adapter: domain → pub/sub broker)
// ───────────────────────────────────────────────────────────────

/// Publishing side of the filter-command topic.
pub trait CommandPublisher {
    /// Publish `state` as its wire token.  `retain` asks the broker to hand
    /// the message to every future subscriber.
    fn publish(&mut self, state: SwitchState, retain: bool) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Command transport (driven adapter: broker → relay)
// ───────────────────────────────────────────────────────────────

/// Subscribing side of the filter-command topic.
///
/// The channel is best-effort: messages may be duplicated, reordered across
/// reconnects, or lost while disconnected.
pub trait CommandTransport {
    /// Establish a session with the broker.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Subscribe to `topic`.  Must be repeated after every `connect`.
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next payload on a subscribed topic.
    ///
    /// `Ok(None)` means nothing arrived; `Err(Disconnected)` means the
    /// session is gone and the caller must reconnect.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the session.  Infallible; errors are logged by the adapter.
    fn disconnect(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Relay state persistence (driven adapter: relay ↔ local file)
// ───────────────────────────────────────────────────────────────

/// Survives relay process restarts so the pin can be restored at boot.
pub trait RelayStateStore {
    fn load(&self) -> Result<Option<SwitchState>, StoreError>;
    fn save(&mut self, state: SwitchState) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`RecordStore`] and [`RelayStateStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or the write did not commit.
    Unavailable(String),
    /// A stored row could not be decoded.
    Corrupted(String),
}

/// Errors from [`CommandTransport`] and [`CommandPublisher`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker refused or did not answer the connection attempt.
    ConnectFailed(String),
    /// An established session was lost.
    Disconnected(String),
    /// The subscribe request was not accepted.
    SubscribeFailed(String),
    /// The publish request could not be queued.
    PublishFailed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Corrupted(msg) => write!(f, "corrupted record: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "connect failed: {msg}"),
            Self::Disconnected(msg) => write!(f, "disconnected: {msg}"),
            Self::SubscribeFailed(msg) => write!(f, "subscribe failed: {msg}"),
            Self::PublishFailed(msg) => write!(f, "publish failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}
