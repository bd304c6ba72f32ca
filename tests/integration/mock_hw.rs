//! Mock adapters for integration tests.
//!
//! Records every pin write, broker call and published command so tests can
//! assert on the full history without real GPIO or a broker.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use airguard::app::events::AppEvent;
use airguard::app::ports::{
    CommandPublisher, CommandTransport, EventSink, RelayStateStore, StoreError, TransportError,
};
use airguard::records::SwitchState;
use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

// ── MockPin ───────────────────────────────────────────────────

/// Output pin that remembers every level written to it.
#[derive(Debug, Default)]
pub struct MockPin {
    pub writes: Vec<bool>,
}

#[allow(dead_code)]
impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> Option<bool> {
        self.writes.last().copied()
    }
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.writes.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.writes.push(true);
        Ok(())
    }
}

/// Output pin whose every write fails.
#[derive(Debug, Default)]
pub struct BrokenPin;

impl ErrorType for BrokenPin {
    type Error = ErrorKind;
}

impl OutputPin for BrokenPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }
}

// ── MockTransport ─────────────────────────────────────────────

/// What the next `poll` returns.
#[derive(Debug, Clone)]
pub enum Incoming {
    Payload(Vec<u8>),
    Nothing,
    Drop,
}

/// Scripted broker connection.
///
/// `connect` pops the next entry of `connect_results` (success once the
/// script runs out); `poll` pops the next [`Incoming`] (nothing once the
/// script runs out).
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connect_results: VecDeque<bool>,
    pub incoming: VecDeque<Incoming>,
    pub connects: u32,
    pub subscriptions: Vec<String>,
    pub disconnects: u32,
    pub connected: bool,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connects(mut self, n: usize) -> Self {
        self.connect_results.extend(std::iter::repeat_n(false, n));
        self
    }

    pub fn then(mut self, incoming: Incoming) -> Self {
        self.incoming.push_back(incoming);
        self
    }

    pub fn then_payload(self, payload: &str) -> Self {
        self.then(Incoming::Payload(payload.as_bytes().to_vec()))
    }
}

impl CommandTransport for MockTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.connects += 1;
        if self.connect_results.pop_front().unwrap_or(true) {
            self.connected = true;
            Ok(())
        } else {
            Err(TransportError::ConnectFailed("broker unreachable".into()))
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::SubscribeFailed("not connected".into()));
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected("not connected".into()));
        }
        match self.incoming.pop_front().unwrap_or(Incoming::Nothing) {
            Incoming::Payload(p) => Ok(Some(p)),
            Incoming::Nothing => Ok(None),
            Incoming::Drop => {
                self.connected = false;
                Err(TransportError::Disconnected("connection reset".into()))
            }
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

// ── MockRelayState ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockRelayState {
    pub stored: Option<SwitchState>,
    pub saves: Vec<SwitchState>,
    pub fail_load: bool,
}

#[allow(dead_code)]
impl MockRelayState {
    pub fn with(state: SwitchState) -> Self {
        Self {
            stored: Some(state),
            ..Self::default()
        }
    }
}

impl RelayStateStore for MockRelayState {
    fn load(&self) -> Result<Option<SwitchState>, StoreError> {
        if self.fail_load {
            return Err(StoreError::Corrupted("bad record".into()));
        }
        Ok(self.stored)
    }

    fn save(&mut self, state: SwitchState) -> Result<(), StoreError> {
        self.stored = Some(state);
        self.saves.push(state);
        Ok(())
    }
}

// ── MockPublisher ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockPublisher {
    pub published: Vec<(SwitchState, bool)>,
    pub fail: bool,
}

#[allow(dead_code)]
impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<SwitchState> {
        self.published.last().map(|(s, _)| *s)
    }
}

impl CommandPublisher for MockPublisher {
    fn publish(&mut self, state: SwitchState, retain: bool) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::PublishFailed("broker down".into()));
        }
        self.published.push((state, retain));
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
