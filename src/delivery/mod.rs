//! Command delivery loop: keeps the relay tracking the filter command.
//!
//! ```text
//!          connect + subscribe ok
//!   ┌──────────────┐ ─────────────▶ ┌───────────┐   poll: payload ──▶ validate ──▶ Relay::apply
//!   │ Disconnected │                │ Connected │
//!   └──────────────┘ ◀───────────── └───────────┘
//!       ▲   │ fail       poll: Err
//!       │   ▼
//!   ┌──────────────┐
//!   │ WaitingRetry │  (exponential backoff)
//!   └──────────────┘
//! ```
//!
//! While the link is down the pin keeps its last level.  Every successful
//! (re)connect re-subscribes and re-asserts the last known level; the
//! broker's retained message then delivers the latest command, which
//! [`Relay::apply`] ignores if it matches.

pub mod backoff;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use embedded_hal::digital::OutputPin;
use log::{debug, error, info, warn};

use crate::app::ports::{CommandTransport, RelayStateStore};
use crate::config::DeliveryConfig;
use crate::records::SwitchState;
use crate::relay::{Relay, RelayError};

use backoff::Backoff;

/// Longest single sleep in [`DeliveryLoop::run`], so shutdown stays prompt
/// during long backoffs.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    WaitingRetry { until: Instant },
}

/// What one [`DeliveryLoop::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Session (re)established and subscription active.
    Connected,
    /// A command changed the relay.
    Applied(SwitchState),
    /// A command matched the current relay state; pin untouched.
    Duplicate(SwitchState),
    /// Payload was not a valid token and was dropped.
    Malformed,
    /// Nothing arrived within the poll timeout.
    Idle,
    /// The session dropped; a retry is scheduled.
    Disconnected,
    /// Connect attempt failed or a retry is still pending.
    Backoff { retry_in: Duration },
    /// The pin write failed.
    RelayFailed,
}

pub struct DeliveryLoop<T, P, S>
where
    T: CommandTransport,
    P: OutputPin,
    S: RelayStateStore,
{
    transport: T,
    relay: Relay<P>,
    state_store: S,
    topic: String,
    backoff: Backoff,
    poll_timeout: Duration,
    link: LinkState,
}

impl<T, P, S> DeliveryLoop<T, P, S>
where
    T: CommandTransport,
    P: OutputPin,
    S: RelayStateStore,
{
    pub fn new(
        transport: T,
        relay: Relay<P>,
        state_store: S,
        config: &DeliveryConfig,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            relay,
            state_store,
            topic: topic.into(),
            backoff: Backoff::new(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
            ),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            link: LinkState::Disconnected,
        }
    }

    /// Drive the pin to the persisted state, if one was saved.
    pub fn restore(&mut self) -> Result<Option<SwitchState>, RelayError> {
        let saved = match self.state_store.load() {
            Ok(saved) => saved,
            Err(e) => {
                warn!("delivery: cannot read saved relay state: {}", e);
                None
            }
        };
        if let Some(state) = saved {
            self.relay.restore(state)?;
        }
        Ok(saved)
    }

    /// Advance the loop by one action.  `now` is only used for backoff
    /// bookkeeping, so tests can drive time explicitly.
    pub fn step(&mut self, now: Instant) -> DeliveryEvent {
        match self.link {
            LinkState::WaitingRetry { until } if now < until => DeliveryEvent::Backoff {
                retry_in: until - now,
            },
            LinkState::Disconnected | LinkState::WaitingRetry { .. } => self.try_connect(now),
            LinkState::Connected => match self.transport.poll(self.poll_timeout) {
                Ok(None) => DeliveryEvent::Idle,
                Ok(Some(payload)) => self.handle_payload(&payload),
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "delivery: link lost ({}), holding relay at {:?}, retry in {:?}",
                        e,
                        self.relay.applied(),
                        delay
                    );
                    self.link = LinkState::WaitingRetry { until: now + delay };
                    DeliveryEvent::Disconnected
                }
            },
        }
    }

    /// Restore, then step until `shutdown` is set, then disconnect.
    ///
    /// Fails only if the saved state cannot be driven onto the pin.
    /// Transport failures are retried inside the loop.
    pub fn run(&mut self, shutdown: &AtomicBool) -> crate::Result<()> {
        if let Err(e) = self.restore() {
            error!("delivery: restore failed: {}", e);
            return Err(e.into());
        }
        info!("delivery: tracking topic '{}'", self.topic);

        while !shutdown.load(Ordering::Relaxed) {
            if let DeliveryEvent::Backoff { retry_in } = self.step(Instant::now()) {
                std::thread::sleep(retry_in.min(SHUTDOWN_CHECK));
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Release the transport.  The pin keeps its last level.
    pub fn shutdown(&mut self) {
        if self.link == LinkState::Connected {
            self.transport.disconnect();
        }
        self.link = LinkState::Disconnected;
        info!(
            "delivery: stopped, relay left at {:?}",
            self.relay.applied()
        );
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn relay(&self) -> &Relay<P> {
        &self.relay
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state_store(&self) -> &S {
        &self.state_store
    }

    // ── Internal ──────────────────────────────────────────────

    fn try_connect(&mut self, now: Instant) -> DeliveryEvent {
        let result = self
            .transport
            .connect()
            .and_then(|()| self.transport.subscribe(&self.topic));

        match result {
            Ok(()) => {
                info!(
                    "delivery: connected after {} failed attempts, subscribed to '{}'",
                    self.backoff.attempt(),
                    self.topic
                );
                self.backoff.reset();
                self.link = LinkState::Connected;
                if let Err(e) = self.relay.reassert() {
                    error!("delivery: reassert after connect failed: {}", e);
                }
                DeliveryEvent::Connected
            }
            Err(e) => {
                self.transport.disconnect();
                let delay = self.backoff.next_delay();
                warn!(
                    "delivery: connect attempt {} failed ({}), retry in {:?}",
                    self.backoff.attempt(),
                    e,
                    delay
                );
                self.link = LinkState::WaitingRetry { until: now + delay };
                DeliveryEvent::Backoff { retry_in: delay }
            }
        }
    }

    fn handle_payload(&mut self, payload: &[u8]) -> DeliveryEvent {
        let state = match SwitchState::from_payload(payload) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "delivery: dropping malformed payload {:?}: {}",
                    String::from_utf8_lossy(payload),
                    e
                );
                return DeliveryEvent::Malformed;
            }
        };

        match self.relay.apply(state) {
            Ok(true) => {
                if let Err(e) = self.state_store.save(state) {
                    warn!("delivery: relay state not persisted: {}", e);
                }
                DeliveryEvent::Applied(state)
            }
            Ok(false) => {
                debug!("delivery: duplicate {}", state);
                DeliveryEvent::Duplicate(state)
            }
            Err(e) => {
                error!("delivery: {}", e);
                DeliveryEvent::RelayFailed
            }
        }
    }
}
