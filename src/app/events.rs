//! Outbound application events.
//!
//! The [`ControlService`](super::service::ControlService) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on the
//! other side decide what to do with them: log them, count them in tests,
//! or forward them to a dashboard.

use crate::baseline::BaselineOutcome;
use crate::records::{Signal, SwitchState};

/// Which evaluation cycle produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Baseline,
    Detector,
    Combinator,
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The service has started (carries the restored detector state).
    Started(SwitchState),

    /// A baseline run finished, whatever its outcome.
    BaselineEvaluated(BaselineOutcome),

    /// The event detector changed state and the signal was persisted.
    SystemSignal(Signal),

    /// A new filter command was persisted.
    FilterCommand(Signal),

    /// A command was handed to the broker.
    Published { state: SwitchState, retained: bool },

    /// Publishing failed; the next cycle retries.
    PublishFailed(String),

    /// The record store failed; the cycle did nothing.
    StoreUnavailable { cycle: Cycle, detail: String },

    /// The user enable switch was changed through the service.
    UserControl(Signal),
}
