//! Control combinator: the single authority on the filter command.
//!
//! The filter runs only while the system wants it **and** the user allows
//! it.  A missing signal counts as OFF, so an empty user log keeps the fan
//! off no matter what the detector says.
//!
//! | system | user | command |
//! |--------|------|---------|
//! | ON     | ON   | ON      |
//! | ON     | OFF  | OFF     |
//! | OFF    | ON   | OFF     |
//! | OFF    | OFF  | OFF     |
//! | absent | any  | OFF     |
//! | any    | absent | OFF   |

use chrono::{DateTime, Utc};
use log::info;

use crate::records::{Signal, SwitchState};

/// AND of the two control signals; absent inputs are OFF.
pub fn combine(system: Option<SwitchState>, user: Option<SwitchState>) -> SwitchState {
    SwitchState::from(
        system.is_some_and(SwitchState::is_on) && user.is_some_and(SwitchState::is_on),
    )
}

/// Emits a new filter command only when the combined state changes.
#[derive(Debug, Default)]
pub struct ControlCombinator {
    last_emitted: Option<SwitchState>,
}

impl ControlCombinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the newest persisted filter command so a restart does not
    /// append a duplicate.
    pub fn seed(&mut self, last: Option<SwitchState>) {
        self.last_emitted = last;
    }

    /// Combine the latest inputs.  Returns the command to append when it
    /// differs from the last one emitted.
    pub fn evaluate(
        &mut self,
        system: Option<SwitchState>,
        user: Option<SwitchState>,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        let state = combine(system, user);
        if self.last_emitted == Some(state) {
            return None;
        }
        info!(
            "combinator: system={:?} user={:?} -> filter {}",
            system, user, state
        );
        Some(Signal::new(now, state))
    }

    /// Record that `state` was persisted.  Kept separate from `evaluate` so
    /// a failed append is retried on the next cycle.
    pub fn commit(&mut self, state: SwitchState) {
        self.last_emitted = Some(state);
    }

    pub fn last_emitted(&self) -> Option<SwitchState> {
        self.last_emitted
    }
}
