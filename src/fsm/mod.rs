//! Function-pointer finite state machine engine for the event detector.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  StateTable                                               │
//! │  ┌─────────┬───────────┬──────────┬───────────────────┐   │
//! │  │ StateId │ on_enter  │ on_exit  │ on_update         │   │
//! │  ├─────────┼───────────┼──────────┼───────────────────┤   │
//! │  │ Quiet   │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │   │
//! │  │ Alert   │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │   │
//! │  └─────────┴───────────┴──────────┴───────────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the **current** state.
//! If it returns `Some(next_id)`, the engine runs `on_exit` for the
//! current state, then `on_enter` for the next, and updates the
//! current pointer.  All functions receive `&mut DetectorContext`, which
//! holds the sample under evaluation, the baseline, the debounce
//! counters and the configuration.

pub mod context;
pub mod states;

use context::DetectorContext;
use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Detector states.
/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    /// PM2.5 near baseline; the system does not want the fan.
    Quiet = 0,
    /// Pollution event in progress; the system wants the fan.
    Alert = 1,
}

impl StateId {
    /// Total number of states: used to size the table array.
    pub const COUNT: usize = 2;

    /// Convert an index back to `StateId`.  Out-of-range indices map to
    /// `Quiet`, the fail-safe state.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            1 => Self::Alert,
            0 => Self::Quiet,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Quiet
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut DetectorContext);

/// Signature for the per-sample update handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut DetectorContext) -> Option<StateId>;

/// Static descriptor for a single FSM state.
#[derive(Clone)]
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    /// Call once after construction, before the first `tick()`.
    pub fn start(&mut self, ctx: &mut DetectorContext) {
        info!("detector FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance the FSM by one sample.
    pub fn tick(&mut self, ctx: &mut DetectorContext) {
        let next = (self.table[self.current].on_update)(ctx);

        if let Some(next_id) = next {
            self.transition(next_id, ctx);
        }
    }

    /// Jump straight to `next`, running exit/enter actions.  No-op if
    /// already there.
    pub fn force_transition(&mut self, next: StateId, ctx: &mut DetectorContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    fn transition(&mut self, next_id: StateId, ctx: &mut DetectorContext) {
        let next_idx = next_id as usize;

        info!(
            "detector FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
