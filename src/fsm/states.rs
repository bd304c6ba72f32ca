//! Concrete detector state handlers and table builder.
//!
//! ```text
//!            [K samples >= baseline + rise]
//!   QUIET ───────────────────────────────────▶ ALERT   (emit ON)
//!     ▲                                          │
//!     └──────────────────────────────────────────┘
//!            [M samples <= baseline + return]          (emit OFF)
//! ```
//!
//! The band between the two levels is the hysteresis band: a sample inside
//! it breaks a pending confirmation in either direction.

use super::context::DetectorContext;
use super::{StateDescriptor, StateId};
use crate::records::SwitchState;
use log::{debug, info, warn};

/// Build the static state table.  Called once per detector.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Quiet
        StateDescriptor {
            id: StateId::Quiet,
            name: "Quiet",
            on_enter: Some(quiet_enter),
            on_exit: None,
            on_update: quiet_update,
        },
        // Index 1: Alert
        StateDescriptor {
            id: StateId::Alert,
            name: "Alert",
            on_enter: Some(alert_enter),
            on_exit: None,
            on_update: alert_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  QUIET
// ═══════════════════════════════════════════════════════════════════════════

fn quiet_enter(ctx: &mut DetectorContext) {
    ctx.reset_counters();
    ctx.emitted = Some(SwitchState::Off);
    info!("QUIET: PM2.5 back near baseline, system signal OFF");
}

fn quiet_update(ctx: &mut DetectorContext) -> Option<StateId> {
    let pm25 = ctx.sample?;

    // Fail safe: without a baseline nothing counts toward a rising edge.
    let Some(level) = ctx.rise_level() else {
        if ctx.rise_count > 0 {
            warn!("QUIET: baseline unavailable, dropping pending rise count");
        }
        ctx.rise_count = 0;
        return None;
    };

    if pm25 >= level {
        ctx.rise_count += 1;
        debug!(
            "QUIET: {:.1} >= {:.1} ({}/{})",
            pm25, level, ctx.rise_count, ctx.config.rise_confirm_samples
        );
        if ctx.rise_count >= ctx.config.rise_confirm_samples {
            return Some(StateId::Alert);
        }
    } else {
        ctx.rise_count = 0;
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  ALERT
// ═══════════════════════════════════════════════════════════════════════════

fn alert_enter(ctx: &mut DetectorContext) {
    ctx.reset_counters();
    ctx.emitted = Some(SwitchState::On);
    info!(
        "ALERT: rising edge confirmed over {} samples, system signal ON",
        ctx.config.rise_confirm_samples
    );
}

fn alert_update(ctx: &mut DetectorContext) -> Option<StateId> {
    let pm25 = ctx.sample?;

    // Without a baseline there is no return level; hold the current state.
    let level = ctx.return_level()?;

    if pm25 <= level {
        ctx.return_count += 1;
        debug!(
            "ALERT: {:.1} <= {:.1} ({}/{})",
            pm25, level, ctx.return_count, ctx.config.return_confirm_samples
        );
        if ctx.return_count >= ctx.config.return_confirm_samples {
            return Some(StateId::Quiet);
        }
    } else {
        ctx.return_count = 0;
    }
    None
}
