//! Event detector: decides whether the system wants the fan on.
//!
//! Wraps the table-driven [`Fsm`] with the per-sample bookkeeping the state
//! handlers should not care about: ordering, gap detection and draining the
//! emitted signal.  Only transitions produce output; every other sample
//! returns `None`.
//!
//! Each sensor gets its own [`EventDetector`] inside a [`DetectorBank`], so
//! a clean sensor never interrupts the debounce run of a smoky one.  The
//! system signal is ON while any recently reporting sensor is in `Alert`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::config::DetectorConfig;
use crate::fsm::context::DetectorContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::records::{Reading, SensorId, SwitchState};

/// Cloneable so a caller can roll back an observation whose signal could
/// not be persisted.
#[derive(Clone)]
pub struct EventDetector {
    fsm: Fsm,
    ctx: DetectorContext,
    last_sample_at: Option<DateTime<Utc>>,
}

impl EventDetector {
    /// A detector in `Quiet` with empty debounce counters.
    pub fn new(config: DetectorConfig) -> Self {
        let mut ctx = DetectorContext::new(config);
        let mut fsm = Fsm::new(build_state_table(), StateId::Quiet);
        fsm.start(&mut ctx);
        // Starting up is not a transition.
        ctx.emitted = None;
        Self {
            fsm,
            ctx,
            last_sample_at: None,
        }
    }

    /// Restore the state implied by the newest persisted system signal, so
    /// a restart during an event can still emit the closing OFF.
    pub fn resume(&mut self, state: SwitchState) {
        let target = match state {
            SwitchState::On => StateId::Alert,
            SwitchState::Off => StateId::Quiet,
        };
        self.fsm.force_transition(target, &mut self.ctx);
        self.ctx.emitted = None;
        self.ctx.reset_counters();
        info!("detector: resumed in {:?}", target);
    }

    /// Evaluate one sample against `baseline`.
    ///
    /// Returns the new system signal when the sample completes a transition.
    /// Samples not newer than the last one seen are ignored.
    pub fn observe(&mut self, reading: &Reading, baseline: Option<f64>) -> Option<SwitchState> {
        if let Some(last) = self.last_sample_at {
            if reading.timestamp <= last {
                debug!("detector: ignoring stale sample at {}", reading.timestamp);
                return None;
            }
            let gap = reading.timestamp - last;
            if gap > Duration::seconds(i64::from(self.ctx.config.max_gap_secs)) {
                if self.ctx.rise_count > 0 || self.ctx.return_count > 0 {
                    info!(
                        "detector: {}s gap in readings, resetting debounce counters",
                        gap.num_seconds()
                    );
                }
                self.ctx.reset_counters();
            }
        }
        self.last_sample_at = Some(reading.timestamp);

        if !reading.pm25.is_finite() {
            debug!("detector: non-finite sample dropped");
            return None;
        }

        self.ctx.sample = Some(reading.pm25);
        self.ctx.baseline = baseline;
        self.fsm.tick(&mut self.ctx);
        self.ctx.emitted.take()
    }

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// The signal the detector currently asserts.
    pub fn system_state(&self) -> SwitchState {
        SwitchState::from(self.state() == StateId::Alert)
    }

    pub fn last_sample_at(&self) -> Option<DateTime<Utc>> {
        self.last_sample_at
    }

    /// `(rise_count, return_count)`.
    pub fn counters(&self) -> (u32, u32) {
        (self.ctx.rise_count, self.ctx.return_count)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.ctx.config
    }
}

// ---------------------------------------------------------------------------
// Per-sensor bank
// ---------------------------------------------------------------------------

/// One [`EventDetector`] per sensor, combined into a single system signal.
///
/// A sensor counts toward the system signal only while its newest sample is
/// within `max_gap_secs` of the newest sample from any sensor; a sensor that
/// stops reporting cannot hold the fan on.  Samples at or before the last
/// one from the same sensor are dropped.
#[derive(Clone)]
pub struct DetectorBank {
    config: DetectorConfig,
    sensors: BTreeMap<SensorId, EventDetector>,
    /// State a sensor seen for the first time starts in.
    seed: SwitchState,
    system: SwitchState,
    newest: Option<DateTime<Utc>>,
}

impl DetectorBank {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            sensors: BTreeMap::new(),
            seed: SwitchState::Off,
            system: SwitchState::Off,
            newest: None,
        }
    }

    /// Restore the newest persisted system signal.  Until the system signal
    /// next drops, sensors start in that state, so every one of them has to
    /// confirm a return before the closing OFF.
    pub fn resume(&mut self, state: SwitchState) {
        self.sensors.clear();
        self.newest = None;
        self.seed = state;
        self.system = state;
        info!("detector bank: resumed with system signal {}", state);
    }

    /// Evaluate one sample from `reading.sensor` and return the new system
    /// signal if it changed.
    pub fn observe(&mut self, reading: &Reading, baseline: Option<f64>) -> Option<SwitchState> {
        let seed = self.seed;
        let config = &self.config;
        let detector = self.sensors.entry(reading.sensor).or_insert_with(|| {
            debug!("detector bank: new sensor {}", reading.sensor);
            let mut d = EventDetector::new(config.clone());
            if seed.is_on() {
                d.resume(seed);
            }
            d
        });
        if detector.last_sample_at().is_some_and(|t| reading.timestamp <= t) {
            debug!(
                "detector bank: ignoring stale sample from sensor {} at {}",
                reading.sensor, reading.timestamp
            );
            return None;
        }
        detector.observe(reading, baseline);

        let newest = self.newest.map_or(reading.timestamp, |t| t.max(reading.timestamp));
        self.newest = Some(newest);
        let fresh_after = newest - Duration::seconds(i64::from(self.config.max_gap_secs));
        let system = SwitchState::from(self.sensors.values().any(|d| {
            d.system_state().is_on() && d.last_sample_at().is_some_and(|t| t >= fresh_after)
        }));
        if system == self.system {
            return None;
        }

        self.system = system;
        if !system.is_on() {
            self.seed = SwitchState::Off;
        }
        info!(
            "detector bank: system signal {} (sensor {} at {})",
            system, reading.sensor, reading.timestamp
        );
        Some(system)
    }

    pub fn system_state(&self) -> SwitchState {
        self.system
    }

    pub fn sensor(&self, id: SensorId) -> Option<&EventDetector> {
        self.sensors.get(&id)
    }

    /// Where the next read should start: the oldest newest-sample among the
    /// known sensors, but never earlier than `max_gap_secs` before `now`.
    pub fn resume_point(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = now - Duration::seconds(i64::from(self.config.max_gap_secs));
        self.sensors
            .values()
            .filter_map(EventDetector::last_sample_at)
            .min()
            .map_or(floor, |t| t.max(floor))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
