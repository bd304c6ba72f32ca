//! Application service: the hexagonal core.
//!
//! Each decision component runs as an independently triggered cycle that
//! reads its inputs from the [`RecordStore`] and appends its output back.
//! The cycles share no in-process state; the store is the only thing they
//! have in common.
//!
//! ```text
//!  RecordStore ──▶ ┌─────────────────────────────┐ ──▶ EventSink
//!                  │        ControlService        │
//!                  │ BaselineCycle               │
//!                  │ DetectorCycle               │ ──▶ CommandPublisher
//!                  │ CombinatorCycle             │
//!                  └─────────────────────────────┘
//! ```
//!
//! A port failure turns the current cycle into a no-op that is reported as
//! [`AppEvent::StoreUnavailable`] (or [`AppEvent::PublishFailed`]); the next
//! cycle retries from the persisted state.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::baseline::{BaselineEstimator, BaselineOutcome};
use crate::combinator::ControlCombinator;
use crate::config::{BaselineConfig, CombinatorConfig, DetectorConfig, SystemConfig};
use crate::detector::DetectorBank;
use crate::records::{Baseline, Signal, SignalLog, SwitchState};

use super::events::{AppEvent, Cycle};
use super::ports::{CommandPublisher, EventSink, RecordStore, StoreError};

// ───────────────────────────────────────────────────────────────
// Baseline cycle
// ───────────────────────────────────────────────────────────────

pub struct BaselineCycle {
    estimator: BaselineEstimator,
    /// Candidates discarded by consecutive runs, oldest first.
    rejected: Vec<f64>,
}

impl BaselineCycle {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            estimator: BaselineEstimator::new(config),
            rejected: Vec::new(),
        }
    }

    /// One estimation run.  Appends at most one baseline.
    pub fn run(
        &mut self,
        store: &mut impl RecordStore,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
    ) -> Option<BaselineOutcome> {
        match self.evaluate(store, now) {
            Ok(outcome) => {
                sink.emit(&AppEvent::BaselineEvaluated(outcome));
                Some(outcome)
            }
            Err(e) => {
                report_store_failure(sink, Cycle::Baseline, &e);
                None
            }
        }
    }

    /// Discarded candidates waiting for a level shift to be confirmed.
    pub fn pending_rejections(&self) -> &[f64] {
        &self.rejected
    }

    fn evaluate(
        &mut self,
        store: &mut impl RecordStore,
        now: DateTime<Utc>,
    ) -> Result<BaselineOutcome, StoreError> {
        let cfg = self.estimator.config();

        if self.filter_recently_on(store, now)? {
            info!(
                "baseline: filter ON within the last {}s, skipping run",
                cfg.freeze_after_filter_on_secs
            );
            return Ok(BaselineOutcome::Frozen);
        }

        let since = now - Duration::seconds(i64::from(cfg.window_secs));
        let window = store.readings_since(cfg.source, since)?;
        let history = store.recent_baselines(cfg.history_len)?;

        let mut outcome = self.estimator.estimate(&window, &history, now);
        if let BaselineOutcome::Rejected { candidate, .. } = outcome {
            self.rejected.push(candidate);
            if let Some(shift) = self.estimator.confirm_shift(&self.rejected, &history, now) {
                outcome = shift;
            }
            let keep = self.estimator.config().shift_confirm_runs;
            if self.rejected.len() > keep {
                self.rejected.drain(..self.rejected.len() - keep);
            }
        }

        if let Some(baseline) = outcome.baseline() {
            store.insert_baseline(&baseline)?;
            self.rejected.clear();
        }
        Ok(outcome)
    }

    /// Filtered air says nothing about the ambient level, so the run is
    /// skipped while the filter is on or was on within the freeze window.
    fn filter_recently_on(
        &self,
        store: &impl RecordStore,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let freeze = self.estimator.config().freeze_after_filter_on_secs;
        if freeze == 0 {
            return Ok(false);
        }
        if store
            .latest_signal(SignalLog::Filter)?
            .is_some_and(|s| s.state.is_on())
        {
            return Ok(true);
        }
        let since = now - Duration::seconds(i64::from(freeze));
        Ok(store
            .signals_since(SignalLog::Filter, since)?
            .iter()
            .any(|s| s.state.is_on()))
    }
}

// ───────────────────────────────────────────────────────────────
// Detector cycle
// ───────────────────────────────────────────────────────────────

/// Runs one detector per sensor of the configured source.
pub struct DetectorCycle {
    detectors: DetectorBank,
    resumed: bool,
}

impl DetectorCycle {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            detectors: DetectorBank::new(config),
            resumed: false,
        }
    }

    /// Feed every reading newer than the last one seen from its sensor
    /// through the detector bank, appending a system signal for each change
    /// of the combined output.
    ///
    /// Returns the signals appended this cycle.
    pub fn run(
        &mut self,
        store: &mut impl RecordStore,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        let mut appended = Vec::new();
        if let Err(e) = self.evaluate(store, sink, now, &mut appended) {
            report_store_failure(sink, Cycle::Detector, &e);
        }
        appended
    }

    pub fn detectors(&self) -> &DetectorBank {
        &self.detectors
    }

    /// Restore the detector from the newest system signal.  Runs once.
    pub fn resume(&mut self, store: &impl RecordStore) -> Result<SwitchState, StoreError> {
        if !self.resumed {
            if let Some(last) = store.latest_signal(SignalLog::System)? {
                self.detectors.resume(last.state);
            }
            self.resumed = true;
        }
        Ok(self.detectors.system_state())
    }

    fn evaluate(
        &mut self,
        store: &mut impl RecordStore,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
        appended: &mut Vec<Signal>,
    ) -> Result<(), StoreError> {
        self.resume(store)?;

        // Samples older than the gap window cannot belong to a debounce run.
        let since = self.detectors.resume_point(now);
        let source = self.detectors.config().source;

        let readings = store.readings_since(source, since)?;
        let baseline = store.latest_baseline()?.map(|b: Baseline| b.value);
        if baseline.is_none() {
            debug!("detector: no baseline yet, holding QUIET");
        }

        for reading in &readings {
            let snapshot = self.detectors.clone();
            let Some(state) = self.detectors.observe(reading, baseline) else {
                continue;
            };
            let signal = Signal::new(reading.timestamp, state);
            if let Err(e) = store.insert_system_control(&signal) {
                // Roll back so the transition is retried with this sample.
                self.detectors = snapshot;
                return Err(e);
            }
            sink.emit(&AppEvent::SystemSignal(signal));
            appended.push(signal);
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Combinator cycle
// ───────────────────────────────────────────────────────────────

pub struct CombinatorCycle {
    config: CombinatorConfig,
    combinator: ControlCombinator,
    seeded: bool,
    last_published_at: Option<DateTime<Utc>>,
    publish_pending: bool,
}

impl CombinatorCycle {
    pub fn new(config: CombinatorConfig) -> Self {
        Self {
            config,
            combinator: ControlCombinator::new(),
            seeded: false,
            last_published_at: None,
            publish_pending: false,
        }
    }

    /// Recompute the filter command, append it when it changed, and publish
    /// it.  The current command is also re-published on the heartbeat
    /// interval and after a failed publish.
    ///
    /// Returns the command appended this cycle, if any.
    pub fn run(
        &mut self,
        store: &mut impl RecordStore,
        publisher: &mut impl CommandPublisher,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        let appended = match self.evaluate(store, now) {
            Ok(appended) => appended,
            Err(e) => {
                report_store_failure(sink, Cycle::Combinator, &e);
                return None;
            }
        };

        if let Some(signal) = appended {
            sink.emit(&AppEvent::FilterCommand(signal));
            self.publish_pending = true;
        }

        if self.heartbeat_due(now) {
            self.publish_pending = true;
        }

        if self.publish_pending {
            if let Some(state) = self.combinator.last_emitted() {
                self.publish(publisher, sink, state, now);
            }
        }

        appended
    }

    pub fn last_emitted(&self) -> Option<SwitchState> {
        self.combinator.last_emitted()
    }

    fn evaluate(
        &mut self,
        store: &mut impl RecordStore,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>, StoreError> {
        if !self.seeded {
            let last = store.latest_signal(SignalLog::Filter)?;
            self.combinator.seed(last.map(|s| s.state));
            self.seeded = true;
            // The broker may have restarted too; announce the current command.
            self.publish_pending = last.is_some();
        }

        let system = store.latest_signal(SignalLog::System)?.map(|s| s.state);
        let user = store.read_latest_user_control()?.map(|s| s.state);

        let Some(signal) = self.combinator.evaluate(system, user, now) else {
            return Ok(None);
        };
        store.insert_filter_command(&signal)?;
        self.combinator.commit(signal.state);
        Ok(Some(signal))
    }

    fn heartbeat_due(&self, now: DateTime<Utc>) -> bool {
        let every = self.config.republish_interval_secs;
        if every == 0 {
            return false;
        }
        self.last_published_at
            .is_some_and(|at| now - at >= Duration::seconds(i64::from(every)))
    }

    fn publish(
        &mut self,
        publisher: &mut impl CommandPublisher,
        sink: &mut impl EventSink,
        state: SwitchState,
        now: DateTime<Utc>,
    ) {
        match publisher.publish(state, true) {
            Ok(()) => {
                self.publish_pending = false;
                self.last_published_at = Some(now);
                sink.emit(&AppEvent::Published {
                    state,
                    retained: true,
                });
            }
            Err(e) => {
                warn!("combinator: publish of {} failed: {}", state, e);
                sink.emit(&AppEvent::PublishFailed(e.to_string()));
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ControlService
// ───────────────────────────────────────────────────────────────

/// All three decision cycles, for callers that drive them from one place.
pub struct ControlService {
    baseline: BaselineCycle,
    detector: DetectorCycle,
    combinator: CombinatorCycle,
}

impl ControlService {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            baseline: BaselineCycle::new(config.baseline.clone()),
            detector: DetectorCycle::new(config.detector.clone()),
            combinator: CombinatorCycle::new(config.combinator.clone()),
        }
    }

    /// Restore detector state from the store and announce it.
    pub fn start(
        &mut self,
        store: &impl RecordStore,
        sink: &mut impl EventSink,
    ) -> Result<SwitchState, StoreError> {
        let state = self.detector.resume(store)?;
        sink.emit(&AppEvent::Started(state));
        info!("ControlService started, system signal {}", state);
        Ok(state)
    }

    pub fn run_baseline_cycle(
        &mut self,
        store: &mut impl RecordStore,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
    ) -> Option<BaselineOutcome> {
        self.baseline.run(store, sink, now)
    }

    pub fn run_detector_cycle(
        &mut self,
        store: &mut impl RecordStore,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        self.detector.run(store, sink, now)
    }

    pub fn run_combinator_cycle(
        &mut self,
        store: &mut impl RecordStore,
        publisher: &mut impl CommandPublisher,
        sink: &mut impl EventSink,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        self.combinator.run(store, publisher, sink, now)
    }

    /// Current detector output.
    pub fn system_state(&self) -> SwitchState {
        self.detector.detectors().system_state()
    }

    /// Split into independently schedulable cycles.
    pub fn into_parts(self) -> (BaselineCycle, DetectorCycle, CombinatorCycle) {
        (self.baseline, self.detector, self.combinator)
    }
}

// ───────────────────────────────────────────────────────────────
// External actor operations
// ───────────────────────────────────────────────────────────────

/// Append a user enable/disable signal.
pub fn set_user_control(
    store: &mut impl RecordStore,
    sink: &mut impl EventSink,
    state: SwitchState,
    now: DateTime<Utc>,
) -> Result<Signal, StoreError> {
    let signal = Signal::new(now, state);
    store.insert_user_control(&signal)?;
    sink.emit(&AppEvent::UserControl(signal));
    Ok(signal)
}

/// Snapshot of the newest record in every log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub baseline: Option<Baseline>,
    pub system: Option<Signal>,
    pub user: Option<Signal>,
    pub filter: Option<Signal>,
}

impl StatusReport {
    pub fn gather(store: &impl RecordStore) -> Result<Self, StoreError> {
        Ok(Self {
            baseline: store.latest_baseline()?,
            system: store.latest_signal(SignalLog::System)?,
            user: store.latest_signal(SignalLog::User)?,
            filter: store.latest_signal(SignalLog::Filter)?,
        })
    }

    /// `true` when the newest filter command equals the AND of the newest
    /// system and user signals.
    pub fn is_consistent(&self) -> bool {
        let expected = crate::combinator::combine(
            self.system.map(|s| s.state),
            self.user.map(|s| s.state),
        );
        self.filter.map_or(expected == SwitchState::Off, |f| f.state == expected)
    }
}

fn report_store_failure(sink: &mut impl EventSink, cycle: Cycle, err: &StoreError) {
    warn!("{:?} cycle skipped: {}", cycle, err);
    sink.emit(&AppEvent::StoreUnavailable {
        cycle,
        detail: err.to_string(),
    });
}
