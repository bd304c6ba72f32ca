//! Integration tests for the ControlService cycles against the in-memory
//! record store.

use airguard::adapters::memory_store::MemoryStore;
use airguard::app::events::{AppEvent, Cycle};
use airguard::app::ports::RecordStore;
use airguard::app::service::{ControlService, StatusReport, set_user_control};
use airguard::baseline::BaselineOutcome;
use airguard::config::SystemConfig;
use airguard::records::{Baseline, Reading, Signal, SignalLog, Source, SwitchState};
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::mock_hw::{MockPublisher, RecordingSink};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap()
}

fn config() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.baseline.min_samples = 10;
    cfg.detector.rise_threshold = 15.0;
    cfg.detector.return_threshold = 5.0;
    cfg.detector.rise_confirm_samples = 3;
    cfg.detector.return_confirm_samples = 2;
    cfg
}

/// Outdoor readings one minute apart, the last one at `end`.
fn insert_readings(store: &mut MemoryStore, end: DateTime<Utc>, values: &[f64]) {
    let n = values.len() as i64;
    for (i, v) in values.iter().enumerate() {
        let ts = end - Duration::minutes(n - 1 - i as i64);
        store.insert_reading(&Reading::pm25(ts, *v, Source::Outdoor)).unwrap();
    }
}

fn with_baseline(value: f64) -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .insert_baseline(&Baseline {
            timestamp: now() - Duration::hours(1),
            value,
        })
        .unwrap();
    store
}

// ── Baseline cycle ────────────────────────────────────────────

#[test]
fn baseline_cycle_persists_adopted_value() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[8.0; 12]);

    let mut svc = ControlService::new(&config());
    let outcome = svc.run_baseline_cycle(&mut store, &mut sink, now());

    assert!(matches!(outcome, Some(BaselineOutcome::Adopted(_))));
    assert_eq!(store.baselines().len(), 1);
    assert!((store.baselines()[0].value - 8.0).abs() < 1e-9);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::BaselineEvaluated(_))), 1);
}

#[test]
fn baseline_cycle_with_too_few_samples_inserts_nothing() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[8.0; 4]);

    let mut svc = ControlService::new(&config());
    let outcome = svc.run_baseline_cycle(&mut store, &mut sink, now());

    assert_eq!(outcome, Some(BaselineOutcome::InsufficientData { have: 4, need: 10 }));
    assert!(store.baselines().is_empty());
}

#[test]
fn baseline_frozen_after_recent_filter_on() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[8.0; 12]);
    store
        .insert_filter_command(&Signal::new(now() - Duration::minutes(30), SwitchState::On))
        .unwrap();
    store
        .insert_filter_command(&Signal::new(now() - Duration::minutes(10), SwitchState::Off))
        .unwrap();

    let mut svc = ControlService::new(&config());
    assert_eq!(
        svc.run_baseline_cycle(&mut store, &mut sink, now()),
        Some(BaselineOutcome::Frozen)
    );
    assert!(store.baselines().is_empty());
}

#[test]
fn baseline_resumes_once_freeze_window_passes() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[8.0; 12]);
    store
        .insert_filter_command(&Signal::new(now() - Duration::hours(3), SwitchState::On))
        .unwrap();
    store
        .insert_filter_command(&Signal::new(now() - Duration::hours(2), SwitchState::Off))
        .unwrap();

    let mut svc = ControlService::new(&config());
    let outcome = svc.run_baseline_cycle(&mut store, &mut sink, now());
    assert!(matches!(outcome, Some(BaselineOutcome::Adopted(_))));
}

#[test]
fn baseline_cycle_is_noop_when_store_down() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[8.0; 12]);
    store.set_available(false);

    let mut svc = ControlService::new(&config());
    assert_eq!(svc.run_baseline_cycle(&mut store, &mut sink, now()), None);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::StoreUnavailable {
                cycle: Cycle::Baseline,
                ..
            }
        )),
        1
    );

    store.set_available(true);
    assert!(store.baselines().is_empty());
}

#[test]
fn sustained_level_shift_is_adopted() {
    let mut cfg = config();
    cfg.baseline.shift_confirm_runs = 3;
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    for h in (1..=3).rev() {
        store
            .insert_baseline(&Baseline {
                timestamp: now() - Duration::hours(h),
                value: 10.0,
            })
            .unwrap();
    }
    insert_readings(&mut store, now(), &[25.0; 12]);

    let mut svc = ControlService::new(&cfg);
    for run in 0..2 {
        let at = now() + Duration::seconds(run);
        assert!(matches!(
            svc.run_baseline_cycle(&mut store, &mut sink, at),
            Some(BaselineOutcome::Rejected { previous, .. }) if previous == 10.0
        ));
    }
    assert_eq!(store.baselines().len(), 3);

    let outcome = svc.run_baseline_cycle(&mut store, &mut sink, now() + Duration::seconds(2));
    assert!(matches!(
        outcome,
        Some(BaselineOutcome::Shifted { runs: 3, baseline }) if (baseline.value - 25.0).abs() < 1e-9
    ));
    assert_eq!(store.baselines().len(), 4);

    // The new level is now the reference.
    let outcome = svc.run_baseline_cycle(&mut store, &mut sink, now() + Duration::seconds(3));
    assert!(matches!(outcome, Some(BaselineOutcome::Adopted(_))));
}

// ── Detector cycle ────────────────────────────────────────────

#[test]
fn detector_cycle_appends_one_on_for_confirmed_rise() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[20.0, 20.0, 40.0, 40.0, 40.0]);

    let mut svc = ControlService::new(&config());
    let appended = svc.run_detector_cycle(&mut store, &mut sink, now());

    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].state, SwitchState::On);
    assert_eq!(appended[0].timestamp, now());
    assert_eq!(store.signals(SignalLog::System), appended.as_slice());

    // Nothing new: a second cycle appends nothing.
    assert!(svc.run_detector_cycle(&mut store, &mut sink, now()).is_empty());
    assert_eq!(svc.system_state(), SwitchState::On);
}

#[test]
fn detector_without_baseline_never_signals() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[500.0; 5]);

    let mut svc = ControlService::new(&config());
    assert!(svc.run_detector_cycle(&mut store, &mut sink, now()).is_empty());
    assert!(store.signals(SignalLog::System).is_empty());
}

#[test]
fn detector_counts_across_cycles() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    let mut svc = ControlService::new(&config());

    insert_readings(&mut store, now() - Duration::minutes(1), &[40.0, 40.0]);
    assert!(svc.run_detector_cycle(&mut store, &mut sink, now()).is_empty());

    insert_readings(&mut store, now(), &[40.0]);
    let appended = svc.run_detector_cycle(&mut store, &mut sink, now());
    assert_eq!(appended.len(), 1);
}

#[test]
fn failed_signal_append_is_retried_next_cycle() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    insert_readings(&mut store, now(), &[40.0, 40.0, 40.0]);

    let mut svc = ControlService::new(&config());
    store.set_writable(false);
    assert!(svc.run_detector_cycle(&mut store, &mut sink, now()).is_empty());
    assert_eq!(svc.system_state(), SwitchState::Off, "transition rolled back");
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::StoreUnavailable {
                cycle: Cycle::Detector,
                ..
            }
        )),
        1
    );

    store.set_writable(true);
    let appended = svc.run_detector_cycle(&mut store, &mut sink, now());
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0], Signal::new(now(), SwitchState::On));
    assert_eq!(store.signals(SignalLog::System).len(), 1);
}

#[test]
fn restart_during_event_still_emits_closing_off() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    store
        .insert_system_control(&Signal::new(now() - Duration::minutes(30), SwitchState::On))
        .unwrap();
    insert_readings(&mut store, now(), &[21.0, 22.0]);

    let mut svc = ControlService::new(&config());
    assert_eq!(svc.start(&store, &mut sink), Ok(SwitchState::On));
    assert_eq!(sink.events[0], AppEvent::Started(SwitchState::On));

    let appended = svc.run_detector_cycle(&mut store, &mut sink, now());
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].state, SwitchState::Off);
}

/// Outdoor reading from one sensor, `minute:second` after `now()`.
fn sensor_reading(store: &mut MemoryStore, minute: i64, second: i64, pm25: f64, sensor: u16) {
    let ts = now() + Duration::minutes(minute) + Duration::seconds(second);
    store
        .insert_reading(&Reading::pm25(ts, pm25, Source::Outdoor).with_sensor(sensor))
        .unwrap();
}

#[test]
fn smoky_sensor_trips_despite_clean_sensor_at_same_instant() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    for m in 0..4 {
        sensor_reading(&mut store, m, 0, 10.0, 1);
        sensor_reading(&mut store, m, 0, 60.0, 2);
    }

    let mut svc = ControlService::new(&config());
    let appended = svc.run_detector_cycle(&mut store, &mut sink, now() + Duration::minutes(3));

    assert_eq!(appended, vec![Signal::new(now() + Duration::minutes(2), SwitchState::On)]);
    assert_eq!(svc.system_state(), SwitchState::On);
}

#[test]
fn interleaved_sensors_do_not_break_each_others_run() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    for m in 0..4 {
        sensor_reading(&mut store, m, 0, 60.0, 1);
        sensor_reading(&mut store, m, 30, 10.0, 2);
    }

    let mut svc = ControlService::new(&config());
    let appended = svc.run_detector_cycle(&mut store, &mut sink, now() + Duration::minutes(4));

    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].state, SwitchState::On);
    assert_eq!(store.signals(SignalLog::System).len(), 1);
}

#[test]
fn sensors_keep_counting_across_cycles() {
    let mut store = with_baseline(20.0);
    let mut sink = RecordingSink::new();
    let mut svc = ControlService::new(&config());

    for m in 0..2 {
        sensor_reading(&mut store, m, 0, 60.0, 1);
        sensor_reading(&mut store, m, 0, 10.0, 2);
    }
    assert!(svc
        .run_detector_cycle(&mut store, &mut sink, now() + Duration::minutes(1))
        .is_empty());

    // Sensor 2 already reported minute 2 when the cycle runs; sensor 1's
    // sample lands with the same timestamp afterwards.
    sensor_reading(&mut store, 2, 0, 10.0, 2);
    assert!(svc
        .run_detector_cycle(&mut store, &mut sink, now() + Duration::minutes(2))
        .is_empty());
    sensor_reading(&mut store, 2, 0, 60.0, 1);
    let appended = svc.run_detector_cycle(&mut store, &mut sink, now() + Duration::minutes(2));
    assert_eq!(appended.len(), 1);
}

// ── Combinator cycle ──────────────────────────────────────────

#[test]
fn combinator_publishes_retained_command_on_change_only() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();
    store.insert_system_control(&Signal::new(now(), SwitchState::On)).unwrap();
    store.insert_user_control(&Signal::new(now(), SwitchState::On)).unwrap();

    let mut svc = ControlService::new(&config());
    let cmd = svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now());
    assert_eq!(cmd.map(|s| s.state), Some(SwitchState::On));
    assert_eq!(publisher.published, vec![(SwitchState::On, true)]);

    let later = now() + Duration::seconds(5);
    assert!(svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, later).is_none());
    assert_eq!(publisher.published.len(), 1);
    assert_eq!(store.signals(SignalLog::Filter).len(), 1);
}

#[test]
fn combinator_republishes_on_heartbeat() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();

    let mut svc = ControlService::new(&config());
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now());
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now() + Duration::seconds(30));
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now() + Duration::seconds(60));

    assert_eq!(
        publisher.published,
        vec![(SwitchState::Off, true), (SwitchState::Off, true)]
    );
    assert_eq!(store.signals(SignalLog::Filter).len(), 1, "heartbeat appends nothing");
}

#[test]
fn user_disable_turns_filter_off() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();
    store.insert_system_control(&Signal::new(now(), SwitchState::On)).unwrap();
    set_user_control(&mut store, &mut sink, SwitchState::On, now()).unwrap();

    let mut svc = ControlService::new(&config());
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now());

    let t1 = now() + Duration::seconds(5);
    set_user_control(&mut store, &mut sink, SwitchState::Off, t1).unwrap();
    let cmd = svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, t1);

    assert_eq!(cmd, Some(Signal::new(t1, SwitchState::Off)));
    assert_eq!(publisher.last(), Some(SwitchState::Off));
    assert!(StatusReport::gather(&store).unwrap().is_consistent());
}

#[test]
fn failed_publish_is_retried_next_cycle() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher {
        fail: true,
        ..MockPublisher::default()
    };

    let mut svc = ControlService::new(&config());
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now());
    assert_eq!(sink.count(|e| matches!(e, AppEvent::PublishFailed(_))), 1);
    assert!(publisher.published.is_empty());

    publisher.fail = false;
    let t1 = now() + Duration::seconds(5);
    assert!(svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, t1).is_none());
    assert_eq!(publisher.published, vec![(SwitchState::Off, true)]);
}

#[test]
fn combinator_seeds_from_persisted_command() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();
    store.insert_system_control(&Signal::new(now(), SwitchState::On)).unwrap();
    store.insert_user_control(&Signal::new(now(), SwitchState::On)).unwrap();
    store.insert_filter_command(&Signal::new(now(), SwitchState::On)).unwrap();

    let mut svc = ControlService::new(&config());
    let cmd = svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now());

    assert!(cmd.is_none(), "no duplicate command after restart");
    assert_eq!(store.signals(SignalLog::Filter).len(), 1);
    assert_eq!(publisher.published, vec![(SwitchState::On, true)], "announced once");
}

#[test]
fn combinator_noop_when_store_down() {
    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();
    store.set_available(false);

    let mut svc = ControlService::new(&config());
    assert!(svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, now()).is_none());
    assert!(publisher.published.is_empty());
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::StoreUnavailable {
                cycle: Cycle::Combinator,
                ..
            }
        )),
        1
    );
}

// ── Status ────────────────────────────────────────────────────

#[test]
fn status_report_flags_stale_filter_command() {
    let mut store = MemoryStore::new();
    store.insert_system_control(&Signal::new(now(), SwitchState::On)).unwrap();
    store.insert_user_control(&Signal::new(now(), SwitchState::On)).unwrap();

    let report = StatusReport::gather(&store).unwrap();
    assert!(!report.is_consistent(), "combinator has not run yet");

    store.insert_filter_command(&Signal::new(now(), SwitchState::On)).unwrap();
    assert!(StatusReport::gather(&store).unwrap().is_consistent());
}
