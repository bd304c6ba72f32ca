//! End-to-end: readings → baseline → detector → combinator → publisher,
//! then the published tokens replayed through the delivery loop to the pin.

use std::time::Instant;

use airguard::adapters::memory_store::MemoryStore;
use airguard::app::ports::RecordStore;
use airguard::app::service::{ControlService, StatusReport, set_user_control};
use airguard::baseline::BaselineOutcome;
use airguard::config::{DeliveryConfig, SystemConfig};
use airguard::delivery::{DeliveryEvent, DeliveryLoop};
use airguard::records::{Reading, SignalLog, Source, SwitchState};
use airguard::relay::Relay;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::mock_hw::{MockPin, MockPublisher, MockRelayState, MockTransport, RecordingSink};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 2, 18, 0, 0).unwrap()
}

fn at(min: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(min)
}

fn outdoor(store: &mut MemoryStore, min: i64, pm25: f64) {
    store
        .insert_reading(&Reading::pm25(at(min), pm25, Source::Outdoor))
        .unwrap();
}

#[test]
fn smoke_event_reaches_relay_and_user_can_override() {
    let mut cfg = SystemConfig::default();
    cfg.baseline.min_samples = 10;
    cfg.detector.rise_threshold = 15.0;
    cfg.detector.return_threshold = 5.0;
    cfg.detector.rise_confirm_samples = 3;
    cfg.detector.return_confirm_samples = 2;

    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();
    let mut svc = ControlService::new(&cfg);
    svc.start(&store, &mut sink).unwrap();

    // Quiet evening: twelve samples around 10 µg/m³.
    for m in -11..=0 {
        outdoor(&mut store, m, 10.0);
    }
    let outcome = svc.run_baseline_cycle(&mut store, &mut sink, t0());
    assert!(matches!(outcome, Some(BaselineOutcome::Adopted(b)) if (b.value - 10.0).abs() < 1e-9));

    set_user_control(&mut store, &mut sink, SwitchState::On, t0()).unwrap();
    assert!(svc.run_detector_cycle(&mut store, &mut sink, t0()).is_empty());
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, t0());

    // Smoke drifts in.
    for m in 1..=3 {
        outdoor(&mut store, m, 40.0);
    }
    let system = svc.run_detector_cycle(&mut store, &mut sink, at(3));
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].state, SwitchState::On);
    let cmd = svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, at(3));
    assert_eq!(cmd.map(|s| s.state), Some(SwitchState::On));

    // Baseline must not learn from filtered air.
    outdoor(&mut store, 4, 40.0);
    assert_eq!(
        svc.run_baseline_cycle(&mut store, &mut sink, at(4)),
        Some(BaselineOutcome::Frozen)
    );

    // Operator switches the fan off while the event is still going.
    set_user_control(&mut store, &mut sink, SwitchState::Off, at(5)).unwrap();
    let cmd = svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, at(5));
    assert_eq!(cmd.map(|s| s.state), Some(SwitchState::Off));
    assert_eq!(svc.system_state(), SwitchState::On, "detector keeps its own view");

    let filter: Vec<SwitchState> = store
        .signals(SignalLog::Filter)
        .iter()
        .map(|s| s.state)
        .collect();
    assert_eq!(filter, vec![SwitchState::Off, SwitchState::On, SwitchState::Off]);
    assert!(StatusReport::gather(&store).unwrap().is_consistent());
    assert!(publisher.published.iter().all(|(_, retained)| *retained));

    // Relay side: replay what the hub published.
    let mut transport = MockTransport::new();
    for (state, _) in &publisher.published {
        transport = transport.then_payload(state.token());
    }
    let mut delivery = DeliveryLoop::new(
        transport,
        Relay::new(MockPin::new(), true),
        MockRelayState::default(),
        &DeliveryConfig::default(),
        cfg.mqtt.topic.clone(),
    );
    let now = Instant::now();
    assert_eq!(delivery.step(now), DeliveryEvent::Connected);
    assert_eq!(delivery.step(now), DeliveryEvent::Applied(SwitchState::Off));
    assert_eq!(delivery.step(now), DeliveryEvent::Applied(SwitchState::On));
    assert_eq!(delivery.step(now), DeliveryEvent::Applied(SwitchState::Off));
    assert_eq!(delivery.step(now), DeliveryEvent::Idle);

    assert_eq!(delivery.relay().pin().writes, vec![false, true, false]);
    assert_eq!(delivery.state_store().stored, Some(SwitchState::Off));
}

#[test]
fn event_ends_and_filter_follows() {
    let mut cfg = SystemConfig::default();
    cfg.baseline.min_samples = 10;
    cfg.detector.rise_threshold = 15.0;
    cfg.detector.return_threshold = 5.0;
    cfg.detector.rise_confirm_samples = 3;
    cfg.detector.return_confirm_samples = 2;

    let mut store = MemoryStore::new();
    let mut sink = RecordingSink::new();
    let mut publisher = MockPublisher::new();
    let mut svc = ControlService::new(&cfg);

    for m in -11..=0 {
        outdoor(&mut store, m, 10.0);
    }
    svc.run_baseline_cycle(&mut store, &mut sink, t0());
    set_user_control(&mut store, &mut sink, SwitchState::On, t0()).unwrap();

    for (m, v) in [(1, 40.0), (2, 40.0), (3, 40.0), (4, 30.0), (5, 12.0), (6, 11.0)] {
        outdoor(&mut store, m, v);
    }
    let system: Vec<SwitchState> = svc
        .run_detector_cycle(&mut store, &mut sink, at(6))
        .iter()
        .map(|s| s.state)
        .collect();
    assert_eq!(system, vec![SwitchState::On, SwitchState::Off]);

    // The combinator only sees the newest system signal.
    svc.run_combinator_cycle(&mut store, &mut publisher, &mut sink, at(6));
    assert_eq!(publisher.published, vec![(SwitchState::Off, true)]);
}
