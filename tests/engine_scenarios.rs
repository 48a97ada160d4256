//! End-to-end runs of the simulation engine against deterministic jitter.

use proptest::prelude::*;
use retro_bms::domain::{Cell, Pack, RuntimeConfig, LEVELS};
use retro_bms::simulation::{
    ConstantJitter, Cutoff, EngineSettings, EventLog, EventSink, FanoutSink, Outcome, Phase,
    RecordingSink, SeededJitter, SimEvent, SimulationEngine, TransitionCause,
};
use rstest::rstest;
use std::time::Duration;

fn zero_engine(level: usize) -> SimulationEngine<ConstantJitter> {
    SimulationEngine::new(EngineSettings::default(), level, ConstantJitter::zero()).unwrap()
}

/// Engine in `Idle` around `cells` (voltage, temperature).
fn engine_with_cells(level: usize, cells: &[(f64, f64)]) -> SimulationEngine<ConstantJitter> {
    let pack = Pack::new(cells.iter().map(|&(v, t)| Cell::new(v, t)).collect()).unwrap();
    SimulationEngine::with_pack(EngineSettings::default(), level, pack, ConstantJitter::zero())
        .unwrap()
}

fn cool_runtime() -> RuntimeConfig {
    RuntimeConfig {
        charge_current: 30.0,
        balance_threshold: 0.05,
        ov_cutoff: 4.15,
        uv_cutoff: 3.00,
        temp_limit: 100.0,
    }
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(4)]
fn zero_jitter_init_sits_at_lower_tolerance_edge(#[case] level: usize) {
    let engine = zero_engine(level);
    let config = &LEVELS[level];
    let expected = ((config.start_voltage - config.tolerance / 2.0) * 1000.0).round() / 1000.0;

    assert_eq!(engine.phase(), Phase::Idle);
    assert_eq!(engine.pack().len(), config.cell_count);
    for cell in engine.pack().cells() {
        assert!((cell.voltage - expected).abs() < 1e-9);
        assert_eq!(cell.temperature, 25.0);
    }
}

#[rstest]
#[case::cool_pack(4.15, 100.0)]
#[case::reference_settings(4.20, 45.0)]
fn ov_cutoff_switches_to_discharge_after_delay(#[case] ov_cutoff: f64, #[case] temp_limit: f64) {
    let mut engine = zero_engine(0);
    let cfg = RuntimeConfig {
        ov_cutoff,
        temp_limit,
        ..cool_runtime()
    };
    engine.start(&cfg).unwrap();

    let mut cutoff_at = None;
    for _ in 0..200 {
        let events = engine.tick(&cfg);
        if events.iter().any(|e| {
            matches!(
                e,
                SimEvent::CutoffReached {
                    cutoff: Cutoff::OverVoltage { .. }
                }
            )
        }) {
            cutoff_at = Some(engine.clock());
            break;
        }
    }
    let cutoff_at = cutoff_at.expect("pack never reached the OV cutoff");
    assert!(engine.pack().max_voltage() >= ov_cutoff);
    assert_eq!(engine.phase(), Phase::Charging);
    assert_eq!(engine.pending_transitions(), 1);

    // 800 ms delay on a 250 ms tick: three more charging ticks
    for _ in 0..3 {
        engine.tick(&cfg);
        assert_eq!(engine.phase(), Phase::Charging);
        assert_eq!(engine.pending_transitions(), 1);
    }

    let events = engine.tick(&cfg);
    assert_eq!(engine.phase(), Phase::Discharging);
    assert_eq!(engine.clock() - cutoff_at, Duration::from_millis(1000));
    assert!(events.contains(&SimEvent::PhaseChanged {
        from: Phase::Charging,
        to: Phase::Discharging,
        cause: TransitionCause::OverVoltageCutoff,
    }));
    assert!(engine.pack().max_voltage() < 4.30);
}

#[test]
fn full_cycle_completes_successfully() {
    let mut engine = zero_engine(0);
    let cfg = cool_runtime();
    engine.start(&cfg).unwrap();

    let mut events = Vec::new();
    for _ in 0..5_000 {
        events.extend(engine.tick(&cfg));
        if engine.phase().is_terminal() {
            break;
        }
    }

    assert_eq!(engine.phase(), Phase::Finished);
    assert_eq!(engine.state().outcome, Some(Outcome::Success));
    assert_eq!(events.last(), Some(&SimEvent::LevelSucceeded));
    assert!(engine.pack().average_voltage() <= LEVELS[0].start_voltage - 0.05);
}

#[test]
fn uv_cutoff_fails_on_first_discharge_tick() {
    let mut engine = zero_engine(0);
    // Every cell starts at 25 °C, above the limit: thermal cutoff on tick one
    let cfg = RuntimeConfig {
        temp_limit: 20.0,
        uv_cutoff: 4.0,
        ..cool_runtime()
    };
    engine.start(&cfg).unwrap();

    let events = engine.tick(&cfg);
    assert!(events.contains(&SimEvent::CutoffReached {
        cutoff: Cutoff::OverTemperature { limit_c: 20.0 }
    }));

    // 600 ms delay: charging continues at 500 and 750 ms
    engine.tick(&cfg);
    engine.tick(&cfg);
    assert_eq!(engine.phase(), Phase::Charging);

    let events = engine.tick(&cfg);
    assert_eq!(engine.phase(), Phase::Finished);
    assert_eq!(engine.state().outcome, Some(Outcome::Undercharged));
    assert_eq!(
        events,
        vec![
            SimEvent::PhaseChanged {
                from: Phase::Charging,
                to: Phase::Discharging,
                cause: TransitionCause::TemperatureCutoff,
            },
            SimEvent::LevelFailed,
        ]
    );
    assert_eq!(engine.pending_transitions(), 0);
}

#[test]
fn simultaneous_cutoffs_switch_phase_once() {
    // Cells start near the top of the tolerance band so discharge outlasts
    // both transition delays
    let mut engine =
        SimulationEngine::new(EngineSettings::default(), 0, ConstantJitter::new(0.99)).unwrap();
    let cfg = RuntimeConfig {
        ov_cutoff: 3.5,
        temp_limit: 20.0,
        ..cool_runtime()
    };
    engine.start(&cfg).unwrap();

    let events = engine.tick(&cfg);
    let cutoffs = events
        .iter()
        .filter(|e| matches!(e, SimEvent::CutoffReached { .. }))
        .count();
    assert_eq!(cutoffs, 2);
    assert_eq!(engine.pending_transitions(), 2);

    // Thermal entry (600 ms) fires on the fourth tick at 1000 ms
    let mut changes = Vec::new();
    for _ in 0..3 {
        for event in engine.tick(&cfg) {
            if let SimEvent::PhaseChanged { cause, .. } = event {
                changes.push(cause);
            }
        }
    }
    assert_eq!(changes, vec![TransitionCause::TemperatureCutoff]);
    assert_eq!(engine.phase(), Phase::Discharging);
    assert_eq!(engine.pending_transitions(), 1);

    // OV entry (due at 1050 ms) is dropped on the 1250 ms tick: source phase is stale
    let events = engine.tick(&cfg);
    assert_eq!(engine.pending_transitions(), 0);
    assert_eq!(engine.phase(), Phase::Discharging);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SimEvent::PhaseChanged { .. })));

    for _ in 0..5 {
        let events = engine.tick(&cfg);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SimEvent::PhaseChanged { .. })));
    }
}

#[test]
fn forced_overvoltage_explodes_and_freezes() {
    let mut engine = engine_with_cells(
        1,
        &[(3.69, 25.0), (3.69, 25.0), (4.35, 25.0), (3.69, 25.0)],
    );
    let cfg = cool_runtime();
    engine.start(&cfg).unwrap();

    let events = engine.tick(&cfg);
    assert_eq!(engine.phase(), Phase::Exploded);
    assert_eq!(engine.state().outcome, Some(Outcome::Exploded));
    let exploded = events.last().unwrap();
    assert!(matches!(exploded, SimEvent::Exploded { cell: 2, .. }));
    assert_eq!(exploded.to_string(), "BOOM! Cell 3 exceeded 4.30 V!");

    let frozen = engine.snapshot();
    for _ in 0..10 {
        assert!(engine.tick(&cfg).is_empty());
    }
    assert_eq!(engine.snapshot(), frozen);
}

#[test]
fn start_after_explosion_rebuilds_the_level() {
    let mut engine = engine_with_cells(0, &[(3.71, 90.0), (3.71, 25.0)]);
    let cfg = cool_runtime();
    engine.start(&cfg).unwrap();
    engine.tick(&cfg);
    assert_eq!(engine.phase(), Phase::Exploded);

    let events = engine.start(&cfg).unwrap();
    assert_eq!(engine.phase(), Phase::Charging);
    assert_eq!(engine.state().outcome, None);
    assert_eq!(engine.state().tick, 0);
    assert!(engine.pack().max_temperature() < 85.0);
    assert!(events
        .iter()
        .any(|e| matches!(e, SimEvent::Info { message } if message == "Level 1 - Easy")));
}

#[test]
fn setup_level_cancels_pending_transition() {
    let mut engine = zero_engine(0);
    let cfg = RuntimeConfig {
        temp_limit: 20.0,
        ..cool_runtime()
    };
    engine.start(&cfg).unwrap();
    engine.tick(&cfg);
    assert_eq!(engine.pending_transitions(), 1);

    engine.setup_level(0).unwrap();
    assert_eq!(engine.pending_transitions(), 0);
    assert_eq!(engine.phase(), Phase::Idle);

    engine.start(&cfg).unwrap();
    assert_eq!(engine.pending_transitions(), 0);
}

#[test]
fn advance_level_stops_at_last() {
    let mut engine = zero_engine(3);
    engine.advance_level().unwrap();
    assert_eq!(engine.level_index(), 4);
    assert!(engine.is_last_level());

    engine.advance_level().unwrap();
    assert_eq!(engine.level_index(), 4);
    assert_eq!(engine.pack().len(), 12);
}

#[test]
fn sinks_receive_events_and_snapshot() {
    let mut engine = zero_engine(0);
    let cfg = cool_runtime();
    let recorder = RecordingSink::new();
    let mut sink = FanoutSink::new()
        .with(recorder.clone())
        .with(EventLog::new(4));

    let events = engine.start(&cfg).unwrap();
    sink.publish(&events, &engine.snapshot());
    let events = engine.tick(&cfg);
    sink.publish(&events, &engine.snapshot());

    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].snapshot.tick, 1);
    assert_eq!(batches[1].snapshot.cells.len(), 2);
    assert_eq!(recorder.last_snapshot().unwrap().phase, Phase::Charging);
}

proptest! {
    #[test]
    fn charge_tick_never_lowers_voltage(
        seed in any::<u64>(),
        level in 0usize..5,
        current in 1.0f64..60.0,
    ) {
        let mut engine =
            SimulationEngine::new(EngineSettings::default(), level, SeededJitter::from_seed(seed))
                .unwrap();
        // Widest balance threshold keeps the bleeder out of the picture
        let cfg = RuntimeConfig {
            charge_current: current,
            balance_threshold: 0.5,
            ov_cutoff: 4.5,
            uv_cutoff: 2.5,
            temp_limit: 100.0,
        };
        engine.start(&cfg).unwrap();
        let before = engine.pack().clone();
        engine.tick(&cfg);

        prop_assert_eq!(engine.phase(), Phase::Charging);
        for (b, a) in before.cells().iter().zip(engine.pack().cells()) {
            prop_assert!(a.voltage > b.voltage);
            prop_assert!(a.temperature >= b.temperature);
        }
    }

    #[test]
    fn balancing_is_noop_within_threshold(
        voltages in prop::collection::vec(3.0f64..4.2, 1..12),
        margin in 0.0f64..0.1,
        seed in any::<u64>(),
    ) {
        let mut pack = Pack::new(voltages.iter().map(|&v| Cell::new(v, 25.0)).collect()).unwrap();
        let threshold = pack.max_voltage() - pack.average_voltage() + margin;
        let before = pack.clone();

        let activity = pack.apply_balancing(threshold, &mut SeededJitter::from_seed(seed));

        prop_assert!(activity.is_none());
        prop_assert_eq!(pack, before);
    }

    #[test]
    fn exploded_state_is_final(
        ticks in 1usize..20,
        current in 0.0f64..60.0,
        ov in 3.5f64..4.5,
    ) {
        let mut cells = [(3.655, 25.0); 6];
        cells[0].0 = 4.4;
        let mut engine = engine_with_cells(2, &cells);
        engine.start(&cool_runtime()).unwrap();
        engine.tick(&cool_runtime());
        prop_assert_eq!(engine.phase(), Phase::Exploded);

        let frozen = engine.snapshot();
        let cfg = RuntimeConfig { charge_current: current, ov_cutoff: ov, ..cool_runtime() };
        for _ in 0..ticks {
            prop_assert!(engine.tick(&cfg).is_empty());
        }
        prop_assert_eq!(engine.snapshot(), frozen);
    }
}
