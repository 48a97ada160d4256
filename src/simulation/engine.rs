//! # Simulation Engine
//!
//! Owns the single live [`SimulationState`] and advances it one tick at a time.
//!
//! ## Phase machine
//!
//! ```text
//! Idle --start--> Charging --cutoff (deferred)--> Discharging --> Finished
//!                    |                                 |
//!                    +----------> Exploded <-----------+
//! ```
//!
//! Each tick the engine first applies any deferred transition that has become
//! due, then runs the physics for the current phase, then evaluates the
//! continuation and failure predicates. Runtime settings are passed in on every
//! call and never stored.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::deferred::DeferredTransitions;
use super::events::{Cutoff, ExplosionCause, SimEvent, TransitionCause};
use super::jitter::{JitterSource, SeededJitter};
use super::state::{Outcome, PackSnapshot, Phase, SimulationState};
use crate::domain::{
    apply_charge, apply_discharge, imbalance_factor, init_level, LevelConfig, LevelSelector, Pack,
    RuntimeConfig, EXPLOSION_OV, EXPLOSION_TEMP_C,
};
use crate::error::SimError;

/// Charge effect per amp per cell per tick (V)
const CHARGE_GAIN: f64 = 0.0008;
/// Base discharge rate per tick (V)
const BASE_DISCHARGE_RATE: f64 = 0.0006;
/// Upper bound of the extra random discharge per tick (V)
const DISCHARGE_RATE_SPREAD: f64 = 0.0003;
/// OV cutoffs above this let three cells overshoot before the charger stops
const LATE_CUTOFF_V: f64 = 4.25;
const OVERSHOOT_BUMPS: usize = 3;
const OVERSHOOT_V: f64 = 0.02;
/// Discharging below `start_voltage - SUCCESS_MARGIN_V` completes the cycle
const SUCCESS_MARGIN_V: f64 = 0.05;

/// Timing of the simulation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Simulated time per tick
    pub tick_interval: Duration,
    /// Delay between an OV cutoff and the switch to discharge
    pub ov_transition_delay: Duration,
    /// Delay between a temperature cutoff and the switch to discharge
    pub temp_transition_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            ov_transition_delay: Duration::from_millis(800),
            temp_transition_delay: Duration::from_millis(600),
        }
    }
}

/// First cell over an explosion limit, if any.
///
/// Cells are checked in order; within a cell voltage is checked before
/// temperature.
pub fn explosion_cause(pack: &Pack) -> Option<(usize, ExplosionCause)> {
    pack.cells().iter().enumerate().find_map(|(i, cell)| {
        if cell.voltage > EXPLOSION_OV {
            Some((
                i,
                ExplosionCause::OverVoltage {
                    voltage_v: cell.voltage,
                },
            ))
        } else if cell.temperature > EXPLOSION_TEMP_C {
            Some((
                i,
                ExplosionCause::OverTemperature {
                    temperature_c: cell.temperature,
                },
            ))
        } else {
            None
        }
    })
}

/// Battery pack simulation engine
pub struct SimulationEngine<J: JitterSource = SeededJitter> {
    settings: EngineSettings,
    selector: LevelSelector,
    state: SimulationState,
    deferred: DeferredTransitions,
    /// Simulated time since level setup
    clock: Duration,
    jitter: J,
}

impl<J: JitterSource> SimulationEngine<J> {
    /// Create an engine with a fresh pack for `level_index`, in `Idle`.
    pub fn new(
        settings: EngineSettings,
        level_index: usize,
        mut jitter: J,
    ) -> Result<Self, SimError> {
        let level = LevelSelector::new(level_index)?.current();
        let pack = init_level(level, &mut jitter)?;
        Self::with_pack(settings, level_index, pack, jitter)
    }

    /// Create an engine in `Idle` around a pack built by the caller.
    ///
    /// The pack must have the level's cell count. Used to resume a saved pack
    /// or to replay a scenario from a known cell state.
    pub fn with_pack(
        settings: EngineSettings,
        level_index: usize,
        pack: Pack,
        jitter: J,
    ) -> Result<Self, SimError> {
        let selector = LevelSelector::new(level_index)?;
        let level = selector.current().clone();
        if pack.len() != level.cell_count {
            return Err(SimError::InvalidLevel(format!(
                "pack has {} cells, level {} expects {}",
                pack.len(),
                level_index + 1,
                level.cell_count
            )));
        }

        Ok(Self {
            settings,
            selector,
            state: SimulationState::new(level_index, level, pack),
            deferred: DeferredTransitions::new(),
            clock: Duration::ZERO,
            jitter,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn level(&self) -> &LevelConfig {
        &self.state.level
    }

    pub fn level_index(&self) -> usize {
        self.selector.index()
    }

    pub fn is_last_level(&self) -> bool {
        self.selector.is_last()
    }

    pub fn pack(&self) -> &Pack {
        &self.state.pack
    }

    #[cfg(test)]
    pub(crate) fn pack_mut(&mut self) -> &mut Pack {
        &mut self.state.pack
    }

    pub fn snapshot(&self) -> PackSnapshot {
        self.state.snapshot()
    }

    /// Simulated time since level setup.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn pending_transitions(&self) -> usize {
        self.deferred.len()
    }

    /// Console banner for the current level.
    pub fn level_banner(&self) -> Vec<SimEvent> {
        vec![
            SimEvent::info("Retro BMS Console"),
            SimEvent::info(format!(
                "Level {} - {}",
                self.selector.index() + 1,
                self.state.level.difficulty
            )),
            SimEvent::info("Tune BMS and press START."),
        ]
    }

    /// Replace the live state with a fresh `Idle` pack for `index`.
    ///
    /// Pending deferred transitions are cancelled.
    pub fn setup_level(&mut self, index: usize) -> Result<Vec<SimEvent>, SimError> {
        let selector = LevelSelector::new(index)?;
        let level = selector.current().clone();
        let pack = init_level(&level, &mut self.jitter)?;

        let dropped = self.deferred.cancel_all();
        self.selector = selector;
        self.state = SimulationState::new(index, level, pack);
        self.clock = Duration::ZERO;

        info!(
            level = index + 1,
            difficulty = self.state.level.difficulty,
            cells = self.state.pack.len(),
            cancelled_transitions = dropped,
            "level setup"
        );
        Ok(self.level_banner())
    }

    /// Set up the next level (the last level repeats).
    pub fn advance_level(&mut self) -> Result<Vec<SimEvent>, SimError> {
        let mut next = self.selector;
        self.setup_level(next.advance())
    }

    /// Begin charging.
    ///
    /// No-op while a cycle is running. From a terminal phase the current
    /// level is set up again first, so an exploded pack is never reused.
    pub fn start(&mut self, runtime: &RuntimeConfig) -> Result<Vec<SimEvent>, SimError> {
        let mut events = Vec::new();
        match self.state.phase {
            Phase::Charging | Phase::Discharging => {
                debug!(phase = %self.state.phase, "start ignored, cycle already running");
                return Ok(events);
            }
            Phase::Finished | Phase::Exploded => {
                events.extend(self.setup_level(self.selector.index())?);
            }
            Phase::Idle => {}
        }

        let cfg = runtime.sanitized();
        self.state.phase = Phase::Charging;
        events.push(SimEvent::PhaseChanged {
            from: Phase::Idle,
            to: Phase::Charging,
            cause: TransitionCause::Start,
        });
        events.push(SimEvent::info(cfg.settings_line()));

        info!(
            level = self.selector.index() + 1,
            charge_current = cfg.charge_current,
            ov_cutoff = cfg.ov_cutoff,
            uv_cutoff = cfg.uv_cutoff,
            temp_limit = cfg.temp_limit,
            "charge sequence started"
        );
        Ok(events)
    }

    /// Advance the simulation by one tick.
    ///
    /// Ignored (no mutation, no events) unless charging or discharging.
    pub fn tick(&mut self, runtime: &RuntimeConfig) -> Vec<SimEvent> {
        let mut events = Vec::new();
        if !self.state.phase.is_active() {
            return events;
        }

        let cfg = runtime.sanitized();
        self.clock += self.settings.tick_interval;
        self.state.tick += 1;

        self.apply_due_transitions(&mut events);

        match self.state.phase {
            Phase::Charging => self.charge_step(&cfg, &mut events),
            Phase::Discharging => self.discharge_step(&cfg, &mut events),
            _ => {}
        }

        debug!(
            tick = self.state.tick,
            phase = %self.state.phase,
            avg_v = self.state.pack.average_voltage(),
            max_v = self.state.pack.max_voltage(),
            max_temp_c = self.state.pack.max_temperature(),
            "simulation tick"
        );
        events
    }

    /// Evaluate the explosion predicate against the current pack.
    ///
    /// On a hit the pack explodes: phase `Exploded`, every pending deferred
    /// transition cancelled. Returns whether it exploded.
    pub fn check_explosion(&mut self, events: &mut Vec<SimEvent>) -> bool {
        if self.state.phase == Phase::Exploded {
            return true;
        }
        let Some((cell, cause)) = explosion_cause(&self.state.pack) else {
            return false;
        };

        let cancelled = self.deferred.cancel_all();
        self.state.phase = Phase::Exploded;
        self.state.outcome = Some(Outcome::Exploded);
        warn!(
            cell = cell + 1,
            ?cause,
            cancelled_transitions = cancelled,
            "pack exploded"
        );
        events.push(SimEvent::Exploded { cell, cause });
        true
    }

    fn apply_due_transitions(&mut self, events: &mut Vec<SimEvent>) {
        for transition in self.deferred.take_due(self.clock) {
            if !transition.applies_to(self.state.phase) {
                debug!(
                    phase = %self.state.phase,
                    expected = %transition.expected,
                    "deferred transition skipped"
                );
                continue;
            }
            self.state.phase = transition.target;
            info!(
                from = %transition.expected,
                to = %transition.target,
                cause = ?transition.cause,
                "phase change"
            );
            events.push(SimEvent::PhaseChanged {
                from: transition.expected,
                to: transition.target,
                cause: transition.cause,
            });
        }
    }

    fn charge_step(&mut self, cfg: &RuntimeConfig, events: &mut Vec<SimEvent>) {
        let level = &self.state.level;
        let effect = cfg.charge_current / level.cell_count.max(1) as f64 * CHARGE_GAIN;
        let safe_max_current = level.safe_max_current;
        let avg = self.state.pack.average_voltage();

        for cell in self.state.pack.cells_mut() {
            let factor = imbalance_factor(cell.voltage, avg);
            *cell = apply_charge(
                *cell,
                effect,
                factor,
                cfg.charge_current,
                safe_max_current,
                &mut self.jitter,
            );
        }

        self.balance(cfg, events);

        if self.check_explosion(events) {
            return;
        }

        let mut overshoot = false;
        if self
            .state
            .pack
            .cells()
            .iter()
            .any(|c| c.voltage >= cfg.ov_cutoff)
        {
            events.push(SimEvent::CutoffReached {
                cutoff: Cutoff::OverVoltage {
                    cutoff_v: cfg.ov_cutoff,
                },
            });
            if cfg.ov_cutoff > LATE_CUTOFF_V {
                self.apply_overshoot();
                overshoot = true;
            }
            self.schedule_discharge(
                self.settings.ov_transition_delay,
                TransitionCause::OverVoltageCutoff,
            );
        }

        if self
            .state
            .pack
            .cells()
            .iter()
            .any(|c| c.temperature >= cfg.temp_limit)
        {
            events.push(SimEvent::CutoffReached {
                cutoff: Cutoff::OverTemperature {
                    limit_c: cfg.temp_limit,
                },
            });
            self.schedule_discharge(
                self.settings.temp_transition_delay,
                TransitionCause::TemperatureCutoff,
            );
        }

        if overshoot {
            self.check_explosion(events);
        }
    }

    fn discharge_step(&mut self, cfg: &RuntimeConfig, events: &mut Vec<SimEvent>) {
        let rate = BASE_DISCHARGE_RATE + self.jitter.uniform(0.0, DISCHARGE_RATE_SPREAD);
        for cell in self.state.pack.cells_mut() {
            *cell = apply_discharge(*cell, rate, &mut self.jitter);
        }

        self.balance(cfg, events);

        if self
            .state
            .pack
            .cells()
            .iter()
            .any(|c| c.voltage <= cfg.uv_cutoff)
        {
            self.finish(Outcome::Undercharged, events);
            return;
        }

        if self.state.pack.average_voltage() <= self.state.level.start_voltage - SUCCESS_MARGIN_V {
            self.finish(Outcome::Success, events);
            return;
        }

        self.check_explosion(events);
    }

    fn balance(&mut self, cfg: &RuntimeConfig, events: &mut Vec<SimEvent>) {
        if let Some(activity) = self
            .state
            .pack
            .apply_balancing(cfg.balance_threshold, &mut self.jitter)
        {
            debug!(
                cell = activity.cell + 1,
                bled_v = activity.bled_v,
                "balancer active"
            );
            events.push(SimEvent::BalancerActive {
                cell: activity.cell,
            });
        }
    }

    /// Late cutoff: three randomly picked cells (repeats allowed) overshoot.
    fn apply_overshoot(&mut self) {
        let len = self.state.pack.len();
        for _ in 0..OVERSHOOT_BUMPS {
            let idx = self.jitter.pick(len);
            if let Some(cell) = self.state.pack.cell_mut(idx) {
                cell.voltage += OVERSHOOT_V;
            }
            debug!(cell = idx + 1, bump_v = OVERSHOOT_V, "cutoff overshoot");
        }
    }

    fn schedule_discharge(&mut self, delay: Duration, cause: TransitionCause) {
        // One pending entry per cause; later copies could never fire first
        if self.deferred.is_pending(cause) {
            return;
        }
        self.deferred.schedule_after(
            self.clock,
            delay,
            Phase::Charging,
            Phase::Discharging,
            cause,
        );
        debug!(?cause, delay_ms = delay.as_millis() as u64, "discharge scheduled");
    }

    fn finish(&mut self, outcome: Outcome, events: &mut Vec<SimEvent>) {
        self.state.phase = Phase::Finished;
        self.state.outcome = Some(outcome);
        self.deferred.cancel_all();
        info!(
            level = self.selector.index() + 1,
            ?outcome,
            avg_v = self.state.pack.average_voltage(),
            "cycle finished"
        );
        events.push(match outcome {
            Outcome::Success => SimEvent::LevelSucceeded,
            _ => SimEvent::LevelFailed,
        });
    }
}
