//! # Simulation Events
//!
//! The engine never renders or plays sounds. Everything that happens during a
//! tick is reported as a typed [`SimEvent`], handed to an [`EventSink`]
//! together with a [`PackSnapshot`]. Presentation adapters (console log,
//! cell bars, audio cues) live behind that trait.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::{PackSnapshot, Phase};
use crate::domain::EXPLOSION_OV;

/// Semantic category of an event, used by sinks to pick styling or sounds
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventCategory {
    Info,
    BalancerActive,
    CutoffReached,
    PhaseChange,
    Success,
    Failure,
    Explosion,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Info => write!(f, "info"),
            EventCategory::BalancerActive => write!(f, "balancer-active"),
            EventCategory::CutoffReached => write!(f, "cutoff-reached"),
            EventCategory::PhaseChange => write!(f, "phase-change"),
            EventCategory::Success => write!(f, "success"),
            EventCategory::Failure => write!(f, "failure"),
            EventCategory::Explosion => write!(f, "explosion"),
        }
    }
}

/// Which BMS limit tripped
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cutoff {
    OverVoltage { cutoff_v: f64 },
    OverTemperature { limit_c: f64 },
}

/// Why the phase changed
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Start,
    OverVoltageCutoff,
    TemperatureCutoff,
}

/// Which quantity blew the pack
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplosionCause {
    OverVoltage { voltage_v: f64 },
    OverTemperature { temperature_c: f64 },
}

/// Something the engine wants the outside world to know about
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Info {
        message: String,
    },
    /// Balancer bled charge from a cell (zero-based index)
    BalancerActive {
        cell: usize,
    },
    CutoffReached {
        cutoff: Cutoff,
    },
    PhaseChanged {
        from: Phase,
        to: Phase,
        cause: TransitionCause,
    },
    LevelSucceeded,
    LevelFailed,
    Exploded {
        cell: usize,
        cause: ExplosionCause,
    },
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        SimEvent::Info {
            message: message.into(),
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            SimEvent::Info { .. } => EventCategory::Info,
            SimEvent::BalancerActive { .. } => EventCategory::BalancerActive,
            SimEvent::CutoffReached { .. } => EventCategory::CutoffReached,
            SimEvent::PhaseChanged { .. } => EventCategory::PhaseChange,
            SimEvent::LevelSucceeded => EventCategory::Success,
            SimEvent::LevelFailed => EventCategory::Failure,
            SimEvent::Exploded { .. } => EventCategory::Explosion,
        }
    }
}

/// Console wording. Cells are numbered from 1.
impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimEvent::Info { message } => write!(f, "{}", message),
            SimEvent::BalancerActive { cell } => write!(f, "Balancer active on cell {}", cell + 1),
            SimEvent::CutoffReached {
                cutoff: Cutoff::OverVoltage { cutoff_v },
            } => write!(
                f,
                "BMS: Over-voltage threshold reached (OV cutoff {:.2}V). Stopping charge.",
                cutoff_v
            ),
            SimEvent::CutoffReached {
                cutoff: Cutoff::OverTemperature { limit_c },
            } => write!(
                f,
                "BMS: Temperature threshold reached ({}°C). Stopping charge.",
                limit_c
            ),
            SimEvent::PhaseChanged { cause, .. } => match cause {
                TransitionCause::Start => write!(f, "START pressed: beginning charge sequence..."),
                TransitionCause::OverVoltageCutoff => write!(f, "Switching to discharge phase."),
                TransitionCause::TemperatureCutoff => {
                    write!(f, "Switching to discharge phase due to temp.")
                }
            },
            SimEvent::LevelSucceeded => write!(f, "Cycle complete. Level success!"),
            SimEvent::LevelFailed => write!(
                f,
                "BMS: Under-voltage reached. Pack safe but undercharged. Level failed."
            ),
            SimEvent::Exploded {
                cell,
                cause: ExplosionCause::OverVoltage { .. },
            } => write!(f, "BOOM! Cell {} exceeded {:.2} V!", cell + 1, EXPLOSION_OV),
            SimEvent::Exploded {
                cell,
                cause: ExplosionCause::OverTemperature { temperature_c },
            } => write!(f, "BOOM! Cell {} overheated to {:.0}°C!", cell + 1, temperature_c),
        }
    }
}

/// Consumer of per-tick events and pack snapshots
pub trait EventSink: Send {
    fn publish(&mut self, events: &[SimEvent], snapshot: &PackSnapshot);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&mut self, events: &[SimEvent], snapshot: &PackSnapshot) {
        for event in events {
            let category = event.category();
            match category {
                EventCategory::Explosion => error!(
                    %category, tick = snapshot.tick, level = snapshot.level_index + 1,
                    "{}", event
                ),
                EventCategory::Failure | EventCategory::CutoffReached => warn!(
                    %category, tick = snapshot.tick, level = snapshot.level_index + 1,
                    "{}", event
                ),
                EventCategory::BalancerActive => debug!(
                    %category, tick = snapshot.tick, "{}", event
                ),
                _ => info!(
                    %category, tick = snapshot.tick, level = snapshot.level_index + 1,
                    "{}", event
                ),
            }
        }
        debug!(
            tick = snapshot.tick,
            phase = %snapshot.phase,
            avg_v = snapshot.average_voltage,
            percent = snapshot.percent_charge,
            "pack snapshot"
        );
    }
}

/// Bounded, timestamped history of events, the equivalent of the console log
/// panel.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<(DateTime<Utc>, SimEvent)>,
    max_entries: usize,
}

impl EventLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn record(&mut self, timestamp: DateTime<Utc>, event: SimEvent) {
        self.entries.push_back((timestamp, event));
        if self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn recent(&self, count: usize) -> Vec<(DateTime<Utc>, SimEvent)> {
        let start = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(start).cloned().collect()
    }

    /// `[HH:MM:SS] message` lines, oldest first.
    pub fn console_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(at, event)| format!("[{}] {}", at.format("%H:%M:%S"), event))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventSink for EventLog {
    fn publish(&mut self, events: &[SimEvent], _snapshot: &PackSnapshot) {
        let now = Utc::now();
        for event in events {
            self.record(now, event.clone());
        }
    }
}

/// One `publish` call as seen by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBatch {
    pub events: Vec<SimEvent>,
    pub snapshot: PackSnapshot,
}

/// Keeps every batch it receives. Clones share the same buffer, so a handle
/// can be kept after the sink is moved into a controller.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<RecordedBatch>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().clone()
    }

    /// All events in publish order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.events.iter().cloned())
            .collect()
    }

    pub fn last_snapshot(&self) -> Option<PackSnapshot> {
        self.batches.lock().last().map(|b| b.snapshot.clone())
    }
}

impl EventSink for RecordingSink {
    fn publish(&mut self, events: &[SimEvent], snapshot: &PackSnapshot) {
        self.batches.lock().push(RecordedBatch {
            events: events.to_vec(),
            snapshot: snapshot.clone(),
        });
    }
}

/// Sends each batch to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&mut self, events: &[SimEvent], snapshot: &PackSnapshot) {
        for sink in &mut self.sinks {
            sink.publish(events, snapshot);
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn publish(&mut self, events: &[SimEvent], snapshot: &PackSnapshot) {
        (**self).publish(events, snapshot)
    }
}
