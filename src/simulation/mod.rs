//! # Pack Simulation
//!
//! The per-tick battery model and the charge/discharge phase machine.
//!
//! ## Components
//!
//! - **Jitter**: injectable randomness (`SeededJitter`, `ConstantJitter`, `ScriptedJitter`)
//! - **State**: phase, outcome and the read-only `PackSnapshot` handed to sinks
//! - **Events**: typed events, categories and the `EventSink` trait
//! - **Deferred**: cancellable, guarded phase transitions on the simulation clock
//! - **Engine**: the tick controller tying it all together
//!
//! ## Usage
//!
//! ```rust
//! use retro_bms::domain::RuntimeConfig;
//! use retro_bms::simulation::{EngineSettings, SeededJitter, SimulationEngine};
//!
//! let mut engine =
//!     SimulationEngine::new(EngineSettings::default(), 0, SeededJitter::from_seed(1)).unwrap();
//! let settings = RuntimeConfig::default();
//!
//! engine.start(&settings).unwrap();
//! let events = engine.tick(&settings);
//! println!("{} events, avg {:.3} V", events.len(), engine.pack().average_voltage());
//! ```

pub mod deferred;
pub mod engine;
pub mod events;
pub mod jitter;
pub mod state;

pub use deferred::{DeferredTransitions, ScheduledTransition, TransitionHandle};
pub use engine::{explosion_cause, EngineSettings, SimulationEngine};
pub use events::{
    Cutoff, EventCategory, EventLog, EventSink, ExplosionCause, FanoutSink, RecordedBatch,
    RecordingSink, SimEvent, TracingSink, TransitionCause,
};
pub use jitter::{ConstantJitter, JitterSource, ScriptedJitter, SeededJitter};
pub use state::{CellSnapshot, Outcome, PackSnapshot, Phase, SimulationState};
