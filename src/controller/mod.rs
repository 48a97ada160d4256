//! # Simulation Controller
//!
//! Drives a [`SimulationEngine`] from a tokio task. The task owns the engine
//! outright; callers talk to it through a [`ControllerHandle`] command
//! channel and observe the phase through a watch channel.
//!
//! The tick timer only runs while the engine is charging or discharging.
//! Runtime settings are read from the [`ConfigProvider`] on every tick so
//! live edits take effect on the next tick.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::ConfigProvider;
use crate::error::SimError;
use crate::simulation::{
    EventSink, JitterSource, Outcome, PackSnapshot, Phase, SimEvent, SimulationEngine,
};

const COMMAND_BUFFER: usize = 32;

/// Sent back once a command has been applied and its events published.
/// Carries the phase the engine is in afterwards.
pub type Ack = oneshot::Sender<Result<Phase, SimError>>;

/// Operator requests handled by the controller task
#[derive(Debug)]
pub enum Command {
    /// Press START
    Start(Ack),
    /// Load a level (0-based) in `Idle`
    SetupLevel(usize, Ack),
    /// Load the level after the current one
    NextLevel(Ack),
    Snapshot(oneshot::Sender<PackSnapshot>),
}

/// Counters kept by the controller task
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick: Option<DateTime<Utc>>,
    pub tick_count: u64,
    pub event_count: u64,
    pub cycles_started: u64,
    pub successes: u64,
    pub failures: u64,
    pub explosions: u64,
    pub last_error: Option<String>,
}

impl RunStats {
    fn record_events(&mut self, events: &[SimEvent]) {
        self.event_count += events.len() as u64;
        for event in events {
            match event {
                SimEvent::LevelSucceeded => self.successes += 1,
                SimEvent::LevelFailed => self.failures += 1,
                SimEvent::Exploded { .. } => self.explosions += 1,
                _ => {}
            }
        }
    }
}

pub struct SimulationController<J: JitterSource, P: ConfigProvider, S: EventSink> {
    engine: SimulationEngine<J>,
    provider: P,
    sink: S,
    commands: mpsc::Receiver<Command>,
    phase_tx: watch::Sender<Phase>,
    cancel: CancellationToken,
    stats: RunStats,
}

impl<J, P, S> SimulationController<J, P, S>
where
    J: JitterSource + 'static,
    P: ConfigProvider + 'static,
    S: EventSink + 'static,
{
    /// Spawn the controller task. The current level banner is published
    /// before the first command is handled.
    pub fn spawn(
        engine: SimulationEngine<J>,
        provider: P,
        sink: S,
        cancel: CancellationToken,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (phase_tx, phase_rx) = watch::channel(engine.phase());

        let controller = Self {
            engine,
            provider,
            sink,
            commands: rx,
            phase_tx,
            cancel: cancel.clone(),
            stats: RunStats::default(),
        };
        let task = tokio::spawn(controller.run());

        ControllerHandle {
            commands: tx,
            phase: phase_rx,
            cancel,
            task,
        }
    }

    async fn run(mut self) -> RunStats {
        self.stats.started_at = Some(Utc::now());
        let banner = self.engine.level_banner();
        self.publish(banner);

        let mut ticker = interval(self.engine.settings().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            level = self.engine.level_index() + 1,
            tick_ms = self.engine.settings().tick_interval.as_millis() as u64,
            "simulation controller started"
        );

        loop {
            let active = self.engine.phase().is_active();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("simulation controller cancelled");
                    break;
                }
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed");
                        break;
                    };
                    let was_active = self.engine.phase().is_active();
                    self.handle(cmd);
                    if !was_active && self.engine.phase().is_active() {
                        // First physics tick one full period after START
                        ticker.reset();
                    }
                }
                _ = ticker.tick(), if active => {
                    self.tick();
                }
            }
        }

        self.stats
    }

    fn handle(&mut self, cmd: Command) {
        let (result, ack) = match cmd {
            Command::Start(ack) => {
                let runtime = self.provider.runtime_config();
                let was_active = self.engine.phase().is_active();
                let result = self.engine.start(&runtime);
                if !was_active && self.engine.phase() == Phase::Charging {
                    self.stats.cycles_started += 1;
                }
                (result, ack)
            }
            Command::SetupLevel(index, ack) => (self.engine.setup_level(index), ack),
            Command::NextLevel(ack) => (self.engine.advance_level(), ack),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
                return;
            }
        };

        let reply = match result {
            Ok(events) => {
                self.publish(events);
                Ok(self.engine.phase())
            }
            Err(e) => {
                warn!(error = %e, "command rejected");
                self.stats.last_error = Some(e.to_string());
                Err(e)
            }
        };
        // Caller may have given up waiting
        let _ = ack.send(reply);
    }

    fn tick(&mut self) {
        let runtime = self.provider.runtime_config();
        let events = self.engine.tick(&runtime);
        self.stats.tick_count += 1;
        self.stats.last_tick = Some(Utc::now());
        self.publish(events);

        if self.engine.phase().is_terminal() {
            info!(
                ticks = self.engine.state().tick,
                outcome = ?self.engine.state().outcome,
                "cycle ended"
            );
        }
    }

    fn publish(&mut self, events: Vec<SimEvent>) {
        self.stats.record_events(&events);
        let snapshot = self.engine.snapshot();
        self.sink.publish(&events, &snapshot);
        self.phase_tx.send_if_modified(|phase| {
            let changed = *phase != snapshot.phase;
            *phase = snapshot.phase;
            changed
        });
    }
}

/// Caller side of a running [`SimulationController`]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
    task: JoinHandle<RunStats>,
}

impl ControllerHandle {
    pub async fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| anyhow!("simulation controller has stopped"))
    }

    /// Send a state-changing command and wait until it has been applied.
    async fn request(&self, cmd: impl FnOnce(Ack) -> Command) -> Result<Phase> {
        let (tx, rx) = oneshot::channel();
        self.send(cmd(tx)).await?;
        let phase = rx
            .await
            .map_err(|_| anyhow!("simulation controller dropped the request"))??;
        Ok(phase)
    }

    /// Press START. Returns once the cycle is running (or was already).
    pub async fn start(&self) -> Result<Phase> {
        self.request(Command::Start).await
    }

    pub async fn setup_level(&self, index: usize) -> Result<Phase> {
        self.request(|ack| Command::SetupLevel(index, ack)).await
    }

    pub async fn next_level(&self) -> Result<Phase> {
        self.request(Command::NextLevel).await
    }

    pub async fn snapshot(&self) -> Result<PackSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await
            .map_err(|_| anyhow!("simulation controller dropped snapshot request"))
    }

    /// Last phase published by the controller.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Wait until the current cycle has finished or exploded.
    ///
    /// Call after [`start`](Self::start) has returned; the phase it left in
    /// the watch channel is never terminal, so a previous cycle's result can
    /// not be observed.
    pub async fn wait_for_terminal(&self) -> Result<Phase> {
        let mut rx = self.phase.clone();
        let phase = rx
            .wait_for(|p| p.is_terminal())
            .await
            .map_err(|_| anyhow!("simulation controller has stopped"))?;
        Ok(*phase)
    }

    /// Outcome of the last cycle, taken from a fresh snapshot.
    pub async fn outcome(&self) -> Result<Option<Outcome>> {
        Ok(self.snapshot().await?.outcome)
    }

    /// Stop the task and collect its counters.
    pub async fn shutdown(self) -> Result<RunStats> {
        self.cancel.cancel();
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RuntimeConfig, SharedRuntimeConfig};
    use crate::simulation::{
        ConstantJitter, EngineSettings, RecordingSink, SeededJitter, TransitionCause,
    };
    use std::time::Duration;

    fn engine(level: usize) -> SimulationEngine<ConstantJitter> {
        SimulationEngine::new(EngineSettings::default(), level, ConstantJitter::new(0.5)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_banner_published_on_spawn() {
        let sink = RecordingSink::new();
        let handle = SimulationController::spawn(
            engine(0),
            RuntimeConfig::default(),
            sink.clone(),
            CancellationToken::new(),
        );

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, Phase::Idle);

        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::Info { message } if message == "Level 1 - Easy")));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_while_idle() {
        let sink = RecordingSink::new();
        let handle = SimulationController::spawn(
            engine(0),
            RuntimeConfig::default(),
            sink.clone(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.tick, 0);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.tick_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_runs_to_terminal_phase() {
        let sink = RecordingSink::new();
        let handle = SimulationController::spawn(
            SimulationEngine::new(EngineSettings::default(), 0, SeededJitter::from_seed(11))
                .unwrap(),
            RuntimeConfig::default(),
            sink.clone(),
            CancellationToken::new(),
        );

        handle.start().await.unwrap();
        let phase = handle.wait_for_terminal().await.unwrap();
        assert!(phase.is_terminal());

        let events = sink.events();
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::PhaseChanged {
                cause: TransitionCause::Start,
                ..
            }
        )));

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.cycles_started, 1);
        assert!(stats.tick_count > 0);
        assert_eq!(stats.successes + stats.failures + stats.explosions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_settings_apply_on_next_tick() {
        let shared = SharedRuntimeConfig::new(RuntimeConfig::default());
        let handle = SimulationController::spawn(
            engine(0),
            shared.clone(),
            RecordingSink::new(),
            CancellationToken::new(),
        );

        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(handle.phase(), Phase::Charging);

        // Limit below every cell temperature trips the thermal cutoff
        shared.update(|cfg| cfg.temp_limit = 20.0);
        let mut rx = handle.subscribe();
        let phase = *rx.wait_for(|p| *p != Phase::Charging).await.unwrap();
        assert_eq!(phase, Phase::Discharging);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_levels_in_a_row() {
        let cfg = RuntimeConfig {
            charge_current: 30.0,
            balance_threshold: 0.05,
            ov_cutoff: 4.15,
            uv_cutoff: 3.0,
            temp_limit: 100.0,
        };
        let sink = RecordingSink::new();
        let handle = SimulationController::spawn(
            SimulationEngine::new(EngineSettings::default(), 0, ConstantJitter::zero()).unwrap(),
            cfg,
            sink.clone(),
            CancellationToken::new(),
        );

        assert_eq!(handle.start().await.unwrap(), Phase::Charging);
        assert_eq!(handle.wait_for_terminal().await.unwrap(), Phase::Finished);
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.level_index, 0);
        assert_eq!(snap.outcome, Some(Outcome::Success));

        // Same call order as the campaign runner
        assert_eq!(handle.next_level().await.unwrap(), Phase::Idle);
        assert_eq!(handle.start().await.unwrap(), Phase::Charging);
        assert_eq!(handle.wait_for_terminal().await.unwrap(), Phase::Finished);

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.level_index, 1);
        assert_eq!(snap.phase, Phase::Finished);
        assert_eq!(snap.outcome, Some(Outcome::Success));
        assert!(snap.tick > 0);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.cycles_started, 2);
        assert_eq!(stats.successes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_level_is_reported_not_fatal() {
        let handle = SimulationController::spawn(
            engine(0),
            RuntimeConfig::default(),
            RecordingSink::new(),
            CancellationToken::new(),
        );

        let err = handle.setup_level(42).await.unwrap_err();
        assert!(err.to_string().contains("Unknown level index 42"));
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.level_index, 0);

        let stats = handle.shutdown().await.unwrap();
        assert!(stats.last_error.is_some());
    }
}
