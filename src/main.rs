use anyhow::Result;
use retro_bms::config::Config;
use retro_bms::controller::{ControllerHandle, SimulationController};
use retro_bms::domain::{SharedRuntimeConfig, LEVELS};
use retro_bms::simulation::{
    EventLog, FanoutSink, Outcome, SeededJitter, SimulationEngine, TracingSink,
};
use retro_bms::telemetry::{init_tracing, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let tick_interval = cfg.simulation.tick_interval();

    let engine = SimulationEngine::new(
        cfg.simulation.engine_settings(),
        cfg.session.start_level,
        SeededJitter::new(cfg.simulation.random_seed),
    )?;
    let sink = FanoutSink::new()
        .with(TracingSink)
        .with(EventLog::new(cfg.simulation.event_history));
    let settings = SharedRuntimeConfig::new(cfg.runtime);

    info!(
        start_level = cfg.session.start_level + 1,
        auto_advance = cfg.session.auto_advance,
        seed = ?cfg.simulation.random_seed,
        "starting Retro BMS"
    );

    let cancel = CancellationToken::new();
    let handle = SimulationController::spawn(engine, settings, sink, cancel.clone());

    tokio::select! {
        res = run_campaign(&handle, &cfg, tick_interval) => res?,
        _ = shutdown_signal() => {},
    }

    let stats = handle.shutdown().await?;
    info!(
        ticks = stats.tick_count,
        cycles = stats.cycles_started,
        successes = stats.successes,
        failures = stats.failures,
        explosions = stats.explosions,
        "shutdown complete"
    );
    Ok(())
}

/// Play the configured level, then keep advancing while cycles succeed.
async fn run_campaign(
    handle: &ControllerHandle,
    cfg: &Config,
    tick_interval: std::time::Duration,
) -> Result<()> {
    let budget = tick_interval.saturating_mul(cfg.session.max_ticks.min(u32::MAX as u64) as u32);

    loop {
        handle.start().await?;

        match tokio::time::timeout(budget, handle.wait_for_terminal()).await {
            Ok(phase) => {
                let phase = phase?;
                let snap = handle.snapshot().await?;
                let snapshot_json = serde_json::to_string(&snap)?;
                info!(
                    level = snap.level_index + 1,
                    %phase,
                    outcome = ?snap.outcome,
                    ticks = snap.tick,
                    snapshot = %snapshot_json,
                    "level complete"
                );

                let last = snap.level_index + 1 >= LEVELS.len();
                if snap.outcome != Some(Outcome::Success) || !cfg.session.auto_advance || last {
                    return Ok(());
                }
                handle.next_level().await?;
            }
            Err(_) => {
                warn!(max_ticks = cfg.session.max_ticks, "tick budget exhausted");
                return Ok(());
            }
        }
    }
}
