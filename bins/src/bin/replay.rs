//! Replays a recorded tick file against an in-process simulated broker,
//! logging fills as the virtual order book reacts to each tick. Refuses to
//! run against a live gateway (spec §4.11).

use anyhow::{Context, Result};
use clap::Parser;
use optex_bins::common::{init_logging, CommonArgs};
use optex_core::gateway::simulated::{SimulatedBroker, SimulatedBrokerConfig};
use optex_core::gateway::ExecutionMode;
use optex_core::recorder::player::{Player, PlayerConfig};
use optex_core::domain::CoreEvent;
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a recorded tick file against the simulator")]
struct ReplayArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to a .tick (or gzip-compressed .tick) file produced by the recorder.
    tick_file: String,

    /// Playback speed multiplier, clamped to [0.5, 10.0].
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
}

fn main() -> Result<()> {
    let args = ReplayArgs::parse();
    init_logging(&args.common.log_level)?;

    tracing::info!(file = args.tick_file.as_str(), speed = args.speed, "starting replay");

    let broker = SimulatedBroker::new(SimulatedBrokerConfig::default());
    let player = Player::load(&args.tick_file, PlayerConfig::new(args.speed))
        .with_context(|| format!("loading tick file {}", args.tick_file))?;

    tracing::info!(ticks = player.tick_count(), "tick file loaded");

    player.run(ExecutionMode::Simulated, |event| match event {
        CoreEvent::Tick(tick) => {
            let price = Decimal::from_f64_retain(tick.last_price).unwrap_or_default();
            let fills = broker.on_tick(tick.instrument_token, price, "REPLAY");
            for fill in fills {
                tracing::info!(
                    instrument = tick.instrument_token,
                    price = %fill.price,
                    quantity = %fill.quantity,
                    "replay fill"
                );
            }
        }
        CoreEvent::ReplayProgress(progress) => {
            tracing::debug!(
                played = progress.ticks_played,
                total = progress.ticks_total,
                "replay progress"
            );
        }
        CoreEvent::ReplayComplete(complete) => {
            tracing::info!(played = complete.ticks_played, "replay complete");
        }
        _ => {}
    })?;

    Ok(())
}
