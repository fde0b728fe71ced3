//! Croupier demo binary
//!
//! Drives the wagering engine end to end against a simulated entropy
//! oracle: wagers across every game class, immediate fulfillments, withheld
//! fulfillments that expire into refunds, and payout delivery through the
//! background workers.

use clap::{Parser, Subcommand};
use croupier::{
    derive_outcome, derive_salt,
    feeds::{FeeConverter, LinearFeeEstimator, StaticLivenessFeed, StaticRateFeed},
    oracle::SequentialEntropySource,
    service::RecordingSink,
    CasinoConfig, CasinoService, ConfigLoader, GameKind, ManualContext, Selection,
    ServiceWorkers, SettlementRecord, WagerEngine, WagerId, WagerRequest,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Croupier wagering engine CLI
#[derive(Parser)]
#[command(name = "croupier")]
#[command(about = "Provably fair wagering engine", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated casino session against a mock oracle
    Demo {
        /// Number of wagers to place
        #[arg(short = 'n', long, default_value_t = 200)]
        wagers: u64,

        /// Starting house bankroll in base units
        #[arg(short, long, default_value_t = 10_000_000_000)]
        bankroll: u64,

        /// RNG seed for reproducible sessions
        #[arg(short, long, default_value_t = 7)]
        seed: u64,

        /// Percent of fulfillments withheld so wagers expire into refunds
        #[arg(short = 'w', long, default_value_t = 5)]
        withheld_percent: u64,
    },

    /// Recompute a settlement outcome from public inputs
    Verify {
        /// Wager id
        #[arg(long)]
        wager_id: u64,

        /// Stake in base units
        #[arg(long)]
        stake: u64,

        /// Placement timestamp, seconds
        #[arg(long)]
        placed_at: u64,

        /// Entropy domain marker at placement
        #[arg(long)]
        marker: u64,

        /// Oracle random value, 32 bytes hex
        #[arg(long)]
        random_value: String,

        /// Game class modulo
        #[arg(long)]
        modulo: u64,
    },

    /// Write the active configuration as TOML
    Config {
        /// Output path
        #[arg(short, long, default_value = "croupier.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "croupier=debug"
    } else {
        "croupier=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;

    match cli.command {
        Commands::Demo {
            wagers,
            bankroll,
            seed,
            withheld_percent,
        } => {
            demo(config, wagers, bankroll, seed, withheld_percent).await?;
        }
        Commands::Verify {
            wager_id,
            stake,
            placed_at,
            marker,
            random_value,
            modulo,
        } => {
            verify(wager_id, stake, placed_at, marker, &random_value, modulo)?;
        }
        Commands::Config { output } => {
            ConfigLoader::new().save(&config, &output)?;
            println!("wrote configuration to {}", output);
        }
    }

    Ok(())
}

async fn demo(
    config: CasinoConfig,
    wagers: u64,
    bankroll: u64,
    seed: u64,
    withheld_percent: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🎲 Croupier Demo Session");
    println!("========================");
    println!("Wagers: {}", wagers);
    println!("Bankroll: {}", bankroll);
    println!("Seed: {}", seed);
    println!("Withheld: {}%", withheld_percent);
    println!();

    // Feeds pinned to a unit rate; the upstream recovered long ago.
    let converter = FeeConverter::new(
        Arc::new(StaticRateFeed::new(1_000_000_000, 9)),
        Some(Arc::new(StaticLivenessFeed::up_since(0))),
        Arc::new(LinearFeeEstimator { overhead_gas: 0 }),
        config.timing.recovery_grace_period_secs,
    );

    let mut engine = WagerEngine::new(
        config.clone(),
        converter,
        Arc::new(SequentialEntropySource::new()),
    );
    engine.deposit_bankroll(bankroll)?;

    let context = Arc::new(ManualContext::new(100_000, 1));
    context.set_gas_price(5);
    let service = CasinoService::new(engine, context.clone());
    let sink = Arc::new(RecordingSink::new());
    let workers = ServiceWorkers::spawn(service.clone(), sink.clone());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut wins = 0u64;
    let mut losses = 0u64;
    let mut withheld = 0u64;
    let mut rejected = 0u64;
    let mut last_settlement: Option<SettlementRecord> = None;

    for _ in 0..wagers {
        let request = random_request(&mut rng, &config);
        match service.place_wager(&request).await {
            Ok(receipt) => {
                context.advance_time(1);
                context.advance_marker(1);

                if rng.gen_range(0..100u64) < withheld_percent {
                    withheld += 1;
                    continue;
                }

                let mut value = [0u8; 32];
                rng.fill(&mut value[..]);
                match service.fulfill(receipt.request_token, value).await {
                    Ok(record) => {
                        if record.win {
                            wins += 1;
                        } else {
                            losses += 1;
                        }
                        last_settlement = Some(record);
                    }
                    Err(err) => {
                        tracing::warn!(
                            wager_id = receipt.wager_id.0,
                            error = %err,
                            "fulfillment rejected"
                        );
                    }
                }
            }
            Err(err) => {
                rejected += 1;
                tracing::debug!(error = %err, "placement rejected");
            }
        }
    }

    // Expire the withheld wagers and wait for the workers to catch up.
    context.advance_time(config.timing.refund_cooldown_secs + 1);

    let expected_deliveries = (wins + withheld) as usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while sink.delivered().len() < expected_deliveries {
        if tokio::time::Instant::now() > deadline {
            tracing::warn!(
                delivered = sink.delivered().len(),
                expected = expected_deliveries,
                "payout delivery did not finish in time"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    workers.stop();

    let stats = service.stats().await;
    let engine = service.engine();
    let engine = engine.lock().await;

    println!();
    println!("📊 Session Summary");
    println!("==================");
    println!("Placed: {}   Rejected: {}", stats.bet_count, rejected);
    println!(
        "Wins: {}   Losses: {}   Refunds: {}",
        wins, losses, stats.refund_count
    );
    println!("Total wagered:  {}", stats.total_wagered);
    println!("Total paid out: {}", stats.total_paid_out);
    println!("Total refunded: {}", stats.total_refunded);
    println!(
        "Escrow: total={} locked={} free={}",
        engine.escrow().total(),
        engine.escrow().locked(),
        engine.escrow().free()
    );
    println!("Delivered payouts: {}", sink.delivered().len());
    println!("Books balanced: {}", engine.audit());

    if let Some(record) = last_settlement {
        println!();
        println!("Sample settlement record:");
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    Ok(())
}

fn random_request(rng: &mut StdRng, config: &CasinoConfig) -> WagerRequest {
    let kind = match rng.gen_range(0..5) {
        0 => GameKind::CoinFlip,
        1 => GameKind::Dice,
        2 => GameKind::DoubleDice,
        3 => GameKind::Roulette,
        _ => GameKind::HashRoll,
    };
    let modulo = kind.modulo();

    let selection = if kind.uses_mask() {
        let bits = rng.gen_range(1..=modulo.min(8));
        let mut mask = 0u64;
        for _ in 0..bits {
            mask |= 1u64 << rng.gen_range(0..modulo);
        }
        Selection::Mask(mask)
    } else {
        let over = rng.gen_bool(0.5);
        let value = if over {
            // Leave at least one winning outcome above the boundary.
            rng.gen_range(1..modulo - 1)
        } else {
            rng.gen_range(1..modulo)
        };
        Selection::Threshold { value, over }
    };

    let span = config.limits.max_stake / 10_000;
    let high = config
        .limits
        .min_stake
        .saturating_add(span)
        .min(config.limits.max_stake);
    let stake = rng.gen_range(config.limits.min_stake..=high);

    WagerRequest {
        player: format!("player_{}", rng.gen_range(0..8)),
        kind,
        selection,
        stake,
        // Covers the stake and the oracle fee with headroom to spare; the
        // surplus comes back on the receipt.
        attached: stake.saturating_add(2_000_000),
    }
}

fn verify(
    wager_id: u64,
    stake: u64,
    placed_at: u64,
    marker: u64,
    random_hex: &str,
    modulo: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = GameKind::from_modulo(modulo)
        .ok_or_else(|| format!("unsupported modulo {}", modulo))?;

    let bytes = hex::decode(random_hex)?;
    let random_value: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("random value must be 32 bytes, got {}", bytes.len()))?;

    let salt = derive_salt(WagerId(wager_id), stake, placed_at, marker);
    let outcome = derive_outcome(&random_value, &salt, kind.modulo());

    println!("game:    {}", kind);
    println!("salt:    {}", hex::encode(salt));
    println!("outcome: {} (modulo {})", outcome, modulo);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }
}
