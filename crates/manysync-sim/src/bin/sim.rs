#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use manysync_sim::campaign::{CampaignConfig, load_campaign_config, replay_seed, run_campaign};
use manysync_sim::{HubMode, Simulator};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "manysync-sim", version, about = "Deterministic hub/peer sync simulator")]
struct Cli {
    /// Campaign settings (TOML); built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of peers.
    #[arg(long, global = true)]
    peers: Option<usize>,

    /// Override the number of faulty rounds.
    #[arg(long, global = true)]
    rounds: Option<u64>,

    /// Override how the hub consumes a round's messages.
    #[arg(long, global = true)]
    mode: Option<HubMode>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single seed and print a summary.
    Run {
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Run a range of seeds and report failures.
    Campaign {
        /// First seed.
        #[arg(long)]
        from: Option<u64>,
        /// Number of seeds.
        #[arg(long)]
        count: Option<u64>,
    },
    /// Re-run one seed and print its oracle verdict and trace.
    Replay {
        seed: u64,
        /// Include every trace event.
        #[arg(long)]
        trace: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = campaign_config(&cli)?;

    match cli.command {
        Command::Run { seed } => {
            let result = Simulator::new(config.sim_config_for_seed(seed))?.run()?;
            let summary = result.summary();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "seed={} rounds={} drain_rounds={} quiesced={} converged={} keys={} sent={} dropped={}",
                    summary.seed,
                    summary.rounds,
                    summary.drain_rounds,
                    summary.quiesced,
                    summary.converged,
                    summary.key_count,
                    summary.stats.sent,
                    summary.stats.dropped,
                );
            }
        }
        Command::Campaign { from, count } => {
            let mut config = config;
            if from.is_some() || count.is_some() {
                let start = from.unwrap_or(config.seeds.start);
                let len = count.unwrap_or_else(|| config.seeds.end.saturating_sub(config.seeds.start));
                config.seeds = start..start.saturating_add(len);
            }
            let report = run_campaign(&config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "seeds={} passed={} interesting={} first_failure={}",
                    report.seeds_run,
                    report.seeds_passed,
                    report.interesting_states_reached,
                    report
                        .first_failure
                        .map_or_else(|| "none".to_owned(), |seed| seed.to_string()),
                );
                for failure in &report.failures {
                    for violation in &failure.violations {
                        println!("  seed {}: {violation}", failure.seed);
                    }
                }
            }
            if !report.all_passed() {
                bail!("{} of {} seeds failed", report.failures.len(), report.seeds_run);
            }
        }
        Command::Replay { seed, trace } => {
            let detail = replay_seed(seed, &config)?;
            if cli.json {
                let events = if trace { detail.result.trace.as_slice() } else { &[] };
                let out = serde_json::json!({
                    "summary": detail.result.summary(),
                    "passed": detail.oracle.passed,
                    "violations": detail.oracle.violations.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "trace": events,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                if trace {
                    for event in &detail.result.trace {
                        println!("{:>5} {}", event.round, serde_json::to_string(&event.kind)?);
                    }
                }
                println!("seed={seed} passed={}", detail.oracle.passed);
                for violation in &detail.oracle.violations {
                    println!("  {violation}");
                }
            }
        }
    }

    Ok(())
}

fn campaign_config(cli: &Cli) -> Result<CampaignConfig> {
    let mut config = match &cli.config {
        Some(path) => load_campaign_config(path)?,
        None => CampaignConfig::default(),
    };
    if let Some(peers) = cli.peers {
        config.simulation.peer_count = peers;
    }
    if let Some(rounds) = cli.rounds {
        config.simulation.rounds = rounds;
    }
    if let Some(mode) = cli.mode {
        config.simulation.hub_mode = mode;
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MANYSYNC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "manysync=debug,info"
        } else {
            "manysync=info,warn"
        })
    });

    let format = env::var("MANYSYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}
