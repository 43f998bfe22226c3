use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cffsat_core::{
    table, telemetry, ExhaustedPolicy, OutcomeCache, ProcessRaceLauncher, Solution, StepSource,
    StopReason, SweepConfig, SweepController, SweepMode, SweepSummary,
};
use cffsat_engine::CancelFlag;
use cffsat_formula::Encoding;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "cffsat", version, about = "Search for cover-free families by racing SAT engines")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Outcome cache file.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Race budget in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Comma-separated engines to race (varisat, splr, batsat, all).
    #[arg(long, global = true, value_delimiter = ',')]
    engines: Option<Vec<String>>,

    #[arg(long, global = true)]
    encoding: Option<Encoding>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Grow n for each t until the instance stops being satisfiable.
    Sweep {
        #[arg(short, long)]
        degree: u32,
        #[arg(long, default_value_t = 1)]
        start_t: u32,
        #[arg(long, default_value_t = 1)]
        start_n: u32,
        /// Stop after this ground-set size.
        #[arg(long)]
        max_t: Option<u32>,
        /// Keep going after a step runs out of memory.
        #[arg(long)]
        continue_on_exhausted: bool,
    },
    /// Evaluate explicit T:N instances.
    Points {
        #[arg(short, long)]
        degree: u32,
        #[arg(required = true, value_parser = parse_point)]
        points: Vec<(u32, u32)>,
    },
    /// Evaluate one instance and print the family if one exists.
    Solve {
        #[arg(short, long)]
        degree: u32,
        t: u32,
        n: u32,
    },
    /// Print the largest known n for each t.
    Table {
        #[arg(short, long)]
        degree: u32,
    },
    #[command(hide = true)]
    Worker,
}

fn parse_point(s: &str) -> Result<(u32, u32), String> {
    let (t, n) = s
        .split_once(':')
        .ok_or_else(|| format!("expected T:N, got '{s}'"))?;
    let t = t.trim().parse().map_err(|e| format!("bad t in '{s}': {e}"))?;
    let n = n.trim().parse().map_err(|e| format!("bad n in '{s}': {e}"))?;
    Ok((t, n))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Worker) {
        cffsat_engine::worker::init_worker_tracing();
        return match cffsat_engine::worker::serve_stdio() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "worker failed");
                ExitCode::from(2)
            }
        };
    }

    telemetry::init_tracing(cli.common.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(common: &CommonArgs) -> Result<SweepConfig> {
    let mut config = SweepConfig::load(common.config.as_deref())?;
    if let Some(cache) = &common.cache {
        config.cache_path = cache.clone();
    }
    if let Some(timeout) = common.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(engines) = &common.engines {
        config.engines = engines.clone();
    }
    if let Some(encoding) = common.encoding {
        config.encoding = encoding;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(&cli.common)?;

    let mode = match cli.command {
        Command::Table { degree } => {
            let cache = OutcomeCache::open(&config.cache_path)?;
            print!("{}", table::render(&cache, degree, config.encoding));
            return Ok(ExitCode::SUCCESS);
        }
        Command::Sweep {
            degree,
            start_t,
            start_n,
            max_t,
            continue_on_exhausted,
        } => {
            if continue_on_exhausted {
                config.on_exhausted = ExhaustedPolicy::Continue;
            }
            SweepMode::Grow {
                degree,
                start_t,
                start_n,
                max_t,
            }
        }
        Command::Points { degree, points } => SweepMode::Points { degree, points },
        Command::Solve { degree, t, n } => SweepMode::Single { degree, t, n },
        Command::Worker => return Ok(ExitCode::SUCCESS),
    };

    let race_config = config.race_config().context("invalid configuration")?;
    let cache = OutcomeCache::open(&config.cache_path)?;
    let interrupt = CancelFlag::new();
    let launcher = ProcessRaceLauncher::new(race_config, interrupt.clone())?;
    let mut controller = SweepController::new(
        cache,
        launcher,
        config.timeout(),
        config.encoding,
        config.on_exhausted,
        interrupt.clone(),
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let summary = runtime.block_on(async move {
        tokio::spawn(watch_interrupt(interrupt));
        tokio::task::spawn_blocking(move || controller.run(&mode)).await
    })??;

    print_summary(&summary);
    Ok(match summary.stop_reason {
        StopReason::Interrupted => ExitCode::from(130),
        _ => ExitCode::SUCCESS,
    })
}

async fn watch_interrupt(interrupt: CancelFlag) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for interrupts");
        return;
    }
    info!("interrupt received, cancelling the current race");
    interrupt.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("second interrupt, exiting immediately");
        std::process::exit(130);
    }
}

fn print_summary(summary: &SweepSummary) {
    for step in &summary.steps {
        let source = match step.source {
            StepSource::Cached => "cached",
            StepSource::Computed => "computed",
        };
        println!(
            "d={} t={} n={} {:<11} {:>8.2}s {:>9} clauses ({source})",
            step.key.d,
            step.key.t,
            step.key.n,
            step.solution.label(),
            step.elapsed_secs,
            step.clauses,
        );
        if let Solution::Blocks(blocks) = &step.solution {
            println!("  {}", serde_json::to_string(blocks).unwrap_or_default());
        }
    }
    println!("stopped: {:?}", summary.stop_reason);
}
