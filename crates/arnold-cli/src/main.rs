mod protocol;
mod worker;

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arnold_core::{DEFAULT_TRUNCATE_THRESHOLD, DiffusionEngine, EngineConfig, LatticeDescription};
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Request, Response};

#[derive(Parser)]
#[command(name = "arnold", about = "Rational lattice diffusion engine CLI and stdio worker")]
struct Cli {
    /// Engine config (TOML). Falls back to $ARNOLD_CONFIG, then a rhythm model
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session speaking newline-delimited JSON on stdio
    Serve,

    /// Print the lattice description for the config
    Lattice,

    /// Run offline with random impulses and print summary statistics
    Simulate {
        /// Number of ticks
        #[arg(long, default_value_t = 1000)]
        ticks: usize,

        /// Tick length in milliseconds
        #[arg(long, default_value_t = 10.0)]
        dt_ms: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Chance per tick of an impulse at a random index
        #[arg(long, default_value_t = 0.05)]
        impulse_prob: f64,
    },

    /// Print JSON Schemas of the protocol messages
    Schema,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("ARNOLD_CONFIG").ok().map(PathBuf::from));
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    read_config(&path)
}

fn read_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: EngineConfig =
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Lattice => cmd_lattice(config),
        Commands::Simulate {
            ticks,
            dt_ms,
            seed,
            impulse_prob,
        } => cmd_simulate(config, *ticks, *dt_ms, *seed, *impulse_prob),
        Commands::Schema => cmd_schema(),
    }
}

/// Stdin lines on a detached thread; a blocking read there cannot hold up
/// runtime shutdown after `stop`.
fn stdin_lines() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn cmd_serve(config: EngineConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<Response>(64);

    let worker = tokio::spawn(worker::run(
        move || DiffusionEngine::new(config),
        cmd_rx,
        event_tx.clone(),
        cancel.clone(),
    ));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = event_rx.recv().await {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                cancel.cancel();
                break;
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    tracing::info!("stdin closed");
                    break;
                };
                let line = line.context("failed to read stdin")?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Request>(&line) {
                    Ok(req) => {
                        if cmd_tx.send(req).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("rejected request: {e}");
                        let _ = event_tx.send(Response::error("invalidJson", e.to_string())).await;
                    }
                }
            }
        }
    }

    // queued commands drain before the worker sees the closed channel
    drop(cmd_tx);
    drop(event_tx);
    worker.await.context("worker task failed")?;
    writer.await.context("writer task failed")??;
    Ok(())
}

fn cmd_lattice(config: EngineConfig) -> Result<()> {
    let engine = DiffusionEngine::new(config).context("failed to build engine")?;
    let description = engine.description()?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

/// Human-readable name of a lattice index.
fn label(description: &LatticeDescription, index: usize) -> String {
    match (&description.points, &description.grids) {
        (Some(points), Some(grids)) if !grids.is_empty() => {
            format!("{} @ {}", points[index / grids.len()], grids[index % grids.len()])
        }
        (Some(points), _) => points[index].to_string(),
        (None, Some(grids)) => grids[index].to_string(),
        (None, None) => index.to_string(),
    }
}

fn cmd_simulate(
    config: EngineConfig,
    ticks: usize,
    dt_ms: f64,
    seed: u64,
    impulse_prob: f64,
) -> Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&impulse_prob),
        "impulse probability must lie in [0, 1], got {impulse_prob}"
    );
    let mut engine = DiffusionEngine::new(config).context("failed to build engine")?;
    let description = engine.description()?;
    let mut rng = SmallRng::seed_from_u64(seed);
    let n = engine.len();
    let mut impulses = 0usize;

    for _ in 0..ticks {
        if rng.random_bool(impulse_prob) {
            engine.add_impulse(rng.random_range(0..n), rng.random::<f64>())?;
            impulses += 1;
        }
        engine.advance(dt_ms)?;
    }

    let mass = engine.mass();
    let argmax = mass.argmax().context("empty lattice")?;
    println!("points:     {n}");
    println!("ticks:      {ticks}");
    println!("impulses:   {impulses}");
    println!("total:      {:.6}", mass.total());
    println!("entropy:    {:.6}", mass.entropy()?);
    println!("perplexity: {:.3}", mass.perplexity()?);
    println!("argmax:     {argmax} ({})", label(&description, argmax));
    let drawn = mass.sample(&mut rng)?;
    println!("sample:     {drawn} ({})", label(&description, drawn));

    let mut support = mass.normalized()?;
    let kept = support.truncate(DEFAULT_TRUNCATE_THRESHOLD);
    println!("support:    {} above {DEFAULT_TRUNCATE_THRESHOLD}", kept.len());
    for (index, like) in kept.iter().zip(support.likes()).filter(|(_, l)| **l > 0.05) {
        println!("  {like:.4}  {}", label(&description, *index));
    }
    Ok(())
}

fn cmd_schema() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&protocol::schemas())?);
    Ok(())
}
