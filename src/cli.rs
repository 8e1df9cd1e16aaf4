use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use netverdict::config::Config;
use netverdict::consensus::ConsensusEngine;
use netverdict::intel::{HttpIntelProvider, IntelProvider};
use netverdict::models::{ConnectionObservation, Protocol};
use netverdict::scoring::default_scorers;
use netverdict::Pipeline;

#[derive(Parser)]
#[command(name = "netverdict")]
#[command(author, version, about = "Consensus-based threat scoring for network connections")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scoring pipeline over a stream of observations
    Run {
        /// Read JSON observations (one per line) from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Score a single destination and print the verdict
    Check {
        /// Destination IP to score
        ip: IpAddr,

        /// Destination port
        #[arg(short, long, default_value = "443")]
        port: u16,

        /// Protocol (TCP or UDP)
        #[arg(long, default_value = "TCP")]
        protocol: Protocol,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Run { input } => cmd_run(config, input),
        Commands::Check {
            ip,
            port,
            protocol,
            json,
        } => cmd_check(config, ip, port, protocol, json),
        Commands::GenConfig { output } => cmd_gen_config(config, output),
    }
}

/// Feed observations from a line-delimited JSON stream into the pipeline,
/// draining gracefully on EOF or Ctrl+C
fn cmd_run(config: Config, input: Option<PathBuf>) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    info!(workers = pipeline.worker_count(), "pipeline started");

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, draining...");
        running_handler.store(false, Ordering::Relaxed);
    })?;

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(io::BufReader::new(
            std::fs::File::open(&path)
                .with_context(|| format!("Failed to open input: {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    for line in reader.lines() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ConnectionObservation>(&line) {
            Ok(observation) => {
                if let Err(e) = pipeline.enqueue(observation) {
                    warn!("enqueue failed: {}", e);
                }
            }
            Err(e) => warn!("skipping malformed observation: {}", e),
        }
    }

    // Let the final snapshot settle before shutdown so the summary reflects
    // the drained queue
    while running.load(Ordering::Relaxed) && pipeline.snapshot().queue_depth > 0 {
        std::thread::sleep(Duration::from_millis(100));
    }

    let snapshot = pipeline.snapshot();
    pipeline.shutdown();

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// One-shot verdict for a single destination, bypassing the queue
fn cmd_check(config: Config, ip: IpAddr, port: u16, protocol: Protocol, json: bool) -> Result<()> {
    let intel_provider = HttpIntelProvider::new(config.intel.clone())?;
    let intel = intel_provider.lookup(ip)?;

    let observation = ConnectionObservation::new("0.0.0.0".parse()?, ip, port, protocol);
    let scorers = default_scorers();
    let votes = scorers
        .iter()
        .filter_map(|s| s.score(&observation, &intel).ok())
        .collect();

    let engine = ConsensusEngine::new(config.consensus.clone());
    let result = engine
        .evaluate(votes, &scorers)
        .context("Consensus could not be reached for this destination")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Destination:    {}:{} ({})", ip, port, protocol);
        println!("Score:          {:.3} ({})", result.consensus_score, result.method);
        println!("Confidence:     {:.3}", result.confidence);
        println!("Malicious:      {}", result.is_malicious);
        println!("Uncertain:      {}", result.high_uncertainty);
        for vote in &result.votes {
            println!(
                "  {:12} {:.3} (confidence {:.2}): {}",
                vote.scorer_id.name(),
                vote.score,
                vote.confidence,
                vote.reasoning
            );
        }
        if !result.outlier_scorers.is_empty() {
            let names: Vec<&str> = result.outlier_scorers.iter().map(|s| s.name()).collect();
            println!("Outliers:       {}", names.join(", "));
        }
    }

    Ok(())
}

/// Emit the effective configuration (loaded file merged with defaults)
fn cmd_gen_config(config: Config, output: Option<PathBuf>) -> Result<()> {
    let content = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write config: {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}
