//! CLI entrypoint and command routing for gideon.
//!
//! This module defines all top-level subcommands and delegates each action
//! to the corresponding runtime/helper module.

mod calc;
mod config;
mod conversation;
mod memory;
mod responder;
mod runner;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;

use crate::config::GideonConfig;
use crate::conversation::Conversation;
use crate::memory::MemoryStore;
use crate::responder::Responder;
use crate::telemetry::{TelemetrySimulator, TelemetrySnapshot};

#[derive(Parser)]
/// Top-level CLI arguments parsed by clap.
#[command(name = "gideon", about = "Rule-based assistant for the Solaris Pro solar dashboard")]
struct Cli {
    /// Directory containing gideon.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the memory file location
    #[arg(long, global = true)]
    memory: Option<PathBuf>,

    /// Seed for reproducible replies and telemetry jitter
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
/// First-level CLI commands.
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Answer immediately instead of simulating thinking time
        #[arg(long)]
        no_delay: bool,
    },

    /// Send a single message and print the reply
    Ask {
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Evaluate an arithmetic expression
    Calc {
        /// Expression, e.g. "12 + 8" or "7 fois 6"
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        expr: Vec<String>,
    },

    /// Show the conversation log
    History {
        /// Number of recent turns to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Inspect or clear the assistant's memory
    #[command(subcommand)]
    Memory(MemoryAction),

    /// Show simulated telemetry readings
    Telemetry {
        /// Number of simulator ticks to apply before printing
        #[arg(short, long, default_value = "0")]
        ticks: u32,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
/// gideon memory subcommands.
enum MemoryAction {
    /// Show stored name, facts and log size
    Show,
    /// Clear the conversation log (name and facts are kept)
    Purge,
    /// Forget everything, including the user's name
    Reset,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config {
        Some(dir) => dir,
        None => std::env::current_dir().with_context(|| "getting current directory")?,
    };
    let no_delay = matches!(cli.command, Commands::Chat { no_delay: true });
    let cfg = GideonConfig::load(&config_dir)?.with_overrides(cli.memory, no_delay, cli.seed);

    match cli.command {
        Commands::Chat { .. } => {
            runner::run(cfg).await?;
        }

        Commands::Ask { text } => {
            let mut conversation = open_conversation(&cfg);
            let reply = conversation.exchange(&text.join(" "), &TelemetrySnapshot::default());
            println!("{}", reply.text);
        }

        Commands::Calc { expr } => {
            let expr = calc::sanitize(&calc::normalize_operator_words(&expr.join(" ")));
            match calc::evaluate(&expr) {
                Ok(value) => println!("{expr} = {}", calc::format_number(value)),
                Err(e) => anyhow::bail!("could not compute '{expr}': {e}"),
            }
        }

        Commands::History { limit } => {
            let conversation = open_conversation(&cfg);
            let history = conversation.history();
            if history.is_empty() {
                println!("No conversation history.");
            } else {
                let start = history.len().saturating_sub(limit);
                for turn in &history[start..] {
                    let speaker = if turn.is_user { "you" } else { "gideon" };
                    println!(
                        "[{}] {speaker}: {}",
                        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        truncate(&turn.text.replace('\n', " "), 100),
                    );
                }
            }
        }

        Commands::Memory(action) => {
            let mut conversation = open_conversation(&cfg);
            match action {
                MemoryAction::Show => {
                    println!("{}", conversation.memory_report());
                }
                MemoryAction::Purge => {
                    conversation.purge();
                    println!("Conversation history purged.");
                }
                MemoryAction::Reset => {
                    conversation.reset();
                    println!("Memory reset.");
                }
            }
        }

        Commands::Telemetry { ticks, json } => {
            let mut simulator = TelemetrySimulator::new(TelemetrySnapshot::default());
            let mut rng = match cfg.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            for _ in 0..ticks {
                simulator.tick(&mut rng);
            }
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(simulator.snapshot())
                        .with_context(|| "serializing telemetry")?
                );
            } else {
                print!("{}", simulator.snapshot().display());
            }
        }
    }

    Ok(())
}

fn open_conversation(cfg: &GideonConfig) -> Conversation {
    let store =
        MemoryStore::open(&cfg.resolved_memory_path()).with_history_limit(cfg.history_limit);
    Conversation::new(store, Responder::new(cfg.seed))
}

/// Return `s` unchanged when short enough, otherwise cut it to `max` characters.
fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
