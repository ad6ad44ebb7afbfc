//! Inspect how a conversation would be tailored for a token budget.
//!
//! The input is a JSON array of messages (file path or `-` for stdin). The
//! output is a JSON report with the tailored messages and token counts.
//!
//! # Examples
//!
//! ```sh
//! # Drop the oldest middle messages until the conversation fits 500 tokens
//! recap tailor --strategy head-out --budget 500 conv.json
//!
//! # Take strategy and budget from a config file
//! recap tailor --config recap.json conv.json
//!
//! # Per-message token estimates
//! cat conv.json | recap estimate -
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use recap::config::RecapConfig;
use recap::context::{HeuristicTokenCounter, PreservedSegments, Tailor, TailoringStrategy, TokenCounter};
use recap::{Message, MessageRole};
use serde::Serialize;
use std::io::{self, Read};
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "recap", version, about = "Conversation context tailoring tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tailor a conversation to a token budget
    Tailor {
        /// middle-out, head-out or tail-out
        #[arg(long)]
        strategy: Option<TailoringStrategy>,

        /// Token budget
        #[arg(long)]
        budget: Option<usize>,

        /// JSON config file supplying tailoring defaults
        #[arg(long)]
        config: Option<String>,

        /// Characters per token for the heuristic counter
        #[arg(long, default_value_t = recap::context::DEFAULT_CHARS_PER_TOKEN)]
        chars_per_token: usize,

        /// Conversation JSON file, or `-` for stdin
        input: String,
    },
    /// Print per-message token estimates
    Estimate {
        /// Characters per token for the heuristic counter
        #[arg(long, default_value_t = recap::context::DEFAULT_CHARS_PER_TOKEN)]
        chars_per_token: usize,

        /// Conversation JSON file, or `-` for stdin
        input: String,
    },
}

#[derive(Serialize)]
struct TailorReport {
    strategy: String,
    budget: usize,
    input_messages: usize,
    input_tokens: usize,
    output_messages: usize,
    output_tokens: usize,
    head: usize,
    tail: usize,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct EstimateLine {
    index: usize,
    role: MessageRole,
    tokens: usize,
}

fn read_conversation(input: &str) -> Result<Vec<Message>, String> {
    let json = if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(input).map_err(|e| format!("failed to read '{input}': {e}"))?
    };
    serde_json::from_str(&json).map_err(|e| format!("failed to parse conversation: {e}"))
}

fn run(cli: Cli) -> Result<String, String> {
    match cli.command {
        Command::Tailor {
            strategy,
            budget,
            config,
            chars_per_token,
            input,
        } => {
            let tailoring = match config {
                Some(path) => RecapConfig::from_path(&path).map_err(|e| e.to_string())?.tailoring,
                None => RecapConfig::default().tailoring,
            };
            let strategy = strategy.unwrap_or(tailoring.strategy);
            let budget = budget.unwrap_or(tailoring.max_tokens);

            let messages = read_conversation(&input)?;
            let counter = HeuristicTokenCounter::new().with_chars_per_token(chars_per_token);
            let tailor = Tailor::new(strategy).with_counter(std::sync::Arc::new(counter));
            let segments = PreservedSegments::of(&messages);
            debug!("Loaded {} messages from {input}", messages.len());

            let tailored = tailor.tailor(&messages, budget);
            let report = TailorReport {
                strategy: strategy.to_string(),
                budget,
                input_messages: messages.len(),
                input_tokens: tailor.estimate(&messages),
                output_messages: tailored.len(),
                output_tokens: tailor.estimate(&tailored),
                head: segments.head,
                tail: segments.tail,
                messages: tailored,
            };
            serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
        }
        Command::Estimate {
            chars_per_token,
            input,
        } => {
            let messages = read_conversation(&input)?;
            let counter = HeuristicTokenCounter::new().with_chars_per_token(chars_per_token);
            let lines: Vec<EstimateLine> = messages
                .iter()
                .enumerate()
                .map(|(index, m)| EstimateLine {
                    index,
                    role: m.role,
                    tokens: counter.count_tokens(m),
                })
                .collect();
            serde_json::to_string_pretty(&lines).map_err(|e| e.to_string())
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
