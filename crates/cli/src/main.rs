//! oxpilot CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Interactive chat or single-message mode
//! - `sessions` — List, inspect, and branch persisted sessions
//! - `models`   — List models available on the configured Ollama server

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "oxpilot", about = "oxpilot — a local AI coding assistant", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Continue the most recent session in this workspace
        #[arg(long = "continue")]
        continue_latest: bool,

        /// Resume a specific session by id
        #[arg(long)]
        session: Option<String>,
    },

    /// Inspect persisted sessions
    Sessions {
        #[command(subcommand)]
        command: commands::sessions::SessionsCommand,
    },

    /// List models available on the configured Ollama server
    Models,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            model,
            continue_latest,
            session,
        } => commands::chat::run(message, model, continue_latest, session).await?,
        Commands::Sessions { command } => commands::sessions::run(command).await?,
        Commands::Models => commands::models::run().await?,
    }

    Ok(())
}
