//! LocalMind CLI — the main entry point.
//!
//! Commands:
//! - `onboard`  — Create `~/.localmind/` and a default config
//! - `chat`     — Interactive or single-message chat over learned documents
//! - `learn`    — Compress documents into memory
//! - `memory`   — Inspect and edit the knowledge store
//! - `profiles` — List generation profiles
//! - `doctor`   — Diagnose config, model and memory

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "localmind",
    about = "LocalMind — offline document memory and chat for local LLMs",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and the memory directory
    Onboard,

    /// Chat with the loaded model, grounded in learned documents
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Generation profile (general, document, explanatory, code, creative)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Compress documents into memory
    Learn {
        /// Text or markdown files to learn
        #[arg(required = true)]
        files: Vec<std::path::PathBuf>,
    },

    /// Inspect and edit learned knowledge
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// List generation profiles
    Profiles,

    /// Diagnose system health
    Doctor,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List stored documents
    List,

    /// Show store usage and compression totals
    Stats,

    /// Remove one document
    Forget {
        /// Record id, as shown by `memory list`
        id: String,
    },

    /// Quote a document's source text around a phrase
    Cite {
        id: String,
        query: String,
    },

    /// Remove every document
    Clear {
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },

    /// Print the knowledge block the next chat turn would receive
    Show,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, profile } => commands::chat::run(message, profile).await?,
        Commands::Learn { files } => commands::learn::run(files).await?,
        Commands::Memory { action } => match action {
            MemoryAction::List => commands::memory::list().await?,
            MemoryAction::Stats => commands::memory::stats().await?,
            MemoryAction::Forget { id } => commands::memory::forget(&id).await?,
            MemoryAction::Cite { id, query } => commands::memory::cite(&id, &query).await?,
            MemoryAction::Clear { confirm } => commands::memory::clear(confirm).await?,
            MemoryAction::Show => commands::memory::show().await?,
        },
        Commands::Profiles => commands::profiles::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
