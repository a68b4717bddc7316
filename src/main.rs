//! # Tutor CLI (`tutor`)
//!
//! Builds the transcript index, prepares the log database and runs the web
//! server of the course tutoring assistant.
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the log database and run schema migrations |
//! | `tutor index build` | Chunk and embed the transcript into the index |
//! | `tutor index query "<q>"` | Show the context retrieved for a question |
//! | `tutor serve` | Start the web server |
//! | `tutor stats` | Summarize the interaction log |
//! | `tutor hash-password` | Hash a password read from stdin for `[auth]` |
//!
//! ## Examples
//!
//! ```bash
//! echo -n 'secret' | tutor hash-password
//! tutor init
//! OPENAI_API_KEY=sk-... tutor index build
//! OPENAI_API_KEY=sk-... TUTOR_SECRET_KEY=... tutor serve
//! ```

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tutor_chat::{auth, config, index, migrate, server, stats};

/// Course tutoring assistant backed by indexed lecture transcripts.
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the log database schema.
    ///
    /// Creates the SQLite file and the `logs` and `health_plan_logs` tables.
    /// Safe to run more than once.
    Init,

    /// Build or inspect the transcript index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the web server.
    ///
    /// Needs `OPENAI_API_KEY`, a token secret and a built index.
    Serve,

    /// Print a summary of the interaction log.
    Stats,

    /// Hash a password read from stdin into an Argon2 PHC string.
    HashPassword,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Rebuild the index from `[index].transcript`, replacing any previous one.
    Build,
    /// Print the context retrieved for a question, before and after filtering.
    Query {
        /// The question to retrieve context for.
        question: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::HashPassword = cli.command {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        let password = input.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            anyhow::bail!("No password on stdin");
        }
        println!("{}", auth::hash_password(password)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { action } => match action {
            IndexAction::Build => index::run_index_build(&cfg).await?,
            IndexAction::Query { question } => index::run_index_query(&cfg, &question).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::HashPassword => {}
    }

    Ok(())
}
