//! Intentflow command-line front end
//!
//! Drives the intent pipeline from a terminal with keyword-based collaborators:
//! - **ingest / resume**: stage a message and let it settle
//! - **pending / show / history**: inspect stored intents
//! - **retry / recover / check**: operator actions

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use intentflow_logging::{init_logging, LogConfig};

mod builtin;
mod cli;

use cli::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "intentflow", about = "Durable intent ingestion and follow-up correlation")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Pipeline config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "INTENTFLOW_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stage a message and process it
    Ingest {
        /// Sender id (phone number, account id, ...)
        #[arg(short, long)]
        user: String,

        /// Message text
        text: String,

        /// Channel the message arrived on (default: WEB)
        #[arg(short, long)]
        channel: Option<String>,

        /// Delivery id used for deduplication
        #[arg(long)]
        key: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer the user's pending question
    Resume {
        #[arg(short, long)]
        user: String,

        /// Answer text
        text: String,

        #[arg(short, long)]
        channel: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the intent waiting for the user's input
    Pending {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        json: bool,
    },

    /// List a user's intents, newest first
    History {
        #[arg(short, long)]
        user: String,

        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: u32,

        /// Page size (at most 100)
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,

        /// Oldest first
        #[arg(long)]
        asc: bool,

        /// Only intents in this status (e.g. failed, needs_input)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show one intent and its follow-ups
    Show {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Reprocess a FAILED or NEEDS_INPUT intent
    Retry {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Check that no user has more than one NEEDS_INPUT intent
    Check {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Process intents left in RECEIVED (queue was full, process restarted)
    Recover,
}

async fn run_command(command: Commands, global: &GlobalArgs) -> anyhow::Result<()> {
    match command {
        Commands::Ingest {
            user,
            text,
            channel,
            key,
            json,
        } => {
            cli::intent::run_ingest(
                global,
                cli::intent::IngestArgs {
                    user,
                    text,
                    channel,
                    key,
                    json,
                },
            )
            .await
        }
        Commands::Resume {
            user,
            text,
            channel,
            json,
        } => {
            cli::intent::run_resume(
                global,
                cli::intent::ResumeArgs {
                    user,
                    text,
                    channel,
                    json,
                },
            )
            .await
        }
        Commands::Pending { user, json } => {
            cli::intent::run_pending(global, cli::intent::PendingArgs { user, json }).await
        }
        Commands::History {
            user,
            offset,
            limit,
            asc,
            status,
            json,
        } => {
            cli::history::run(
                global,
                cli::history::HistoryArgs {
                    user,
                    offset,
                    limit,
                    oldest_first: asc,
                    status,
                    json,
                },
            )
            .await
        }
        Commands::Show { id, json } => {
            cli::intent::run_show(global, cli::intent::ShowArgs { id, json }).await
        }
        Commands::Retry { id, json } => {
            cli::intent::run_retry(global, cli::intent::RetryArgs { id, json }).await
        }
        Commands::Check { user, json } => {
            cli::maintenance::run_check(global, cli::maintenance::CheckArgs { user, json }).await
        }
        Commands::Recover => cli::maintenance::run_recover(global).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "intentflow",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let global = GlobalArgs {
        config: cli.config,
        database: cli.database,
    };

    match run_command(cli.command, &global).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}
