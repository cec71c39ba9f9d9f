use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "VIGIL_LOG";

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about = "VIGIL - tamper-evident ledger of AI coding sessions", long_about = None)]
struct Cli {
    /// Data root (defaults to $VIGIL_HOME or ~/.vigil)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session (nests under a recently active one)
    Start(commands::lifecycle::StartArgs),
    /// Record a heartbeat for the live session
    Heartbeat,
    /// End and seal the live session
    End(commands::lifecycle::EndArgs),
    /// Auto-seal the live session if it has been idle too long
    Sweep,
    /// Export indexes and sealed chains
    Backup {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Merge a backup file into the data root
    Restore {
        /// Backup file produced by `vigil backup`
        file: PathBuf,
    },
    /// Verify a chain's hashes, linkage and signatures
    Verify { session_id: String },
    /// Show the live session state
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries results; logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let output = commands::Output { json: cli.json };
    let root = cli.root;

    match cli.command {
        Commands::Start(args) => commands::lifecycle::start(root, args, output).await?,
        Commands::Heartbeat => commands::lifecycle::heartbeat(root, output)?,
        Commands::End(args) => commands::lifecycle::end(root, args, output).await?,
        Commands::Sweep => commands::lifecycle::sweep(root, output).await?,
        Commands::Backup { output: file } => commands::backup::backup(root, file).await?,
        Commands::Restore { file } => commands::backup::restore(root, file, output).await?,
        Commands::Verify { session_id } => commands::inspect::verify(root, &session_id, output)?,
        Commands::Status => commands::inspect::status(root, output).await?,
    }

    Ok(())
}
