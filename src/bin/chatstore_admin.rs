// Admin CLI - local maintenance tooling for the chat storage engine
//
// Provides subcommands for operations that do not belong on the hot path:
// - retention-sweep: delete messages/sessions past their retention window
// - migration-status: show applied vs pending schema migrations

use chatstore::config::EngineConfig;
use chatstore::durable::DurableStore;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatstore-admin")]
#[command(version = chatstore::config::VERSION)]
#[command(about = "Maintenance tooling for the chatstore durable store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete messages and sessions past their retention window
    RetentionSweep {
        /// Session idle timeout, in seconds, before a session is swept
        #[arg(long, default_value_t = 3600)]
        session_timeout_secs: i64,
    },
    /// Show applied and pending schema migrations
    MigrationStatus,
}

fn main() -> anyhow::Result<()> {
    chatstore::logging::init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let store = DurableStore::open(&config.db_path, config.reader_pool_size)?;

    match cli.command {
        Commands::RetentionSweep { session_timeout_secs } => {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)?
                .as_millis() as i64;
            let (messages, sessions) = store.retention_sweep(now, session_timeout_secs * 1000)?;
            println!("Deleted {} message(s), {} session(s)", messages, sessions);
        }
        Commands::MigrationStatus => {
            let (current, latest, pending) = store.migration_status()?;
            println!("Current schema version: {}", current);
            println!("Latest known version:   {}", latest);
            if pending.is_empty() {
                println!("Up to date.");
            } else {
                println!("Pending migrations:");
                for name in pending {
                    println!("  {}", name);
                }
            }
        }
    }

    Ok(())
}
