//! WorkLog CLI
//!
//! Command-line interface for time tracking and cloud sync.

use std::process::ExitCode;

use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use worklog::error::{Result, WorklogError};
use worklog::storage::queries::*;
use worklog::storage::Storage;
use worklog::sync::{SyncConfig, SyncOrchestrator};
use worklog::types::*;

#[derive(Parser)]
#[command(name = "worklog")]
#[command(about = "Local-first time tracking with cloud sync")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "WORKLOG_DB_PATH",
        default_value = "~/.local/share/worklog/worklog.db"
    )]
    db_path: String,

    /// Sync config file (defaults to the user config directory)
    #[arg(long, env = "WORKLOG_CONFIG")]
    config: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save sync credentials
    Configure {
        #[arg(long)]
        access_key_id: String,
        #[arg(long)]
        secret_access_key: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        #[arg(long)]
        profile_id: String,
        #[arg(long)]
        sessions_table: Option<String>,
        #[arg(long)]
        tags_table: Option<String>,
        /// DynamoDB-compatible endpoint URL
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Check that the sessions table is reachable
    TestConnection,
    /// Run a sync pass
    Sync,
    /// Show sync status
    Status,
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage work sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Show logged hours
    Hours {
        /// Day (YYYY-MM-DD), defaults to today
        #[arg(short, long, conflicts_with = "month")]
        date: Option<NaiveDate>,
        /// Month (YYYY-MM)
        #[arg(short, long)]
        month: Option<String>,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Create a tag
    Add { name: String },
    /// Rename a tag
    Rename { id: i64, name: String },
    /// Delete a tag
    Delete { id: i64 },
    /// List tags
    List,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Log a work session
    Add {
        /// Hours worked
        hours: f64,
        /// What was done
        description: String,
        /// Day (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        notes: Option<String>,
        /// Next planned stage
        #[arg(short = 'N', long)]
        next: Option<String>,
        /// Tag ID
        #[arg(short, long)]
        tag: Option<i64>,
    },
    /// Delete a session
    Delete { id: i64 },
    /// List sessions for a day
    List {
        /// Day (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "worklog=debug" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let config_path = cli
        .config
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(SyncConfig::default_path);

    let storage = Storage::open(db_path)?;
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Configure {
            access_key_id,
            secret_access_key,
            region,
            profile_id,
            sessions_table,
            tags_table,
            endpoint,
        } => {
            let mut config =
                SyncConfig::new(access_key_id, secret_access_key, region, profile_id);
            if let Some(table) = sessions_table {
                config.sessions_table_name = table;
            }
            if let Some(table) = tags_table {
                config.tags_table_name = table;
            }
            config.endpoint = endpoint;
            config.save(&config_path)?;
            println!("Saved sync config to {}", config_path.display());
        }

        Commands::TestConnection => {
            let sync = orchestrator(storage, &config_path)?;
            println!("{}", sync.test_connection().await?);
        }

        Commands::Sync => {
            let sync = orchestrator(storage, &config_path)?;
            let result = sync.sync().await?;
            println!("{}", result.message());
            if !result.success {
                return Err(WorklogError::Transport(
                    result.error_message.unwrap_or_default(),
                ));
            }
        }

        Commands::Status => {
            let sync = orchestrator(storage, &config_path)?;
            let status = sync.status()?;
            println!("Configured: {}", if status.is_configured { "yes" } else { "no" });
            println!("Profile: {}", sync.config().profile_id);
            match status.last_sync {
                Some(ts) => println!("Last sync: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("Last sync: never"),
            }
        }

        Commands::Tag { command } => match command {
            TagCommands::Add { name } => {
                let tag = storage.with_transaction(|conn| create_tag(conn, &name))?;
                println!("Created tag #{} {}", tag.id, tag.name);
            }
            TagCommands::Rename { id, name } => {
                let tag = storage.with_transaction(|conn| rename_tag(conn, id, &name))?;
                println!("Renamed tag #{} to {}", tag.id, tag.name);
            }
            TagCommands::Delete { id } => {
                storage.with_transaction(|conn| delete_tag(conn, id))?;
                println!("Deleted tag #{}", id);
            }
            TagCommands::List => {
                for tag in storage.with_connection(list_tags)? {
                    println!("#{} {}", tag.id, tag.name);
                }
            }
        },

        Commands::Session { command } => match command {
            SessionCommands::Add {
                hours,
                description,
                date,
                notes,
                next,
                tag,
            } => {
                let mut input = NewSession::new(date.unwrap_or(today), hours, description);
                input.notes = notes;
                input.next_stage = next;
                input.tag_id = tag;

                let session = storage.with_transaction(|conn| create_session(conn, &input))?;
                println!(
                    "Logged session #{}: {}h on {}",
                    session.id, session.hours, session.date
                );
            }
            SessionCommands::Delete { id } => {
                storage.with_transaction(|conn| delete_session(conn, id))?;
                println!("Deleted session #{}", id);
            }
            SessionCommands::List { date } => {
                let date = date.unwrap_or(today);
                let (sessions, tags) = storage.with_connection(|conn| {
                    Ok((sessions_for_date(conn, date)?, list_tags(conn)?))
                })?;

                for session in sessions {
                    let tag = session
                        .tag_id
                        .and_then(|id| tags.iter().find(|t| t.id == id))
                        .map(|t| format!(" [{}]", t.name))
                        .unwrap_or_default();
                    println!(
                        "#{} {:>5.2}h{} {}",
                        session.id, session.hours, tag, session.description
                    );
                    if let Some(next) = &session.next_stage {
                        println!("        next: {}", next);
                    }
                }
            }
        },

        Commands::Hours { date, month } => match month {
            Some(month) => {
                let (year, month) = parse_month(&month)?;
                let days = storage.with_connection(|conn| {
                    let mut days = Vec::new();
                    for day in days_for_month(conn, year, month)? {
                        days.push((day, total_hours_for_date(conn, day)?));
                    }
                    Ok(days)
                })?;
                for (day, hours) in &days {
                    println!("{} {:>6.2}h", day, hours);
                }
                let total =
                    storage.with_connection(|conn| total_hours_for_month(conn, year, month))?;
                println!("Total {:04}-{:02}: {:.2}h", year, month, total);
            }
            None => {
                let date = date.unwrap_or(today);
                let total = storage.with_connection(|conn| total_hours_for_date(conn, date))?;
                println!("{}: {:.2}h", date, total);
            }
        },
    }

    Ok(())
}

fn orchestrator(storage: Storage, config_path: &std::path::Path) -> Result<SyncOrchestrator> {
    let config = SyncConfig::load(config_path)?.with_env_overrides();
    SyncOrchestrator::connect(storage, config)
}

fn parse_month(raw: &str) -> Result<(i32, u32)> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map(|d| (d.year(), d.month()))
        .map_err(|_| WorklogError::InvalidInput(format!("Invalid month '{}', use YYYY-MM", raw)))
}
