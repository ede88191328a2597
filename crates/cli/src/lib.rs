pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use waymark_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "waymark",
    about = "Waymark approval workflow operator CLI",
    long_about = "Operate the Waymark approval workflow: migrations, config inspection, demo data, review queues, paged queue listings, audit history, and housekeeping.",
    after_help = "Examples:\n  waymark migrate\n  waymark dashboard --reviewer u-moderator\n  waymark queue trips --page 2\n  waymark history trip:kyoto-loop\n  waymark stats --since-days 7"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Load deterministic demo content through the approval workflow")]
    Seed,
    #[command(about = "Summarize review queues with per-priority and overdue counts")]
    Dashboard {
        #[arg(long, help = "Only include queues visible to this reviewer id")]
        reviewer: Option<String>,
    },
    #[command(about = "List a queue's pending records, paged by workflow.items_per_page")]
    Queue {
        #[arg(help = "Queue slug from the workflow catalog")]
        slug: String,
        #[arg(long, help = "1-based page number")]
        page: Option<usize>,
    },
    #[command(about = "Show an entity's approval record, log, and hash-chain verification")]
    History {
        #[arg(help = "Entity reference as `type:id`, for example `trip:42`")]
        entity: String,
    },
    #[command(about = "Count log entries by action, reviewer, and entity type")]
    Stats {
        #[arg(long, help = "Only count entries from the last N days")]
        since_days: Option<u32>,
    },
    #[command(about = "Archive rejected entities that were reviewed more than N days ago")]
    ArchiveStale {
        #[arg(
            long,
            help = "Age threshold in days; defaults to workflow.auto_archive_rejected_days"
        )]
        days: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Seed => commands::seed::run(),
        Command::Dashboard { reviewer } => commands::dashboard::run(reviewer),
        Command::Queue { slug, page } => commands::queue::run(slug, page),
        Command::History { entity } => commands::history::run(&entity),
        Command::Stats { since_days } => commands::stats::run(since_days),
        Command::ArchiveStale { days } => commands::archive_stale::run(days),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document. A config that
/// fails to load falls back to defaults here; the command reports the error.
fn init_logging() {
    use tracing::Level;

    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
