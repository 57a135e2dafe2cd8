//! Button alerts service
//!
//! Feeds button presses and responder SMS into the lifecycle engine.
//!
//! # Usage
//!
//! ```bash
//! # Replay a feed against the in-memory store, logging outbound SMS
//! button-alerts --seed seed.toml --dry-run run --input events.jsonl
//!
//! # Read events from stdin against PostgreSQL with Twilio delivery
//! DATABASE_URL=postgres://localhost/alerts TWILIO_SID=AC... TWILIO_TOKEN=... button-alerts run
//!
//! # Dashboard listing
//! button-alerts --seed seed.toml sessions --installation inst-1 --limit 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use button_alerts::{run_feed, PgStore, SeedFile, ServiceConfig, TwilioMessenger};
use clap::{Parser, Subcommand};
use lifecycle::{
    LifecycleEngine, MemoryStore, RecordingMessenger, SharedMessenger, SharedSessionStore,
    ShutdownMode,
};
use tokio::io::BufReader;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PostgreSQL connection string (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// TOML file with installations and buttons (overrides BUTTON_ALERTS_SEED)
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    /// Log outbound SMS instead of sending them
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch line-delimited JSON events from a file or stdin
    Run {
        /// Event file (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Cancel armed timers at end of input instead of waiting for them
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },

    /// Print an installation's most recent sessions as JSON
    Sessions {
        #[arg(long)]
        installation: String,

        /// Maximum rows (overrides LIFECYCLE_RECENT_LIMIT)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print every installation as JSON
    Installations,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config =
        ServiceConfig::default().with_overrides(args.database_url, args.seed, args.dry_run);
    if let Command::Sessions {
        limit: Some(limit), ..
    } = &args.command
    {
        config.engine.recent_sessions_limit = *limit;
    }

    let store = build_store(&config).await?;
    let messenger = build_messenger(&config)?;
    let engine = LifecycleEngine::new(store, messenger, config.engine.clone())
        .context("invalid engine configuration")?;

    match args.command {
        Command::Run { input, no_wait } => run(&engine, input, no_wait).await?,
        Command::Sessions { installation, .. } => {
            let sessions = engine.recent_sessions(&installation).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Command::Installations => {
            let installations = engine.installations().await?;
            println!("{}", serde_json::to_string_pretty(&installations)?);
        }
    }

    Ok(())
}

async fn build_store(config: &ServiceConfig) -> Result<SharedSessionStore> {
    let seed = config
        .seed_path
        .as_deref()
        .map(SeedFile::load)
        .transpose()?;

    if let Some(url) = &config.database_url {
        let store = PgStore::connect(url)
            .await
            .context("failed to connect to PostgreSQL")?;
        store.migrate().await.context("failed to create schema")?;
        if let Some(seed) = seed {
            seed.validate()?;
            for installation in &seed.installations {
                store.upsert_installation(installation).await?;
            }
            for button in &seed.buttons {
                store.upsert_button(button).await?;
            }
        }
        return Ok(Arc::new(store));
    }

    let store = MemoryStore::new();
    match seed {
        Some(seed) => seed.apply(&store)?,
        None => warn!("No database and no seed file: the button registry is empty"),
    }
    info!("Using in-memory store");
    Ok(Arc::new(store))
}

fn build_messenger(config: &ServiceConfig) -> Result<SharedMessenger> {
    match &config.twilio {
        Some(credentials) => {
            let messenger = TwilioMessenger::new(credentials.clone())
                .context("failed to build HTTP client")?;
            info!(api = %credentials.api_url, "Sending SMS through Twilio");
            Ok(Arc::new(messenger))
        }
        None => {
            info!("Twilio not configured: outbound SMS are logged only");
            Ok(Arc::new(RecordingMessenger::new()))
        }
    }
}

async fn run(engine: &LifecycleEngine, input: Option<PathBuf>, no_wait: bool) -> Result<()> {
    let summary = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            run_feed(engine, BufReader::new(file)).await?
        }
        None => run_feed(engine, BufReader::new(tokio::io::stdin())).await?,
    };
    info!(
        processed = summary.processed,
        malformed = summary.malformed,
        failed = summary.failed,
        "End of input"
    );

    let mode = if no_wait {
        ShutdownMode::Cancel
    } else {
        ShutdownMode::Drain
    };
    if mode == ShutdownMode::Drain && engine.armed_timers() > 0 {
        info!(
            armed = engine.armed_timers(),
            "Waiting for escalation timers (Ctrl-C to cancel)"
        );
    }

    tokio::select! {
        _ = engine.shutdown(mode) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling escalation timers");
            engine.shutdown(ShutdownMode::Cancel).await;
        }
    }
    Ok(())
}
