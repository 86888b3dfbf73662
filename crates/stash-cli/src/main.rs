//! stash CLI: inspect and maintain a fallback queue, or run a local demo.
//!
//! Every command takes the exclusive lock on the queue files, so it fails
//! while a running service owns them.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stash_core::config::BackendKind;
use stash_core::impls::{JsonCodec, RecordingPublisher};
use stash_core::ports::TaskQueue;
use stash_core::{Stash, StashBuilder, StashConfig, Task};

#[derive(Debug, Parser)]
#[command(name = "stash", about = "Durable local fallback queue")]
struct CliArgs {
    /// YAML config file. Flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the queue files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Queue name (file stem).
    #[arg(long)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print live counts of the primary and dead-letter queues.
    Stats,
    /// Print queued tasks without removing them.
    Peek {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Read the dead-letter queue instead of the primary.
        #[arg(long)]
        dead_letter: bool,
    },
    /// Append a task to the primary queue.
    Push {
        #[arg(short, long)]
        event: String,
        #[arg(short, long)]
        payload: String,
    },
    /// Reclaim space held by removed tasks.
    Compact {
        #[arg(long)]
        dead_letter: bool,
    },
    /// Queue messages against a flaky in-process publisher and drain them.
    Demo {
        /// Messages to publish.
        #[arg(long, default_value_t = 5)]
        messages: usize,
        /// Drain cycles during which the publisher stays offline.
        #[arg(long, default_value_t = 2)]
        offline_cycles: u32,
        /// Use the in-memory backend instead of files.
        #[arg(long)]
        memory: bool,
    },
}

#[derive(Serialize)]
struct PeekRow<'a> {
    handle: String,
    task_type: &'a str,
    retry_count: u32,
    payload: &'a str,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(env_filter)
        .init();
}

fn load_config(args: &CliArgs) -> Result<StashConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => StashConfig::from_file(path)?,
        None => StashConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    Ok(config)
}

fn queue_of(stash: &Stash, dead_letter: bool) -> Result<&Arc<dyn TaskQueue>, Box<dyn Error>> {
    if !dead_letter {
        return Ok(stash.primary());
    }
    stash
        .dead_letter()
        .ok_or_else(|| "no dead-letter queue configured".into())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: CliArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args)?;

    if let Command::Demo { memory: true, .. } = args.command {
        config.backend = BackendKind::Memory;
    }
    let stash = StashBuilder::new(config).build()?;

    match args.command {
        Command::Stats => print_json(&stash.status().await?),
        Command::Peek { limit, dead_letter } => {
            let tasks = queue_of(&stash, dead_letter)?.peek(limit).await?;
            let rows: Vec<PeekRow<'_>> = tasks
                .iter()
                .map(|t| PeekRow {
                    handle: t.handle().to_string(),
                    task_type: t.task_type(),
                    retry_count: t.retry_count(),
                    payload: t.payload(),
                })
                .collect();
            print_json(&rows)
        }
        Command::Push { event, payload } => {
            let handle = stash.primary().add(Task::new(event, payload)).await?;
            info!(%handle, "task queued");
            print_json(&stash.status().await?)
        }
        Command::Compact { dead_letter } => {
            let compaction = queue_of(&stash, dead_letter)?.compact().await?;
            print_json(&compaction)
        }
        Command::Demo {
            messages,
            offline_cycles,
            ..
        } => demo(&stash, messages, offline_cycles).await,
    }
}

async fn demo(stash: &Stash, messages: usize, offline_cycles: u32) -> Result<(), Box<dyn Error>> {
    let publisher = Arc::new(RecordingPublisher::<Value>::new());
    let codec = Arc::new(JsonCodec::<Value>::new());
    let fallback = stash.fallback_publisher::<Value>(publisher.clone(), codec.clone());

    publisher.set_failing(true);
    for i in 0..messages {
        let delivery = fallback
            .post(&json!({ "order_id": i, "status": "placed" }), "orders.placed")
            .await?;
        info!(order_id = i, ?delivery, "published");
    }
    print_json(&stash.status().await?)?;

    let mut scheduler = stash.scheduler();
    scheduler.register(Arc::new(stash.republisher::<Value>(publisher.clone(), codec)));

    for cycle in 1..=offline_cycles {
        let summary = scheduler.run_once().await;
        info!(cycle, failed = summary.failed, "drain cycle while offline");
    }

    publisher.set_failing(false);
    let handle = scheduler.spawn(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown(Duration::from_secs(5)).await?;

    info!(delivered = publisher.sent().len(), "demo finished");
    print_json(&stash.status().await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
