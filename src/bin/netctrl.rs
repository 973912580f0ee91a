//! netctrl CLI tool
//!
//! Command-line front for the netctrl-core mutation engine and its job queue.
//!
//! ## Commands
//!
//! - `init`: Create (or migrate) the store and print its contents
//! - `enqueue <operation>`: Queue a create/edit/delete/stop_analyses job from a JSON items file
//! - `run [job-id]`: Run one queued job, or every queued job in order
//! - `jobs`: List queued jobs
//! - `stats`: Entity counts per kind
//!
//! Ctrl-C during `run` requests cancellation: the running job stops at its next chunk boundary
//! and stays queued.

use clap::{Parser, Subcommand, ValueEnum};
use netctrl_core::{
    config::{EngineConfig, EngineConfigProvider, TomlConfigProvider},
    engine::{CancellationToken, Engine},
    jobs::{JobPayload, JobRunner, Operation},
    model::{EntityKind, Id},
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netctrl")]
#[command(author, version, about = "Batched, cascade-aware mutations of a network store", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "netctrl.toml")]
    config: PathBuf,

    /// Store file, overriding the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Items per committed chunk, overriding the configuration
    #[arg(long)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OperationArg {
    Create,
    Edit,
    Delete,
    StopAnalyses,
}

impl From<OperationArg> for Operation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Operation::Create,
            OperationArg::Edit => Operation::Edit,
            OperationArg::Delete => Operation::Delete,
            OperationArg::StopAnalyses => Operation::StopAnalyses,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the store, and write the configuration file if it does not exist
    Init,

    /// Queue a mutation job
    Enqueue {
        operation: OperationArg,

        /// Entity kind (e.g. node, edge, node_collection); not used by stop-analyses
        #[arg(short, long)]
        kind: Option<String>,

        /// JSON file holding the items array: input payloads for create/edit, ids otherwise
        #[arg(short, long)]
        items: PathBuf,
    },

    /// Run one queued job, or all of them
    Run {
        /// Job to run (default: every queued job, oldest first)
        job: Option<String>,
    },

    /// List queued jobs
    Jobs,

    /// Print entity counts per kind
    Stats,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let provider = TomlConfigProvider::new(cli.config.clone());
    let mut config: EngineConfig = provider.load()?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let engine = Engine::open(config.clone()).await?;
        let runner = JobRunner::new(engine.clone());

        match cli.command {
            Commands::Init => {
                if !cli.config.exists() {
                    provider.store(&config)?;
                    println!("Wrote {}", cli.config.display());
                }
                print_stats(&engine).await?;
            }
            Commands::Enqueue {
                operation,
                kind,
                items,
            } => {
                let kind = kind.as_deref().map(EntityKind::try_from).transpose()?;
                let items = serde_json::from_str(&std::fs::read_to_string(&items)?)?;
                let id = runner
                    .enqueue(&JobPayload::new(operation.into(), kind, items))
                    .await?;
                println!("{id}");
            }
            Commands::Run { job } => {
                let token = CancellationToken::new();
                let handler_token = token.clone();
                ctrlc::set_handler(move || {
                    println!("\nCancelling after the current chunk...");
                    handler_token.cancel();
                })?;

                let results = match job {
                    Some(id) => {
                        let id = Id::from(id);
                        let result = runner.run(&id, &token).await;
                        vec![(id, result)]
                    }
                    None => runner.run_pending(&token).await?,
                };
                let mut failed = 0;
                for (id, result) in results {
                    match result {
                        Ok(report) if report.cancelled => {
                            println!("{id}: cancelled after {} chunk(s), kept queued", report.chunks)
                        }
                        Ok(report) => println!(
                            "{id}: {} {} committed, {} rejected, cascaded {:?}",
                            report.committed,
                            report.kind,
                            report.rejected.len(),
                            report.cascaded
                        ),
                        Err(e) => {
                            failed += 1;
                            eprintln!("{id}: failed: {e}");
                        }
                    }
                }
                if failed > 0 {
                    std::process::exit(1);
                }
            }
            Commands::Jobs => {
                let jobs = runner.list().await?;
                if jobs.is_empty() {
                    println!("No queued jobs");
                }
                for job in jobs {
                    println!(
                        "{}\t{}\t{}\t{}",
                        job.id,
                        job.date_created,
                        job.operation,
                        job.kind.unwrap_or_else(|| "-".to_string())
                    );
                }
            }
            Commands::Stats => print_stats(&engine).await?,
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}

async fn print_stats(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    println!("Store: {}", engine.config().database.display());
    for (kind, count) in engine.db().stats().await? {
        println!("  {:<16}{}", kind.to_string(), count);
    }
    Ok(())
}
