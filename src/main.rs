use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use task_executor::config::ExecutorConfig;
use task_executor::executor::{CommandRunner, Driver, ExecutionEngine, recover_stale};
use task_executor::import::import_file;
use task_executor::store::{LibSqlBackend, TaskStore};
use task_executor::tasks::model::parse_content;
use task_executor::tasks::{TaskStatus, TaskUpdate};

/// Persistent shell-command task queue.
#[derive(Parser, Debug)]
#[command(name = "task-executor", version, about)]
struct Cli {
    /// Task database path (overrides TASK_EXECUTOR_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drop all tasks and logs and recreate the schema
    Init,

    /// Enqueue one task
    Add {
        #[arg(long)]
        tag: String,
        /// Task content literal, e.g. "{'command': ['echo', 'hi']}"
        #[arg(long)]
        command: String,
    },

    /// Enqueue every `{...}` line of a file
    AddFile {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// Claim and execute tasks until none are left
    Run {
        #[arg(long)]
        tag: String,
        /// Source status to drain (NEW or RE_PROCESS)
        #[arg(long, default_value = "NEW")]
        status: TaskStatus,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: Option<u64>,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_workers: Option<u64>,
        /// Per-task timeout in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },

    /// Move finished tasks back to RE_PROCESS
    Requeue {
        #[arg(long)]
        tag: String,
        #[arg(long, default_value = "COMPLETED_ERROR")]
        status: TaskStatus,
    },

    /// Move IN_PROGRESS tasks untouched for a while back to RE_PROCESS
    Recover {
        #[arg(long)]
        tag: String,
        /// Minimum age in seconds since the last update
        #[arg(long)]
        older_than: u64,
    },

    /// Show task counts per status
    Status {
        #[arg(long)]
        tag: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ExecutorConfig::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let _guard = init_tracing(&config.log_file)?;

    let store: Arc<dyn TaskStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    match cli.command {
        Command::Init => {
            store.reinitialize_schema().await?;
            eprintln!("Schema reinitialized: {}", config.db_path.display());
        }
        Command::Add { tag, command } => {
            let content = parse_content(&command)?;
            let task = store.create_task(&tag, &content).await?;
            println!("{}", task.id);
        }
        Command::AddFile { tag, file } => {
            let count = import_file(store.as_ref(), &tag, &file).await?;
            eprintln!("Imported {} tasks into '{}'", count, tag);
        }
        Command::Run {
            tag,
            status,
            batch_size,
            max_workers,
            timeout,
        } => {
            let batch_size = match batch_size {
                Some(n) => usize::try_from(n).context("--batch-size is too large")?,
                None => config.batch_size,
            };
            let max_workers = match max_workers {
                Some(n) => usize::try_from(n).context("--max-workers is too large")?,
                None => config.max_workers,
            };
            let timeout = timeout.map(Duration::from_secs).or(config.task_timeout);

            eprintln!("Task executor v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Database: {}", config.db_path.display());
            eprintln!("   Log file: {}", config.log_file.display());
            eprintln!(
                "   Draining '{}' ({}), batch size {}, {} workers",
                tag, status, batch_size, max_workers
            );

            let runner = CommandRunner::new().with_timeout(timeout);
            let engine = ExecutionEngine::new(Arc::clone(&store), runner);
            let summary = Driver::new(Arc::clone(&store), engine)
                .drain(&tag, status, batch_size, max_workers)
                .await?;

            eprintln!(
                "Finished: {} batches, {} ok, {} failed",
                summary.batches, summary.succeeded, summary.failed
            );
        }
        Command::Requeue { tag, status } => {
            status
                .transition(TaskStatus::ReProcess)
                .context("only finished tasks can be requeued")?;
            let tasks = store.list_by_tag_and_status(&tag, status).await?;
            for task in &tasks {
                store
                    .update_task(task.id, &TaskUpdate::status(TaskStatus::ReProcess))
                    .await?;
            }
            eprintln!("Requeued {} tasks of '{}'", tasks.len(), tag);
        }
        Command::Recover { tag, older_than } => {
            let reset = recover_stale(store.as_ref(), &tag, Duration::from_secs(older_than)).await?;
            eprintln!("Recovered {} stale tasks of '{}'", reset.len(), tag);
        }
        Command::Status { tag } => {
            let counts = store.count_by_status(&tag).await?;
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            for (status, count) in counts {
                println!("{:<16}{}", status, count);
            }
            println!("{:<16}{}", "TOTAL", total);
        }
    }

    Ok(())
}

/// Log to a file, filtered by `RUST_LOG` (default `info`).
fn init_tracing(log_file: &Path) -> anyhow::Result<WorkerGuard> {
    let dir = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let file_name = log_file
        .file_name()
        .with_context(|| format!("invalid log file path {}", log_file.display()))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .init();

    Ok(guard)
}
