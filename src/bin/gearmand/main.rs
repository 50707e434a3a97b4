mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use gearman_rs::queue::{self, MemoryQueue, NullQueue, QueueBackend};
use gearman_rs::server::Server;
use gearman_rs::shard::Shard;
use gearman_rs::acceptor;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::args::Args;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let runtime = if args.threads > 0 {
        tokio::runtime::Builder::new_multi_thread().worker_threads(args.threads).enable_all().build()
    } else {
        tokio::runtime::Builder::new_current_thread().enable_all().build()
    };

    let runtime = match runtime {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("failed to build tokio runtime: {error}");
            return ExitCode::from(111);
        },
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(args: &Args) {
    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        let level = match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        tracing_subscriber::fmt().json().with_max_level(level).init();
    }
}

fn queue_backend(queue_type: &str) -> Result<Arc<dyn QueueBackend>> {
    match queue_type {
        "none" => Ok(Arc::new(NullQueue)),
        "memory" => Ok(Arc::new(MemoryQueue::new())),
        other => Err(anyhow!("unsupported queue backend {other:?}, expected \"none\" or \"memory\"")),
    }
}

async fn run(args: Args) -> Result<()> {
    if args.daemon {
        warn!("--daemon has no effect: this server has no process model to fork from");
    }

    if let Some(user) = &args.user {
        warn!(%user, "--user is accepted but privilege drop is not implemented");
    }

    if let Some(pid_file) = &args.pid_file {
        tokio::fs::write(pid_file, std::process::id().to_string())
            .await
            .with_context(|| format!("writing pid file {}", pid_file.display()))?;
    }

    let queue = queue_backend(&args.queue_type)?;
    let handle_prefix = format!("H:{}", std::env::var("HOSTNAME").unwrap_or_else(|_| "gearmand".into()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            }
            cancel.cancel();
        });
    }

    let num_shards = args.threads.max(1);
    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);
    let mut shard_senders = Vec::with_capacity(num_shards);

    for i in 0..num_shards {
        let (tx, rx) = mpsc::channel(256);
        shard_senders.push(tx);

        let mut shard = Shard::new(handle_prefix.clone(), queue.clone());
        if i == 0 {
            replay_persisted(shard.server_mut()).await?;
        }

        let shard_cancel = cancel.clone();
        let hold = shutdown_hold.clone();
        tokio::spawn(async move {
            shard.run(rx, shard_cancel).await;
            drop(hold);
        });
    }
    drop(shutdown_hold);

    let addr = (args.listen, args.port).into();
    let result = acceptor::run(addr, args.backlog as u32, shard_senders, cancel.clone()).await;

    if let Err(error) = &result {
        error!(%error, "acceptor failed");
    }
    shutdown_wait.recv().await;

    debug!("shut down cleanly");
    result.map_err(Into::into)
}

/// Replays whatever the queue backend has persisted into the first shard's
/// server on startup. Persisted jobs are assigned to a single shard rather
/// than round-robined, since each shard owns its own handle counter and
/// job arena.
async fn replay_persisted(server: &mut Server) -> Result<()> {
    let mut persisted = Vec::new();
    let queue = server.queue.clone();
    queue.replay(&mut |job| persisted.push(job)).await.map_err(|error| anyhow!(error.to_string()))?;

    if persisted.is_empty() {
        return Ok(());
    }

    info!(count = persisted.len(), "replaying persisted jobs");
    server.queue_replay = true;
    for job in persisted {
        let queue::PersistedJob { unique, function, data, priority } = job;
        server.add_job(function, unique, data, priority, false, None).await;
    }
    server.queue_replay = false;
    Ok(())
}
