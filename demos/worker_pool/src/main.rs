//! Pool of simulated workers, shared between concurrent job runners.
//!
//! Workers are slow to start and wear out after a number of jobs, at which point verification
//! fails and the pool replaces them.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use clap::Parser;
use pulsepool::{Manager, Phase, Pool, PoolConfig, PoolItem, RunOptions};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to pool configuration file.
    #[arg(short, long, value_name = "FILE", env = "WORKER_POOL_CONFIG_FILE")]
    config_file: Option<String>,
    /// Total number of jobs to run.
    #[arg(short, long, default_value_t = 40)]
    jobs: u64,
    /// Number of concurrent job runners.
    #[arg(short = 'n', long, default_value_t = 8)]
    runners: u64,
    /// Number of jobs after which a worker is retired.
    #[arg(short, long, default_value_t = 5)]
    wear: u64,
    /// Worker startup time.
    #[arg(long, value_parser = humantime_duration, default_value = "200ms")]
    startup: Duration,
    /// Time needed to run a single job.
    #[arg(long, value_parser = humantime_duration, default_value = "50ms")]
    job_time: Duration,
}

fn humantime_duration(v: &str) -> Result<Duration, String> {
    v.parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|e| e.to_string())
}

/// Simulated worker.
#[derive(Debug)]
struct Worker {
    id: u64,
    jobs: u64,
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("worker {0} crashed")]
    Crashed(u64),
}

/// Starts and retires workers.
struct Workers {
    startup: Duration,
    wear: u64,
    next_id: AtomicU64,
}

#[async_trait::async_trait]
impl Manager for Workers {
    type Resource = Worker;
    type Error = WorkerError;

    async fn create(&self) -> Result<Worker, WorkerError> {
        sleep(self.startup).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(worker = id, "worker started");
        Ok(Worker { id, jobs: 0 })
    }

    async fn verify(&self, item: &PoolItem<Worker>) -> Result<bool, WorkerError> {
        Ok(item.value().jobs < self.wear)
    }

    async fn dispose(&self, item: &PoolItem<Worker>) -> Result<(), WorkerError> {
        let worker = item.value();
        tracing::info!(worker = worker.id, jobs = worker.jobs, uses = item.uses(), "worker retired");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut builder = PoolConfig::builder();
    if let Some(path) = &args.config_file {
        builder = builder.with_file(path);
    }
    let config = builder.with_env("WORKER_POOL").build()?;
    tracing::info!(?config, "starting pool");

    let manager = Workers {
        startup: args.startup,
        wear: args.wear,
        next_id: AtomicU64::new(0),
    };
    let pool = Pool::builder(manager)
        .config(config)
        .on_timeout(|timeout| tracing::warn!(?timeout, "job runner starved"))
        .on_error(|phase: Phase, err: &WorkerError| {
            tracing::error!(%phase, %err, "worker failure");
        })
        .build()?;

    let runners: Vec<_> = (0..args.runners)
        .map(|runner| {
            let pool = pool.clone();
            let jobs = (runner..args.jobs).step_by(args.runners.max(1) as usize).count();
            let job_time = args.job_time;
            tokio::spawn(async move {
                for job in 0..jobs {
                    let res = pool
                        .run(RunOptions::default().dispose_on_error(), |worker| {
                            Box::pin(async move {
                                sleep(job_time).await;
                                worker.jobs += 1;
                                if worker.jobs > 100 {
                                    return Err(WorkerError::Crashed(worker.id));
                                }
                                Ok(worker.id)
                            })
                        })
                        .await;
                    match res {
                        Ok(worker) => tracing::debug!(runner, job, worker, "job done"),
                        Err(err) => tracing::warn!(runner, job, %err, "job failed"),
                    }
                }
            })
        })
        .collect();

    let reporter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(250)).await;
                tracing::info!(status = ?pool.status(), "pool status");
            }
        })
    };

    for runner in runners {
        runner.await?;
    }
    reporter.abort();

    tracing::info!("all jobs done, disposing of pool");
    tokio::select! {
        () = pool.dispose(false) => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::warn!("interrupted, rejecting remaining acquisitions");
            pool.dispose(true).await;
        }
    }
    tracing::info!(status = ?pool.status(), "pool disposed");
    Ok(())
}
