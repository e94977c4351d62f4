//! Worker pool: N independent polling loops sharing one registry.
//!
//! Each worker repeatedly claims, executes and settles jobs until signalled
//! to stop. Stopping is cooperative: the signal is observed at the top of a
//! loop iteration, so a worker mid-execution finishes its current job first.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, StoreConfig};
use crate::queue::JobRegistry;
use crate::worker::executor::CommandExecutor;

pub struct WorkerPool {
    registry: Arc<JobRegistry>,
    config: PoolConfig,
    stop_file: PathBuf,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
}

impl WorkerPool {
    pub fn new(registry: Arc<JobRegistry>, config: PoolConfig, store: &StoreConfig) -> Self {
        Self {
            registry,
            config,
            stop_file: store.stop_file(),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Start the configured number of workers and block until all of them
    /// have exited after a stop signal. A no-op when already running.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("worker pool already running");
            return;
        }

        // A sentinel left over from a previous `run stop` must not kill the
        // pool we are about to start.
        if let Err(e) = std::fs::remove_file(&self.stop_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "could not clear stale stop file");
            }
        }

        let token = CancellationToken::new();
        *self.shutdown.lock().expect("shutdown lock poisoned") = token.clone();

        tracing::info!(
            workers = self.config.workers,
            backoff_base = self.config.backoff_base,
            "starting worker pool"
        );

        let mut tasks = JoinSet::new();
        for worker_id in 1..=self.config.workers {
            let registry = self.registry.clone();
            let executor = CommandExecutor::new(self.config.executor.clone());
            let config = self.config.clone();
            let stop_file = self.stop_file.clone();
            let shutdown = token.clone();
            tasks.spawn(async move {
                worker_loop(worker_id, registry, executor, config, stop_file, shutdown).await;
            });
        }

        while tasks.join_next().await.is_some() {}
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("all workers stopped");
    }

    /// Signal all workers to stop. Cooperative: in-flight executions finish
    /// before their worker exits.
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            tracing::info!("worker pool is not running");
            return;
        }
        tracing::info!("stopping worker pool");
        self.shutdown.lock().expect("shutdown lock poisoned").cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn worker_loop(
    worker_id: usize,
    registry: Arc<JobRegistry>,
    executor: CommandExecutor,
    config: PoolConfig,
    stop_file: PathBuf,
    shutdown: CancellationToken,
) {
    tracing::info!(worker_id, "worker started");

    loop {
        // Both stop sources are observed here, once per iteration: the
        // in-process token and the cross-invocation stop file.
        if shutdown.is_cancelled() || stop_file.exists() {
            break;
        }

        match registry.claim().await {
            Ok(Some(job)) => {
                tracing::info!(worker_id, job_id = %job.id, "claimed job");
                let result = executor.execute(&job.id, &job.command).await;
                if let Err(e) = registry
                    .settle(job, result, config.backoff_base)
                    .await
                {
                    tracing::error!(worker_id, error = %e, "failed to record job outcome");
                    idle(&shutdown, config.cooldown).await;
                }
            }
            Ok(None) => {
                idle(&shutdown, config.poll_interval).await;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "claim failed");
                idle(&shutdown, config.cooldown).await;
            }
        }
    }

    tracing::info!(worker_id, "worker exiting");
}

/// Sleep that wakes early on shutdown so stop signals stay responsive.
async fn idle(shutdown: &CancellationToken, duration: std::time::Duration) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
