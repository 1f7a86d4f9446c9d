//! Worker lifecycle: registration, runtime heartbeat, and the lease-poll
//! loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::client::ServerClient;
use crate::config::WorkerConfig;
use crate::dispatcher::Dispatcher;

/// A worker process: one lease-poll loop plus one concurrent task per
/// leased job.
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    client: ServerClient,
    dispatcher: Arc<Dispatcher>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Create a new worker.
    pub fn new(config: WorkerConfig) -> Self {
        let worker_id = config.worker_id();
        let client = ServerClient::new(&config.server_url);
        let dispatcher = Arc::new(Dispatcher::new(client.clone(), &config, worker_id.clone()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));

        Self {
            config,
            worker_id,
            client,
            dispatcher,
            semaphore,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the poll loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the worker until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.register().await?;

        let runtime_heartbeat = self.spawn_runtime_heartbeat();

        let result = self.poll_loop().await;

        runtime_heartbeat.abort();

        // Drain: wait for in-flight tasks to settle before returning.
        let _ = self
            .semaphore
            .acquire_many(self.config.max_concurrent_tasks as u32)
            .await;

        tracing::info!(worker_id = %self.worker_id, "Worker stopped");
        result
    }

    /// Register the worker with the server.
    async fn register(&self) -> Result<()> {
        self.client
            .register_runtime(
                &self.worker_id,
                &self.config.worker_pool_name,
                &self.config.capability_list(),
            )
            .await?;

        tracing::info!(
            worker_id = %self.worker_id,
            pool_name = %self.config.worker_pool_name,
            capabilities = ?self.config.capability_list(),
            "Worker registered"
        );

        Ok(())
    }

    /// Periodic runtime liveness heartbeat. The server auto-recreates the
    /// registration if it was swept offline.
    fn spawn_runtime_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let worker_id = self.worker_id.clone();
        let pool_name = self.config.worker_pool_name.clone();
        let capabilities = self.config.capability_list();
        let interval = Duration::from_secs(self.config.effective_heartbeat_seconds());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;

                if let Err(e) = client
                    .runtime_heartbeat(&worker_id, &pool_name, &capabilities)
                    .await
                {
                    tracing::warn!(error = %e, "Runtime heartbeat failed");
                }
            }
        })
    }

    /// The lease-poll loop: lease, spawn, repeat; sleep with jitter when
    /// the queue is empty.
    async fn poll_loop(&self) -> Result<()> {
        let capabilities = self.config.capability_list();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => permit?,
                _ = self.shutdown.cancelled() => break,
            };

            let lease = tokio::select! {
                lease = self.client.lease(
                    &self.worker_id,
                    &self.config.worker_pool_name,
                    &capabilities,
                    self.config.lease_duration_seconds,
                ) => lease,
                _ = self.shutdown.cancelled() => {
                    drop(permit);
                    break;
                }
            };

            match lease {
                Ok(Some(job)) => {
                    tracing::debug!(
                        queue_id = %job.queue_id,
                        execution_id = %job.execution_id,
                        node_id = %job.node_id,
                        "Leased job"
                    );

                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        dispatcher.execute(job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_delay()) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::warn!(error = %e, "Lease request failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_delay()) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Poll delay with +/-25% jitter so a fleet of idle workers does not
    /// poll in lockstep.
    fn poll_delay(&self) -> Duration {
        let base = self.config.poll_interval_seconds.max(1) as f64;
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        Duration::from_secs_f64(base * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_construction() {
        let worker = Worker::new(WorkerConfig::default());
        assert!(worker.worker_id.starts_with("default-"));
        assert!(!worker.shutdown.is_cancelled());
    }

    #[test]
    fn test_poll_delay_jitter_bounds() {
        let worker = Worker::new(WorkerConfig {
            poll_interval_seconds: 4,
            ..Default::default()
        });

        for _ in 0..32 {
            let delay = worker.poll_delay();
            assert!(delay >= Duration::from_secs(3));
            assert!(delay <= Duration::from_secs(5));
        }
    }
}
