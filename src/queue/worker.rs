use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{Result, SubforgeError};
use super::{Pipeline, Store};

/// Worker loop pulling jobs from the store and running up to `concurrency` at once
pub struct JobQueue {
    store: Store,
    pipeline: Arc<Pipeline>,
    concurrency: usize,
    poll_interval: Duration,
}

impl JobQueue {
    pub fn new(store: Store, pipeline: Pipeline, config: &QueueConfig) -> Self {
        Self {
            store,
            pipeline: Arc::new(pipeline),
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
        }
    }

    /// Run until `shutdown` fires, then wait for in-flight jobs to finish
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let recovered = self.store.recover_interrupted()?;
        info!(
            "Worker started (concurrency {}, {} jobs recovered)",
            self.concurrency, recovered
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!("Job task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| SubforgeError::Config(format!("Worker semaphore closed: {}", e)))?,
            };

            let claimed = match self.store.claim_next() {
                Ok(job) => job,
                Err(e) => {
                    warn!("Failed to claim next job: {}", e);
                    None
                }
            };

            match claimed {
                Some(job) => {
                    debug!("Claimed job {} ({} running)", job.id, tasks.len() + 1);
                    let pipeline = self.pipeline.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        pipeline.run(job).await;
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Shutting down, waiting for {} in-flight jobs", tasks.len());
        }
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Job task panicked: {}", e);
            }
        }

        info!("Worker stopped");
        Ok(())
    }
}
