//! Worker pool running the example scenario.
//!
//! Workers are independent: each gets its own [`ScenarioRunner`] and runs the
//! configured number of iterations. Spawns are staggered by `spawn_delay`.
//! The pool does not restart or aggregate workers; callers that care about
//! completion await the returned handles.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{AgentConfig, ExampleConfig};
use crate::remote::RemoteCaseClient;
use crate::scenario::{self, RunSummary, ScenarioRunner, ScenarioSettings};

pub struct ConnectorWorkerPool {
    client: Arc<dyn RemoteCaseClient>,
    example: ExampleConfig,
    settings: ScenarioSettings,
    spawn_delay: Duration,
}

impl ConnectorWorkerPool {
    pub fn new(client: Arc<dyn RemoteCaseClient>, config: &AgentConfig) -> Self {
        Self {
            client,
            settings: ScenarioSettings::from(&config.example),
            example: config.example.clone(),
            spawn_delay: config.executor.spawn_delay(),
        }
    }

    /// Override scenario timings.
    pub fn with_settings(mut self, settings: ScenarioSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run cleanup if enabled, then spawn `pool_size` workers.
    ///
    /// A failed cleanup is logged; workers still start.
    pub async fn start(&self, pool_size: usize) -> Vec<JoinHandle<RunSummary>> {
        if self.example.cleanup {
            tracing::info!("Cleaning up cases created by this agent");
            if let Err(e) = scenario::cleanup(self.client.as_ref()).await {
                tracing::error!(error = ?e, "Cleanup failed");
            }
        }

        tracing::info!(
            pool_size,
            iterations = self.example.iterations,
            spawn_delay_ms = self.spawn_delay.as_millis() as u64,
            "Starting worker pool"
        );

        let mut handles = Vec::with_capacity(pool_size);
        for worker in 0..pool_size {
            tokio::time::sleep(self.spawn_delay).await;

            let mut runner = ScenarioRunner::new(Arc::clone(&self.client), self.settings.clone());
            let iterations = self.example.iterations;
            handles.push(tokio::spawn(async move {
                tracing::info!(worker, "Worker started");
                let summary = runner.run(iterations).await;
                tracing::info!(
                    worker,
                    completed = summary.completed,
                    failed = summary.failed,
                    "Worker finished"
                );
                summary
            }));
        }
        handles
    }
}
