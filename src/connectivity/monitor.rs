//! HealthMonitor - background task feeding health checks into the
//! connectivity state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::ConnectivityStateMachine;
use crate::remote::RemoteCaseClient;

pub struct HealthMonitor {
    client: Arc<dyn RemoteCaseClient>,
    machine: Arc<ConnectivityStateMachine>,
    interval: Duration,
    heartbeat_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn RemoteCaseClient>,
        machine: Arc<ConnectivityStateMachine>,
        interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            client,
            machine,
            interval,
            heartbeat_timeout,
        }
    }

    /// Run until the shutdown signal is received.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            heartbeat_timeout_ms = self.heartbeat_timeout.as_millis() as u64,
            "HealthMonitor started"
        );
        self.machine.begin_connecting();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.check_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("HealthMonitor stopped");
    }

    /// One check cycle: heartbeat check, then a bounded health call.
    pub async fn check_once(&self) {
        self.machine.check_heartbeat(self.heartbeat_timeout);

        match tokio::time::timeout(self.heartbeat_timeout, self.client.health()).await {
            Ok(Ok(())) => {
                self.machine.check_succeeded();
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Health check failed");
                self.machine.check_failed();
            }
            Err(_) => {
                tracing::warn!("Health check timed out");
                self.machine.check_failed();
            }
        }
    }
}
