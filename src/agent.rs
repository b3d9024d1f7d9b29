//! Agent wiring.
//!
//! Startup order:
//!
//! 1. build the dispatcher with the default handlers and subscribe
//! 2. spawn the receive loop and the health monitor
//! 3. wait for the first `UP`
//! 4. send the connectivity ping
//! 5. start the worker pool
//!
//! [`Agent::run`] serves `/health` from before step 1 until ctrl-c, so the
//! endpoint answers 503 while the platform is unreachable.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::connectivity::{ConnectivityStateMachine, HealthMonitor};
use crate::events::{default_handlers, EventDispatcher, EventType, PongHandler};
use crate::health::create_health_router;
use crate::pool::ConnectorWorkerPool;
use crate::remote::{EventSource, RemoteCaseClient};
use crate::scenario::{RunSummary, ScenarioSettings};

/// Payload of the startup connectivity ping.
pub const PING_PAYLOAD: &str = "ping";

pub struct Agent {
    config: AgentConfig,
    client: Arc<dyn RemoteCaseClient>,
    source: Arc<dyn EventSource>,
    scenario: Option<ScenarioSettings>,
}

/// A started agent. Dropping it does not stop the background tasks; call
/// [`RunningAgent::shutdown`].
pub struct RunningAgent {
    pub machine: Arc<ConnectivityStateMachine>,
    pub dispatcher: Arc<EventDispatcher>,
    pub pong: Arc<PongHandler>,
    pub workers: Vec<JoinHandle<RunSummary>>,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn RemoteCaseClient>,
        source: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            config,
            client,
            source,
            scenario: None,
        }
    }

    /// Override scenario timings for the worker pool.
    pub fn with_scenario_settings(mut self, settings: ScenarioSettings) -> Self {
        self.scenario = Some(settings);
        self
    }

    /// Steps 1-5. Returns once the workers have been spawned.
    pub async fn start(&self) -> anyhow::Result<RunningAgent> {
        self.start_with(Arc::new(ConnectivityStateMachine::new()))
            .await
    }

    /// [`start`](Self::start) driving an existing state machine, so the
    /// health endpoint can report on it before the agent is ready.
    async fn start_with(
        &self,
        machine: Arc<ConnectivityStateMachine>,
    ) -> anyhow::Result<RunningAgent> {
        let pong = Arc::new(PongHandler::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Arc::new(
            default_handlers(
                Arc::clone(&self.source),
                self.config.example.export_output_path.clone(),
                Arc::clone(&pong),
            )
            .build(Arc::clone(&self.source)),
        );
        dispatcher
            .subscribe(&EventType::ALL)
            .await
            .context("Subscribing to events")?;

        let mut background = Vec::with_capacity(2);
        background.push(tokio::spawn(
            Arc::clone(&dispatcher).run(shutdown_rx.clone()),
        ));

        let monitor = HealthMonitor::new(
            Arc::clone(&self.client),
            Arc::clone(&machine),
            self.config.api.health_check_interval(),
            self.config.api.heartbeat_timeout(),
        );
        let monitor_rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move { monitor.run(monitor_rx).await }));

        tracing::info!("Waiting for the remote platform to come up");
        machine.ready().await;
        tracing::info!("Remote platform is up");

        // The pong only proves the event channel end to end; a failed ping
        // does not hold back the workers.
        if let Err(e) = self.source.ping(PING_PAYLOAD).await {
            tracing::warn!(error = %e, "Connectivity ping failed");
        }

        let mut pool = ConnectorWorkerPool::new(Arc::clone(&self.client), &self.config);
        if let Some(settings) = &self.scenario {
            pool = pool.with_settings(settings.clone());
        }
        let workers = pool.start(self.config.executor.pool_size).await;

        Ok(RunningAgent {
            machine,
            dispatcher,
            pong,
            workers,
            shutdown_tx,
            background,
        })
    }

    /// Serve `/health` and start the agent, until ctrl-c.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.http.bind_addr)
            .await
            .with_context(|| format!("Binding {}", self.config.http.bind_addr))?;
        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serve `/health` on `listener` for the whole lifetime of the agent,
    /// including the wait for the first `UP`. Returns once `shutdown`
    /// resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let machine = Arc::new(ConnectivityStateMachine::new());
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let app = create_health_router(Arc::clone(&machine));
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Health endpoint listening");
        }
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        tokio::pin!(shutdown);
        let started = tokio::select! {
            r = self.start_with(Arc::clone(&machine)) => Some(r),
            _ = &mut shutdown => {
                tracing::info!("Interrupted before startup completed");
                None
            }
        };

        let running = match started {
            Some(Ok(running)) => {
                (&mut shutdown).await;
                Some(running)
            }
            Some(Err(e)) => {
                let _ = stop_tx.send(true);
                let _ = server.await;
                return Err(e);
            }
            None => None,
        };

        tracing::info!("Shutting down");
        let _ = stop_tx.send(true);
        if let Some(running) = running {
            running.shutdown().await;
        }
        server
            .await
            .context("Health endpoint task failed")?
            .context("Health endpoint failed")?;
        Ok(())
    }
}

impl RunningAgent {
    /// Stop the receive loop and the health monitor, and wait for them.
    /// Workers are left to finish on their own.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.background {
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Background task failed");
            }
        }
    }
}
