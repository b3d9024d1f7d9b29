//! End-to-end agent runs against the in-memory service.
//!
//! Flow:
//! 1. Start the agent (subscribe, receive loop, health monitor)
//! 2. Wait for the connectivity gate and the pong
//! 3. Let the workers run the case / source-file scenario
//! 4. Push platform events through the dispatcher
//!
//! Run with: cargo test --test agent_flow

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use case_agent::events::{EventPayload, EventType, RemoteEvent};
use case_agent::remote::ProcessingMode;
use case_agent::scenario::ScenarioSettings;
use case_agent::{
    Agent, AgentConfig, AgentError, EventSource, InMemoryCaseService, RemoteCaseClient,
};
use uuid::Uuid;

/// Event source whose ping endpoint is broken; everything else is served by
/// the wrapped in-memory service.
struct PingRejected(Arc<InMemoryCaseService>);

#[async_trait]
impl EventSource for PingRejected {
    async fn subscribe(&self, types: &[EventType]) -> case_agent::Result<()> {
        self.0.subscribe(types).await
    }

    async fn receive(&self) -> case_agent::Result<RemoteEvent> {
        self.0.receive().await
    }

    async fn confirm(&self, uuid: Uuid) -> case_agent::Result<()> {
        self.0.confirm(uuid).await
    }

    async fn ping(&self, _payload: &str) -> case_agent::Result<()> {
        Err(AgentError::Transport("ping endpoint 502".to_string()))
    }

    async fn download_file(&self, uri: &str) -> case_agent::Result<Vec<u8>> {
        self.0.download_file(uri).await
    }
}

fn fast_scenario() -> ScenarioSettings {
    ScenarioSettings {
        file_ready_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(50),
        ..ScenarioSettings::default()
    }
}

fn config(dir: &tempfile::TempDir) -> AgentConfig {
    let mut config = AgentConfig::default().iterations(2).pool_size(2);
    config.example.export_output_path = dir.path().join("dummy.pdf");
    config
}

async fn wait_confirmed(svc: &InMemoryCaseService, uuid: Uuid) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !svc.is_confirmed(uuid) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("event was never confirmed");
}

#[tokio::test(start_paused = true)]
async fn test_agent_runs_scenario_after_ready() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(InMemoryCaseService::new().with_processing(
        ProcessingMode::Completes {
            after: Duration::from_millis(200),
        },
    ));
    let agent = Agent::new(config(&dir), svc.clone(), svc.clone())
        .with_scenario_settings(fast_scenario());

    let mut running = agent.start().await.unwrap();
    assert!(running.machine.is_ready());
    assert_eq!(svc.subscribed_types().len(), EventType::ALL.len());

    let mut pongs = running.pong.pongs();
    tokio::time::timeout(Duration::from_secs(10), pongs.wait_for(|n| *n >= 1))
        .await
        .expect("no pong received")
        .unwrap();

    let workers = std::mem::take(&mut running.workers);
    assert_eq!(workers.len(), 2);
    for handle in workers {
        let summary = handle.await.unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
    }

    // Every case the workers created was deleted again.
    assert_eq!(svc.case_count(), 0);
    assert_eq!(svc.file_count(), 0);

    tokio::time::timeout(Duration::from_secs(30), async {
        while svc.unconfirmed_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scenario events were left unconfirmed");
    assert!(running.dispatcher.stats().confirmed > 0);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_workers_wait_for_connectivity() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(InMemoryCaseService::new());
    svc.set_healthy(false);

    let agent = Agent::new(config(&dir), svc.clone(), svc.clone())
        .with_scenario_settings(fast_scenario());
    let start = tokio::spawn(async move { agent.start().await });

    // Several failed health check cycles.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!start.is_finished());
    assert_eq!(svc.delivery_count(), 0);
    assert_eq!(svc.case_count(), 0);

    svc.set_healthy(true);
    let mut running = start.await.unwrap().unwrap();
    assert!(running.machine.is_ready());

    for handle in std::mem::take(&mut running.workers) {
        assert_eq!(handle.await.unwrap().failed, 0);
    }
    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_export_created_downloads_file() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(InMemoryCaseService::new());
    let agent = Agent::new(config(&dir).pool_size(1).iterations(1), svc.clone(), svc.clone())
        .with_scenario_settings(fast_scenario());
    let running = agent.start().await.unwrap();

    svc.register_export("mem://exports/42", b"%PDF-1.4 exported".to_vec());
    let uuid = svc
        .publish(EventPayload::ExportCreated {
            export_uuid: Uuid::new_v4(),
            legal_case_uuid: Uuid::new_v4(),
            recipient: "insurer@example.com".to_string(),
            file_uri: "mem://exports/42".to_string(),
        })
        .unwrap();

    wait_confirmed(&svc, uuid).await;
    assert_eq!(
        std::fs::read(dir.path().join("dummy.pdf")).unwrap(),
        b"%PDF-1.4 exported"
    );
    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_export_is_redelivered() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(InMemoryCaseService::new().with_redelivery_after(Duration::from_secs(2)));
    let agent = Agent::new(config(&dir).pool_size(1).iterations(1), svc.clone(), svc.clone())
        .with_scenario_settings(fast_scenario());
    let running = agent.start().await.unwrap();

    // Not downloadable yet: the handler fails and the event stays unconfirmed.
    let uuid = svc
        .publish(EventPayload::ExportCreated {
            export_uuid: Uuid::new_v4(),
            legal_case_uuid: Uuid::new_v4(),
            recipient: "insurer@example.com".to_string(),
            file_uri: "mem://exports/late".to_string(),
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!svc.is_confirmed(uuid));

    svc.register_export("mem://exports/late", b"%PDF-1.4 late".to_vec());
    wait_confirmed(&svc, uuid).await;

    assert!(running.dispatcher.stats().failed >= 1);
    assert_eq!(
        std::fs::read(dir.path().join("dummy.pdf")).unwrap(),
        b"%PDF-1.4 late"
    );
    running.shutdown().await;
}

#[tokio::test]
async fn test_cleanup_leaves_foreign_cases() {
    let svc = Arc::new(InMemoryCaseService::new());
    let ours = case_agent::LegalCase::new(Uuid::new_v4())
        .put_metadata(case_agent::model::UPLOADER_KEY, case_agent::model::UPLOADER_VALUE);
    let theirs = case_agent::LegalCase::new(Uuid::new_v4()).firstname("Other");
    svc.create_case(&ours).await.unwrap();
    svc.create_case(&theirs).await.unwrap();

    let report = case_agent::scenario::cleanup(svc.as_ref()).await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(svc.case_count(), 1);
    assert!(svc.get_case(theirs.id).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_ping_does_not_block_workers() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(InMemoryCaseService::new());
    let source = Arc::new(PingRejected(svc.clone()));
    let agent = Agent::new(config(&dir), svc.clone(), source)
        .with_scenario_settings(fast_scenario());

    let mut running = agent.start().await.unwrap();

    let workers = std::mem::take(&mut running.workers);
    assert_eq!(workers.len(), 2);
    for handle in workers {
        assert_eq!(handle.await.unwrap().completed, 2);
    }
    assert_eq!(*running.pong.pongs().borrow(), 0);
    running.shutdown().await;
}

async fn get_health(url: &str) -> Option<(u16, serde_json::Value)> {
    let response = tokio::time::timeout(Duration::from_secs(3), reqwest::get(url))
        .await
        .expect("health endpoint did not answer")
        .ok()?;
    let status = response.status().as_u16();
    Some((status, response.json().await.ok()?))
}

async fn wait_for_health(url: &str, expected: (u16, &str)) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some((status, body)) = get_health(url).await {
                if status == expected.0 && body["status"] == expected.1 {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("health never reported {expected:?}"));
}

#[tokio::test]
async fn test_health_answers_while_platform_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(InMemoryCaseService::new());
    svc.set_healthy(false);

    let mut config = config(&dir).pool_size(1).iterations(1);
    config.api.health_check_interval_secs = 1;
    let agent = Agent::new(config, svc.clone(), svc.clone())
        .with_scenario_settings(fast_scenario());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/health", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(agent.serve(listener, async move {
        let _ = stop_rx.await;
    }));

    // Startup is still blocked on the first UP, yet the endpoint answers.
    wait_for_health(&url, (503, "DOWN")).await;
    assert_eq!(svc.case_count(), 0);

    svc.set_healthy(true);
    wait_for_health(&url, (200, "UP")).await;

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(30), serving)
        .await
        .expect("agent did not shut down")
        .unwrap()
        .unwrap();
}
