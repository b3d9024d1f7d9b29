//! Handlers for every event type the agent subscribes to.
//!
//! Most events are informational and only logged. `connectivity-pong` bumps a
//! counter so callers can observe the round trip, and `export-created`
//! downloads the exported file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::watch;

use super::dispatcher::{EventDispatcherBuilder, EventHandler};
use super::types::{EventPayload, EventType, RemoteEvent};
use crate::remote::EventSource;

// ---------------------------------------------------------------------------
// PongHandler
// ---------------------------------------------------------------------------

/// Counts pong replies. Subscribe to [`PongHandler::pongs`] to wait for one.
pub struct PongHandler {
    pongs_tx: watch::Sender<u64>,
}

impl Default for PongHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PongHandler {
    pub fn new() -> Self {
        let (pongs_tx, _) = watch::channel(0);
        Self { pongs_tx }
    }

    pub fn pongs(&self) -> watch::Receiver<u64> {
        self.pongs_tx.subscribe()
    }
}

#[async_trait]
impl EventHandler for PongHandler {
    async fn handle(&self, event: &RemoteEvent) -> anyhow::Result<()> {
        if let EventPayload::Pong { message } = &event.payload {
            tracing::info!(
                event_uuid = %event.uuid,
                message = message.as_deref().unwrap_or(""),
                "PingPong event received"
            );
        }
        self.pongs_tx.send_modify(|n| *n += 1);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NotificationHandler
// ---------------------------------------------------------------------------

/// Logs case, file and export notifications.
pub struct NotificationHandler;

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, event: &RemoteEvent) -> anyhow::Result<()> {
        let uuid = event.uuid;
        match &event.payload {
            EventPayload::CaseCreated { legal_case } => tracing::info!(
                event_uuid = %uuid,
                case_id = %legal_case.id,
                firstname = %legal_case.firstname,
                lastname = %legal_case.lastname,
                "LegalCaseCreated"
            ),
            EventPayload::CaseUpdated { legal_case } => tracing::info!(
                event_uuid = %uuid,
                case_id = %legal_case.id,
                firstname = %legal_case.firstname,
                lastname = %legal_case.lastname,
                "LegalCaseUpdated"
            ),
            EventPayload::CaseStatusChanged {
                legal_case_uuid,
                status,
            } => tracing::info!(
                event_uuid = %uuid,
                case_id = %legal_case_uuid,
                status = %status,
                "LegalCaseStatusChanged"
            ),
            EventPayload::CaseReady { legal_case_uuid } => tracing::info!(
                event_uuid = %uuid,
                case_id = %legal_case_uuid,
                "LegalCaseReady"
            ),
            EventPayload::FileCreated { source_file } => tracing::info!(
                event_uuid = %uuid,
                file_id = %source_file.id,
                case_id = %source_file.case_id,
                "SourceFileCreated"
            ),
            EventPayload::FileUpdated {
                source_file_uuid,
                field,
            } => tracing::info!(
                event_uuid = %uuid,
                file_id = %source_file_uuid,
                field = %field,
                "SourceFileUpdated"
            ),
            EventPayload::FileTaskFailed {
                source_file_uuid,
                task,
            } => tracing::warn!(
                event_uuid = %uuid,
                file_id = %source_file_uuid,
                task = task.as_deref().unwrap_or("unknown"),
                "SourceFileTaskFailed"
            ),
            EventPayload::ExportShared {
                export_uuid,
                method,
                link,
                email,
            } => tracing::info!(
                event_uuid = %uuid,
                export_id = %export_uuid,
                method = %method,
                link = link.as_deref().unwrap_or(""),
                email = email.as_deref().unwrap_or(""),
                "ExportShared"
            ),
            EventPayload::ExportViewed {
                legal_case_uuid,
                opened_by,
            } => tracing::info!(
                event_uuid = %uuid,
                case_id = %legal_case_uuid,
                opened_by = %opened_by,
                "ExportViewed"
            ),
            other => anyhow::bail!(
                "NotificationHandler cannot handle '{}' events",
                other.event_type()
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ExportDownloadHandler
// ---------------------------------------------------------------------------

/// Downloads the file referenced by an `export-created` event and writes it to
/// `output_path`, replacing any previous download.
///
/// The bytes are staged in a temp file next to the target first, so a failed
/// write never leaves a truncated file at `output_path`.
pub struct ExportDownloadHandler {
    source: Arc<dyn EventSource>,
    output_path: PathBuf,
}

impl ExportDownloadHandler {
    pub fn new(source: Arc<dyn EventSource>, output_path: PathBuf) -> Self {
        Self {
            source,
            output_path,
        }
    }
}

fn write_replacing(output_path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("Creating {}", dir.display()))?;

    let mut staged = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("Creating temp file in {}", dir.display()))?;
    staged
        .write_all(content)
        .context("Writing downloaded export")?;
    staged
        .persist(output_path)
        .with_context(|| format!("Moving export to {}", output_path.display()))?;
    Ok(())
}

#[async_trait]
impl EventHandler for ExportDownloadHandler {
    async fn handle(&self, event: &RemoteEvent) -> anyhow::Result<()> {
        let EventPayload::ExportCreated {
            export_uuid,
            legal_case_uuid,
            recipient,
            file_uri,
        } = &event.payload
        else {
            anyhow::bail!(
                "ExportDownloadHandler cannot handle '{}' events",
                event.event_type()
            );
        };

        tracing::info!(
            event_uuid = %event.uuid,
            export_id = %export_uuid,
            case_id = %legal_case_uuid,
            recipient = %recipient,
            ts = %event.ts,
            "ExportCreated"
        );

        let content = self
            .source
            .download_file(file_uri)
            .await
            .with_context(|| format!("Downloading {file_uri}"))?;
        let size = content.len();

        let output_path = self.output_path.clone();
        tokio::task::spawn_blocking(move || write_replacing(&output_path, &content))
            .await
            .context("Export writer task failed")??;

        tracing::info!(
            path = %self.output_path.display(),
            size,
            "Downloaded export file"
        );
        Ok(())
    }
}

/// Handler table covering every [`EventType`].
pub fn default_handlers(
    source: Arc<dyn EventSource>,
    export_output_path: PathBuf,
    pong: Arc<PongHandler>,
) -> EventDispatcherBuilder {
    let notifications: Arc<dyn EventHandler> = Arc::new(NotificationHandler);
    EventDispatcherBuilder::new()
        .register(EventType::ConnectivityPong, pong)
        .register_all(
            &[
                EventType::CaseCreated,
                EventType::CaseStatusChanged,
                EventType::CaseUpdated,
                EventType::CaseReady,
                EventType::FileCreated,
                EventType::FileUpdated,
                EventType::FileTaskFailed,
                EventType::ExportShared,
                EventType::ExportViewed,
            ],
            notifications,
        )
        .register(
            EventType::ExportCreated,
            Arc::new(ExportDownloadHandler::new(source, export_output_path)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryCaseService;
    use uuid::Uuid;

    fn export_event(uri: &str) -> RemoteEvent {
        RemoteEvent::new(EventPayload::ExportCreated {
            export_uuid: Uuid::new_v4(),
            legal_case_uuid: Uuid::new_v4(),
            recipient: "insurer".into(),
            file_uri: uri.into(),
        })
    }

    #[test]
    fn test_default_handlers_cover_every_type() {
        let svc = Arc::new(InMemoryCaseService::new());
        let dispatcher = default_handlers(
            svc.clone(),
            PathBuf::from("./dummy.pdf"),
            Arc::new(PongHandler::new()),
        )
        .build(svc);

        for t in EventType::ALL {
            assert!(dispatcher.handles(t), "missing handler for {t}");
        }
    }

    #[tokio::test]
    async fn test_pong_handler_counts() {
        let handler = PongHandler::new();
        let rx = handler.pongs();
        let event = RemoteEvent::new(EventPayload::Pong { message: None });

        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(*rx.borrow(), 2);
    }

    #[tokio::test]
    async fn test_notification_handler_rejects_export_created() {
        assert!(NotificationHandler
            .handle(&export_event("mem://x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_export_download_overwrites_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dummy.pdf");
        std::fs::write(&target, b"stale").unwrap();

        let svc = Arc::new(InMemoryCaseService::new());
        svc.register_export("mem://exports/1", b"%PDF-1.4 fresh".to_vec());
        let handler = ExportDownloadHandler::new(svc, target.clone());

        handler.handle(&export_event("mem://exports/1")).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.4 fresh");
    }

    #[tokio::test]
    async fn test_export_download_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dummy.pdf");
        let svc = Arc::new(InMemoryCaseService::new());
        let handler = ExportDownloadHandler::new(svc, target.clone());

        assert!(handler.handle(&export_event("mem://missing")).await.is_err());
        assert!(!target.exists());
    }
}
