//! Seam to the remote case-management platform.
//!
//! The agent depends on these two traits only. `HttpCaseClient` talks to the
//! real agent API; `InMemoryCaseService` is a self-contained stand-in used by
//! the tests and by `--offline` runs.

pub mod http;
pub mod in_memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::events::types::{EventType, RemoteEvent};
use crate::model::{LegalCase, SourceFile};

pub use http::HttpCaseClient;
pub use in_memory::{InMemoryCaseService, ProcessingMode};

/// CRUD on legal cases and source files.
///
/// Implementations are shared across all workers and the event handlers via
/// `Arc` and must tolerate concurrent calls without caller-side locking.
#[async_trait]
pub trait RemoteCaseClient: Send + Sync {
    /// Cheap liveness check used by the health monitor.
    async fn health(&self) -> Result<()>;

    /// Create a case. Idempotent by id: identical content is a no-op,
    /// differing content is a `Conflict`.
    async fn create_case(&self, case: &LegalCase) -> Result<()>;

    async fn get_case(&self, id: Uuid) -> Result<LegalCase>;

    async fn update_case(&self, case: &LegalCase) -> Result<()>;

    async fn list_cases(&self) -> Result<Vec<LegalCase>>;

    async fn archive_case(&self, id: Uuid) -> Result<()>;

    async fn delete_case(&self, id: Uuid) -> Result<()>;

    /// Create a source file with its content. Same idempotence rules as
    /// `create_case`, with the content bytes part of the comparison.
    async fn create_file(&self, file: &SourceFile, content: &[u8]) -> Result<()>;

    async fn get_file(&self, id: Uuid) -> Result<SourceFile>;

    async fn list_files(&self, case_id: Uuid) -> Result<Vec<SourceFile>>;

    async fn delete_file(&self, id: Uuid) -> Result<()>;
}

/// At-least-once event channel from the remote platform.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Register interest in a set of event types.
    async fn subscribe(&self, types: &[EventType]) -> Result<()>;

    /// Suspend until the next event is available.
    async fn receive(&self) -> Result<RemoteEvent>;

    /// Acknowledge an event. Re-confirming a confirmed uuid is a no-op;
    /// an unknown uuid is `UnknownEvent`.
    async fn confirm(&self, uuid: Uuid) -> Result<()>;

    /// Request a `connectivity-pong` event carrying `payload`.
    async fn ping(&self, payload: &str) -> Result<()>;

    /// Fetch a remote file referenced by an event.
    async fn download_file(&self, uri: &str) -> Result<Vec<u8>>;
}
