//! InMemoryCaseService: a process-local stand-in for the remote platform.
//!
//! Implements the same contract the real service exposes:
//!
//! - creates are idempotent by id and content, differing content is `Conflict`
//! - events are delivered at-least-once; anything not confirmed within
//!   `redelivery_after` goes back on the queue
//! - confirm is idempotent; confirming a uuid never issued is `UnknownEvent`.
//!   Only the last `confirmed_history` confirmed uuids are remembered, so a
//!   very late duplicate confirm can also come back as `UnknownEvent`
//! - file processing is simulated by [`ProcessingMode`]
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! `.await`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{EventSource, RemoteCaseClient};
use crate::error::{AgentError, Result};
use crate::events::types::{EventPayload, EventType, RemoteEvent};
use crate::model::{LegalCase, SourceFile, SourceFileStatus};

/// Default delay before an unconfirmed event is redelivered.
const DEFAULT_REDELIVERY: Duration = Duration::from_secs(30);

/// Default number of confirmed uuids remembered for idempotent re-confirm.
const DEFAULT_CONFIRMED_HISTORY: usize = 10_000;

/// How uploaded files progress after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Files stay `PENDING` forever (processing switched off remotely).
    Disabled,
    /// Files become `READY` once `after` has elapsed.
    Completes { after: Duration },
    /// Files become `ERROR` once `after` has elapsed.
    Fails { after: Duration },
}

struct StoredCase {
    case: LegalCase,
    archived: bool,
}

struct StoredFile {
    file: SourceFile,
    content: Vec<u8>,
    created_at: Instant,
}

#[derive(Default)]
struct State {
    cases: HashMap<Uuid, StoredCase>,
    files: HashMap<Uuid, StoredFile>,
    subscribed: HashSet<EventType>,
    queue: VecDeque<RemoteEvent>,
    in_flight: HashMap<Uuid, (RemoteEvent, Instant)>,
    /// Bounded by `confirmed_history`; the oldest uuid is forgotten first.
    confirmed: HashSet<Uuid>,
    confirmed_order: VecDeque<Uuid>,
    exports: HashMap<String, Vec<u8>>,
    deliveries: u64,
}

impl State {
    fn emit(&mut self, payload: EventPayload) -> bool {
        if !self.subscribed.contains(&payload.event_type()) {
            return false;
        }
        self.queue.push_back(RemoteEvent::new(payload));
        true
    }

    fn requeue_expired(&mut self, redelivery_after: Duration) {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, (_, delivered_at))| now.duration_since(*delivered_at) >= redelivery_after)
            .map(|(uuid, _)| *uuid)
            .collect();

        for uuid in expired {
            if let Some((event, _)) = self.in_flight.remove(&uuid) {
                tracing::debug!(event_uuid = %uuid, "Redelivering unconfirmed event");
                self.queue.push_back(event);
            }
        }
    }

    /// Advance a file's simulated processing. Returns the current status.
    fn refresh_file(&mut self, id: Uuid, mode: ProcessingMode) -> Option<SourceFileStatus> {
        let stored = self.files.get_mut(&id)?;
        let current = stored.file.status;
        if current.is_terminal() {
            return Some(current);
        }

        let elapsed = stored.created_at.elapsed();
        let next = match mode {
            ProcessingMode::Disabled => current,
            ProcessingMode::Completes { after } if elapsed >= after => SourceFileStatus::Ready,
            ProcessingMode::Fails { after } if elapsed >= after => SourceFileStatus::Error,
            ProcessingMode::Completes { .. } | ProcessingMode::Fails { .. } => {
                SourceFileStatus::Processing
            }
        };

        if next == current {
            return Some(current);
        }

        stored.file.status = next;
        let case_id = stored.file.case_id;
        self.emit(EventPayload::FileUpdated {
            source_file_uuid: id,
            field: "status".to_string(),
        });
        match next {
            SourceFileStatus::Ready => {
                self.emit(EventPayload::CaseReady {
                    legal_case_uuid: case_id,
                });
            }
            SourceFileStatus::Error => {
                self.emit(EventPayload::FileTaskFailed {
                    source_file_uuid: id,
                    task: Some("processing".to_string()),
                });
            }
            _ => {}
        }
        Some(next)
    }
}

// ---------------------------------------------------------------------------
// InMemoryCaseService
// ---------------------------------------------------------------------------

pub struct InMemoryCaseService {
    state: Mutex<State>,
    notify: Notify,
    healthy: AtomicBool,
    processing: ProcessingMode,
    redelivery_after: Duration,
    confirmed_history: usize,
}

impl Default for InMemoryCaseService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCaseService {
    /// Healthy service, processing disabled, 30 s redelivery.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            healthy: AtomicBool::new(true),
            processing: ProcessingMode::Disabled,
            redelivery_after: DEFAULT_REDELIVERY,
            confirmed_history: DEFAULT_CONFIRMED_HISTORY,
        }
    }

    pub fn with_processing(mut self, mode: ProcessingMode) -> Self {
        self.processing = mode;
        self
    }

    pub fn with_redelivery_after(mut self, after: Duration) -> Self {
        self.redelivery_after = after;
        self
    }

    /// How many confirmed uuids to remember. Re-confirming a uuid that has
    /// been forgotten is `UnknownEvent`.
    pub fn with_confirmed_history(mut self, capacity: usize) -> Self {
        self.confirmed_history = capacity.max(1);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a panicking test thread; the maps are
        // still consistent because every mutation is a single insert/remove.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, state: &mut State, payload: EventPayload) {
        if state.emit(payload) {
            self.notify.notify_one();
        }
    }

    /// Toggle the result of [`RemoteCaseClient::health`].
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Inject an event as if the platform had produced it (e.g. user
    /// activity in the web frontend). Returns its uuid, or `None` if the
    /// type is not subscribed.
    pub fn publish(&self, payload: EventPayload) -> Option<Uuid> {
        let mut state = self.lock();
        if !state.subscribed.contains(&payload.event_type()) {
            return None;
        }
        let event = RemoteEvent::new(payload);
        let uuid = event.uuid;
        state.queue.push_back(event);
        drop(state);
        self.notify.notify_one();
        Some(uuid)
    }

    /// Make `content` downloadable under `uri`.
    pub fn register_export(&self, uri: impl Into<String>, content: Vec<u8>) {
        self.lock().exports.insert(uri.into(), content);
    }

    pub fn subscribed_types(&self) -> HashSet<EventType> {
        self.lock().subscribed.clone()
    }

    pub fn is_confirmed(&self, uuid: Uuid) -> bool {
        self.lock().confirmed.contains(&uuid)
    }

    pub fn confirmed_count(&self) -> usize {
        self.lock().confirmed.len()
    }

    /// Events issued but not yet confirmed (queued or in flight).
    pub fn unconfirmed_count(&self) -> usize {
        let state = self.lock();
        state.queue.len() + state.in_flight.len()
    }

    /// Total deliveries, counting redeliveries.
    pub fn delivery_count(&self) -> u64 {
        self.lock().deliveries
    }

    pub fn case_count(&self) -> usize {
        self.lock().cases.len()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }
}

#[async_trait]
impl RemoteCaseClient for InMemoryCaseService {
    async fn health(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AgentError::Transport("remote service unavailable".to_string()))
        }
    }

    async fn create_case(&self, case: &LegalCase) -> Result<()> {
        let mut state = self.lock();
        if let Some(existing) = state.cases.get(&case.id) {
            if existing.case == *case {
                return Ok(());
            }
            return Err(AgentError::Conflict(format!(
                "legal case {} exists with different content",
                case.id
            )));
        }

        state.cases.insert(
            case.id,
            StoredCase {
                case: case.clone(),
                archived: false,
            },
        );
        self.emit(
            &mut state,
            EventPayload::CaseCreated {
                legal_case: case.clone(),
            },
        );
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<LegalCase> {
        self.lock()
            .cases
            .get(&id)
            .map(|c| c.case.clone())
            .ok_or_else(|| AgentError::not_found_case(id))
    }

    async fn update_case(&self, case: &LegalCase) -> Result<()> {
        let mut state = self.lock();
        let stored = state
            .cases
            .get_mut(&case.id)
            .ok_or_else(|| AgentError::not_found_case(case.id))?;
        stored.case = case.clone();
        self.emit(
            &mut state,
            EventPayload::CaseUpdated {
                legal_case: case.clone(),
            },
        );
        Ok(())
    }

    async fn list_cases(&self) -> Result<Vec<LegalCase>> {
        let state = self.lock();
        let mut cases: Vec<LegalCase> = state.cases.values().map(|c| c.case.clone()).collect();
        cases.sort_by_key(|c| c.id);
        Ok(cases)
    }

    async fn archive_case(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock();
        let stored = state
            .cases
            .get_mut(&id)
            .ok_or_else(|| AgentError::not_found_case(id))?;
        if stored.archived {
            return Ok(());
        }
        stored.archived = true;
        self.emit(
            &mut state,
            EventPayload::CaseStatusChanged {
                legal_case_uuid: id,
                status: "ARCHIVED".to_string(),
            },
        );
        Ok(())
    }

    async fn delete_case(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock();
        if state.cases.remove(&id).is_none() {
            return Err(AgentError::not_found_case(id));
        }
        state.files.retain(|_, f| f.file.case_id != id);
        Ok(())
    }

    async fn create_file(&self, file: &SourceFile, content: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.cases.contains_key(&file.case_id) {
            return Err(AgentError::not_found_case(file.case_id));
        }

        if let Some(existing) = state.files.get(&file.id) {
            let same = existing.content == content
                && existing.file.case_id == file.case_id
                && existing.file.reference == file.reference
                && existing.file.metadata == file.metadata;
            if same {
                return Ok(());
            }
            return Err(AgentError::Conflict(format!(
                "source file {} exists with different content",
                file.id
            )));
        }

        let mut stored = file.clone();
        stored.status = SourceFileStatus::Pending;
        state.files.insert(
            file.id,
            StoredFile {
                file: stored.clone(),
                content: content.to_vec(),
                created_at: Instant::now(),
            },
        );
        self.emit(
            &mut state,
            EventPayload::FileCreated {
                source_file: stored,
            },
        );
        Ok(())
    }

    async fn get_file(&self, id: Uuid) -> Result<SourceFile> {
        let mut state = self.lock();
        if state.refresh_file(id, self.processing).is_none() {
            return Err(AgentError::not_found_file(id));
        }
        if !state.queue.is_empty() {
            self.notify.notify_one();
        }
        state
            .files
            .get(&id)
            .map(|f| f.file.clone())
            .ok_or_else(|| AgentError::not_found_file(id))
    }

    async fn list_files(&self, case_id: Uuid) -> Result<Vec<SourceFile>> {
        let mut state = self.lock();
        if !state.cases.contains_key(&case_id) {
            return Err(AgentError::not_found_case(case_id));
        }
        let ids: Vec<Uuid> = state
            .files
            .values()
            .filter(|f| f.file.case_id == case_id)
            .map(|f| f.file.id)
            .collect();
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            state.refresh_file(id, self.processing);
            if let Some(f) = state.files.get(&id) {
                files.push(f.file.clone());
            }
        }
        files.sort_by_key(|f| f.id);
        Ok(files)
    }

    async fn delete_file(&self, id: Uuid) -> Result<()> {
        self.lock()
            .files
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AgentError::not_found_file(id))
    }
}

#[async_trait]
impl EventSource for InMemoryCaseService {
    async fn subscribe(&self, types: &[EventType]) -> Result<()> {
        let mut state = self.lock();
        state.subscribed.extend(types.iter().copied());
        Ok(())
    }

    async fn receive(&self) -> Result<RemoteEvent> {
        loop {
            // Register for a wakeup before inspecting the queue so a publish
            // between the check and the wait is not lost.
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                state.requeue_expired(self.redelivery_after);
                if let Some(event) = state.queue.pop_front() {
                    state.deliveries += 1;
                    state
                        .in_flight
                        .insert(event.uuid, (event.clone(), Instant::now()));
                    return Ok(event);
                }
            }
            // Wake up periodically to pick up redeliveries.
            let _ = tokio::time::timeout(self.redelivery_after, notified).await;
        }
    }

    async fn confirm(&self, uuid: Uuid) -> Result<()> {
        let mut state = self.lock();
        if state.confirmed.contains(&uuid) {
            return Ok(());
        }
        let was_in_flight = state.in_flight.remove(&uuid).is_some();
        let queued_at = state.queue.iter().position(|e| e.uuid == uuid);
        if let Some(pos) = queued_at {
            state.queue.remove(pos);
        }
        if !was_in_flight && queued_at.is_none() {
            return Err(AgentError::UnknownEvent(uuid));
        }
        state.confirmed.insert(uuid);
        state.confirmed_order.push_back(uuid);
        while state.confirmed_order.len() > self.confirmed_history {
            if let Some(oldest) = state.confirmed_order.pop_front() {
                state.confirmed.remove(&oldest);
            }
        }
        Ok(())
    }

    async fn ping(&self, payload: &str) -> Result<()> {
        let mut state = self.lock();
        self.emit(
            &mut state,
            EventPayload::Pong {
                message: Some(payload.to_string()),
            },
        );
        Ok(())
    }

    async fn download_file(&self, uri: &str) -> Result<Vec<u8>> {
        self.lock()
            .exports
            .get(uri)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("export file {uri}")))
    }
}
