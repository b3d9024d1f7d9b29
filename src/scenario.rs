//! ScenarioRunner: the CRUD / poll / cleanup workflow each worker executes.
//!
//! One iteration walks a case and a source file through their whole lifecycle:
//!
//! | Step | Call                                   | Expected                    |
//! |------|----------------------------------------|-----------------------------|
//! | 1    | create case                            | ok (idempotent by id)       |
//! | 2    | get, copy with overrides, update       | ok                          |
//! | 3    | choose local file                      | falls back to sample        |
//! | 4    | create file with metadata + bytes      | ok                          |
//! | 5    | wait for READY/ERROR, 3 s              | TIMEOUT is a warning        |
//! | 6    | re-create file, different bytes        | `Conflict`, logged          |
//! | 7    | re-create file, original bytes         | ok, no-op                   |
//! | 8    | list files                             | 1                           |
//! | 9    | delete file, list again                | 0                           |
//! | 10   | archive, delete case                   | ok                          |
//! | 11   | get deleted case                       | `NotFound`, logged          |
//!
//! Expected failures are matched at the call site. Anything else aborts the
//! current iteration and is reported by [`ScenarioRunner::run`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ExampleConfig;
use crate::model::{LegalCase, SourceFile, SourceFileStatus, UPLOADER_KEY, UPLOADER_VALUE};
use crate::polling::{PollingWaiter, DEFAULT_POLL_INTERVAL};
use crate::remote::RemoteCaseClient;

/// Bundled upload used when no files directory is configured.
pub const SAMPLE_PDF: &[u8] = include_bytes!("../resources/sample.pdf");
/// Second bundled file, used to provoke the content conflict.
pub const SAMPLE2_PDF: &[u8] = include_bytes!("../resources/sample2.pdf");

pub const DOC_TYPES: [&str; 3] = [
    "type_medical",
    "type_financial_ik_statement",
    "type_legal_disposition",
];
pub const DOSSIER_TYPES: [&str; 3] = ["accident", "liability", "iv-be"];

/// How long step 5 waits for processing.
pub const FILE_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-worker scenario settings.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub files_path: Option<PathBuf>,
    pub file_ready_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            files_path: None,
            file_ready_timeout: FILE_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&ExampleConfig> for ScenarioSettings {
    fn from(config: &ExampleConfig) -> Self {
        Self {
            files_path: config.files_path.clone(),
            ..Self::default()
        }
    }
}

/// Bytes picked for upload.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl LocalFile {
    fn sample() -> Self {
        Self {
            name: "sample.pdf".to_string(),
            content: SAMPLE_PDF.to_vec(),
        }
    }
}

/// What one iteration observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub case_id: Uuid,
    pub file_id: Uuid,
    /// Case as read back after the update.
    pub updated_case: LegalCase,
    pub file_status: SourceFileStatus,
    /// Step 6 was refused with `Conflict`.
    pub conflict_detected: bool,
    pub files_after_create: usize,
    pub files_after_delete: usize,
    /// Step 11 got `NotFound`.
    pub deletion_verified: bool,
}

/// Totals for a worker's run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u32,
    pub failed: u32,
    /// When the first iteration began.
    pub started_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// ScenarioRunner
// ---------------------------------------------------------------------------

/// Worker-local scenario state. Build a fresh one per worker.
pub struct ScenarioRunner {
    client: Arc<dyn RemoteCaseClient>,
    settings: ScenarioSettings,
    waiter: PollingWaiter,
    rng: StdRng,
}

impl ScenarioRunner {
    pub fn new(client: Arc<dyn RemoteCaseClient>, settings: ScenarioSettings) -> Self {
        let waiter = PollingWaiter::new(settings.poll_interval);
        Self {
            client,
            settings,
            waiter,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic random choices, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run `iterations` scenarios back to back. A failed iteration is logged
    /// and the next one starts.
    pub async fn run(&mut self, iterations: u32) -> RunSummary {
        let mut summary = RunSummary {
            started_at: Some(Instant::now()),
            ..RunSummary::default()
        };
        for i in 1..=iterations {
            tracing::info!(iteration = i, "Starting scenario run");
            match self.run_once().await {
                Ok(report) => {
                    summary.completed += 1;
                    tracing::debug!(iteration = i, case_id = %report.case_id, "Scenario run finished");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(iteration = i, error = ?e, "Scenario run aborted");
                }
            }
        }
        summary
    }

    /// One full iteration.
    pub async fn run_once(&mut self) -> anyhow::Result<ScenarioReport> {
        let client = Arc::clone(&self.client);

        // 1. Create
        tracing::info!("Adding LegalCase");
        let legal_case = LegalCase::new(Uuid::new_v4())
            .firstname("John")
            .lastname("Doe")
            .reference("123-456-789")
            .owner("DummyIamUser")
            .add_group("group1")
            .put_metadata("meta.dummy", "dummy value")
            .put_metadata(UPLOADER_KEY, UPLOADER_VALUE);
        let case_id = legal_case.id;
        client
            .create_case(&legal_case)
            .await
            .context("Creating legal case")?;

        // 2. Update from a fresh snapshot
        tracing::info!(case_id = %case_id, "Updating LegalCase");
        let snapshot = client
            .get_case(case_id)
            .await
            .context("Reading legal case")?;
        let name_changed = snapshot
            .firstname("Jane")
            .reference("John changed his name");
        client
            .update_case(&name_changed)
            .await
            .context("Updating legal case")?;
        let updated_case = client
            .get_case(case_id)
            .await
            .context("Reading updated legal case")?;

        // 3. Local file
        let local = self.choose_local_file().await;

        // 4. Source file
        let source_file = SourceFile::new(Uuid::new_v4(), case_id)
            .reference("hello.pdf")
            .put_metadata("hello", "world")
            .put_metadata("legali.title", "Sample Document")
            .put_metadata("legali.dossiertype", self.choose_dossier_type())
            .put_metadata("legali.doctype", self.choose_doc_type())
            .put_metadata("legali.issuedate", "2012-12-12");
        let file_id = source_file.id;

        tracing::info!(file_id = %file_id, file = %local.name, "Creating SourceFile");
        client
            .create_file(&source_file, &local.content)
            .await
            .context("Creating source file")?;

        // 5. Wait for processing
        tracing::info!(
            file_id = %file_id,
            timeout_ms = self.settings.file_ready_timeout.as_millis() as u64,
            "Waiting for SourceFile to be processed"
        );
        let file_status = self
            .waiter
            .wait_for_file_ready_or_timeout(
                client.as_ref(),
                file_id,
                self.settings.file_ready_timeout,
            )
            .await
            .context("Polling source file status")?;
        if matches!(
            file_status,
            SourceFileStatus::Error | SourceFileStatus::Timeout
        ) {
            tracing::warn!(
                file_id = %file_id,
                status = %file_status,
                "SourceFile was not processed in time"
            );
        }

        // 6. Same id, different content
        let other = if local.content.as_slice() == SAMPLE2_PDF {
            SAMPLE_PDF
        } else {
            SAMPLE2_PDF
        };
        let conflict_detected = match client.create_file(&source_file, other).await {
            Err(e) if e.is_conflict() => {
                tracing::info!(file_id = %file_id, "SourceFile content differs, create refused");
                true
            }
            Ok(()) => {
                tracing::warn!(file_id = %file_id, "Create with different content was accepted");
                false
            }
            Err(e) => return Err(e).context("Re-creating source file with other content"),
        };

        // 7. Same id, same content
        tracing::info!(file_id = %file_id, "Creating the same SourceFile again");
        client
            .create_file(&source_file, &local.content)
            .await
            .context("Re-creating identical source file")?;

        // 8. / 9. List, delete, list
        let files_after_create = client
            .list_files(case_id)
            .await
            .context("Listing source files")?
            .len();
        tracing::info!(case_id = %case_id, count = files_after_create, "LegalCase source files");

        tracing::info!(file_id = %file_id, "Deleting SourceFile");
        client
            .delete_file(file_id)
            .await
            .context("Deleting source file")?;
        let files_after_delete = client
            .list_files(case_id)
            .await
            .context("Listing source files after delete")?
            .len();
        tracing::info!(case_id = %case_id, count = files_after_delete, "LegalCase source files");

        // 10. Archive + delete
        tracing::info!(case_id = %case_id, "Archiving LegalCase");
        client
            .archive_case(case_id)
            .await
            .context("Archiving legal case")?;
        tracing::info!(case_id = %case_id, "Deleting LegalCase");
        client
            .delete_case(case_id)
            .await
            .context("Deleting legal case")?;

        // 11. Confirm deletion
        let deletion_verified = match client.get_case(case_id).await {
            Err(e) if e.is_not_found() => {
                tracing::info!(case_id = %case_id, "LegalCase has been deleted");
                true
            }
            Ok(_) => {
                tracing::warn!(case_id = %case_id, "Deleted LegalCase is still readable");
                false
            }
            Err(e) => return Err(e).context("Reading deleted legal case"),
        };

        Ok(ScenarioReport {
            case_id,
            file_id,
            updated_case,
            file_status,
            conflict_detected,
            files_after_create,
            files_after_delete,
            deletion_verified,
        })
    }

    /// A random file from `files_path`, or the bundled sample if the path is
    /// unset, unreadable or empty.
    pub async fn choose_local_file(&mut self) -> LocalFile {
        let Some(dir) = self.settings.files_path.clone() else {
            tracing::debug!("Using bundled sample.pdf");
            return LocalFile::sample();
        };

        match self.pick_from_dir(&dir).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                tracing::warn!(dir = %dir.display(), "No files found, using bundled sample.pdf");
                LocalFile::sample()
            }
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = ?e,
                    "Cannot read files directory, using bundled sample.pdf"
                );
                LocalFile::sample()
            }
        }
    }

    async fn pick_from_dir(&mut self, dir: &Path) -> anyhow::Result<Option<LocalFile>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Listing {}", dir.display()))?;

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                candidates.push(entry.path());
            }
        }

        let Some(path) = candidates.choose(&mut self.rng).cloned() else {
            return Ok(None);
        };
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::info!(
            file = %name,
            size_mb = content.len() as f64 / (1024.0 * 1024.0),
            "Chosen upload file"
        );
        Ok(Some(LocalFile { name, content }))
    }

    fn choose_doc_type(&mut self) -> &'static str {
        DOC_TYPES.choose(&mut self.rng).copied().unwrap_or(DOC_TYPES[0])
    }

    fn choose_dossier_type(&mut self) -> &'static str {
        DOSSIER_TYPES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(DOSSIER_TYPES[0])
    }
}

/// Delete every case this agent created. A failed delete is logged and the
/// sweep moves on; only a failed listing aborts.
pub async fn cleanup(client: &dyn RemoteCaseClient) -> anyhow::Result<CleanupReport> {
    let cases = client.list_cases().await.context("Listing legal cases")?;
    let mut report = CleanupReport::default();

    for case in cases {
        if !case.is_created_by_agent() {
            report.skipped += 1;
            continue;
        }
        tracing::info!(case_id = %case.id, "Cleaning up LegalCase");
        match client.delete_case(case.id).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(case_id = %case.id, error = %e, "Cleanup delete failed");
            }
        }
    }

    tracing::info!(
        deleted = report.deleted,
        failed = report.failed,
        skipped = report.skipped,
        "Cleanup finished"
    );
    Ok(report)
}
