//! Polling batch worker.
//!
//! Jobs are claimed from the store with a conditional status update, so any
//! number of workers can poll the same store without double-processing. A
//! claimed job runs its files strictly in order; cancellation is observed
//! between files, never mid-file, so the in-flight file always finishes and
//! its outcome is recorded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{WorkerSection, DEFAULT_FILE_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS};
use crate::error::{Error, Result};
use crate::ir::{ElementUpdate, Position, TextElement, TranslationFragment};
use crate::job::{BatchJob, FileOutcome, FileStore, JobOptions, JobPatch, JobStatus, JobStore};
use crate::layout::{adjust_text_element, autofit_font_sz, text_scaling_factor};
use crate::pptx::{parse_pptx, write_translated_pptx};
use crate::translate::TranslationGateway;

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub file_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            file_timeout: Duration::from_secs(DEFAULT_FILE_TIMEOUT_SECS),
        }
    }
}

impl WorkerConfig {
    pub fn from_section(ws: &WorkerSection) -> Self {
        Self {
            poll_interval: Duration::from_secs(ws.poll_interval_secs()),
            file_timeout: Duration::from_secs(ws.file_timeout_secs()),
        }
    }
}

/// Validates and stores a new job. It starts out pending and is picked up by
/// the next poll.
pub async fn submit_job(
    store: &dyn JobStore,
    user_id: &str,
    files: Vec<String>,
    options: JobOptions,
) -> Result<Uuid> {
    let job = BatchJob::new(user_id, files, options)?;
    store.create_job(job).await
}

/// Requests cancellation. A pending job never starts; a processing job stops
/// at its next file boundary. Returns `false` when the job is already
/// terminal.
pub async fn cancel_job(store: &dyn JobStore, job_id: Uuid) -> Result<bool> {
    store
        .update_job(
            job_id,
            &[JobStatus::Pending, JobStatus::Processing],
            JobPatch::status(JobStatus::Cancelled),
        )
        .await
}

/// Clones a finished job into a fresh pending one. The original record stays
/// as it ended.
pub async fn retry_job(store: &dyn JobStore, job_id: Uuid) -> Result<Uuid> {
    let job = store
        .get_job(job_id)
        .await?
        .ok_or_else(|| Error::Store(format!("no such job: {job_id}")))?;
    if !job.status.is_terminal() {
        return Err(Error::validation(format!(
            "job {job_id} has not finished; only finished jobs can be retried"
        )));
    }
    store.create_job(job.retried()).await
}

pub struct Worker {
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn FileStore>,
    gateway: TranslationGateway,
    cfg: WorkerConfig,
}

impl Worker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        files: Arc<dyn FileStore>,
        gateway: TranslationGateway,
        cfg: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            files,
            gateway,
            cfg,
        }
    }

    /// Polls until the shutdown signal flips to `true` (or its sender is
    /// dropped). Poll failures are logged and the loop keeps going.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_interval_secs = self.cfg.poll_interval.as_secs(),
            backend = self.gateway.backend_name(),
            "worker started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(true) => {}
                        Ok(false) => debug!("no pending jobs"),
                        Err(err) => error!(%err, "poll failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("worker stopped");
    }

    /// Claims and runs the oldest claimable pending job. Returns whether a
    /// job was processed.
    pub async fn poll_once(&self) -> Result<bool> {
        for job in self.jobs.list_pending().await? {
            let claimed = self
                .jobs
                .update_job(
                    job.id,
                    &[JobStatus::Pending],
                    JobPatch::status(JobStatus::Processing),
                )
                .await?;
            if !claimed {
                // Another worker or a cancel got there first.
                continue;
            }
            self.process_job(&job).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn process_job(&self, job: &BatchJob) -> Result<()> {
        info!(job_id = %job.id, files = job.files.len(), "processing job");
        let mut processed = 0usize;
        let mut failed = 0usize;

        for file_id in &job.files {
            if self.job_cancelled(job.id).await? {
                info!(job_id = %job.id, processed, "job cancelled; stopping at file boundary");
                return Ok(());
            }

            let outcome = match tokio::time::timeout(
                self.cfg.file_timeout,
                self.process_file(job, file_id),
            )
            .await
            {
                Ok(Ok(outcome)) => {
                    // Degraded files (some fragments untranslated) still
                    // count as processed; their note lands in error_details.
                    processed += 1;
                    debug!(job_id = %job.id, file_id, "file done");
                    outcome
                }
                Ok(Err(err)) => {
                    failed += 1;
                    warn!(job_id = %job.id, file_id, %err, "file failed");
                    FileOutcome::failed(file_id, err.to_string())
                }
                Err(_) => {
                    failed += 1;
                    let err = Error::Timeout(self.cfg.file_timeout.as_secs());
                    warn!(job_id = %job.id, file_id, %err, "file timed out");
                    FileOutcome::failed(file_id, err.to_string())
                }
            };

            // A cancel can land while a file is in flight; the finished
            // file's outcome is still recorded, the boundary check above
            // stops the rest.
            let patch = JobPatch {
                processed_files: Some(processed),
                failed_files: Some(failed),
                push_result: Some(outcome),
                ..JobPatch::default()
            };
            let applied = self
                .jobs
                .update_job(
                    job.id,
                    &[JobStatus::Processing, JobStatus::Cancelled],
                    patch,
                )
                .await?;
            if !applied {
                warn!(job_id = %job.id, "job left the processing state; abandoning");
                return Ok(());
            }
        }

        let status = if processed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let finalized = self
            .jobs
            .update_job(job.id, &[JobStatus::Processing], JobPatch::status(status))
            .await?;
        if finalized {
            info!(job_id = %job.id, ?status, processed, failed, "job finished");
        }
        Ok(())
    }

    async fn process_file(&self, job: &BatchJob, file_id: &str) -> Result<FileOutcome> {
        let original = self.files.read_original(&job.user_id, file_id).await?;
        let deck = translate_pptx_bytes(&self.gateway, &original, &job.options).await?;
        let path = self
            .files
            .write_result(&job.user_id, file_id, &deck.bytes)
            .await?;
        if deck.failed_fragments.is_empty() {
            Ok(FileOutcome::succeeded(file_id, path.display().to_string()))
        } else {
            Ok(FileOutcome::degraded(
                file_id,
                path.display().to_string(),
                fallback_note(&deck.failed_fragments),
            ))
        }
    }

    async fn job_cancelled(&self, job_id: Uuid) -> Result<bool> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::Store(format!("job {job_id} vanished mid-run")))?;
        Ok(job.status == JobStatus::Cancelled)
    }
}

/// Output of one deck run. Fragments listed in `failed_fragments` got no
/// acceptable translation after retries; the deck keeps their source text.
#[derive(Debug)]
pub struct TranslatedDeck {
    pub bytes: Vec<u8>,
    pub failed_fragments: Vec<usize>,
}

/// Runs one deck through the full pipeline: parse, translate every text run,
/// re-fit geometry and fonts, rewrite the package around the new text.
pub async fn translate_pptx_bytes(
    gateway: &TranslationGateway,
    original: &[u8],
    options: &JobOptions,
) -> Result<TranslatedDeck> {
    options.validate()?;
    let presentation = parse_pptx(original)?;
    if presentation.element_count() == 0 {
        return Err(Error::content("package has no text to translate"));
    }

    let mut elements: Vec<&TextElement> = Vec::new();
    let mut fragments: Vec<TranslationFragment> = Vec::new();
    for slide in &presentation.slides {
        for element in &slide.elements {
            fragments.push(TranslationFragment {
                fragment_id: elements.len(),
                source_text: element.text.clone(),
                source_lang: options.source_lang.clone(),
                target_lang: options.target_lang.clone(),
            });
            elements.push(element);
        }
    }
    debug!(
        slides = presentation.slides.len(),
        fragments = fragments.len(),
        "deck parsed"
    );

    let translated = gateway.translate_fragments(&fragments).await?;

    let mut updates: Vec<ElementUpdate> = Vec::with_capacity(elements.len());
    let mut failed_fragments: Vec<usize> = Vec::new();
    for (fragment_id, element) in elements.iter().enumerate() {
        // Absence from the map means the translation failed after retries;
        // the element keeps its source text and geometry untouched.
        let Some(text) = translated.get(&fragment_id) else {
            failed_fragments.push(fragment_id);
            continue;
        };
        updates.push(element_update(element, text, options)?);
    }
    if !failed_fragments.is_empty() {
        warn!(
            failed = failed_fragments.len(),
            total = fragments.len(),
            "fragments kept source text after failed translation"
        );
    }
    let bytes = write_translated_pptx(original, &updates)?;
    Ok(TranslatedDeck {
        bytes,
        failed_fragments,
    })
}

/// Note recorded on the job for a deck that kept source text somewhere.
fn fallback_note(failed: &[usize]) -> String {
    let ids = failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("fragments kept source text after failed translation: {ids}")
}

fn element_update(
    element: &TextElement,
    translated: &str,
    options: &JobOptions,
) -> Result<ElementUpdate> {
    let adjusted = adjust_text_element(
        element,
        &element.text,
        translated,
        &options.source_lang,
        &options.target_lang,
    )?;

    let mut update = ElementUpdate::for_node(element.node.clone());
    update.text = Some(translated.to_string());

    if options.preserve_formatting {
        // Geometry patches only where the slide carries the nodes to patch.
        if element.node.body_pr_event_index.is_some() && adjusted.position != element.position {
            update.insets = Some(insets_of(&adjusted.position));
        }
        if element.node.rpr_event_index.is_some() {
            if let Some(sz) = element.font_sz {
                let factor = text_scaling_factor(
                    &element.text,
                    translated,
                    &options.source_lang,
                    &options.target_lang,
                );
                update.font_sz = autofit_font_sz(sz, factor);
            }
        }
    }
    Ok(update)
}

fn insets_of(position: &Position) -> (i64, i64) {
    match (position.margin_left, position.margin_right) {
        (Some(left), Some(right)) => (left, right),
        _ => (position.margin, position.margin),
    }
}
