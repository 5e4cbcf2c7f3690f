//! Chapter audio job scheduling — persistent, cancellable, crash-recoverable.
//!
//! One job per (book, chapter) pair. The persisted record is the durable
//! source of truth and survives restart; the in-process cancellation flag
//! does not. Jobs across distinct keys run as independent tasks; within one
//! job, synthesis chunks are strictly sequential because the backend has no
//! sequence numbering and arrival order is assembly order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};

use folio_core::text::{JOB_CHUNK_LEN, segment};
use folio_core::types::{ChapterAudioJob, JobStatus};

use crate::assemble::AudioWriter;
use crate::error::{JobError, SynthError};
use crate::synth::Synthesizer;

fn job_key(book_id: &str, chapter: u32) -> String {
    format!("{book_id}/{chapter}")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ─── Persisted store ───────────────────────────────────────────────────────

/// File-backed job records with an in-memory read cache.
///
/// Reads hit the cache concurrently; every mutation goes through one
/// serialized write path (each write waits for the previous write's fs flush)
/// so concurrent job completions cannot clobber each other's JSON.
pub struct JobStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, ChapterAudioJob>>,
    write_gate: AsyncMutex<()>,
}

impl JobStore {
    /// Load existing records from disk. A record still `running` from a
    /// crashed process is surfaced as-is until re-enqueued.
    pub fn load(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let cache = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("job store unreadable, starting empty: {e}");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            cache: RwLock::new(cache),
            write_gate: AsyncMutex::new(()),
        })
    }

    pub async fn get(&self, book_id: &str, chapter: u32) -> Option<ChapterAudioJob> {
        self.cache.read().await.get(&job_key(book_id, chapter)).cloned()
    }

    /// Insert or replace a record and flush the store to disk.
    pub async fn put(&self, job: ChapterAudioJob) -> std::io::Result<ChapterAudioJob> {
        let _gate = self.write_gate.lock().await;

        let snapshot = {
            let mut cache = self.cache.write().await;
            cache.insert(job_key(&job.book_id, job.chapter), job.clone());
            cache.clone()
        };

        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(job)
    }
}

// ─── Scheduler ─────────────────────────────────────────────────────────────

enum RunOutcome {
    Completed(String),
    Canceled,
}

/// Process-wide scheduler owning the persisted store and the in-memory
/// cancellation-flag table. Created once at process start; cloneable handle.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: JobStore,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
    /// Serializes the check-then-queue step so concurrent enqueues of one key
    /// cannot both schedule a runner.
    enqueue_gate: AsyncMutex<()>,
    synth: Arc<dyn Synthesizer>,
    writer: Arc<dyn AudioWriter>,
    data_dir: PathBuf,
}

impl JobScheduler {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        synth: Arc<dyn Synthesizer>,
        writer: Arc<dyn AudioWriter>,
    ) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let store = JobStore::load(data_dir.join("jobs.json"))?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                cancel_flags: Mutex::new(HashMap::new()),
                enqueue_gate: AsyncMutex::new(()),
                synth,
                writer,
                data_dir,
            }),
        })
    }

    /// Where the excluded book store keeps a chapter's narration text.
    pub fn narration_path(&self, book_id: &str, chapter: u32) -> PathBuf {
        self.inner
            .data_dir
            .join("books")
            .join(book_id)
            .join("chapters")
            .join(format!("{chapter}.txt"))
    }

    /// Request audio generation for one chapter.
    ///
    /// Preconditions fail before any state mutation. If the current record is
    /// already queued or running the existing record is returned unchanged;
    /// otherwise the record resets to queued and a runner task is scheduled
    /// without blocking the caller.
    pub async fn enqueue(
        &self,
        book_id: &str,
        chapter: u32,
        voice: Option<String>,
    ) -> Result<ChapterAudioJob, JobError> {
        if chapter == 0 {
            return Err(JobError::InvalidChapter(chapter));
        }
        let narration = self.narration_path(book_id, chapter);
        if !narration.is_file() {
            return Err(JobError::NarrationMissing(narration));
        }

        let _gate = self.inner.enqueue_gate.lock().await;

        if let Some(existing) = self.inner.store.get(book_id, chapter).await {
            if existing.status.is_active() {
                debug!("enqueue {book_id}/{chapter}: job already active, returning it");
                return Ok(existing);
            }
        }

        let mut job = ChapterAudioJob::new(book_id, chapter, JobStatus::Queued);
        job.updated_at = Some(unix_now());
        let job = self.inner.store.put(job).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner
            .cancel_flags
            .lock()
            .unwrap()
            .insert(job_key(book_id, chapter), cancel.clone());

        info!("job queued: {book_id} chapter {chapter}");

        let scheduler = self.clone();
        let book = book_id.to_string();
        tokio::spawn(async move {
            scheduler.run_job(&book, chapter, voice, cancel).await;
        });

        Ok(job)
    }

    /// Current persisted record, if any.
    pub async fn status(&self, book_id: &str, chapter: u32) -> Option<ChapterAudioJob> {
        self.inner.store.get(book_id, chapter).await
    }

    /// Mark a job canceled. Sets the in-memory flag when a runner is active
    /// and unconditionally writes the record as canceled — a declarative
    /// "don't run" marker, so this succeeds even with nothing in flight. The
    /// runner stops cooperatively at the next chunk boundary.
    pub async fn cancel(&self, book_id: &str, chapter: u32) -> Result<ChapterAudioJob, JobError> {
        if let Some(flag) = self
            .inner
            .cancel_flags
            .lock()
            .unwrap()
            .get(&job_key(book_id, chapter))
        {
            flag.store(true, Ordering::SeqCst);
        }

        let mut job = self
            .inner
            .store
            .get(book_id, chapter)
            .await
            .unwrap_or_else(|| ChapterAudioJob::new(book_id, chapter, JobStatus::Canceled));
        job.status = JobStatus::Canceled;
        job.error = None;
        job.updated_at = Some(unix_now());

        info!("job canceled: {book_id} chapter {chapter}");
        Ok(self.inner.store.put(job).await?)
    }

    // ── Runner ────────────────────────────────────────────────────────

    /// Everything inside is caught and converted into a status write; a job
    /// is never left `running` and never crashes the process.
    async fn run_job(
        &self,
        book_id: &str,
        chapter: u32,
        voice: Option<String>,
        cancel: Arc<AtomicBool>,
    ) {
        match self
            .run_job_inner(book_id, chapter, voice.as_deref(), &cancel)
            .await
        {
            Ok(RunOutcome::Completed(url)) => {
                info!("job completed: {book_id} chapter {chapter} -> {url}");
                self.finish(book_id, chapter, JobStatus::Completed, None, Some(url))
                    .await;
            }
            Ok(RunOutcome::Canceled) => {
                info!("job stopped at cancellation point: {book_id} chapter {chapter}");
                self.finish(book_id, chapter, JobStatus::Canceled, None, None)
                    .await;
            }
            Err(e) if cancel.load(Ordering::SeqCst) => {
                // Cancellation raced an in-flight chunk; the cancel marker wins.
                debug!("job error after cancel, keeping canceled: {e}");
                self.finish(book_id, chapter, JobStatus::Canceled, None, None)
                    .await;
            }
            Err(e) => {
                error!("job failed: {book_id} chapter {chapter}: {e}");
                self.finish(book_id, chapter, JobStatus::Failed, Some(e.to_string()), None)
                    .await;
            }
        }

        self.inner
            .cancel_flags
            .lock()
            .unwrap()
            .remove(&job_key(book_id, chapter));
    }

    async fn run_job_inner(
        &self,
        book_id: &str,
        chapter: u32,
        voice: Option<&str>,
        cancel: &AtomicBool,
    ) -> Result<RunOutcome, JobError> {
        if cancel.load(Ordering::SeqCst) {
            return Ok(RunOutcome::Canceled);
        }

        self.mark_running(book_id, chapter).await?;

        if self.inner.writer.output_exists(book_id, chapter) {
            debug!("{book_id}/{chapter}: audio already on disk, skipping synthesis");
            return Ok(RunOutcome::Completed(
                self.inner.writer.audio_url(book_id, chapter),
            ));
        }

        let narration_path = self.narration_path(book_id, chapter);
        let text = std::fs::read_to_string(&narration_path)
            .map_err(|_| JobError::NarrationMissing(narration_path))?;

        let chunks = segment(&text, 0, JOB_CHUNK_LEN);
        debug!("{book_id}/{chapter}: {} chunks to synthesize", chunks.len());

        let mut samples: Vec<i16> = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(RunOutcome::Canceled);
            }
            let audio = self.inner.synth.synthesize(&chunk.text, voice).await?;
            if audio.is_empty() {
                return Err(SynthError::NoAudio.into());
            }
            debug!("{book_id}/{chapter}: chunk {index} done, {} samples", audio.len());
            samples.extend(audio);
        }

        if samples.is_empty() {
            return Err(SynthError::NoAudio.into());
        }

        // Last boundary check: a cancel that raced the final chunk still wins
        // before anything is assembled.
        if cancel.load(Ordering::SeqCst) {
            return Ok(RunOutcome::Canceled);
        }

        let url = self.inner.writer.write(book_id, chapter, &samples).await?;
        Ok(RunOutcome::Completed(url))
    }

    async fn mark_running(&self, book_id: &str, chapter: u32) -> Result<(), JobError> {
        let mut job = self
            .inner
            .store
            .get(book_id, chapter)
            .await
            .unwrap_or_else(|| ChapterAudioJob::new(book_id, chapter, JobStatus::Running));
        job.status = JobStatus::Running;
        job.started_at = Some(unix_now());
        job.updated_at = Some(unix_now());
        job.error = None;
        job.audio_url = None;
        self.inner.store.put(job).await?;
        Ok(())
    }

    async fn finish(
        &self,
        book_id: &str,
        chapter: u32,
        status: JobStatus,
        error: Option<String>,
        audio_url: Option<String>,
    ) {
        let mut job = self
            .inner
            .store
            .get(book_id, chapter)
            .await
            .unwrap_or_else(|| ChapterAudioJob::new(book_id, chapter, status));
        job.status = status;
        job.error = error;
        job.audio_url = audio_url;
        job.updated_at = Some(unix_now());

        if let Err(e) = self.inner.store.put(job).await {
            error!("failed to persist job status for {book_id}/{chapter}: {e}");
        }
    }
}
