//! Queue processor: batch runs, the stale-processing sweep, and the poll loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use bidwise_core::{
    defaults, AiAnalysisStatus, AnalysisBackend, EnqueueRequest, Error, FileRecordRepository,
    ObjectStore, QueueItem, QueueRepository, QueueStats, Result,
};
use bidwise_db::Database;

use crate::pipeline::{AnalysisPipeline, JobOutcome, PipelineLimits};
use crate::retry::{apply_failure, with_timeout, RetryDecision};

/// Error recorded on items recovered by the stale-processing sweep.
pub const LEASE_EXPIRED: &str = "processing lease expired";

/// Headroom kept between the longest attempt and the processing lease.
pub const LEASE_MARGIN: Duration = Duration::from_secs(60);

/// Configuration for the queue processor.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether the background poll loop runs.
    pub enabled: bool,
    /// Items dequeued per batch.
    pub batch_size: usize,
    /// Items analysed at once within a batch.
    pub max_concurrent: usize,
    /// Sleep between polls when a batch found nothing to claim.
    pub poll_interval_ms: u64,
    /// `processing` items older than this are swept. Always longer than
    /// [`PipelineLimits::worst_case_attempt`].
    pub stale_after: Duration,
    /// Terminal items kept by the poll loop's cleanup; `None` disables it.
    pub cleanup_keep: Option<i64>,
    /// Per-step timeouts and persist retry policy.
    pub limits: PipelineLimits,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: defaults::DEQUEUE_BATCH_SIZE,
            max_concurrent: defaults::QUEUE_MAX_CONCURRENT,
            poll_interval_ms: defaults::QUEUE_POLL_INTERVAL_MS,
            stale_after: Duration::from_secs(defaults::STALE_PROCESSING_SECS),
            cleanup_keep: Some(defaults::QUEUE_CLEANUP_KEEP),
            limits: PipelineLimits::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ANALYSIS_WORKER_ENABLED` | `true` | Run the background poll loop |
    /// | `ANALYSIS_BATCH_SIZE` | `5` | Items dequeued per batch |
    /// | `ANALYSIS_MAX_CONCURRENT` | `5` | Concurrent analyses per batch |
    /// | `ANALYSIS_POLL_INTERVAL_MS` | `30000` | Poll interval when idle |
    /// | `ANALYSIS_TIMEOUT_SECS` | `120` | Analysis service timeout |
    /// | `DOWNLOAD_TIMEOUT_SECS` | `30` | Object store download timeout |
    /// | `STORE_TIMEOUT_SECS` | `10` | Metadata store write timeout |
    /// | `ANALYSIS_STALE_AFTER_SECS` | `900` | Processing lease |
    /// | `PERSIST_RETRIES` | `3` | Write attempts after a successful analysis |
    pub fn from_env() -> Self {
        let d = Self::default();

        let enabled = std::env::var("ANALYSIS_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let limits = PipelineLimits {
            download_timeout: env_parse("DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.limits.download_timeout),
            analysis_timeout: env_parse("ANALYSIS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.limits.analysis_timeout),
            store_timeout: env_parse("STORE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.limits.store_timeout),
            persist_retries: env_parse::<u32>("PERSIST_RETRIES")
                .unwrap_or(d.limits.persist_retries)
                .max(1),
            persist_backoff: d.limits.persist_backoff,
        };

        Self {
            enabled,
            batch_size: env_parse::<usize>("ANALYSIS_BATCH_SIZE")
                .unwrap_or(d.batch_size)
                .max(1),
            max_concurrent: env_parse::<usize>("ANALYSIS_MAX_CONCURRENT")
                .unwrap_or(d.max_concurrent)
                .max(1),
            poll_interval_ms: env_parse("ANALYSIS_POLL_INTERVAL_MS").unwrap_or(d.poll_interval_ms),
            stale_after: env_parse("ANALYSIS_STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.stale_after),
            cleanup_keep: d.cleanup_keep,
            limits,
        }
        .enforce_lease()
    }

    /// Set items dequeued per batch.
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Set concurrent analyses per batch.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the processing lease. Raised if a live attempt could outlast it.
    pub fn with_stale_after(mut self, lease: Duration) -> Self {
        self.stale_after = lease;
        self.enforce_lease()
    }

    /// Set pipeline timeouts and persist policy. Raises the lease if needed.
    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self.enforce_lease()
    }

    /// Keep the lease above the longest attempt, so the sweep never
    /// recovers an item whose worker is still running.
    fn enforce_lease(mut self) -> Self {
        let worst = self.limits.worst_case_attempt();
        if self.stale_after <= worst {
            let raised = worst.saturating_add(LEASE_MARGIN);
            warn!(
                subsystem = "jobs",
                component = "worker",
                requested_secs = self.stale_after.as_secs(),
                worst_case_attempt_secs = worst.as_secs(),
                stale_after_secs = raised.as_secs(),
                "Processing lease shorter than the longest attempt, raising it"
            );
            self.stale_after = raised;
        }
        self
    }

    /// Enable or disable the poll loop.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set how many terminal items the poll loop keeps.
    pub fn with_cleanup_keep(mut self, keep: Option<i64>) -> Self {
        self.cleanup_keep = keep;
        self
    }
}

/// Counts from one `process_queue` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    /// Items returned by the dequeue.
    pub dequeued: usize,
    /// Items this run claimed.
    pub claimed: usize,
    /// Dequeued items another worker claimed first.
    pub skipped: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Stale `processing` items recovered by the sweep.
    pub reaped: usize,
    /// Analyses whose outcome could not be written.
    pub persist_errors: usize,
}

impl ProcessSummary {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed(_) => self.completed += 1,
            JobOutcome::Requeued(_) => self.requeued += 1,
            JobOutcome::Failed(_) => self.failed += 1,
            JobOutcome::PersistFailed(_) => self.persist_errors += 1,
            JobOutcome::LeaseLost => {}
        }
    }
}

/// Event emitted by the queue processor.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// An item was claimed and its attempt started.
    JobStarted { queue_item_id: Uuid, file_id: Uuid },
    /// An item completed.
    JobCompleted {
        queue_item_id: Uuid,
        file_id: Uuid,
        confidence: f64,
    },
    /// An attempt failed and the item was requeued.
    JobRequeued {
        queue_item_id: Uuid,
        file_id: Uuid,
        error: String,
    },
    /// An item failed terminally.
    JobFailed {
        queue_item_id: Uuid,
        file_id: Uuid,
        error: String,
    },
    /// A batch run finished.
    BatchProcessed(ProcessSummary),
    /// Poll loop started.
    WorkerStarted,
    /// Poll loop stopped.
    WorkerStopped,
}

/// Handle for controlling a running poll loop.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the poll loop to stop after the current batch.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Drives the analysis queue: enqueue, batch processing, sweep, poll loop.
///
/// Clones share stores, backend and event bus.
#[derive(Clone)]
pub struct QueueProcessor {
    pipeline: AnalysisPipeline,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueProcessor {
    /// Create a processor over injected stores and analysis backend.
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        files: Arc<dyn FileRecordRepository>,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn AnalysisBackend>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let pipeline = AnalysisPipeline::new(queue, files, store, backend, config.limits.clone());
        Self {
            pipeline,
            config,
            event_tx,
        }
    }

    /// Create a processor backed by PostgreSQL repositories.
    pub fn from_database(
        db: &Database,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn AnalysisBackend>,
        config: WorkerConfig,
    ) -> Self {
        let db = db.clone();
        Self::new(
            Arc::new(db.queue),
            Arc::new(db.files),
            store,
            backend,
            config,
        )
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Queue a file for analysis.
    ///
    /// Fails with `FileNotFound` for an unknown file and `AlreadyQueued` when
    /// the file already has a queued or processing item.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<QueueItem> {
        let file_id = req.file_id;
        if self.pipeline.files.get(file_id).await?.is_none() {
            return Err(Error::FileNotFound(file_id));
        }

        let item = self
            .pipeline
            .queue
            .enqueue_deduplicated(req)
            .await?
            .ok_or(Error::AlreadyQueued(file_id))?;

        self.pipeline
            .files
            .set_analysis_status(file_id, AiAnalysisStatus::Pending)
            .await?;

        info!(
            subsystem = "jobs",
            component = "queue",
            op = "enqueue",
            queue_item_id = %item.id,
            file_id = %file_id,
            analysis_type = %item.analysis_type,
            priority = item.priority,
            "Queued file for analysis"
        );
        Ok(item)
    }

    /// Run one batch: sweep stale items, dequeue, claim, analyse concurrently.
    ///
    /// Safe to call from several processes at once; the atomic claim keeps
    /// each item to one worker.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "processor"))]
    pub async fn process_queue(&self) -> Result<ProcessSummary> {
        let start = Instant::now();
        let mut summary = ProcessSummary::default();

        self.sweep_stale(&mut summary).await;

        let items = self.pipeline.queue.dequeue(self.config.batch_size).await?;
        summary.dequeued = items.len();

        let max_concurrent = self.config.max_concurrent.max(1);
        let mut tasks = JoinSet::new();

        for item in items {
            while tasks.len() >= max_concurrent {
                self.join_one(&mut tasks, &mut summary).await;
            }

            let claimed = match self.pipeline.queue.claim(item.id).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    debug!(queue_item_id = %item.id, "Item claimed elsewhere, skipping");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(queue_item_id = %item.id, error = %e, "Claim failed, skipping");
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.claimed += 1;

            let projection = self
                .pipeline
                .files
                .set_analysis_status(claimed.file_id, AiAnalysisStatus::Processing);
            match with_timeout(self.config.limits.store_timeout, "file status update", projection)
                .await
            {
                Ok(()) | Err(Error::FileNotFound(_)) => {}
                Err(e) => warn!(
                    queue_item_id = %claimed.id,
                    error = %e,
                    "Failed to mark file processing"
                ),
            }

            let _ = self.event_tx.send(WorkerEvent::JobStarted {
                queue_item_id: claimed.id,
                file_id: claimed.file_id,
            });

            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let ids = (claimed.id, claimed.file_id);
                (ids, pipeline.run(claimed).await)
            });
        }

        while !tasks.is_empty() {
            self.join_one(&mut tasks, &mut summary).await;
        }

        if summary.dequeued > 0 || summary.reaped > 0 {
            info!(
                dequeued = summary.dequeued,
                claimed = summary.claimed,
                skipped = summary.skipped,
                completed = summary.completed,
                requeued = summary.requeued,
                failed = summary.failed,
                reaped = summary.reaped,
                persist_errors = summary.persist_errors,
                duration_ms = start.elapsed().as_millis() as u64,
                "Processed analysis batch"
            );
        }
        let _ = self
            .event_tx
            .send(WorkerEvent::BatchProcessed(summary.clone()));
        Ok(summary)
    }

    async fn join_one(
        &self,
        tasks: &mut JoinSet<((Uuid, Uuid), JobOutcome)>,
        summary: &mut ProcessSummary,
    ) {
        match tasks.join_next().await {
            Some(Ok(((queue_item_id, file_id), outcome))) => {
                summary.record(&outcome);
                self.emit_outcome(queue_item_id, file_id, outcome);
            }
            Some(Err(e)) => {
                // Item stays processing until the sweep picks it up.
                error!(error = ?e, "Analysis task panicked");
            }
            None => {}
        }
    }

    fn emit_outcome(&self, queue_item_id: Uuid, file_id: Uuid, outcome: JobOutcome) {
        let event = match outcome {
            JobOutcome::Completed(result) => WorkerEvent::JobCompleted {
                queue_item_id,
                file_id,
                confidence: result.confidence_score,
            },
            JobOutcome::Requeued(error) => WorkerEvent::JobRequeued {
                queue_item_id,
                file_id,
                error,
            },
            JobOutcome::Failed(error) => WorkerEvent::JobFailed {
                queue_item_id,
                file_id,
                error,
            },
            JobOutcome::PersistFailed(_) | JobOutcome::LeaseLost => return,
        };
        let _ = self.event_tx.send(event);
    }

    /// Route `processing` items past their lease through the retry controller.
    async fn sweep_stale(&self, summary: &mut ProcessSummary) {
        let lease = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(defaults::STALE_PROCESSING_SECS as i64));
        let cutoff = Utc::now() - lease;

        let stale = match self.pipeline.queue.list_stale(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "Stale sweep lookup failed");
                return;
            }
        };

        for item in stale {
            let applied = apply_failure(
                self.pipeline.queue.as_ref(),
                self.pipeline.files.as_ref(),
                &item,
                LEASE_EXPIRED,
                self.config.limits.store_timeout,
            )
            .await;

            match applied {
                Ok(Some(decision)) => {
                    summary.reaped += 1;
                    warn!(
                        queue_item_id = %item.id,
                        file_id = %item.file_id,
                        attempts = item.attempts,
                        started_at = ?item.started_at,
                        requeued = decision == RetryDecision::Requeue,
                        "Recovered stale processing item"
                    );
                    let event = match decision {
                        RetryDecision::Requeue => WorkerEvent::JobRequeued {
                            queue_item_id: item.id,
                            file_id: item.file_id,
                            error: LEASE_EXPIRED.to_string(),
                        },
                        RetryDecision::Fail => WorkerEvent::JobFailed {
                            queue_item_id: item.id,
                            file_id: item.file_id,
                            error: LEASE_EXPIRED.to_string(),
                        },
                    };
                    let _ = self.event_tx.send(event);
                }
                Ok(None) => {}
                Err(e) => {
                    summary.persist_errors += 1;
                    error!(queue_item_id = %item.id, error = %e, "Failed to recover stale item");
                }
            }
        }
    }

    /// Queue counts by status.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.pipeline.queue.stats().await
    }

    /// Delete the oldest terminal items beyond `keep_count`.
    pub async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let deleted = self.pipeline.queue.cleanup(keep_count).await?;
        if deleted > 0 {
            info!(
                subsystem = "jobs",
                component = "queue",
                op = "cleanup",
                deleted,
                keep_count,
                "Removed old terminal queue items"
            );
        }
        Ok(deleted)
    }

    /// Start the poll loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Poll loop: run batches back to back while they find work, sleep
    /// `poll_interval_ms` otherwise.
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", "Analysis worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            batch_size = self.config.batch_size,
            max_concurrent = self.config.max_concurrent,
            poll_interval_ms = self.config.poll_interval_ms,
            model = self.pipeline.backend.model_name(),
            "Analysis worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "jobs", "Analysis worker received shutdown signal");
                break;
            }

            let found_work = match self.process_queue().await {
                Ok(summary) => summary.claimed > 0,
                Err(e) => {
                    error!(subsystem = "jobs", error = %e, "Batch run failed");
                    false
                }
            };

            if !found_work {
                if let Some(keep) = self.config.cleanup_keep {
                    if let Err(e) = self.cleanup(keep).await {
                        warn!(subsystem = "jobs", error = %e, "Queue cleanup failed");
                    }
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subsystem = "jobs", "Analysis worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", "Analysis worker stopped");
    }
}
