//! Job executor.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vsum_models::RecordId;
use vsum_queue::{JobQueue, ProcessVideoJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{RunOutcome, VideoPipeline};

/// Record ids with a run in progress on this worker.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    records: Arc<Mutex<HashSet<RecordId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `record_id` as running. `None` if it already is.
    pub fn try_acquire(&self, record_id: &RecordId) -> Option<InFlightGuard> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        if !records.insert(record_id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            records: Arc::clone(&self.records),
            record_id: record_id.clone(),
        })
    }

    pub fn contains(&self, record_id: &RecordId) -> bool {
        self.records
            .lock()
            .map(|r| r.contains(record_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the record from the in-flight set when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    records: Arc<Mutex<HashSet<RecordId>>>,
    record_id: RecordId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.remove(&self.record_id);
    }
}

/// Periodic task that keeps a running job's pending entry fresh.
///
/// The task is aborted when the value is dropped.
#[derive(Debug)]
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Call `beat` every `period`, starting one period from now.
    pub fn spawn<F, Fut>(period: Duration, mut beat: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            );
            loop {
                interval.tick().await;
                beat().await;
            }
        });
        Self { task }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything a spawned job needs besides its message.
#[derive(Clone)]
struct JobContext {
    pipeline: Arc<VideoPipeline>,
    queue: Arc<JobQueue>,
    in_flight: InFlight,
    consumer_name: String,
    heartbeat_interval: Duration,
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: Arc<VideoPipeline>,
    job_semaphore: Arc<Semaphore>,
    in_flight: InFlight,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, pipeline: Arc<VideoPipeline>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            pipeline,
            job_semaphore,
            in_flight: InFlight::new(),
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            pipeline: Arc::clone(&self.pipeline),
            queue: Arc::clone(&self.queue),
            in_flight: self.in_flight.clone(),
            consumer_name: self.consumer_name.clone(),
            heartbeat_interval: self.config.job_heartbeat_interval,
        }
    }

    /// Start the executor. Returns after [`JobExecutor::shutdown`] once
    /// in-flight runs have finished or the shutdown timeout has passed.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = tokio::spawn(self.claim_loop());

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout reached with {} run(s) still in flight",
                self.in_flight.len()
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically reclaim jobs left pending by crashed consumers.
    fn claim_loop(&self) -> impl Future<Output = ()> + Send + 'static {
        let ctx = self.job_context();
        let semaphore = Arc::clone(&self.job_semaphore);
        let interval_period = self.config.claim_interval;
        let min_idle = self.config.claim_min_idle;
        let mut shutdown_rx = self.shutdown.subscribe();

        async move {
            let mut interval = tokio::time::interval(interval_period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match ctx.queue.claim_pending(&ctx.consumer_name, min_idle, available.min(5)).await {
                            Ok(jobs) => {
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    Self::spawn_job(permit, ctx.clone(), message_id, job);
                                }
                            }
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        }
    }

    /// Consume and process jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;

            Self::spawn_job(permit, self.job_context(), message_id, job);
        }

        Ok(())
    }

    fn spawn_job(
        permit: OwnedSemaphorePermit,
        ctx: JobContext,
        message_id: String,
        job: ProcessVideoJob,
    ) {
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_job(ctx, message_id, job).await;
        });
    }

    /// Refresh the job's pending entry for as long as the run lasts, so
    /// other workers never see a live run as orphaned.
    fn start_heartbeat(ctx: &JobContext, message_id: &str) -> Heartbeat {
        let queue = Arc::clone(&ctx.queue);
        let consumer_name = ctx.consumer_name.clone();
        let message_id = message_id.to_string();

        Heartbeat::spawn(ctx.heartbeat_interval, move || {
            let queue = Arc::clone(&queue);
            let consumer_name = consumer_name.clone();
            let message_id = message_id.clone();
            async move {
                match queue.touch(&consumer_name, &message_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Job entry {} is no longer pending", message_id),
                    Err(e) => warn!("Heartbeat for job entry {} failed: {}", message_id, e),
                }
            }
        })
    }

    /// Run one delivered job.
    ///
    /// The message is acked whatever the outcome: stage failures are
    /// terminal and retry is user-driven. Only a failure to load the record
    /// leaves the message pending for a later claim.
    async fn execute_job(ctx: JobContext, message_id: String, job: ProcessVideoJob) {
        let queue = &ctx.queue;
        let Some(_guard) = ctx.in_flight.try_acquire(&job.record_id) else {
            metrics::record_duplicate_delivery();
            warn!(
                record_id = %job.record_id,
                "Run already in flight, dropping duplicate delivery {}", message_id
            );
            if let Err(e) = queue.ack(&message_id).await {
                error!("Failed to ack duplicate delivery {}: {}", message_id, e);
            }
            return;
        };

        info!(record_id = %job.record_id, "Executing job {}", job.job_id);

        let heartbeat = Self::start_heartbeat(&ctx, &message_id);
        let result = ctx.pipeline.run(&job.record_id, Some(&job.job_id)).await;
        drop(heartbeat);

        match result {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Skipped { status } => info!(
                        record_id = %job.record_id,
                        "Job {} skipped, record is {}", job.job_id, status
                    ),
                    other => info!(
                        record_id = %job.record_id,
                        "Job {} finished as {}", job.job_id, other.label()
                    ),
                }
                Self::finish(queue, &message_id, &job).await;
            }
            Err(WorkerError::RecordNotFound(id)) => {
                warn!("Job {} refers to unknown record {}", job.job_id, id);
                Self::finish(queue, &message_id, &job).await;
            }
            Err(e) => {
                error!(
                    record_id = %job.record_id,
                    "Job {} could not start, leaving it pending: {}", job.job_id, e
                );
            }
        }
    }

    async fn finish(queue: &JobQueue, message_id: &str, job: &ProcessVideoJob) {
        if let Err(e) = queue.ack(message_id).await {
            error!("Failed to ack job {}: {}", job.job_id, e);
        }
        if let Err(e) = queue.clear_dedup(&job.record_id).await {
            warn!("Failed to clear dedup key for job {}: {}", job.job_id, e);
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Handle for signalling shutdown from another task.
    pub fn shutdown_handle(&self) -> tokio::sync::watch::Sender<bool> {
        self.shutdown.clone()
    }
}
