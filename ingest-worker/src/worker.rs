use std::sync::Arc;
use std::time::{Duration, Instant};

use alert_monitor::EventMonitor;
use chrono::Duration as ChronoDuration;
use database_layer::{AuditLogRepository, DatabaseError, InsertOutcome};
use error_common::ErrorKind;
use event_queue::{QueueJob, ReliableQueue};
use integrity_engine::{seal_event, DEFAULT_CLOCK_SKEW_TOLERANCE_SECS};
use logger_redacted::DataMasker;
use resilience::ResilientExecutor;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::metrics::WorkerMetrics;

/// Interval between empty claim polls.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between dead-letter depth checks.
const DEAD_LETTER_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Worker runtime options, sourced from the config core.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: u32,
    pub visibility_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub clock_skew_tolerance: ChronoDuration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            visibility_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            clock_skew_tolerance: ChronoDuration::seconds(DEFAULT_CLOCK_SKEW_TOLERANCE_SECS),
        }
    }
}

/// What happened to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Persisted,
    Duplicate,
    DeadLettered,
    Requeued,
}

/// The ingestion worker.
#[derive(Clone)]
pub struct IngestWorker {
    queue: ReliableQueue,
    repository: AuditLogRepository,
    executor: ResilientExecutor,
    monitor: Arc<EventMonitor>,
    metrics: Arc<WorkerMetrics>,
    masker: Arc<DataMasker>,
    options: WorkerOptions,
}

impl IngestWorker {
    pub fn new(
        queue: ReliableQueue,
        repository: AuditLogRepository,
        executor: ResilientExecutor,
        monitor: Arc<EventMonitor>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            repository,
            executor,
            monitor,
            metrics: Arc::new(WorkerMetrics::new()),
            masker: Arc::new(DataMasker::new()),
            options,
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Claim-and-process loop. Returns once `shutdown` signals and in-flight
    /// jobs have drained (or the shutdown timeout forces release).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency as usize));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut last_depth_check = Instant::now();

        info!(
            concurrency = self.options.concurrency,
            "ingestion worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Reap finished tasks without blocking.
            while in_flight.try_join_next().is_some() {}

            if last_depth_check.elapsed() >= DEAD_LETTER_CHECK_INTERVAL {
                last_depth_check = Instant::now();
                if let Ok(stats) = self.queue.stats().await {
                    if let Err(err) = self
                        .monitor
                        .observe_dead_letter_depth("platform", stats.dead_letter)
                        .await
                    {
                        warn!(error = %err, "dead-letter depth check failed");
                    }
                }
            }

            let free_slots = semaphore.available_permits() as u32;
            if free_slots == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            let jobs = match self
                .queue
                .claim(free_slots, self.options.visibility_timeout)
                .await
            {
                Ok(jobs) => jobs,
                Err(err) => {
                    error!(error = %err, "queue claim failed");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for job in jobs {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                let worker = self.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    worker.process_job(job).await;
                });
            }
        }

        info!("shutdown requested, draining in-flight jobs");
        let drain = async {
            while in_flight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.options.shutdown_timeout, drain)
            .await
            .is_err()
        {
            // Remaining jobs are force-released: abort the tasks; their
            // unacked claims expire and the queue re-delivers.
            warn!("shutdown timeout reached, aborting remaining jobs");
            in_flight.shutdown().await;
        }
        info!("ingestion worker stopped");
    }

    /// Process one claimed job through the full pipeline.
    pub async fn process_job(&self, job: QueueJob) -> JobOutcome {
        let started = Instant::now();
        self.metrics.record_received();
        let mut event = job.event.clone();

        // received → validated
        if let Err(err) = event.validate(self.options.clock_skew_tolerance) {
            debug!(job = %job.id, error = %err, "event failed validation");
            return self.to_dead_letter(&job, &format!("InvalidEvent: {}", err.message)).await;
        }

        // validated → hashed
        if let Err(err) = seal_event(&mut event) {
            return self.to_dead_letter(&job, &format!("InvalidEvent: {}", err.message)).await;
        }
        let hash = event.hash.clone().expect("event just sealed");
        let idempotency_key = job.idempotency_key.clone().unwrap_or_else(|| hash.clone());

        event.processing_latency_ms = Some(started.elapsed().as_millis() as i64);

        // hashed → persisted, through the resilient executor.
        let repository = self.repository.clone();
        let insert = self
            .executor
            .execute("audit-store:insert", || {
                let repository = repository.clone();
                let event = event.clone();
                let key = idempotency_key.clone();
                async move {
                    repository
                        .insert_event(&event, &key)
                        .await
                        .map_err(|e| match e {
                            DatabaseError::Conflict(msg) => {
                                error_common::AuditError::conflict(msg)
                            }
                            other => error_common::AuditError::from(other),
                        })
                }
            })
            .await;

        let outcome = match insert {
            Ok(InsertOutcome::Inserted(id)) => {
                debug!(job = %job.id, audit_log_id = id, "event persisted");
                if let Err(err) = self.monitor.observe(&event).await {
                    warn!(error = %err, "monitor observation failed");
                }
                JobOutcome::Persisted
            }
            Ok(InsertOutcome::Duplicate(id)) => {
                debug!(job = %job.id, audit_log_id = id, "duplicate delivery");
                JobOutcome::Duplicate
            }
            Err(err) if err.kind.dead_letters_immediately() => {
                return self.to_dead_letter(&job, &err.to_string()).await;
            }
            Err(err) if err.kind == ErrorKind::RetryExhausted => {
                return self.to_dead_letter(&job, &err.to_string()).await;
            }
            Err(err) => {
                // Transient infrastructure trouble: hand the job back.
                warn!(job = %job.id, error = %err, "persist failed, requeueing");
                self.metrics.record_failed();
                if let Err(nack_err) = self.queue.nack(job.id, &err.to_string()).await {
                    error!(job = %job.id, error = %nack_err, "nack failed");
                }
                return JobOutcome::Requeued;
            }
        };

        // persisted → acked
        if let Err(err) = self.queue.ack(job.id).await {
            error!(job = %job.id, error = %err, "ack failed");
        }
        self.metrics
            .record_processed(&event.action, started.elapsed().as_millis() as u64);
        outcome
    }

    async fn to_dead_letter(&self, job: &QueueJob, reason: &str) -> JobOutcome {
        self.metrics.record_failed();
        self.metrics.record_dead_lettered();
        // Dead-letter reasons are operator-visible; mask before storing.
        let reason = self.masker.mask_text(reason);
        if let Err(err) = self.queue.dead_letter(job.id, &reason).await {
            error!(job = %job.id, error = %err, "dead-letter move failed");
        }
        JobOutcome::DeadLettered
    }
}

#[cfg(test)]
mod tests {
    use alert_monitor::{AlertStore, MonitorConfig};
    use database_layer::{DatabasePool, EventFilter};
    use event_queue::QueueConfig;
    use integrity_engine::{verify_event, AuditEvent, EventStatus, VerificationStatus};
    use resilience::{CircuitBreakerConfig, RetryConfig};

    use super::*;

    async fn setup() -> (IngestWorker, ReliableQueue, AuditLogRepository, DatabasePool) {
        let db = DatabasePool::in_memory().await.unwrap();
        let queue = ReliableQueue::in_memory(QueueConfig::default()).await.unwrap();
        let repository = AuditLogRepository::new(db.clone());
        let monitor = Arc::new(EventMonitor::new(
            AlertStore::new(db.clone()),
            MonitorConfig::default(),
        ));
        let executor = ResilientExecutor::new(
            RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 5,
                max_delay_ms: 20,
                ..Default::default()
            },
            CircuitBreakerConfig::default(),
        );
        let worker = IngestWorker::new(
            queue.clone(),
            repository.clone(),
            executor,
            monitor,
            WorkerOptions::default(),
        );
        (worker, queue, repository, db)
    }

    async fn claim_one(queue: &ReliableQueue) -> QueueJob {
        queue
            .claim(1, Duration::from_secs(30))
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("job should be claimable")
    }

    #[tokio::test]
    async fn test_happy_path_ingest() {
        let (worker, queue, repository, _db) = setup().await;

        let event = AuditEvent::new("auth.login.success", EventStatus::Success)
            .with_principal("u1")
            .with_timestamp("2024-01-01T00:00:00Z".parse().unwrap());
        queue.enqueue(&event, None).await.unwrap();

        let outcome = worker.process_job(claim_one(&queue).await).await;
        assert_eq!(outcome, JobOutcome::Persisted);

        // Exactly one row, sealed and verifiable.
        let stored = repository
            .query(&EventFilter::for_principal("u1"))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(verify_event(&stored[0]).unwrap(), VerificationStatus::Ok);
        assert!(stored[0].processing_latency_ms.is_some());

        let metrics = worker.metrics().snapshot();
        assert_eq!(metrics.received, 1);
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn test_invalid_event_dead_letters() {
        let (worker, queue, repository, _db) = setup().await;

        let event = AuditEvent::new("", EventStatus::Success).with_principal("u1");
        queue.enqueue(&event, None).await.unwrap();

        let outcome = worker.process_job(claim_one(&queue).await).await;
        assert_eq!(outcome, JobOutcome::DeadLettered);

        assert!(repository
            .query(&EventFilter::for_principal("u1"))
            .await
            .unwrap()
            .is_empty());

        let dead = queue.dead_letter_jobs(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.starts_with("InvalidEvent"));
        assert_eq!(worker.metrics().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_future_timestamp_dead_letters() {
        let (worker, queue, _repo, _db) = setup().await;

        let event = AuditEvent::new("data.read", EventStatus::Success)
            .with_timestamp(chrono::Utc::now() + ChronoDuration::hours(1));
        queue.enqueue(&event, None).await.unwrap();

        let outcome = worker.process_job(claim_one(&queue).await).await;
        assert_eq!(outcome, JobOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_idempotent() {
        let (worker, queue, repository, _db) = setup().await;

        let event = AuditEvent::new("data.read", EventStatus::Success)
            .with_principal("u2")
            .with_timestamp("2024-01-01T00:00:00Z".parse().unwrap());

        queue.enqueue(&event, None).await.unwrap();
        let first = worker.process_job(claim_one(&queue).await).await;
        assert_eq!(first, JobOutcome::Persisted);

        // Same event delivered again (producer redelivery).
        queue.enqueue(&event, None).await.unwrap();
        let second = worker.process_job(claim_one(&queue).await).await;
        assert_eq!(second, JobOutcome::Duplicate);

        assert_eq!(
            repository
                .query(&EventFilter::for_principal("u2"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_conflicting_producer_key_dead_letters() {
        let (worker, queue, _repo, _db) = setup().await;

        let a = AuditEvent::new("data.read", EventStatus::Success)
            .with_timestamp("2024-01-01T00:00:00Z".parse().unwrap());
        let b = AuditEvent::new("data.write", EventStatus::Success)
            .with_timestamp("2024-01-02T00:00:00Z".parse().unwrap());

        queue.enqueue(&a, Some("producer:evt-1".to_string())).await.unwrap();
        assert_eq!(
            worker.process_job(claim_one(&queue).await).await,
            JobOutcome::Persisted
        );

        // Same producer key, different payload: human review required.
        queue.enqueue(&b, Some("producer:evt-1".to_string())).await.unwrap();
        assert_eq!(
            worker.process_job(claim_one(&queue).await).await,
            JobOutcome::DeadLettered
        );
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_shuts_down() {
        let (worker, queue, repository, _db) = setup().await;

        for i in 0..5 {
            let event = AuditEvent::new("data.read", EventStatus::Success)
                .with_principal(format!("bulk-{i}"));
            queue.enqueue(&event, None).await.unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        };

        // Give the loop time to drain the queue, then stop it.
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop before the timeout")
            .unwrap();

        let stored = repository.query(&EventFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(queue.stats().await.unwrap().ready, 0);
    }

    #[tokio::test]
    async fn test_monitor_alerts_on_repeated_failures() {
        let (worker, queue, _repo, _db) = setup().await;

        for i in 0..5 {
            let event = AuditEvent::new("auth.login.failure", EventStatus::Failure)
                .with_principal("attacker")
                .with_organization("org-1")
                .with_outcome(format!("bad password attempt {i}"));
            queue.enqueue(&event, None).await.unwrap();
            worker.process_job(claim_one(&queue).await).await;
        }

        // Five failures within the window raised a SECURITY alert.
        let store = AlertStore::new(_db.clone());
        let active = store.get_active_alerts("org-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(worker.metrics().snapshot().processed, 5);
    }
}
