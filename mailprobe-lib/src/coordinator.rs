//! Job coordination: start, poll, cancel, and collect bulk validation runs.
//!
//! A [`JobCoordinator`] owns every job it starts. Starting a job cleans and
//! deduplicates the input, sizes a worker pool, and spawns a collector task
//! that files each result under its input index. Callers poll for a
//! [`ProgressSnapshot`] at any time and receive the final
//! [`ValidationReport`] once every domain has a result.

use crate::cache::DnsCache;
use crate::concurrent::{worker_count, CancellationFlag, WorkerPool};
use crate::error::MailProbeError;
use crate::pipeline::Validator;
use crate::progress::ProgressTracker;
use crate::protocols::dns::{DnsTransport, HickoryTransport};
use crate::protocols::smtp::{SmtpConnector, TcpConnector};
use crate::types::{
    CacheScope, Category, JobId, JobStatus, ProbeConfig, ProgressSnapshot, ReportSummary,
    ValidationReport, ValidationResult,
};
use crate::utils::{normalize_domain, prepare_domains};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

type Slots = Arc<Mutex<Vec<Option<ValidationResult>>>>;

/// Returned by [`JobCoordinator::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: JobId,
    /// Unique domains in the job
    pub total: usize,
    /// Workers assigned to the job
    pub workers: usize,
    /// Rough (best, worst) completion time, `n / 2w` to `n / w` seconds
    pub estimated: (Duration, Duration),
}

struct Job {
    domains: Vec<String>,
    cancel: CancellationFlag,
    tracker: Arc<ProgressTracker>,
    slots: Slots,
    report: watch::Receiver<Option<Arc<ValidationReport>>>,
    cache: Arc<DnsCache>,
}

impl Job {
    fn report(&self) -> Option<Arc<ValidationReport>> {
        self.report.borrow().clone()
    }
}

/// Runs and tracks bulk validation jobs.
pub struct JobCoordinator {
    config: ProbeConfig,
    transport: Arc<dyn DnsTransport>,
    connector: Arc<dyn SmtpConnector>,
    shared_cache: Arc<DnsCache>,
    jobs: DashMap<JobId, Arc<Job>>,
}

impl JobCoordinator {
    /// Create a coordinator that talks to real DNS servers and mail hosts.
    pub fn new(config: ProbeConfig) -> Result<Self, MailProbeError> {
        config.validate()?;
        let transport = HickoryTransport::new(&config.dns_servers, config.dns_timeout)?;
        Ok(Self::with_transports(
            config,
            Arc::new(transport),
            Arc::new(TcpConnector),
        ))
    }

    /// Create a coordinator over caller-supplied network primitives.
    pub fn with_transports(
        config: ProbeConfig,
        transport: Arc<dyn DnsTransport>,
        connector: Arc<dyn SmtpConnector>,
    ) -> Self {
        Self {
            config,
            transport,
            connector,
            shared_cache: Arc::new(DnsCache::new()),
            jobs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Start validating `inputs` in the background.
    ///
    /// Inputs are cleaned and deduplicated, first occurrence wins. Fails if
    /// nothing is left, if the job is over the size limit, or if there is no
    /// tokio runtime to run on.
    pub fn start<S: AsRef<str>>(&self, inputs: &[S]) -> Result<JobHandle, MailProbeError> {
        let domains = prepare_domains(inputs);
        if domains.is_empty() {
            return Err(MailProbeError::invalid_job("no domains supplied"));
        }
        if domains.len() > self.config.max_domains {
            return Err(MailProbeError::invalid_job(format!(
                "{} domains exceeds the limit of {} per job",
                domains.len(),
                self.config.max_domains
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| MailProbeError::internal(format!("cannot start worker pool: {}", e)))?;

        let id = JobId::new();
        let total = domains.len();
        let workers = worker_count(total, &self.config.worker_bands);
        let cache = self.cache_for_job();
        let validator = Arc::new(Validator::from_config(
            &self.config,
            self.transport.clone(),
            self.connector.clone(),
            cache.clone(),
        ));

        let cancel = CancellationFlag::new();
        let tracker = Arc::new(ProgressTracker::new(total));
        let slots: Slots = Arc::new(Mutex::new(vec![None; total]));
        let (report_tx, report_rx) = watch::channel(None);

        let pool = WorkerPool::new(validator, workers, cancel.clone());
        let (mut results, pool_task) = pool.spawn(domains.clone());

        let collector_tracker = tracker.clone();
        let collector_slots = slots.clone();
        let collector_domains = domains.clone();
        runtime.spawn(async move {
            while let Some((index, result)) = results.recv().await {
                let category = result.category;
                {
                    let mut slots = collector_slots.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                // Slot is filled before the count moves
                collector_tracker.record(category);
            }
            if let Err(e) = pool_task.await {
                warn!(job = %id, error = %e, "worker pool task failed");
            }

            let filled = collector_slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let results: Vec<ValidationResult> = filled
                .into_iter()
                .zip(collector_domains)
                .map(|(slot, domain)| {
                    slot.unwrap_or_else(|| {
                        collector_tracker.record(Category::ProcessingError);
                        ValidationResult::processing_error(domain, "no result produced for this domain")
                    })
                })
                .collect();

            let status = if results.iter().any(|r| r.category == Category::Cancelled) {
                JobStatus::Cancelled
            } else {
                JobStatus::Completed
            };
            collector_tracker.finish(status);

            let summary = ReportSummary::from_results(&results, collector_tracker.elapsed());
            info!(
                job = %id,
                %status,
                total = summary.total,
                can_receive = summary.can_receive,
                secs = summary.processing_time.as_secs_f64(),
                "job finished"
            );
            let report = ValidationReport {
                job_id: id,
                status,
                results,
                summary,
            };
            let _ = report_tx.send(Some(Arc::new(report)));
        });

        let job = Job {
            domains,
            cancel,
            tracker,
            slots,
            report: report_rx,
            cache,
        };
        self.jobs.insert(id, Arc::new(job));
        info!(job = %id, total, workers, "job started");

        Ok(JobHandle {
            id,
            total,
            workers,
            estimated: estimated_duration(total, workers),
        })
    }

    fn cache_for_job(&self) -> Arc<DnsCache> {
        match self.config.cache_scope {
            CacheScope::Job => Arc::new(DnsCache::new()),
            CacheScope::Process => self.shared_cache.clone(),
        }
    }

    fn job(&self, id: &JobId) -> Result<Arc<Job>, MailProbeError> {
        self.jobs
            .get(id)
            .map(|job| job.value().clone())
            .ok_or_else(|| MailProbeError::job_not_found(id))
    }

    /// Current progress of a job.
    pub fn poll(&self, id: &JobId) -> Result<ProgressSnapshot, MailProbeError> {
        Ok(self.job(id)?.tracker.snapshot())
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatus, MailProbeError> {
        Ok(self.job(id)?.tracker.status())
    }

    /// Request cancellation. Domains already in flight finish their current stage.
    pub fn cancel(&self, id: &JobId) -> Result<(), MailProbeError> {
        let job = self.job(id)?;
        if !job.tracker.status().is_finished() {
            job.cancel.cancel();
            info!(job = %id, completed = job.tracker.completed(), "job cancellation requested");
        }
        Ok(())
    }

    /// Final report if the job has finished, without waiting.
    pub fn get_report(&self, id: &JobId) -> Result<Option<Arc<ValidationReport>>, MailProbeError> {
        Ok(self.job(id)?.report())
    }

    /// Wait for the final report. The job stays registered.
    pub async fn wait_for_report(&self, id: &JobId) -> Result<Arc<ValidationReport>, MailProbeError> {
        let mut receiver = self.job(id)?.report.clone();
        let report = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| MailProbeError::internal(format!("job {} stopped without a report", id)))?
            .clone();
        report.ok_or_else(|| MailProbeError::internal("report channel closed early"))
    }

    /// Wait for the final report and forget the job.
    pub async fn take_report(&self, id: &JobId) -> Result<Arc<ValidationReport>, MailProbeError> {
        let report = self.wait_for_report(id).await?;
        self.jobs.remove(id);
        Ok(report)
    }

    /// Start a job and wait for its report.
    pub async fn run<S: AsRef<str>>(&self, inputs: &[S]) -> Result<Arc<ValidationReport>, MailProbeError> {
        let handle = self.start(inputs)?;
        self.take_report(&handle.id).await
    }

    /// Results produced so far, in input order, skipping unfinished domains.
    pub fn partial_results(&self, id: &JobId) -> Result<Vec<ValidationResult>, MailProbeError> {
        let job = self.job(id)?;
        if let Some(report) = job.report() {
            return Ok(report.results.clone());
        }
        let slots = job.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.iter().flatten().cloned().collect())
    }

    /// Domains of a job in report order.
    pub fn domains(&self, id: &JobId) -> Result<Vec<String>, MailProbeError> {
        Ok(self.job(id)?.domains.clone())
    }

    /// DNS cache used by a job.
    pub fn job_cache(&self, id: &JobId) -> Result<Arc<DnsCache>, MailProbeError> {
        Ok(self.job(id)?.cache.clone())
    }

    /// Jobs that are still running.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|entry| !entry.value().tracker.status().is_finished())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop finished jobs nobody collected within the retention period.
    pub fn purge_expired(&self) -> usize {
        let retention = self.config.job_retention;
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            job.tracker
                .finished_for()
                .map_or(true, |age| age < retention)
        });
        let purged = before.saturating_sub(self.jobs.len());
        if purged > 0 {
            info!(purged, "purged expired jobs");
        }
        purged
    }

    /// Validate a single domain outside of any job.
    pub async fn validate_domain(&self, domain: &str) -> ValidationResult {
        let validator = Validator::from_config(
            &self.config,
            self.transport.clone(),
            self.connector.clone(),
            self.cache_for_job(),
        );
        validator.validate_domain(&normalize_domain(domain)).await
    }
}

/// Rough completion range for `total` domains over `workers` workers.
pub fn estimated_duration(total: usize, workers: usize) -> (Duration, Duration) {
    let workers = workers.max(1) as f64;
    let total = total as f64;
    (
        Duration::from_secs_f64(total / (2.0 * workers)),
        Duration::from_secs_f64(total / workers),
    )
}
