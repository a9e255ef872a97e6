//! Core data types for email-capability validation.
//!
//! This module defines the main data structures used throughout the library:
//! per-domain results and their categories, job identifiers and reports,
//! progress snapshots, and the probe configuration.

use crate::protocols::dns::NameServer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use uuid::Uuid;

/// Terminal classification of one domain.
///
/// Every domain in a job ends in exactly one of these, whatever happened
/// on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// At least one mail host answered with an SMTP greeting
    CanReceiveEmails,
    /// The input is not a syntactically valid hostname
    InvalidFormat,
    /// No A record on any configured DNS server
    DomainNotFound,
    /// No MX records and the implicit-MX policy did not apply
    NoMailServers,
    /// Every candidate mail host failed the SMTP probe
    ServerOffline,
    /// The per-domain time budget ran out
    Timeout,
    /// The job was cancelled before this domain finished
    Cancelled,
    /// An unexpected fault while processing this domain
    ProcessingError,
}

impl Category {
    /// Number of categories, used to size per-category counters.
    pub const COUNT: usize = 8;

    /// All categories in declaration order.
    pub const ALL: [Category; Category::COUNT] = [
        Category::CanReceiveEmails,
        Category::InvalidFormat,
        Category::DomainNotFound,
        Category::NoMailServers,
        Category::ServerOffline,
        Category::Timeout,
        Category::Cancelled,
        Category::ProcessingError,
    ];

    /// Stable index of this category within [`Category::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this category means the domain can receive email.
    pub fn can_receive(self) -> bool {
        self == Category::CanReceiveEmails
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::CanReceiveEmails => "Can Receive Emails",
            Category::InvalidFormat => "Invalid Format",
            Category::DomainNotFound => "Domain Not Found",
            Category::NoMailServers => "No Mail Servers",
            Category::ServerOffline => "Server Offline",
            Category::Timeout => "Timeout",
            Category::Cancelled => "Cancelled",
            Category::ProcessingError => "Processing Error",
        };
        f.write_str(label)
    }
}

/// Stages of the per-domain validation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SyntaxCheck,
    DnsLookup,
    MxLookup,
    SmtpProbe,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::SyntaxCheck => "syntax check",
            Stage::DnsLookup => "DNS lookup",
            Stage::MxLookup => "MX lookup",
            Stage::SmtpProbe => "SMTP probe",
            Stage::Done => "done",
        };
        f.write_str(label)
    }
}

/// A single MX record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MxRecord {
    /// MX preference (lower value = higher priority)
    pub preference: u16,
    /// Mail exchanger hostname, without the trailing root dot
    pub exchange: String,
}

impl MxRecord {
    pub fn new<E: Into<String>>(preference: u16, exchange: E) -> Self {
        Self {
            preference,
            exchange: exchange.into(),
        }
    }

    /// RFC 7505 null MX (`MX 0 .`): the domain explicitly accepts no mail.
    pub fn is_null(&self) -> bool {
        self.exchange.is_empty() || self.exchange == "."
    }
}

/// Outcome of validating one domain.
///
/// Immutable once produced by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The normalized domain that was validated (e.g., "example.com")
    pub domain: String,

    /// Terminal classification
    pub category: Category,

    /// Human-readable reason distinguishing sub-causes
    pub reason: String,

    /// Resolved A records, if the DNS stage got that far
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub a_records: Vec<Ipv4Addr>,

    /// Resolved MX records in priority order
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mx_records: Vec<MxRecord>,

    /// Mail host that answered the SMTP probe
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mail_host: Option<String>,

    /// Greeting line read from `mail_host`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub banner: Option<String>,

    /// Wall-clock time spent on this domain
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,

    /// Stage at which processing ended
    pub terminal_stage: Stage,
}

impl ValidationResult {
    /// A result carrying only a classification, with no resolved data.
    pub fn bare<D: Into<String>, R: Into<String>>(
        domain: D,
        category: Category,
        reason: R,
        terminal_stage: Stage,
        elapsed: Duration,
    ) -> Self {
        Self {
            domain: domain.into(),
            category,
            reason: reason.into(),
            a_records: Vec::new(),
            mx_records: Vec::new(),
            mail_host: None,
            banner: None,
            elapsed,
            terminal_stage,
        }
    }

    /// Result for a domain the job never got to run.
    pub fn not_started<D: Into<String>>(domain: D) -> Self {
        Self::bare(
            domain,
            Category::Cancelled,
            "job cancelled before this domain was started",
            Stage::SyntaxCheck,
            Duration::ZERO,
        )
    }

    /// Result for a domain whose processing faulted internally.
    pub fn processing_error<D: Into<String>, R: Into<String>>(domain: D, reason: R) -> Self {
        Self::bare(
            domain,
            Category::ProcessingError,
            reason,
            Stage::SyntaxCheck,
            Duration::ZERO,
        )
    }

    /// Whether the domain can receive email.
    pub fn can_receive(&self) -> bool {
        self.category.can_receive()
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time view of a job's progress, recomputed on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Estimated time remaining; `None` until a rate is known
    #[serde(with = "option_duration_millis")]
    pub eta: Option<Duration>,
    /// Domains completed per second
    pub rate: f64,
    pub status: JobStatus,
    /// Completed results per category so far
    pub categories: BTreeMap<Category, usize>,
}

impl ProgressSnapshot {
    /// Completion percentage in the range 0–100.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Aggregate figures for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub can_receive: usize,
    pub cannot_receive: usize,
    /// Percentage of domains that can receive email
    pub success_rate: f64,
    #[serde(with = "duration_millis")]
    pub processing_time: Duration,
    /// Domains per second over the whole job
    pub average_rate: f64,
    pub categories: BTreeMap<Category, usize>,
}

impl ReportSummary {
    pub fn from_results(results: &[ValidationResult], processing_time: Duration) -> Self {
        let total = results.len();
        let can_receive = results.iter().filter(|r| r.can_receive()).count();

        let mut categories = BTreeMap::new();
        for result in results {
            *categories.entry(result.category).or_insert(0) += 1;
        }

        let success_rate = if total > 0 {
            can_receive as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        let secs = processing_time.as_secs_f64();
        let average_rate = if secs > 0.0 { total as f64 / secs } else { 0.0 };

        Self {
            total,
            can_receive,
            cannot_receive: total - can_receive,
            success_rate,
            processing_time,
            average_rate,
            categories,
        }
    }
}

/// Final, input-ordered report of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub results: Vec<ValidationResult>,
    pub summary: ReportSummary,
}

/// One step of the worker-count policy: jobs of at most `up_to` domains get `workers` workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBand {
    pub up_to: usize,
    pub workers: usize,
}

/// Size bands mapping job size to worker count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBands {
    /// Bands in ascending `up_to` order with non-decreasing `workers`
    pub bands: Vec<WorkerBand>,
    /// Worker count for jobs larger than every band, and a hard cap for all jobs
    pub max_workers: usize,
}

impl Default for WorkerBands {
    fn default() -> Self {
        Self {
            bands: vec![
                WorkerBand { up_to: 50, workers: 10 },
                WorkerBand { up_to: 200, workers: 20 },
                WorkerBand { up_to: 500, workers: 30 },
            ],
            max_workers: 40,
        }
    }
}

/// Lifetime of the DNS cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// A fresh cache for every job; negative answers never outlive the job
    #[default]
    Job,
    /// One cache shared by every job of a coordinator
    Process,
}

/// Configuration options for validation jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// DNS servers in fallback priority order
    pub dns_servers: Vec<NameServer>,

    /// Timeout for a single DNS query against a single server
    /// Default: 3 seconds
    #[serde(skip)]
    pub dns_timeout: Duration,

    /// Timeout for establishing the SMTP connection
    /// Default: 5 seconds
    #[serde(skip)]
    pub smtp_connect_timeout: Duration,

    /// Timeout for reading the SMTP greeting once connected
    /// Default: 5 seconds
    #[serde(skip)]
    pub smtp_read_timeout: Duration,

    /// Wall-clock ceiling for one domain's whole pipeline
    /// Default: 25 seconds
    #[serde(skip)]
    pub domain_timeout: Duration,

    /// SMTP port to probe
    /// Default: 25
    pub smtp_port: u16,

    /// Worker-count policy
    pub worker_bands: WorkerBands,

    /// Treat the domain itself as its mail host when it has an A record but no MX
    /// Default: false
    pub implicit_mx: bool,

    /// DNS cache lifetime
    pub cache_scope: CacheScope,

    /// Largest accepted job, in unique domains
    /// Default: 2000
    pub max_domains: usize,

    /// How long a finished, unretrieved job is kept
    /// Default: 10 minutes
    #[serde(skip)]
    pub job_retention: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dns_servers: NameServer::default_fallback_chain(),
            dns_timeout: Duration::from_secs(3),
            smtp_connect_timeout: Duration::from_secs(5),
            smtp_read_timeout: Duration::from_secs(5),
            domain_timeout: Duration::from_secs(25),
            smtp_port: 25,
            worker_bands: WorkerBands::default(),
            implicit_mx: false,
            cache_scope: CacheScope::Job,
            max_domains: 2000,
            job_retention: Duration::from_secs(600),
        }
    }
}

impl ProbeConfig {
    /// Replace the DNS server fallback chain.
    pub fn with_dns_servers(mut self, servers: Vec<NameServer>) -> Self {
        self.dns_servers = servers;
        self
    }

    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    pub fn with_smtp_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.smtp_connect_timeout = connect;
        self.smtp_read_timeout = read;
        self
    }

    pub fn with_domain_timeout(mut self, timeout: Duration) -> Self {
        self.domain_timeout = timeout;
        self
    }

    pub fn with_smtp_port(mut self, port: u16) -> Self {
        self.smtp_port = port;
        self
    }

    pub fn with_worker_bands(mut self, bands: WorkerBands) -> Self {
        self.worker_bands = bands;
        self
    }

    /// Set the worker cap.
    ///
    /// Automatically clamps to 1–200 to prevent resource exhaustion.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.worker_bands.max_workers = max_workers.clamp(1, 200);
        self
    }

    pub fn with_implicit_mx(mut self, enabled: bool) -> Self {
        self.implicit_mx = enabled;
        self
    }

    pub fn with_cache_scope(mut self, scope: CacheScope) -> Self {
        self.cache_scope = scope;
        self
    }

    pub fn with_max_domains(mut self, max_domains: usize) -> Self {
        self.max_domains = max_domains;
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    /// Check the configuration for settings that cannot work.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::MailProbeError;

        if self.dns_servers.is_empty() {
            return Err(MailProbeError::config("At least one DNS server is required"));
        }
        for (name, value) in [
            ("dns_timeout", self.dns_timeout),
            ("smtp_connect_timeout", self.smtp_connect_timeout),
            ("smtp_read_timeout", self.smtp_read_timeout),
            ("domain_timeout", self.domain_timeout),
        ] {
            if value.is_zero() {
                return Err(MailProbeError::config(format!("{} must be greater than zero", name)));
            }
        }
        if self.smtp_port == 0 {
            return Err(MailProbeError::config("SMTP port must be non-zero"));
        }
        if self.max_domains == 0 {
            return Err(MailProbeError::config("max_domains must be at least 1"));
        }
        validate_bands(&self.worker_bands)
    }
}

fn validate_bands(bands: &WorkerBands) -> crate::Result<()> {
    use crate::MailProbeError;

    if bands.max_workers == 0 || bands.max_workers > 200 {
        return Err(MailProbeError::config("max_workers must be between 1 and 200"));
    }
    for pair in bands.bands.windows(2) {
        if pair[1].up_to <= pair[0].up_to || pair[1].workers < pair[0].workers {
            return Err(MailProbeError::config(
                "worker bands must have increasing up_to and non-decreasing workers",
            ));
        }
    }
    if bands.bands.iter().any(|band| band.workers == 0) {
        return Err(MailProbeError::config("worker bands must assign at least one worker"));
    }
    Ok(())
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(domain: &str, category: Category) -> ValidationResult {
        ValidationResult::bare(domain, category, "test", Stage::Done, Duration::ZERO)
    }

    #[test]
    fn test_category_index_matches_all() {
        for (i, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::CanReceiveEmails.to_string(), "Can Receive Emails");
        assert_eq!(Category::NoMailServers.to_string(), "No Mail Servers");
        assert_eq!(Category::ServerOffline.to_string(), "Server Offline");
    }

    #[test]
    fn test_null_mx_detection() {
        assert!(MxRecord::new(0, "").is_null());
        assert!(MxRecord::new(0, ".").is_null());
        assert!(!MxRecord::new(10, "mx.example.com").is_null());
    }

    #[test]
    fn test_summary_counts_and_rates() {
        let results = vec![
            result("a.com", Category::CanReceiveEmails),
            result("b.com", Category::CanReceiveEmails),
            result("c.com", Category::NoMailServers),
            result("d.com", Category::InvalidFormat),
        ];

        let summary = ReportSummary::from_results(&results, Duration::from_secs(2));
        assert_eq!(summary.total, 4);
        assert_eq!(summary.can_receive, 2);
        assert_eq!(summary.cannot_receive, 2);
        assert_eq!(summary.success_rate, 50.0);
        assert_eq!(summary.average_rate, 2.0);
        assert_eq!(summary.categories.get(&Category::CanReceiveEmails), Some(&2));
        assert_eq!(summary.categories.get(&Category::Timeout), None);
    }

    #[test]
    fn test_summary_of_empty_results() {
        let summary = ReportSummary::from_results(&[], Duration::ZERO);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.average_rate, 0.0);
    }

    #[test]
    fn test_result_serializes_category_and_millis() {
        let mut r = result("example.com", Category::ServerOffline);
        r.elapsed = Duration::from_millis(1500);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["category"], "server_offline");
        assert_eq!(json["elapsed"], 1500);
        assert!(json.get("mail_host").is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ProbeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.smtp_port, 25);
        assert!(!config.implicit_mx);
        assert_eq!(config.cache_scope, CacheScope::Job);
    }

    #[test]
    fn test_config_rejects_bad_settings() {
        assert!(ProbeConfig::default().with_dns_servers(vec![]).validate().is_err());
        assert!(ProbeConfig::default()
            .with_dns_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ProbeConfig::default().with_smtp_port(0).validate().is_err());

        let non_monotonic = WorkerBands {
            bands: vec![
                WorkerBand { up_to: 100, workers: 20 },
                WorkerBand { up_to: 50, workers: 30 },
            ],
            max_workers: 40,
        };
        assert!(ProbeConfig::default()
            .with_worker_bands(non_monotonic)
            .validate()
            .is_err());
    }

    #[test]
    fn test_max_workers_is_clamped() {
        assert_eq!(ProbeConfig::default().with_max_workers(0).worker_bands.max_workers, 1);
        assert_eq!(
            ProbeConfig::default().with_max_workers(1000).worker_bands.max_workers,
            200
        );
    }
}
