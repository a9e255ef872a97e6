//! # Mailprobe Library
//!
//! Bulk validation of whether domains can plausibly receive email.
//!
//! Every domain runs through the same pipeline: hostname syntax, an A
//! lookup, an MX lookup, then an SMTP connection that only waits for the
//! server's greeting line. Nothing is ever sent to the mail server. The
//! outcome is one [`ValidationResult`] per domain, classified into a
//! [`Category`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mailprobe_lib::{JobCoordinator, ProbeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = JobCoordinator::new(ProbeConfig::default())?;
//!     let handle = coordinator.start(&["example.com", "gmail.com"])?;
//!
//!     let report = coordinator.take_report(&handle.id).await?;
//!     for result in &report.results {
//!         println!("{}: {} ({})", result.domain, result.category, result.reason);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bounded worker pool**: worker count sized once from the job length
//! - **Single-flight DNS cache**: each question hits the network at most once
//! - **DNS fallback chain**: system resolver, then public resolvers in order
//! - **Live progress**: completed count, rate and ETA at any time
//! - **Cooperative cancellation**: every domain still gets a result

// Re-export main public API types and functions
// This makes them available as mailprobe_lib::TypeName
pub use cache::{CacheEntry, CacheKey, CacheStats, DnsCache};
pub use concurrent::{worker_count, CancellationFlag, ResultStream, WorkerPool};
pub use config::{
    load_env_config, parse_duration, ConfigManager, DnsSection, EnvConfig, FileConfig,
    JobSection, SmtpSection, WorkersSection,
};
pub use coordinator::{estimated_duration, JobCoordinator, JobHandle};
pub use error::MailProbeError;
pub use pipeline::Validator;
pub use progress::{estimate, ProgressTracker};
pub use protocols::{
    DnsQueryError, DnsRecords, DnsTransport, HickoryTransport, NameServer, ProbeError,
    ProbeOutcome, RecordType, SmtpConnector, SmtpProbe, TcpConnector,
};
pub use resolver::{LookupOutcome, Resolution, Resolver};
pub use types::{
    CacheScope, Category, JobId, JobStatus, MxRecord, ProbeConfig, ProgressSnapshot,
    ReportSummary, Stage, ValidationReport, ValidationResult, WorkerBand, WorkerBands,
};
pub use utils::{normalize_domain, parse_domain_list, prepare_domains, validate_hostname, SyntaxError};

// Internal modules - these are not part of the public API
mod cache;
mod concurrent;
mod config;
mod coordinator;
mod error;
mod pipeline;
mod progress;
mod protocols;
mod resolver;
mod types;
mod utils;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, MailProbeError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        default_dns_servers: NameServer::default_fallback_chain()
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

/// Information about the library build and defaults
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub default_dns_servers: Vec<String>,
}
