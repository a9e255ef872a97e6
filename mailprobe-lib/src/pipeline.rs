//! Per-domain validation state machine.
//!
//! ```text
//! SyntaxCheck -> DnsLookup -> MxLookup -> SmtpProbe -> Done
//! ```
//!
//! Each stage either advances to the next one or stops with a terminal
//! category. Stages are never re-entered. Before every stage the validator
//! checks the job's cancellation flag and the domain's remaining time budget,
//! and each stage runs under whatever budget is left.

use crate::cache::DnsCache;
use crate::concurrent::CancellationFlag;
use crate::protocols::dns::{DnsTransport, RecordType};
use crate::protocols::smtp::{summarize_failures, SmtpConnector, SmtpProbe};
use crate::resolver::{LookupOutcome, Resolver};
use crate::types::{Category, MxRecord, ProbeConfig, Stage, ValidationResult};
use crate::utils::validate_hostname;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

enum Transition {
    Advance(Stage),
    Stop(Category, String),
}

/// Working state of one domain's run.
struct DomainRun {
    domain: String,
    started: Instant,
    /// `None` when the budget is too large to represent as an instant.
    deadline: Option<Instant>,
    a_records: Vec<Ipv4Addr>,
    mx_records: Vec<MxRecord>,
    candidates: Vec<String>,
    mail_host: Option<String>,
    banner: Option<String>,
}

impl DomainRun {
    fn new(domain: &str, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            domain: domain.to_string(),
            started,
            deadline: started.checked_add(budget),
            a_records: Vec::new(),
            mx_records: Vec::new(),
            candidates: Vec::new(),
            mail_host: None,
            banner: None,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero()),
            None => Some(Duration::MAX),
        }
    }

    fn finish(self, category: Category, reason: String, stage: Stage) -> ValidationResult {
        ValidationResult {
            domain: self.domain,
            category,
            reason,
            a_records: self.a_records,
            mx_records: self.mx_records,
            mail_host: self.mail_host,
            banner: self.banner,
            elapsed: self.started.elapsed(),
            terminal_stage: stage,
        }
    }
}

/// Runs the validation pipeline for single domains.
#[derive(Clone)]
pub struct Validator {
    resolver: Resolver,
    probe: SmtpProbe,
    domain_timeout: Duration,
    implicit_mx: bool,
}

impl Validator {
    pub fn new(resolver: Resolver, probe: SmtpProbe, domain_timeout: Duration, implicit_mx: bool) -> Self {
        Self {
            resolver,
            probe,
            domain_timeout,
            implicit_mx,
        }
    }

    /// Wire a validator from configuration and the two network primitives.
    pub fn from_config(
        config: &ProbeConfig,
        transport: Arc<dyn DnsTransport>,
        connector: Arc<dyn SmtpConnector>,
        cache: Arc<DnsCache>,
    ) -> Self {
        let resolver = Resolver::new(
            transport,
            config.dns_servers.clone(),
            cache,
            config.dns_timeout,
        );
        let probe = SmtpProbe::new(
            connector,
            config.smtp_port,
            config.smtp_connect_timeout,
            config.smtp_read_timeout,
        );
        Self::new(resolver, probe, config.domain_timeout, config.implicit_mx)
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Validate one domain outside of any job.
    pub async fn validate_domain(&self, domain: &str) -> ValidationResult {
        self.validate(domain, &CancellationFlag::new()).await
    }

    /// Validate one domain, observing `cancel` between stages.
    pub async fn validate(&self, domain: &str, cancel: &CancellationFlag) -> ValidationResult {
        let mut run = DomainRun::new(domain, self.domain_timeout);
        let mut stage = Stage::SyntaxCheck;

        loop {
            if stage == Stage::Done {
                let reason = match &run.mail_host {
                    Some(host) => format!("SMTP greeting received from {}", host),
                    None => "SMTP greeting received".to_string(),
                };
                return run.finish(Category::CanReceiveEmails, reason, Stage::Done);
            }

            if cancel.is_cancelled() {
                return run.finish(
                    Category::Cancelled,
                    format!("job cancelled before {}", stage),
                    stage,
                );
            }

            let Some(remaining) = run.remaining() else {
                let reason = self.timeout_reason(stage);
                return run.finish(Category::Timeout, reason, stage);
            };

            let transition =
                match tokio::time::timeout(remaining, self.step(stage, &mut run, cancel)).await {
                    Ok(transition) => transition,
                    Err(_) => Transition::Stop(Category::Timeout, self.timeout_reason(stage)),
                };

            match transition {
                Transition::Advance(next) => {
                    debug!(domain, from = %stage, to = %next, "stage complete");
                    stage = next;
                }
                Transition::Stop(category, reason) => {
                    debug!(domain, %stage, %category, "pipeline stopped");
                    return run.finish(category, reason, stage);
                }
            }
        }
    }

    fn timeout_reason(&self, stage: Stage) -> String {
        format!(
            "exceeded {:.1}s budget during {}",
            self.domain_timeout.as_secs_f64(),
            stage
        )
    }

    async fn step(&self, stage: Stage, run: &mut DomainRun, cancel: &CancellationFlag) -> Transition {
        match stage {
            Stage::SyntaxCheck => match validate_hostname(&run.domain) {
                Ok(()) => Transition::Advance(Stage::DnsLookup),
                Err(e) => Transition::Stop(Category::InvalidFormat, e.to_string()),
            },
            Stage::DnsLookup => self.dns_lookup(run).await,
            Stage::MxLookup => self.mx_lookup(run).await,
            Stage::SmtpProbe => self.smtp_probe(run, cancel).await,
            Stage::Done => Transition::Advance(Stage::Done),
        }
    }

    async fn dns_lookup(&self, run: &mut DomainRun) -> Transition {
        let outcome = self.resolver.lookup_a(&run.domain).await;
        if outcome.records().is_none() {
            return Transition::Stop(Category::DomainNotFound, outcome.describe(RecordType::A));
        }
        run.a_records = outcome.a_records();
        Transition::Advance(Stage::MxLookup)
    }

    async fn mx_lookup(&self, run: &mut DomainRun) -> Transition {
        let outcome = self.resolver.lookup_mx(&run.domain).await;

        match &outcome {
            LookupOutcome::Found { .. } => {
                let mut records = outcome.mx_records();
                records.sort();
                run.candidates = mail_hosts(&records);
                run.mx_records = records;
                if run.candidates.is_empty() {
                    return Transition::Stop(
                        Category::NoMailServers,
                        "domain publishes a null MX record".to_string(),
                    );
                }
                Transition::Advance(Stage::SmtpProbe)
            }
            LookupOutcome::NotFound { .. } if self.implicit_mx => {
                // The A lookup already succeeded, so the domain itself is a usable host
                run.candidates = vec![run.domain.clone()];
                Transition::Advance(Stage::SmtpProbe)
            }
            LookupOutcome::NotFound { .. } => {
                Transition::Stop(Category::NoMailServers, "no MX records found".to_string())
            }
            LookupOutcome::Failed { .. } => {
                Transition::Stop(Category::NoMailServers, outcome.describe(RecordType::Mx))
            }
        }
    }

    async fn smtp_probe(&self, run: &mut DomainRun, cancel: &CancellationFlag) -> Transition {
        let candidates = std::mem::take(&mut run.candidates);
        let mut failures = Vec::with_capacity(candidates.len());

        for host in &candidates {
            if cancel.is_cancelled() {
                return Transition::Stop(
                    Category::Cancelled,
                    "job cancelled during SMTP probe".to_string(),
                );
            }

            // Mail hosts resolve through the same server chain and cache as the domain
            let addrs = self.resolver.lookup_a(host).await.a_records();
            let outcome = self.probe.probe(host, &addrs).await;
            if outcome.is_success() {
                run.mail_host = Some(outcome.host);
                run.banner = outcome.banner;
                return Transition::Advance(Stage::Done);
            }
            failures.push(outcome);
        }

        Transition::Stop(Category::ServerOffline, summarize_failures(&failures))
    }
}

/// Distinct, non-null exchanges in the order given.
fn mail_hosts(records: &[MxRecord]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::with_capacity(records.len());
    for record in records.iter().filter(|r| !r.is_null()) {
        let host = record.exchange.to_lowercase();
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_hosts_skip_null_and_duplicates() {
        let records = vec![
            MxRecord::new(0, "."),
            MxRecord::new(10, "MX1.example.com"),
            MxRecord::new(20, "mx1.example.com"),
            MxRecord::new(30, "mx2.example.com"),
        ];
        assert_eq!(mail_hosts(&records), vec!["mx1.example.com", "mx2.example.com"]);
        assert!(mail_hosts(&[MxRecord::new(0, "")]).is_empty());
    }

    #[test]
    fn test_remaining_budget() {
        let run = DomainRun::new("example.com", Duration::from_secs(5));
        assert!(run.remaining().is_some());

        let expired = DomainRun::new("example.com", Duration::ZERO);
        assert!(expired.remaining().is_none());
    }

    #[test]
    fn test_unrepresentable_budget_means_no_deadline() {
        let run = DomainRun::new("example.com", Duration::from_secs(u64::MAX));
        assert_eq!(run.remaining(), Some(Duration::MAX));
        let result = run.finish(Category::Timeout, "never".to_string(), Stage::DnsLookup);
        assert_eq!(result.domain, "example.com");
    }

    #[test]
    fn test_finish_records_stage_and_reason() {
        let run = DomainRun::new("example.com", Duration::from_secs(5));
        let result = run.finish(Category::InvalidFormat, "bad".to_string(), Stage::SyntaxCheck);
        assert_eq!(result.domain, "example.com");
        assert_eq!(result.category, Category::InvalidFormat);
        assert_eq!(result.terminal_stage, Stage::SyntaxCheck);
    }
}
