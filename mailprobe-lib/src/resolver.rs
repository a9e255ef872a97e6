//! Cached DNS resolution with server fallback.
//!
//! A lookup walks the configured name servers in priority order and stops at
//! the first one that returns records. Whatever the chain produced, positive
//! or negative, is stored in the [`DnsCache`] so that the same question is
//! sent to the network at most once per cache lifetime.

use crate::cache::{CacheKey, DnsCache};
use crate::protocols::dns::{DnsQueryError, DnsRecords, DnsTransport, NameServer, RecordType};
use crate::types::MxRecord;
use crate::utils::validate_hostname;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// What the fallback chain concluded for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Records returned by the first server that had any
    Found {
        records: DnsRecords,
        server: NameServer,
    },
    /// At least one server answered authoritatively that there is nothing here
    NotFound { nx_domain: bool },
    /// No server gave a usable answer (timeouts, SERVFAIL, transport errors)
    Failed { error: String },
}

impl LookupOutcome {
    pub fn records(&self) -> Option<&DnsRecords> {
        match self {
            LookupOutcome::Found { records, .. } => Some(records),
            _ => None,
        }
    }

    /// IPv4 addresses, if this was a successful A lookup.
    pub fn a_records(&self) -> Vec<Ipv4Addr> {
        match self.records() {
            Some(DnsRecords::A(addrs)) => addrs.clone(),
            _ => Vec::new(),
        }
    }

    /// MX records, if this was a successful MX lookup.
    pub fn mx_records(&self) -> Vec<MxRecord> {
        match self.records() {
            Some(DnsRecords::Mx(records)) => records.clone(),
            _ => Vec::new(),
        }
    }

    /// Human-readable explanation of a negative outcome.
    pub fn describe(&self, record_type: RecordType) -> String {
        match self {
            LookupOutcome::Found { server, .. } => format!("{} records found via {}", record_type, server),
            LookupOutcome::NotFound { nx_domain: true } => "domain does not exist (NXDOMAIN)".to_string(),
            LookupOutcome::NotFound { nx_domain: false } => {
                format!("no {} records on any DNS server", record_type)
            }
            LookupOutcome::Failed { error } => {
                format!("{} lookup failed on all DNS servers: {}", record_type, error)
            }
        }
    }
}

/// Result of the full [`Resolver::resolve`] contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub a_records: Vec<Ipv4Addr>,
    /// Sorted by preference, then exchange name
    pub mx_records: Vec<MxRecord>,
    /// Set when syntax or the A lookup stopped resolution
    pub dns_error: Option<String>,
}

/// DNS resolver over an ordered fallback chain of name servers.
#[derive(Clone)]
pub struct Resolver {
    transport: Arc<dyn DnsTransport>,
    servers: Arc<[NameServer]>,
    cache: Arc<DnsCache>,
    query_timeout: Duration,
}

impl Resolver {
    pub fn new(
        transport: Arc<dyn DnsTransport>,
        servers: Vec<NameServer>,
        cache: Arc<DnsCache>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            servers: servers.into(),
            cache,
            query_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<DnsCache> {
        &self.cache
    }

    pub fn servers(&self) -> &[NameServer] {
        &self.servers
    }

    /// Look up one record type, consulting the cache first.
    pub async fn lookup(&self, domain: &str, record_type: RecordType) -> LookupOutcome {
        let key = CacheKey::new(domain, record_type);
        self.cache
            .get_or_resolve(key, || self.query_chain(domain, record_type))
            .await
            .outcome
    }

    pub async fn lookup_a(&self, domain: &str) -> LookupOutcome {
        self.lookup(domain, RecordType::A).await
    }

    pub async fn lookup_mx(&self, domain: &str) -> LookupOutcome {
        self.lookup(domain, RecordType::Mx).await
    }

    /// Syntax check, then A and MX lookups.
    ///
    /// A missing A record stops resolution before MX is queried. A missing
    /// MX record set is not an error here; interpreting it is up to the caller.
    pub async fn resolve(&self, domain: &str) -> Resolution {
        if let Err(e) = validate_hostname(domain) {
            return Resolution {
                dns_error: Some(e.to_string()),
                ..Default::default()
            };
        }

        let a = self.lookup_a(domain).await;
        if a.records().is_none() {
            return Resolution {
                dns_error: Some(a.describe(RecordType::A)),
                ..Default::default()
            };
        }

        let mut mx_records = self.lookup_mx(domain).await.mx_records();
        mx_records.sort();
        Resolution {
            a_records: a.a_records(),
            mx_records,
            dns_error: None,
        }
    }

    /// Walk the fallback chain. Only the first server with records wins.
    async fn query_chain(&self, domain: &str, record_type: RecordType) -> LookupOutcome {
        let mut nx_domain = false;
        let mut negative = false;
        let mut last_error = None;

        for server in self.servers.iter() {
            let query = self.transport.query(domain, record_type, server);
            let result = match tokio::time::timeout(self.query_timeout, query).await {
                Ok(result) => result,
                Err(_) => Err(DnsQueryError::Timeout),
            };

            match result {
                Ok(records) if !records.is_empty() => {
                    debug!(domain, %record_type, %server, "DNS answer");
                    return LookupOutcome::Found {
                        records,
                        server: server.clone(),
                    };
                }
                Ok(_) => negative = true,
                Err(err) => {
                    trace!(domain, %record_type, %server, error = %err, "trying next DNS server");
                    if err.is_definitive_negative() {
                        negative = true;
                        nx_domain |= err == DnsQueryError::NxDomain;
                    }
                    last_error = Some(err);
                }
            }
        }

        if negative {
            return LookupOutcome::NotFound { nx_domain };
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no DNS servers configured".to_string());
        warn!(domain, %record_type, servers = self.servers.len(), error = %error, "lookup failed on every DNS server");
        LookupOutcome::Failed { error }
    }
}
