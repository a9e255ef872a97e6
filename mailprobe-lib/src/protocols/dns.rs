//! DNS query primitive.
//!
//! The [`DnsTransport`] trait is the only way the library talks to DNS: one
//! query, for one record type, against one name server. Fallback across
//! servers and caching live above it in the [`Resolver`](crate::Resolver).
//!
//! [`HickoryTransport`] is the production implementation, with one
//! `hickory-resolver` instance per configured server so that each query goes
//! exactly where the fallback chain says it should.

use crate::error::MailProbeError;
use crate::types::MxRecord;
use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::ProtoErrorKind,
    ResolveError, ResolveErrorKind, TokioResolver,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Standard DNS port.
pub const DNS_PORT: u16 = 53;

/// DNS record types the validator asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    A,
    Mx,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Mx => write!(f, "MX"),
        }
    }
}

/// Records returned by a successful query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecords {
    A(Vec<Ipv4Addr>),
    Mx(Vec<MxRecord>),
}

impl DnsRecords {
    pub fn is_empty(&self) -> bool {
        match self {
            DnsRecords::A(addrs) => addrs.is_empty(),
            DnsRecords::Mx(records) => records.is_empty(),
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            DnsRecords::A(_) => RecordType::A,
            DnsRecords::Mx(_) => RecordType::Mx,
        }
    }
}

/// Why a single query against a single server produced no records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsQueryError {
    /// The server says the name does not exist
    #[error("domain does not exist (NXDOMAIN)")]
    NxDomain,

    /// The name exists but has no records of the requested type
    #[error("no records of the requested type")]
    NoRecords,

    /// No answer within the per-query timeout
    #[error("DNS query timed out")]
    Timeout,

    /// Any other failure (SERVFAIL, refused, transport error, ...)
    #[error("DNS server error: {0}")]
    Server(String),
}

impl DnsQueryError {
    /// Whether a server actually answered and the answer was negative.
    pub fn is_definitive_negative(&self) -> bool {
        matches!(self, DnsQueryError::NxDomain | DnsQueryError::NoRecords)
    }
}

/// A name server in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NameServer {
    /// The operating system's resolver configuration
    System,
    /// A specific server, queried over plain UDP/TCP
    Address(SocketAddr),
}

impl NameServer {
    /// System resolver followed by Google, Cloudflare, OpenDNS and Quad9.
    pub fn default_fallback_chain() -> Vec<NameServer> {
        let mut chain = vec![NameServer::System];
        for ip in [
            Ipv4Addr::new(8, 8, 8, 8),
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(208, 67, 222, 222),
            Ipv4Addr::new(9, 9, 9, 9),
        ] {
            chain.push(NameServer::Address(SocketAddr::new(IpAddr::V4(ip), DNS_PORT)));
        }
        chain
    }
}

impl fmt::Display for NameServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameServer::System => write!(f, "system"),
            NameServer::Address(addr) if addr.port() == DNS_PORT => write!(f, "{}", addr.ip()),
            NameServer::Address(addr) => write!(f, "{}", addr),
        }
    }
}

impl FromStr for NameServer {
    type Err = MailProbeError;

    /// Accepts `system`, a bare IP (port 53 implied) or `ip:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("system") {
            return Ok(NameServer::System);
        }
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(NameServer::Address(addr));
        }
        s.parse::<IpAddr>()
            .map(|ip| NameServer::Address(SocketAddr::new(ip, DNS_PORT)))
            .map_err(|_| {
                MailProbeError::config(format!(
                    "Invalid DNS server '{}'. Use 'system', an IP address, or ip:port",
                    s
                ))
            })
    }
}

impl TryFrom<String> for NameServer {
    type Error = MailProbeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NameServer> for String {
    fn from(server: NameServer) -> Self {
        server.to_string()
    }
}

/// One DNS query against one server.
#[async_trait]
pub trait DnsTransport: Send + Sync {
    /// Query `domain` for `record_type` at `server`.
    ///
    /// An empty answer must be reported as [`DnsQueryError::NoRecords`],
    /// never as `Ok` with an empty list.
    async fn query(
        &self,
        domain: &str,
        record_type: RecordType,
        server: &NameServer,
    ) -> Result<DnsRecords, DnsQueryError>;
}

/// DNS transport backed by `hickory-resolver`.
pub struct HickoryTransport {
    resolvers: HashMap<NameServer, TokioResolver>,
    timeout: Duration,
}

impl HickoryTransport {
    /// Build one resolver per server.
    ///
    /// Each resolver makes a single attempt per query so that retrying is
    /// left entirely to the fallback chain.
    ///
    /// A system resolver that cannot be built (no `resolv.conf`, say) is
    /// skipped with a warning when explicit servers remain in the chain.
    pub fn new(servers: &[NameServer], timeout: Duration) -> Result<Self, MailProbeError> {
        let resolvers = build_all(servers, |server| build_resolver(server, timeout))?;
        Ok(Self { resolvers, timeout })
    }
}

fn build_all<R>(
    servers: &[NameServer],
    build: impl Fn(&NameServer) -> Result<R, ResolveError>,
) -> Result<HashMap<NameServer, R>, MailProbeError> {
    let has_explicit = servers
        .iter()
        .any(|server| matches!(server, NameServer::Address(_)));

    let mut resolvers = HashMap::with_capacity(servers.len());
    for server in servers {
        if resolvers.contains_key(server) {
            continue;
        }
        match (server, build(server)) {
            (_, Ok(resolver)) => {
                resolvers.insert(server.clone(), resolver);
            }
            (NameServer::System, Err(e)) if has_explicit => {
                warn!(error = %e, "system resolver unavailable, using the remaining DNS servers");
            }
            (NameServer::System, Err(e)) => return Err(e.into()),
            (NameServer::Address(_), Err(e)) => {
                return Err(MailProbeError::resolver_setup(server, e.to_string()));
            }
        }
    }
    Ok(resolvers)
}

fn build_resolver(server: &NameServer, timeout: Duration) -> Result<TokioResolver, ResolveError> {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;

    let resolver = match server {
        NameServer::System => TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build(),
        NameServer::Address(addr) => {
            let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
            let config = ResolverConfig::from_parts(None, vec![], group);
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build()
        }
    };
    Ok(resolver)
}

#[async_trait]
impl DnsTransport for HickoryTransport {
    async fn query(
        &self,
        domain: &str,
        record_type: RecordType,
        server: &NameServer,
    ) -> Result<DnsRecords, DnsQueryError> {
        let resolver = self
            .resolvers
            .get(server)
            .ok_or_else(|| DnsQueryError::Server(format!("no resolver configured for {}", server)))?;

        // Fully qualified, so search domains from resolv.conf are never appended
        let name = format!("{}.", domain.trim_end_matches('.'));

        let lookup = async {
            match record_type {
                RecordType::A => resolver
                    .ipv4_lookup(name.as_str())
                    .await
                    .map(|lookup| DnsRecords::A(lookup.iter().map(|a| a.0).collect())),
                RecordType::Mx => resolver.mx_lookup(name.as_str()).await.map(|lookup| {
                    DnsRecords::Mx(
                        lookup
                            .iter()
                            .map(|mx| {
                                let exchange = mx.exchange().to_utf8();
                                MxRecord::new(mx.preference(), exchange.trim_end_matches('.'))
                            })
                            .collect(),
                    )
                }),
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, lookup).await {
            Err(_) => Err(DnsQueryError::Timeout),
            Ok(Ok(records)) if records.is_empty() => Err(DnsQueryError::NoRecords),
            Ok(Ok(records)) => Ok(records),
            Ok(Err(err)) => Err(classify_resolve_error(&err)),
        };

        debug!(
            domain,
            %record_type,
            %server,
            ok = outcome.is_ok(),
            "DNS query finished"
        );
        outcome
    }
}

fn classify_resolve_error(err: &ResolveError) -> DnsQueryError {
    if err.is_nx_domain() {
        DnsQueryError::NxDomain
    } else if err.is_no_records_found() {
        DnsQueryError::NoRecords
    } else if is_timeout(err) {
        DnsQueryError::Timeout
    } else {
        DnsQueryError::Server(err.to_string())
    }
}

fn is_timeout(err: &ResolveError) -> bool {
    match err.kind() {
        ResolveErrorKind::Proto(proto) => matches!(proto.kind(), ProtoErrorKind::Timeout),
        _ => false,
    }
}
