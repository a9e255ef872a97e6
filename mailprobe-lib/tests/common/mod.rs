// mailprobe-lib/tests/common/mod.rs

//! Scripted DNS and SMTP primitives with call counters.

#![allow(dead_code)]

use async_trait::async_trait;
use mailprobe_lib::{
    DnsQueryError, DnsRecords, DnsTransport, MxRecord, NameServer, ProbeConfig, ProbeError,
    RecordType, SmtpConnector,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Records served for one domain.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    pub a: Vec<Ipv4Addr>,
    pub mx: Vec<MxRecord>,
}

/// In-memory DNS. Unknown domains are NXDOMAIN on every server.
#[derive(Default)]
pub struct FakeDns {
    zones: HashMap<String, Zone>,
    delays: HashMap<String, Duration>,
    gates: HashMap<String, Arc<Notify>>,
    calls: AtomicUsize,
    per_key: Mutex<HashMap<(String, RecordType), usize>>,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain with an A record and the given MX hosts.
    pub fn with_mail_domain(mut self, domain: &str, mx: &[(u16, &str)]) -> Self {
        self.zones.insert(
            domain.to_string(),
            Zone {
                a: vec![Ipv4Addr::new(192, 0, 2, 10)],
                mx: mx.iter().map(|(pref, host)| MxRecord::new(*pref, *host)).collect(),
            },
        );
        self
    }

    /// Host with only an A record at `addr`.
    pub fn with_host(mut self, host: &str, addr: Ipv4Addr) -> Self {
        self.zones.insert(
            host.to_string(),
            Zone {
                a: vec![addr],
                mx: Vec::new(),
            },
        );
        self
    }

    /// Domain with an A record and no MX.
    pub fn with_web_only(self, domain: &str) -> Self {
        self.with_mail_domain(domain, &[])
    }

    /// Delay every answer for `domain`.
    pub fn with_delay(mut self, domain: &str, delay: Duration) -> Self {
        self.delays.insert(domain.to_string(), delay);
        self
    }

    /// Hold the A answer for `domain` until `gate` is notified.
    pub fn with_gate(mut self, domain: &str, gate: Arc<Notify>) -> Self {
        self.gates.insert(domain.to_string(), gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, domain: &str, record_type: RecordType) -> usize {
        self.per_key
            .lock()
            .unwrap()
            .get(&(domain.to_string(), record_type))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl DnsTransport for FakeDns {
    async fn query(
        &self,
        domain: &str,
        record_type: RecordType,
        _server: &NameServer,
    ) -> Result<DnsRecords, DnsQueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_key
            .lock()
            .unwrap()
            .entry((domain.to_string(), record_type))
            .or_insert(0) += 1;

        if record_type == RecordType::A {
            if let Some(gate) = self.gates.get(domain) {
                gate.notified().await;
            }
        }
        if let Some(delay) = self.delays.get(domain) {
            tokio::time::sleep(*delay).await;
        }

        let zone = self.zones.get(domain).ok_or(DnsQueryError::NxDomain)?;
        let records = match record_type {
            RecordType::A => DnsRecords::A(zone.a.clone()),
            RecordType::Mx => DnsRecords::Mx(zone.mx.clone()),
        };
        if records.is_empty() {
            Err(DnsQueryError::NoRecords)
        } else {
            Ok(records)
        }
    }
}

/// Scripted mail hosts. Unknown hosts refuse the connection.
#[derive(Default)]
pub struct FakeSmtp {
    hosts: HashMap<String, Result<String, ProbeError>>,
    panics: Vec<String>,
    calls: AtomicUsize,
    probed: Mutex<Vec<String>>,
    dialled: Mutex<Vec<Vec<Ipv4Addr>>>,
}

impl FakeSmtp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn greeting(mut self, host: &str) -> Self {
        self.hosts
            .insert(host.to_string(), Ok(format!("220 {} ESMTP ready", host)));
        self
    }

    pub fn failing(mut self, host: &str, error: ProbeError) -> Self {
        self.hosts.insert(host.to_string(), Err(error));
        self
    }

    /// Panic when `host` is probed.
    pub fn panicking(mut self, host: &str) -> Self {
        self.panics.push(host.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    /// Addresses handed to each probe, in probe order.
    pub fn dialled(&self) -> Vec<Vec<Ipv4Addr>> {
        self.dialled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmtpConnector for FakeSmtp {
    async fn connect_and_read_line(
        &self,
        host: &str,
        addrs: &[Ipv4Addr],
        _port: u16,
        _connect_timeout: Duration,
        _read_timeout: Duration,
    ) -> Result<String, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.probed.lock().unwrap().push(host.to_string());
        self.dialled.lock().unwrap().push(addrs.to_vec());
        if self.panics.iter().any(|h| h == host) {
            panic!("scripted connector fault for {}", host);
        }
        self.hosts
            .get(host)
            .cloned()
            .unwrap_or(Err(ProbeError::Refused))
    }
}

/// Single fake name server and a short per-domain budget.
pub fn test_config() -> ProbeConfig {
    ProbeConfig::default()
        .with_dns_servers(vec!["192.0.2.53".parse().unwrap()])
        .with_domain_timeout(Duration::from_secs(5))
}

/// Three fake name servers, to exercise the fallback chain.
pub fn fallback_config() -> ProbeConfig {
    test_config().with_dns_servers(vec![
        "192.0.2.53".parse().unwrap(),
        "198.51.100.53".parse().unwrap(),
        "203.0.113.53".parse().unwrap(),
    ])
}
