//! Network primitives used by the validator.
//!
//! These are the only two places the library touches the network: a DNS
//! query against one server, and a TCP connect that reads one greeting line.

/// DNS query primitive and the hickory-backed transport
pub mod dns;

/// SMTP greeting probe and the tokio TCP connector
pub mod smtp;

pub use dns::{DnsQueryError, DnsRecords, DnsTransport, HickoryTransport, NameServer, RecordType};
pub use smtp::{ProbeError, ProbeOutcome, SmtpConnector, SmtpProbe, TcpConnector};
