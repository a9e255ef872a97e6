//! SMTP greeting probe.
//!
//! A probe opens a plain TCP connection to a mail host, reads the first
//! line the server sends, and closes. Nothing is ever written to the
//! socket: no EHLO, no MAIL FROM, no RCPT TO.
//!
//! The raw network step sits behind [`SmtpConnector`] so that tests can
//! script connection outcomes. [`TcpConnector`] is the real implementation.
//! Mail host addresses normally come from the validator's DNS chain and
//! cache; the connector only resolves a host itself when handed none.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Longest greeting we are willing to read.
const MAX_GREETING_BYTES: u64 = 1024;

/// Distinct ways an SMTP probe can fail.
///
/// They all collapse into the "Server Offline" category, but the message is
/// kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProbeError {
    #[error("connection refused")]
    Refused,

    #[error("host unreachable")]
    Unreachable,

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("read timeout")]
    ReadTimeout,

    #[error("connection reset")]
    Reset,

    #[error("connection closed without greeting")]
    NoGreeting,

    #[error("cannot resolve mail host")]
    Unresolvable,

    #[error("connection error: {0}")]
    Other(String),
}

impl ProbeError {
    /// Whether the TCP connection had been established when the probe failed.
    pub fn after_connect(&self) -> bool {
        matches!(self, ProbeError::ReadTimeout | ProbeError::NoGreeting)
    }
}

/// Connect to `host:port` and read one line.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    /// The connection must be closed before this returns, on every path.
    ///
    /// `addrs` are addresses already resolved for `host`. When empty, the
    /// connector resolves `host` on its own.
    async fn connect_and_read_line(
        &self,
        host: &str,
        addrs: &[Ipv4Addr],
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<String, ProbeError>;
}

/// Plain TCP connector using tokio sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl SmtpConnector for TcpConnector {
    async fn connect_and_read_line(
        &self,
        host: &str,
        resolved: &[Ipv4Addr],
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<String, ProbeError> {
        let connect = async {
            let addrs: Vec<SocketAddr> = if resolved.is_empty() {
                // Falls back to the system resolver
                lookup_host((host, port))
                    .await
                    .map_err(|_| ProbeError::Unresolvable)?
                    .collect()
            } else {
                resolved.iter().map(|ip| SocketAddr::from((*ip, port))).collect()
            };
            if addrs.is_empty() {
                return Err(ProbeError::Unresolvable);
            }
            TcpStream::connect(&addrs[..])
                .await
                .map_err(|e| classify_io_error(&e, ProbeError::ConnectTimeout))
        };

        let stream = match tokio::time::timeout(connect_timeout, connect).await {
            Err(_) => return Err(ProbeError::ConnectTimeout),
            Ok(result) => result?,
        };

        // The stream is owned by the reader and dropped (closed) when this function returns.
        let mut reader = BufReader::new(stream).take(MAX_GREETING_BYTES);
        let mut line = Vec::new();
        match tokio::time::timeout(read_timeout, reader.read_until(b'\n', &mut line)).await {
            Err(_) => Err(ProbeError::ReadTimeout),
            Ok(Err(e)) => Err(classify_io_error(&e, ProbeError::ReadTimeout)),
            Ok(Ok(0)) => Err(ProbeError::NoGreeting),
            Ok(Ok(_)) => {
                let greeting = String::from_utf8_lossy(&line).trim().to_string();
                if greeting.is_empty() {
                    Err(ProbeError::NoGreeting)
                } else {
                    Ok(greeting)
                }
            }
        }
    }
}

fn classify_io_error(err: &io::Error, timed_out: ProbeError) -> ProbeError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ProbeError::Refused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ProbeError::Reset,
        io::ErrorKind::TimedOut => timed_out,
        io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::AddrNotAvailable => ProbeError::Unreachable,
        _ => ProbeError::Other(err.to_string()),
    }
}

/// Result of probing one mail host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub host: String,
    pub connected: bool,
    pub banner_read: bool,
    pub banner: Option<String>,
    pub error: Option<ProbeError>,
}

impl ProbeOutcome {
    /// A readable greeting is the positive signal.
    pub fn is_success(&self) -> bool {
        self.banner_read
    }
}

/// Probes mail hosts on the configured SMTP port.
#[derive(Clone)]
pub struct SmtpProbe {
    connector: Arc<dyn SmtpConnector>,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl SmtpProbe {
    pub fn new(
        connector: Arc<dyn SmtpConnector>,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            port,
            connect_timeout,
            read_timeout,
        }
    }

    /// Probe a single mail host at its resolved addresses.
    pub async fn probe(&self, host: &str, addrs: &[Ipv4Addr]) -> ProbeOutcome {
        let result = self
            .connector
            .connect_and_read_line(host, addrs, self.port, self.connect_timeout, self.read_timeout)
            .await;

        debug!(host, port = self.port, ok = result.is_ok(), "SMTP probe finished");

        match result {
            Ok(banner) => ProbeOutcome {
                host: host.to_string(),
                connected: true,
                banner_read: true,
                banner: Some(banner),
                error: None,
            },
            Err(error) => ProbeOutcome {
                host: host.to_string(),
                connected: error.after_connect(),
                banner_read: false,
                banner: None,
                error: Some(error),
            },
        }
    }
}

/// Summarize a set of failed probes into one reason string.
///
/// When every host failed the same way the reason is that failure alone,
/// e.g. `connect timeout`. Otherwise each host is listed with its failure.
pub fn summarize_failures(failures: &[ProbeOutcome]) -> String {
    let errors: Vec<String> = failures
        .iter()
        .map(|outcome| {
            outcome
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no greeting".to_string())
        })
        .collect();

    match errors.first() {
        None => "no mail hosts to probe".to_string(),
        Some(first) if errors.iter().all(|e| e == first) => first.clone(),
        Some(_) => failures
            .iter()
            .zip(&errors)
            .map(|(outcome, error)| format!("{}: {}", outcome.host, error))
            .collect::<Vec<_>>()
            .join("; "),
    }
}
