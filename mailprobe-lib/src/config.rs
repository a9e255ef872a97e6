//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `MP_*`
//! environment variables, and layering them over [`ProbeConfig`] defaults
//! with proper precedence rules.

use crate::error::MailProbeError;
use crate::protocols::dns::NameServer;
use crate::types::{CacheScope, ProbeConfig, WorkerBand, WorkerBands};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration loaded from TOML files.
///
/// ```toml
/// [dns]
/// servers = ["system", "8.8.8.8", "1.1.1.1"]
/// timeout = "3s"
///
/// [smtp]
/// port = 25
/// connect_timeout = "5s"
/// read_timeout = "5s"
/// implicit_mx = false
///
/// [workers]
/// max = 40
/// bands = [{ up_to = 50, workers = 10 }, { up_to = 200, workers = 20 }]
///
/// [job]
/// domain_timeout = "25s"
/// max_domains = 2000
/// retention = "10m"
/// cache_scope = "job"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkersSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSection>,
}

/// `[dns]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DnsSection {
    /// Name servers in fallback order ("system", an IP, or ip:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<String>>,

    /// Per-query timeout (e.g., "3s", "500ms")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// `[smtp]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SmtpSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<String>,

    /// Probe the domain itself when it has an A record but no MX
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implicit_mx: Option<bool>,
}

/// `[workers]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkersSection {
    /// Upper bound on workers for any job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,

    /// Size bands, replacing the built-in ones entirely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bands: Option<Vec<WorkerBand>>,
}

/// `[job]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_domains: Option<usize>,

    /// How long finished, uncollected jobs are kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_scope: Option<CacheScope>,
}

impl FileConfig {
    /// Layer this file's settings over `base`.
    pub fn apply_to(&self, mut base: ProbeConfig) -> Result<ProbeConfig, MailProbeError> {
        if let Some(dns) = &self.dns {
            if let Some(servers) = &dns.servers {
                base.dns_servers = parse_servers(servers)?;
            }
            if let Some(timeout) = &dns.timeout {
                base.dns_timeout = require_duration("dns.timeout", timeout)?;
            }
        }

        if let Some(smtp) = &self.smtp {
            if let Some(port) = smtp.port {
                base.smtp_port = port;
            }
            if let Some(timeout) = &smtp.connect_timeout {
                base.smtp_connect_timeout = require_duration("smtp.connect_timeout", timeout)?;
            }
            if let Some(timeout) = &smtp.read_timeout {
                base.smtp_read_timeout = require_duration("smtp.read_timeout", timeout)?;
            }
            if let Some(implicit_mx) = smtp.implicit_mx {
                base.implicit_mx = implicit_mx;
            }
        }

        if let Some(workers) = &self.workers {
            if let Some(bands) = &workers.bands {
                base.worker_bands = WorkerBands {
                    bands: bands.clone(),
                    max_workers: base.worker_bands.max_workers,
                };
            }
            if let Some(max) = workers.max {
                base.worker_bands.max_workers = max;
            }
        }

        if let Some(job) = &self.job {
            if let Some(timeout) = &job.domain_timeout {
                base.domain_timeout = require_duration("job.domain_timeout", timeout)?;
            }
            if let Some(max_domains) = job.max_domains {
                base.max_domains = max_domains;
            }
            if let Some(retention) = &job.retention {
                base.job_retention = require_duration("job.retention", retention)?;
            }
            if let Some(scope) = job.cache_scope {
                base.cache_scope = scope;
            }
        }

        Ok(base)
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to report every config file that was found
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, MailProbeError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MailProbeError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            MailProbeError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;
        self.validate_config(&config)?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config is lowest, then the home directory, then the current
    /// directory. Files that fail to load are skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig, MailProbeError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring configuration file"),
            }
        }

        if self.verbose && loaded_files.len() > 1 {
            for (i, path) in loaded_files.iter().enumerate() {
                let role = if i == loaded_files.len() - 1 {
                    "highest precedence"
                } else {
                    "overridden where set later"
                };
                info!(path = %path.display(), role, "configuration file");
            }
        }

        Ok(merged_config)
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./mailprobe.toml", "./.mailprobe.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Get the global configuration file path in the user's home directory.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".mailprobe.toml", "mailprobe.toml"]
            .into_iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("mailprobe").join("config.toml");
        path.exists().then_some(path)
    }

    /// Merge two configurations. Values set in `higher` win.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            dns: merge_sections(lower.dns, higher.dns, |lower, higher| DnsSection {
                servers: higher.servers.or(lower.servers),
                timeout: higher.timeout.or(lower.timeout),
            }),
            smtp: merge_sections(lower.smtp, higher.smtp, |lower, higher| SmtpSection {
                port: higher.port.or(lower.port),
                connect_timeout: higher.connect_timeout.or(lower.connect_timeout),
                read_timeout: higher.read_timeout.or(lower.read_timeout),
                implicit_mx: higher.implicit_mx.or(lower.implicit_mx),
            }),
            workers: merge_sections(lower.workers, higher.workers, |lower, higher| {
                WorkersSection {
                    max: higher.max.or(lower.max),
                    bands: higher.bands.or(lower.bands),
                }
            }),
            job: merge_sections(lower.job, higher.job, |lower, higher| JobSection {
                domain_timeout: higher.domain_timeout.or(lower.domain_timeout),
                max_domains: higher.max_domains.or(lower.max_domains),
                retention: higher.retention.or(lower.retention),
                cache_scope: higher.cache_scope.or(lower.cache_scope),
            }),
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), MailProbeError> {
        if let Some(dns) = &config.dns {
            if let Some(servers) = &dns.servers {
                if servers.is_empty() {
                    return Err(MailProbeError::config("dns.servers cannot be empty"));
                }
                parse_servers(servers)?;
            }
            if let Some(timeout) = &dns.timeout {
                require_duration("dns.timeout", timeout)?;
            }
        }

        if let Some(smtp) = &config.smtp {
            if smtp.port == Some(0) {
                return Err(MailProbeError::config("smtp.port must be non-zero"));
            }
            for (name, value) in [
                ("smtp.connect_timeout", &smtp.connect_timeout),
                ("smtp.read_timeout", &smtp.read_timeout),
            ] {
                if let Some(value) = value {
                    require_duration(name, value)?;
                }
            }
        }

        if let Some(workers) = &config.workers {
            if let Some(max) = workers.max {
                if max == 0 || max > 200 {
                    return Err(MailProbeError::config("workers.max must be between 1 and 200"));
                }
            }
        }

        if let Some(job) = &config.job {
            if job.max_domains == Some(0) {
                return Err(MailProbeError::config("job.max_domains must be at least 1"));
            }
            for (name, value) in [
                ("job.domain_timeout", &job.domain_timeout),
                ("job.retention", &job.retention),
            ] {
                if let Some(value) = value {
                    require_duration(name, value)?;
                }
            }
        }

        Ok(())
    }
}

fn merge_sections<T>(lower: Option<T>, higher: Option<T>, merge: impl FnOnce(T, T) -> T) -> Option<T> {
    match (lower, higher) {
        (Some(lower), Some(higher)) => Some(merge(lower, higher)),
        (lower, higher) => higher.or(lower),
    }
}

fn parse_servers(servers: &[String]) -> Result<Vec<NameServer>, MailProbeError> {
    servers.iter().map(|server| server.parse()).collect()
}

fn require_duration(name: &str, value: &str) -> Result<Duration, MailProbeError> {
    parse_duration(value).ok_or_else(|| {
        MailProbeError::config(format!(
            "Invalid {} '{}'. Use a format like '500ms', '5s' or '2m'",
            name, value
        ))
    })
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via `MP_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub dns_servers: Option<Vec<NameServer>>,
    pub dns_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub domain_timeout: Option<Duration>,
    pub smtp_port: Option<u16>,
    pub max_workers: Option<usize>,
    pub implicit_mx: Option<bool>,
    pub json: Option<bool>,
    pub file: Option<String>,
    pub config: Option<String>,
}

impl EnvConfig {
    /// Build from an arbitrary variable lookup. Invalid values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut env_config = EnvConfig::default();

        if let Some(value) = var("MP_DNS_SERVERS") {
            let parsed: Result<Vec<NameServer>, _> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(servers) if !servers.is_empty() => env_config.dns_servers = Some(servers),
                _ => warn!(value = %value, "invalid MP_DNS_SERVERS, expected comma-separated servers"),
            }
        }

        env_config.dns_timeout = duration_var(&var, "MP_DNS_TIMEOUT");
        env_config.connect_timeout = duration_var(&var, "MP_CONNECT_TIMEOUT");
        env_config.read_timeout = duration_var(&var, "MP_READ_TIMEOUT");
        env_config.domain_timeout = duration_var(&var, "MP_DOMAIN_TIMEOUT");

        if let Some(value) = var("MP_SMTP_PORT") {
            match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => env_config.smtp_port = Some(port),
                _ => warn!(value = %value, "invalid MP_SMTP_PORT, must be 1-65535"),
            }
        }

        if let Some(value) = var("MP_MAX_WORKERS") {
            match value.trim().parse::<usize>() {
                Ok(workers) if (1..=200).contains(&workers) => env_config.max_workers = Some(workers),
                _ => warn!(value = %value, "invalid MP_MAX_WORKERS, must be 1-200"),
            }
        }

        env_config.implicit_mx = bool_var(&var, "MP_IMPLICIT_MX");
        env_config.json = bool_var(&var, "MP_JSON");
        env_config.file = var("MP_FILE");
        env_config.config = var("MP_CONFIG");

        env_config
    }

    /// Layer these settings over `base`.
    pub fn apply_to(&self, mut base: ProbeConfig) -> ProbeConfig {
        if let Some(servers) = &self.dns_servers {
            base.dns_servers = servers.clone();
        }
        if let Some(timeout) = self.dns_timeout {
            base.dns_timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            base.smtp_connect_timeout = timeout;
        }
        if let Some(timeout) = self.read_timeout {
            base.smtp_read_timeout = timeout;
        }
        if let Some(timeout) = self.domain_timeout {
            base.domain_timeout = timeout;
        }
        if let Some(port) = self.smtp_port {
            base.smtp_port = port;
        }
        if let Some(workers) = self.max_workers {
            base = base.with_max_workers(workers);
        }
        if let Some(implicit_mx) = self.implicit_mx {
            base.implicit_mx = implicit_mx;
        }
        base
    }
}

fn duration_var(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    let value = var(name)?;
    let parsed = parse_duration(&value);
    if parsed.is_none() {
        warn!(variable = name, value = %value, "invalid duration, use a format like '500ms', '5s' or '2m'");
    }
    parsed
}

fn bool_var(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let value = var(name)?;
    let parsed = parse_bool(&value);
    if parsed.is_none() {
        warn!(variable = name, value = %value, "invalid boolean, use true/false");
    }
    parsed
}

/// Load configuration from the process environment.
pub fn load_env_config() -> EnvConfig {
    EnvConfig::from_lookup(|name| env::var(name).ok())
}

/// Parse a duration like "500ms", "5s", "2m", or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    let duration = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        value.parse::<u64>().ok().map(Duration::from_secs)
    };

    duration.filter(|d| !d.is_zero())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
