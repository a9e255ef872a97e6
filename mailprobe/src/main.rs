//! Mailprobe CLI Application
//!
//! A command-line interface for checking whether domains can receive email.
//! Each domain is checked with DNS (A and MX records) and an SMTP connection
//! that only reads the server greeting.

mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use mailprobe_lib::{
    estimated_duration, load_env_config, parse_domain_list, parse_duration, prepare_domains,
    worker_count, ConfigManager, EnvConfig, JobCoordinator, JobStatus, NameServer, ProbeConfig,
    ValidationReport,
};
use serde::Serialize;
use std::process;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Interval between progress redraws.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// CLI arguments for mailprobe
#[derive(Parser, Debug)]
#[command(name = "mailprobe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Sai Dutt G.V <gvs46@protonmail.com>")]
#[command(about = "Check whether domains can receive email")]
#[command(
    long_about = "Check whether domains can receive email using DNS lookups and an SMTP greeting probe.\n\nNo mail is ever sent: the probe connects, reads the server's greeting line and disconnects."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Domains to check (bare names or URLs)
    #[arg(value_name = "DOMAINS", help_heading = "Domain Selection")]
    pub domains: Vec<String>,

    /// Input file with domains (one per line, # starts a comment)
    #[arg(
        short = 'f',
        long = "file",
        value_name = "FILE",
        help_heading = "Domain Selection"
    )]
    pub file: Option<String>,

    /// Print the cleaned domain list and job sizing without checking anything
    #[arg(long = "dry-run", help_heading = "Domain Selection")]
    pub dry_run: bool,

    /// Output results in JSON format
    #[arg(short = 'j', long = "json", help_heading = "Output Format")]
    pub json: bool,

    /// Maximum number of concurrent workers (1-200)
    #[arg(long = "workers", value_name = "N", help_heading = "Performance")]
    pub workers: Option<usize>,

    /// DNS servers to try in order ("system", an IP, or ip:port; comma-separated)
    #[arg(
        long = "dns-server",
        value_name = "SERVER",
        value_delimiter = ',',
        help_heading = "Network"
    )]
    pub dns_servers: Option<Vec<String>>,

    /// Per-query DNS timeout (e.g. "3s", "500ms")
    #[arg(long = "dns-timeout", value_name = "DURATION", help_heading = "Network")]
    pub dns_timeout: Option<String>,

    /// SMTP connect timeout
    #[arg(long = "connect-timeout", value_name = "DURATION", help_heading = "Network")]
    pub connect_timeout: Option<String>,

    /// SMTP greeting read timeout
    #[arg(long = "read-timeout", value_name = "DURATION", help_heading = "Network")]
    pub read_timeout: Option<String>,

    /// Total time budget per domain
    #[arg(long = "domain-timeout", value_name = "DURATION", help_heading = "Network")]
    pub domain_timeout: Option<String>,

    /// SMTP port to probe
    #[arg(long = "port", value_name = "PORT", help_heading = "Network")]
    pub port: Option<u16>,

    /// Probe the domain itself when it publishes no MX records
    #[arg(long = "implicit-mx", help_heading = "Network")]
    pub implicit_mx: bool,

    /// Use a specific configuration file
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Show configuration sources and progress details
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,

    /// Show per-domain reasons and debug logging
    #[arg(short = 'd', long = "debug", help_heading = "Configuration")]
    pub debug: bool,
}

/// Dry-run output: what a job would look like.
#[derive(Debug, Serialize)]
struct DryRunPlan {
    domains: Vec<String>,
    workers: usize,
    estimated_min_secs: f64,
    estimated_max_secs: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    let env_config = load_env_config();

    if let Err(e) = validate_args(&args, &env_config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(args, env_config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Log to stderr so stdout carries only results. `RUST_LOG` overrides the flags.
fn init_tracing(args: &Args) {
    let default_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mailprobe={level},mailprobe_lib={level}",
            level = default_level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Validate CLI arguments for conflicts and required values.
fn validate_args(args: &Args, env_config: &EnvConfig) -> Result<(), String> {
    if args.domains.is_empty() && args.file.is_none() && env_config.file.is_none() {
        return Err("You must specify domain names or a file with --file".to_string());
    }

    if let Some(workers) = args.workers {
        if workers == 0 || workers > 200 {
            return Err("Workers must be between 1 and 200".to_string());
        }
    }

    if args.port == Some(0) {
        return Err("Port must be between 1 and 65535".to_string());
    }

    if let Some(servers) = &args.dns_servers {
        for server in servers {
            server.parse::<NameServer>().map_err(|e| e.to_string())?;
        }
    }

    for (flag, value) in [
        ("--dns-timeout", &args.dns_timeout),
        ("--connect-timeout", &args.connect_timeout),
        ("--read-timeout", &args.read_timeout),
        ("--domain-timeout", &args.domain_timeout),
    ] {
        if let Some(value) = value {
            if parse_duration(value).is_none() {
                return Err(format!(
                    "Invalid {} '{}'. Use a format like '500ms', '5s' or '2m'",
                    flag, value
                ));
            }
        }
    }

    Ok(())
}

async fn run(args: Args, env_config: EnvConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&args, &env_config)?;
    let json = args.json || env_config.json.unwrap_or(false);

    let mut inputs = args.domains.clone();
    if let Some(file) = args.file.as_ref().or(env_config.file.as_ref()) {
        inputs.extend(read_domains_from_file(file)?);
    }

    let domains = prepare_domains(&inputs);
    if domains.is_empty() {
        return Err("No domains to check after cleaning the input".into());
    }

    if args.dry_run {
        return print_dry_run(domains, &config, json);
    }

    let coordinator = JobCoordinator::new(config)?;
    let handle = coordinator.start(&domains)?;
    debug!(job = %handle.id, total = handle.total, workers = handle.workers, "job started");

    let interactive = !json && console::Term::stderr().is_term();
    if interactive {
        ui::print_header(handle.total, handle.workers, handle.estimated);
    }

    let started = Instant::now();
    let mut progress = ui::ProgressLine::new(interactive);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut interrupts = Interrupts::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = coordinator.poll(&handle.id)?;
                progress.draw(&snapshot);
                if snapshot.status.is_finished() {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c(), if interrupts.listening() => {
                if let Err(e) = signal {
                    warn!(error = %e, "unable to listen for interrupt");
                    interrupts.disable();
                    continue;
                }
                match interrupts.record() {
                    InterruptAction::Cancel => {
                        progress.note("Cancelling, waiting for in-flight domains (Ctrl-C again to quit)...");
                        coordinator.cancel(&handle.id)?;
                    }
                    InterruptAction::Exit => {
                        progress.clear();
                        eprintln!("Interrupted again, exiting without a report");
                        process::exit(130);
                    }
                }
            }
        }
    }
    progress.clear();

    let report = coordinator.take_report(&handle.id).await?;
    debug!(elapsed = ?started.elapsed(), status = ?report.status, "job finished");

    display_results(&report, json, args.debug)?;

    if report.status == JobStatus::Cancelled {
        process::exit(130);
    }
    Ok(())
}

/// What a Ctrl-C should do at this point of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Cancel the job and wait for in-flight domains.
    Cancel,
    /// Stop waiting and leave immediately.
    Exit,
}

#[derive(Debug, Default)]
struct Interrupts {
    seen: usize,
    disabled: bool,
}

impl Interrupts {
    fn record(&mut self) -> InterruptAction {
        self.seen += 1;
        if self.seen == 1 {
            InterruptAction::Cancel
        } else {
            InterruptAction::Exit
        }
    }

    /// Stop listening once the signal handler itself has failed.
    fn disable(&mut self) {
        self.disabled = true;
    }

    fn listening(&self) -> bool {
        !self.disabled
    }
}

/// Build configuration. Precedence: CLI > environment > config file(s) > defaults.
fn build_config(
    args: &Args,
    env_config: &EnvConfig,
) -> Result<ProbeConfig, Box<dyn std::error::Error>> {
    let config_manager = ConfigManager::new(args.verbose);

    let file_config = if let Some(path) = args.config.as_ref().or(env_config.config.as_ref()) {
        debug!(path = %path, "using explicit config file");
        config_manager
            .load_file(path)
            .map_err(|e| format!("Failed to load config file '{}': {}", path, e))?
    } else {
        config_manager.discover_and_load()?
    };

    let config = file_config.apply_to(ProbeConfig::default())?;
    let config = env_config.apply_to(config);
    let config = apply_cli_args_to_config(config, args)?;
    config.validate()?;

    Ok(config)
}

/// Apply CLI arguments to configuration (highest precedence).
fn apply_cli_args_to_config(
    mut config: ProbeConfig,
    args: &Args,
) -> Result<ProbeConfig, Box<dyn std::error::Error>> {
    if let Some(servers) = &args.dns_servers {
        let servers = servers
            .iter()
            .map(|s| s.parse::<NameServer>())
            .collect::<Result<Vec<_>, _>>()?;
        config = config.with_dns_servers(servers);
    }
    if let Some(timeout) = args.dns_timeout.as_deref().and_then(parse_duration) {
        config = config.with_dns_timeout(timeout);
    }
    if let Some(timeout) = args.connect_timeout.as_deref().and_then(parse_duration) {
        config.smtp_connect_timeout = timeout;
    }
    if let Some(timeout) = args.read_timeout.as_deref().and_then(parse_duration) {
        config.smtp_read_timeout = timeout;
    }
    if let Some(timeout) = args.domain_timeout.as_deref().and_then(parse_duration) {
        config = config.with_domain_timeout(timeout);
    }
    if let Some(port) = args.port {
        config = config.with_smtp_port(port);
    }
    if let Some(workers) = args.workers {
        config = config.with_max_workers(workers);
    }
    if args.implicit_mx {
        config = config.with_implicit_mx(true);
    }
    Ok(config)
}

/// Read domains from a file, skipping blank lines and `#` comments.
fn read_domains_from_file(file_path: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file_path)
        .map_err(|e| format!("Cannot read domain file '{}': {}", file_path, e))?;

    let domains = parse_domain_list(&content);
    if domains.is_empty() {
        return Err(format!("No domains found in '{}'", file_path).into());
    }

    debug!(path = %file_path, count = domains.len(), "read domain file");
    Ok(domains)
}

fn print_dry_run(
    domains: Vec<String>,
    config: &ProbeConfig,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers = worker_count(domains.len(), &config.worker_bands);
    let (min, max) = estimated_duration(domains.len(), workers);
    let plan = DryRunPlan {
        domains,
        workers,
        estimated_min_secs: min.as_secs_f64(),
        estimated_max_secs: max.as_secs_f64(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        ui::print_dry_run(&plan.domains, plan.workers, (min, max));
    }
    Ok(())
}

fn display_results(
    report: &ValidationReport,
    json: bool,
    debug: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        ui::print_report(report, debug);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mailprobe").chain(argv.iter().copied()))
    }

    #[test]
    fn test_validate_args_requires_input() {
        let err = validate_args(&args(&[]), &EnvConfig::default()).unwrap_err();
        assert!(err.contains("--file"));

        let env = EnvConfig {
            file: Some("domains.txt".to_string()),
            ..EnvConfig::default()
        };
        assert!(validate_args(&args(&[]), &env).is_ok());
    }

    #[test]
    fn test_validate_args_rejects_bad_values() {
        let env = EnvConfig::default();
        assert!(validate_args(&args(&["a.com", "--workers", "0"]), &env).is_err());
        assert!(validate_args(&args(&["a.com", "--workers", "201"]), &env).is_err());
        assert!(validate_args(&args(&["a.com", "--dns-server", "not-an-ip"]), &env).is_err());
        assert!(validate_args(&args(&["a.com", "--dns-timeout", "soon"]), &env).is_err());
        assert!(validate_args(&args(&["a.com", "--port", "0"]), &env).is_err());
        assert!(validate_args(
            &args(&["a.com", "--dns-server", "system,1.1.1.1,127.0.0.1:5353"]),
            &env
        )
        .is_ok());
    }

    #[test]
    fn test_cli_args_override_config() {
        let config = apply_cli_args_to_config(
            ProbeConfig::default(),
            &args(&[
                "a.com",
                "--dns-server",
                "9.9.9.9",
                "--connect-timeout",
                "2s",
                "--domain-timeout",
                "1m",
                "--port",
                "2525",
                "--workers",
                "5",
                "--implicit-mx",
            ]),
        )
        .unwrap();

        assert_eq!(config.dns_servers, vec!["9.9.9.9".parse().unwrap()]);
        assert_eq!(config.smtp_connect_timeout, Duration::from_secs(2));
        assert_eq!(config.domain_timeout, Duration::from_secs(60));
        assert_eq!(config.smtp_port, 2525);
        assert_eq!(config.worker_bands.max_workers, 5);
        assert!(config.implicit_mx);
    }

    #[test]
    fn test_env_sits_below_cli() {
        let env = EnvConfig {
            smtp_port: Some(587),
            implicit_mx: Some(true),
            ..EnvConfig::default()
        };
        let config = env.apply_to(ProbeConfig::default());
        let config = apply_cli_args_to_config(config, &args(&["a.com", "--port", "2525"])).unwrap();

        assert_eq!(config.smtp_port, 2525);
        assert!(config.implicit_mx);
    }

    #[test]
    fn test_second_interrupt_exits() {
        let mut interrupts = Interrupts::default();
        assert!(interrupts.listening());
        assert_eq!(interrupts.record(), InterruptAction::Cancel);
        assert!(interrupts.listening());
        assert_eq!(interrupts.record(), InterruptAction::Exit);

        interrupts.disable();
        assert!(!interrupts.listening());
    }

    #[test]
    fn test_overflowing_duration_flag_rejected() {
        let err = validate_args(
            &args(&["a.com", "--domain-timeout", "307445734561825861m"]),
            &EnvConfig::default(),
        )
        .unwrap_err();
        assert!(err.contains("Invalid --domain-timeout"));
    }
}
