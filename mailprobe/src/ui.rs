//! Terminal display logic for the mailprobe CLI.
//!
//! This module handles the live progress line, the header, the per-domain
//! result table and the category summary. Uses only the `console` crate.

use console::{pad_str, style, Alignment, StyledObject, Term};
use mailprobe_lib::{Category, JobStatus, ProgressSnapshot, ValidationReport, ValidationResult};
use std::time::Duration;

const DOMAIN_WIDTH: usize = 32;
const CATEGORY_WIDTH: usize = 20;

// ── Progress line ────────────────────────────────────────────────────────────

/// A single self-overwriting progress line on stderr so stdout stays clean.
pub struct ProgressLine {
    term: Term,
    enabled: bool,
}

impl ProgressLine {
    pub fn new(enabled: bool) -> Self {
        Self {
            term: Term::stderr(),
            enabled,
        }
    }

    /// Redraw the line from a fresh snapshot.
    pub fn draw(&mut self, snapshot: &ProgressSnapshot) {
        if !self.enabled {
            return;
        }
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&format_progress(snapshot));
    }

    /// Print a message on its own line, keeping the progress line below it.
    pub fn note(&mut self, message: &str) {
        if !self.enabled {
            return;
        }
        let _ = self.term.clear_line();
        let _ = self.term.write_line(&style(message).yellow().to_string());
    }

    pub fn clear(&mut self) {
        if self.enabled {
            let _ = self.term.clear_line();
        }
    }
}

/// Render `[ 42/100]  42.0%  12.3/s  ETA 5s  ✓ 30`.
pub fn format_progress(snapshot: &ProgressSnapshot) -> String {
    let width = snapshot.total.to_string().len();
    let eta = match snapshot.eta {
        Some(eta) => format_duration(eta),
        None => "--".to_string(),
    };
    let receiving = snapshot
        .categories
        .get(&Category::CanReceiveEmails)
        .copied()
        .unwrap_or(0);

    format!(
        "{} {:>5.1}%  {:.1}/s  ETA {}  {}",
        style(format!(
            "[{:>width$}/{}]",
            snapshot.completed,
            snapshot.total,
            width = width
        ))
        .cyan(),
        snapshot.percent(),
        snapshot.rate,
        eta,
        style(format!("✓ {}", receiving)).green(),
    )
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header at the start of a run.
pub fn print_header(total: usize, workers: usize, estimated: (Duration, Duration)) {
    eprintln!(
        "{} {} {}",
        style("mailprobe").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "- Checking {} domain{}",
            total,
            if total == 1 { "" } else { "s" }
        ))
        .dim(),
    );
    eprintln!(
        "{}",
        style(format!(
            "Workers: {} | Estimated: {}",
            workers,
            format_range(estimated)
        ))
        .dim()
    );
    eprintln!();
}

/// Print the plan for `--dry-run`.
pub fn print_dry_run(domains: &[String], workers: usize, estimated: (Duration, Duration)) {
    for domain in domains {
        println!("{}", domain);
    }
    println!();
    println!(
        "{} domain{} | {} worker{} | estimated {}",
        style(domains.len()).bold(),
        if domains.len() == 1 { "" } else { "s" },
        workers,
        if workers == 1 { "" } else { "s" },
        format_range(estimated),
    );
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Print every result in input order, then the summary.
pub fn print_report(report: &ValidationReport, debug: bool) {
    for result in &report.results {
        print_result(result, debug);
    }
    println!();
    print_summary(report);
}

/// Format and print a single result line with colors and alignment.
pub fn print_result(result: &ValidationResult, debug: bool) {
    let padded_domain = pad_str(&result.domain, DOMAIN_WIDTH, Alignment::Left, Some(".."));
    let label = pad_str(
        &result.category.to_string(),
        CATEGORY_WIDTH,
        Alignment::Left,
        None,
    )
    .into_owned();

    let detail = match (&result.mail_host, result.category) {
        (Some(host), Category::CanReceiveEmails) => host.clone(),
        _ => result.reason.clone(),
    };

    println!(
        "  {}  {}  {}",
        style(&padded_domain).white(),
        category_style(result.category, label).bold(),
        style(detail).dim(),
    );

    if debug {
        println!(
            "    {} {} in {}ms",
            style("└─").dim(),
            result.terminal_stage,
            result.elapsed.as_millis(),
        );
        if let Some(banner) = &result.banner {
            println!("    {} {}", style("└─").dim(), style(banner).dim());
        }
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print the summary bar and the per-category breakdown.
pub fn print_summary(report: &ValidationReport) {
    let summary = &report.summary;

    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {} domain{} in {:.1}s  {}  {}  {}  {}  {}  {:.1}%",
        style(summary.total).bold(),
        if summary.total == 1 { "" } else { "s" },
        summary.processing_time.as_secs_f64(),
        style("|").dim(),
        style(format!("{} can receive", summary.can_receive)).green(),
        style("|").dim(),
        style(format!("{} cannot", summary.cannot_receive)).red(),
        style("|").dim(),
        summary.success_rate,
    );

    for (category, count) in &summary.categories {
        println!(
            "    {} {}",
            category_style(
                *category,
                pad_str(&category.to_string(), CATEGORY_WIDTH, Alignment::Left, None).into_owned()
            ),
            count
        );
    }

    if report.status == JobStatus::Cancelled {
        println!();
        println!("  {}", style("Job was cancelled before completion").yellow());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn category_style(category: Category, text: String) -> StyledObject<String> {
    match category {
        Category::CanReceiveEmails => style(text).green(),
        Category::InvalidFormat | Category::DomainNotFound => style(text).red(),
        Category::NoMailServers | Category::ServerOffline => style(text).magenta(),
        Category::Timeout | Category::Cancelled => style(text).yellow(),
        Category::ProcessingError => style(text).red().dim(),
    }
}

/// Compact human duration: `850ms`, `12s`, `3m 05s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

fn format_range((min, max): (Duration, Duration)) -> String {
    format!("{} - {}", format_duration(min), format_duration(max))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(completed: usize, total: usize, eta: Option<Duration>) -> ProgressSnapshot {
        let mut categories = BTreeMap::new();
        categories.insert(Category::CanReceiveEmails, 3);
        ProgressSnapshot {
            completed,
            total,
            elapsed: Duration::from_secs(2),
            eta,
            rate: 2.5,
            status: JobStatus::Running,
            categories,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 05s");
    }

    #[test]
    fn test_format_range() {
        assert_eq!(
            format_range((Duration::from_secs(5), Duration::from_secs(10))),
            "5s - 10s"
        );
    }

    #[test]
    fn test_format_progress_contents() {
        console::set_colors_enabled(false);
        let line = format_progress(&snapshot(5, 100, Some(Duration::from_secs(38))));
        assert!(line.contains("[  5/100]"), "line: {}", line);
        assert!(line.contains("5.0%"));
        assert!(line.contains("2.5/s"));
        assert!(line.contains("ETA 38s"));
        assert!(line.contains("✓ 3"));
    }

    #[test]
    fn test_format_progress_without_eta() {
        console::set_colors_enabled(false);
        let line = format_progress(&snapshot(0, 10, None));
        assert!(line.contains("ETA --"));
    }
}
