// mailprobe-lib/tests/integration.rs

//! Integration tests for the validation pipeline over scripted network primitives

mod common;

use common::{fallback_config, test_config, FakeDns, FakeSmtp};
use mailprobe_lib::{
    Category, DnsCache, ProbeConfig, ProbeError, RecordType, Stage, Validator,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

fn validator(config: &ProbeConfig, dns: &Arc<FakeDns>, smtp: &Arc<FakeSmtp>) -> Validator {
    Validator::from_config(config, dns.clone(), smtp.clone(), Arc::new(DnsCache::new()))
}

#[tokio::test]
async fn test_reachable_mail_host_can_receive() {
    let dns = Arc::new(FakeDns::new().with_mail_domain("example.com", &[(10, "mx.example.com")]));
    let smtp = Arc::new(FakeSmtp::new().greeting("mx.example.com"));

    let result = validator(&test_config(), &dns, &smtp)
        .validate_domain("example.com")
        .await;

    assert_eq!(result.category, Category::CanReceiveEmails);
    assert_eq!(result.terminal_stage, Stage::Done);
    assert_eq!(result.mail_host.as_deref(), Some("mx.example.com"));
    assert_eq!(result.banner.as_deref(), Some("220 mx.example.com ESMTP ready"));
    assert_eq!(result.a_records.len(), 1);
    assert_eq!(result.mx_records.len(), 1);
}

#[tokio::test]
async fn test_missing_domain_is_not_found_on_every_server() {
    let dns = Arc::new(FakeDns::new());
    let smtp = Arc::new(FakeSmtp::new());

    let result = validator(&fallback_config(), &dns, &smtp)
        .validate_domain("invalid-domain-xyz.com")
        .await;

    assert_eq!(result.category, Category::DomainNotFound);
    assert_eq!(result.terminal_stage, Stage::DnsLookup);
    assert_eq!(result.reason, "domain does not exist (NXDOMAIN)");
    // One query per fallback server, no MX query, no SMTP
    assert_eq!(dns.calls_for("invalid-domain-xyz.com", RecordType::A), 3);
    assert_eq!(dns.calls_for("invalid-domain-xyz.com", RecordType::Mx), 0);
    assert_eq!(smtp.calls(), 0);
}

#[tokio::test]
async fn test_no_mx_without_implicit_host_policy() {
    let dns = Arc::new(FakeDns::new().with_web_only("website-only.com"));
    let smtp = Arc::new(FakeSmtp::new().greeting("website-only.com"));

    let result = validator(&test_config(), &dns, &smtp)
        .validate_domain("website-only.com")
        .await;

    assert_eq!(result.category, Category::NoMailServers);
    assert_eq!(result.terminal_stage, Stage::MxLookup);
    assert_eq!(result.reason, "no MX records found");
    assert_eq!(smtp.calls(), 0);
}

#[tokio::test]
async fn test_implicit_mx_probes_the_domain_itself() {
    let dns = Arc::new(FakeDns::new().with_web_only("website-only.com"));
    let smtp = Arc::new(FakeSmtp::new().greeting("website-only.com"));
    let config = test_config().with_implicit_mx(true);

    let result = validator(&config, &dns, &smtp)
        .validate_domain("website-only.com")
        .await;

    assert_eq!(result.category, Category::CanReceiveEmails);
    assert_eq!(result.mail_host.as_deref(), Some("website-only.com"));
    assert_eq!(smtp.probed(), vec!["website-only.com"]);
}

#[tokio::test]
async fn test_implicit_mx_host_offline() {
    let dns = Arc::new(FakeDns::new().with_web_only("website-only.com"));
    let smtp = Arc::new(FakeSmtp::new());
    let config = test_config().with_implicit_mx(true);

    let result = validator(&config, &dns, &smtp)
        .validate_domain("website-only.com")
        .await;

    assert_eq!(result.category, Category::ServerOffline);
    assert_eq!(result.reason, "connection refused");
}

#[tokio::test]
async fn test_connect_timeout_on_every_mx_is_server_offline() {
    let dns = Arc::new(FakeDns::new().with_mail_domain(
        "slowmail.com",
        &[(20, "mx2.slowmail.com"), (10, "mx1.slowmail.com")],
    ));
    let smtp = Arc::new(
        FakeSmtp::new()
            .failing("mx1.slowmail.com", ProbeError::ConnectTimeout)
            .failing("mx2.slowmail.com", ProbeError::ConnectTimeout),
    );

    let result = validator(&test_config(), &dns, &smtp)
        .validate_domain("slowmail.com")
        .await;

    assert_eq!(result.category, Category::ServerOffline);
    assert_eq!(result.reason, "connect timeout");
    assert_eq!(result.terminal_stage, Stage::SmtpProbe);
    // Priority order, lowest preference first
    assert_eq!(smtp.probed(), vec!["mx1.slowmail.com", "mx2.slowmail.com"]);
}

#[tokio::test]
async fn test_mixed_probe_failures_are_listed_per_host() {
    let dns = Arc::new(FakeDns::new().with_mail_domain(
        "flaky.com",
        &[(10, "mx1.flaky.com"), (20, "mx2.flaky.com")],
    ));
    let smtp = Arc::new(
        FakeSmtp::new()
            .failing("mx1.flaky.com", ProbeError::Reset)
            .failing("mx2.flaky.com", ProbeError::ReadTimeout),
    );

    let result = validator(&test_config(), &dns, &smtp)
        .validate_domain("flaky.com")
        .await;

    assert_eq!(result.category, Category::ServerOffline);
    assert_eq!(
        result.reason,
        "mx1.flaky.com: connection reset; mx2.flaky.com: read timeout"
    );
}

#[tokio::test]
async fn test_first_successful_mx_wins() {
    let dns = Arc::new(FakeDns::new().with_mail_domain(
        "backup.com",
        &[(10, "primary.backup.com"), (20, "secondary.backup.com"), (30, "third.backup.com")],
    ));
    let smtp = Arc::new(
        FakeSmtp::new()
            .failing("primary.backup.com", ProbeError::Refused)
            .greeting("secondary.backup.com")
            .greeting("third.backup.com"),
    );

    let result = validator(&test_config(), &dns, &smtp)
        .validate_domain("backup.com")
        .await;

    assert_eq!(result.category, Category::CanReceiveEmails);
    assert_eq!(result.mail_host.as_deref(), Some("secondary.backup.com"));
    assert_eq!(smtp.probed(), vec!["primary.backup.com", "secondary.backup.com"]);
}

#[tokio::test]
async fn test_null_mx_has_no_mail_servers() {
    let dns = Arc::new(FakeDns::new().with_mail_domain("nomail.com", &[(0, ".")]));
    let smtp = Arc::new(FakeSmtp::new());

    let result = validator(&test_config().with_implicit_mx(true), &dns, &smtp)
        .validate_domain("nomail.com")
        .await;

    assert_eq!(result.category, Category::NoMailServers);
    assert_eq!(result.reason, "domain publishes a null MX record");
    assert_eq!(smtp.calls(), 0);
}

#[tokio::test]
async fn test_malformed_domains_make_no_network_calls() {
    let dns = Arc::new(FakeDns::new());
    let smtp = Arc::new(FakeSmtp::new());
    let validator = validator(&test_config(), &dns, &smtp);

    for domain in ["bad_domain.com", "-leading.com", "trailing-.com", "a..b", "with space.com", ""] {
        let result = validator.validate_domain(domain).await;
        assert_eq!(result.category, Category::InvalidFormat, "domain: {:?}", domain);
        assert_eq!(result.terminal_stage, Stage::SyntaxCheck);
    }

    let too_long = format!("{}.com", "a".repeat(64));
    assert_eq!(
        validator.validate_domain(&too_long).await.category,
        Category::InvalidFormat
    );

    assert_eq!(dns.calls(), 0);
    assert_eq!(smtp.calls(), 0);
}

#[tokio::test]
async fn test_repeated_lookups_hit_the_cache() {
    let dns = Arc::new(FakeDns::new().with_mail_domain("example.com", &[(10, "mx.example.com")]));
    let smtp = Arc::new(FakeSmtp::new().greeting("mx.example.com"));
    let validator = validator(&test_config(), &dns, &smtp);

    validator.validate_domain("example.com").await;
    validator.validate_domain("example.com").await;

    assert_eq!(dns.calls_for("example.com", RecordType::A), 1);
    assert_eq!(dns.calls_for("example.com", RecordType::Mx), 1);
    // A and MX for the domain, A for its mail host
    assert_eq!(validator.resolver().cache().stats().hits, 3);
    // SMTP results are never cached
    assert_eq!(smtp.calls(), 2);
}

#[tokio::test]
async fn test_mail_hosts_resolve_through_configured_servers() {
    let mx_addr = Ipv4Addr::new(198, 51, 100, 25);
    let dns = Arc::new(
        FakeDns::new()
            .with_mail_domain("pinned.com", &[(10, "mx.pinned.com"), (20, "mx2.pinned.com")])
            .with_host("mx.pinned.com", mx_addr),
    );
    let smtp = Arc::new(FakeSmtp::new().greeting("mx2.pinned.com"));

    let result = validator(&test_config(), &dns, &smtp)
        .validate_domain("pinned.com")
        .await;

    assert_eq!(result.category, Category::CanReceiveEmails);
    assert_eq!(dns.calls_for("mx.pinned.com", RecordType::A), 1);
    assert_eq!(dns.calls_for("mx2.pinned.com", RecordType::A), 1);
    // Unknown to the fake servers, so the connector gets no addresses
    assert_eq!(smtp.dialled(), vec![vec![mx_addr], vec![]]);
}

#[tokio::test]
async fn test_domain_budget_exceeded_is_timeout() {
    let dns = Arc::new(
        FakeDns::new()
            .with_mail_domain("slow.com", &[(10, "mx.slow.com")])
            .with_delay("slow.com", Duration::from_millis(500)),
    );
    let smtp = Arc::new(FakeSmtp::new().greeting("mx.slow.com"));
    let config = test_config().with_domain_timeout(Duration::from_millis(100));

    let result = validator(&config, &dns, &smtp).validate_domain("slow.com").await;

    assert_eq!(result.category, Category::Timeout);
    assert_eq!(result.terminal_stage, Stage::DnsLookup);
    assert!(result.reason.contains("DNS lookup"), "reason: {}", result.reason);
    assert!(result.elapsed < Duration::from_millis(450));
}

#[tokio::test]
async fn test_slow_dns_server_counts_as_failed_query() {
    let dns = Arc::new(
        FakeDns::new()
            .with_mail_domain("lagging.com", &[(10, "mx.lagging.com")])
            .with_delay("lagging.com", Duration::from_millis(300)),
    );
    let smtp = Arc::new(FakeSmtp::new().greeting("mx.lagging.com"));
    let config = test_config().with_dns_timeout(Duration::from_millis(50));

    let result = validator(&config, &dns, &smtp).validate_domain("lagging.com").await;

    assert_eq!(result.category, Category::DomainNotFound);
    assert_eq!(
        result.reason,
        "A lookup failed on all DNS servers: DNS query timed out"
    );
}

#[test]
fn test_library_info() {
    let info = mailprobe_lib::info();
    assert_eq!(info.version, mailprobe_lib::VERSION);
    assert_eq!(info.default_dns_servers[0], "system");
}
