//! Utility functions for domain processing and validation.
//!
//! This module contains helpers for cleaning raw domain input, checking
//! hostname syntax, and building the deduplicated domain list of a job.

use std::collections::HashSet;
use std::fmt;

/// Maximum length of a full hostname.
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// Why a hostname failed the syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    Empty,
    TooLong(usize),
    EmptyLabel,
    LabelTooLong(String),
    HyphenAtLabelEdge(String),
    InvalidCharacter(char),
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "domain name is empty"),
            Self::TooLong(len) => write!(
                f,
                "domain name is {} characters, limit is {}",
                len, MAX_HOSTNAME_LEN
            ),
            Self::EmptyLabel => write!(f, "domain name contains an empty label"),
            Self::LabelTooLong(label) => write!(
                f,
                "label '{}' exceeds {} characters",
                label, MAX_LABEL_LEN
            ),
            Self::HyphenAtLabelEdge(label) => {
                write!(f, "label '{}' starts or ends with a hyphen", label)
            }
            Self::InvalidCharacter(c) => write!(f, "invalid character '{}'", c),
        }
    }
}

/// Validate hostname syntax.
///
/// Labels are ASCII letters, digits and hyphens, 1–63 characters, with no
/// hyphen at either end; the whole name is at most 253 characters.
/// No network access happens here.
pub fn validate_hostname(domain: &str) -> Result<(), SyntaxError> {
    if domain.is_empty() {
        return Err(SyntaxError::Empty);
    }
    if domain.len() > MAX_HOSTNAME_LEN {
        return Err(SyntaxError::TooLong(domain.len()));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(SyntaxError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(SyntaxError::LabelTooLong(label.to_string()));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(SyntaxError::InvalidCharacter(c));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(SyntaxError::HyphenAtLabelEdge(label.to_string()));
        }
    }

    Ok(())
}

/// Clean one raw input line into a lowercase hostname candidate.
///
/// Strips surrounding whitespace, a leading `http://` or `https://`, a
/// leading `www.`, anything from the first `/`, and a trailing root dot.
/// The result may still be syntactically invalid.
pub fn normalize_domain(raw: &str) -> String {
    let mut domain = raw.trim().to_lowercase();

    for scheme in ["https://", "http://"] {
        if let Some(rest) = domain.strip_prefix(scheme) {
            domain = rest.to_string();
            break;
        }
    }
    if let Some(rest) = domain.strip_prefix("www.") {
        domain = rest.to_string();
    }
    if let Some(slash) = domain.find('/') {
        domain.truncate(slash);
    }
    if let Some(rest) = domain.strip_suffix('.') {
        domain = rest.to_string();
    }

    domain.trim().to_string()
}

/// Build a job's domain list: normalize, drop blanks, deduplicate.
///
/// The first occurrence of each cleaned domain wins, so the returned order is
/// the order the final report will use.
pub fn prepare_domains<S: AsRef<str>>(inputs: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut domains = Vec::new();

    for input in inputs {
        let domain = normalize_domain(input.as_ref());
        if domain.is_empty() {
            continue;
        }
        if seen.insert(domain.clone()) {
            domains.push(domain);
        }
    }

    domains
}

/// Parse a domain list file body: one domain per line, `#` starts a comment.
pub fn parse_domain_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
