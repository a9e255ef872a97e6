//! Error handling for validation jobs.
//!
//! Per-domain failures (bad syntax, missing records, offline mail servers)
//! are never errors: they are reported as a [`Category`](crate::Category)
//! inside a [`ValidationResult`](crate::ValidationResult). This type only
//! covers faults that stop a job from being started or queried at all.

use thiserror::Error;

/// Main error type for job-level operations.
#[derive(Debug, Clone, Error)]
pub enum MailProbeError {
    /// The submitted domain list cannot be turned into a job
    #[error("Invalid job: {message}")]
    InvalidJob { message: String },

    /// The handle does not refer to a job this coordinator knows about
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Configuration errors (invalid settings, unparseable files, etc.)
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File I/O errors when reading configuration or domain lists
    #[error("File error at '{path}': {message}")]
    FileError { path: String, message: String },

    /// A DNS resolver could not be constructed
    #[error("Resolver setup failed for {server}: {message}")]
    ResolverSetup { server: String, message: String },

    /// Generic internal errors that don't fit other categories
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MailProbeError {
    /// Create a new invalid job error.
    pub fn invalid_job<M: Into<String>>(message: M) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    /// Create a new job-not-found error.
    pub fn job_not_found<J: ToString>(job_id: J) -> Self {
        Self::JobNotFound {
            job_id: job_id.to_string(),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new resolver setup error.
    pub fn resolver_setup<S: ToString, M: Into<String>>(server: S, message: M) -> Self {
        Self::ResolverSetup {
            server: server.to_string(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller supplied bad input (as opposed to an environment fault).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidJob { .. } | Self::JobNotFound { .. } | Self::ConfigError { .. }
        )
    }
}

impl From<std::io::Error> for MailProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

impl From<toml::de::Error> for MailProbeError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}

impl From<hickory_resolver::ResolveError> for MailProbeError {
    fn from(err: hickory_resolver::ResolveError) -> Self {
        Self::ResolverSetup {
            server: "system".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = MailProbeError::invalid_job("no domains supplied");
        assert_eq!(err.to_string(), "Invalid job: no domains supplied");

        let err = MailProbeError::file_error("domains.txt", "not found");
        assert_eq!(err.to_string(), "File error at 'domains.txt': not found");

        let err = MailProbeError::resolver_setup("8.8.8.8:53", "bad config");
        assert!(err.to_string().contains("8.8.8.8:53"));
    }

    #[test]
    fn test_caller_error_classification() {
        assert!(MailProbeError::invalid_job("empty").is_caller_error());
        assert!(MailProbeError::job_not_found("abc").is_caller_error());
        assert!(MailProbeError::config("bad").is_caller_error());
        assert!(!MailProbeError::internal("boom").is_caller_error());
    }

    #[test]
    fn test_from_conversions() {
        let err: MailProbeError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, MailProbeError::Internal { .. }));

        let err: MailProbeError = toml::from_str::<toml::Table>("= nope").unwrap_err().into();
        assert!(matches!(err, MailProbeError::ConfigError { .. }));

        let err: MailProbeError = hickory_resolver::ResolveError::from("no nameservers").into();
        assert!(err.to_string().contains("no nameservers"));
    }
}
