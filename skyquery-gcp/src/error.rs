//! GCP error types.

use thiserror::Error;

/// Result type for GCP operations.
pub type Result<T> = std::result::Result<T, GcpError>;

/// Broad classification of a [`GcpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing configuration or credentials.
    Configuration,
    /// The auth library or SDK failed to build a client.
    Construction,
    /// The caller cancelled or its deadline passed.
    Cancellation,
    /// A call on a constructed client returned an API error.
    Api,
    /// Anything else (transport, serialization, cache misuse).
    Internal,
}

/// GCP service errors.
#[derive(Debug, Error)]
pub enum GcpError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials could not be read or parsed.
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Authentication error (token exchange, metadata server, ADC lookup).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Project ID not specified and not discoverable from the credentials.
    #[error("GCP project ID not specified")]
    ProjectNotSpecified,

    /// A client for `service` could not be constructed.
    #[error("Failed to construct {service} client: {source}")]
    ServiceInit {
        /// Cache key of the API whose client failed.
        service: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<GcpError>,
    },

    /// The caller's context was cancelled while resolving `service`.
    #[error("Resolving {service} was cancelled")]
    Cancelled {
        /// Cache key of the API being resolved.
        service: &'static str,
    },

    /// The caller's deadline passed while resolving `service`.
    #[error("Deadline exceeded while resolving {service}")]
    DeadlineExceeded {
        /// Cache key of the API being resolved.
        service: &'static str,
    },

    /// A cached value was requested with a different type than it was stored with.
    #[error("Cache entry '{key}' does not hold a {expected}")]
    CacheTypeMismatch {
        /// Cache key.
        key: &'static str,
        /// Requested type name.
        expected: &'static str,
    },

    /// Google API error response.
    #[error("{service} API error {code} ({status}): {message}")]
    Api {
        /// Cache key of the API that answered.
        service: &'static str,
        /// HTTP status code.
        code: u16,
        /// Google status string, e.g. `PERMISSION_DENIED`.
        status: String,
        /// Error message.
        message: String,
    },

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GcpError {
    /// Wrap a construction failure with the name of the API it belongs to.
    ///
    /// Cancellation errors pass through untouched so they stay
    /// distinguishable from construction failures.
    pub fn service_init(service: &'static str, source: GcpError) -> Self {
        match source {
            Self::Cancelled { .. }
            | Self::DeadlineExceeded { .. }
            | Self::ServiceInit { .. }
            | Self::CacheTypeMismatch { .. } => source,
            other => Self::ServiceInit {
                service,
                source: Box::new(other),
            },
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceInit { source, .. } => match source.kind() {
                ErrorKind::Configuration => ErrorKind::Configuration,
                ErrorKind::Cancellation => ErrorKind::Cancellation,
                _ => ErrorKind::Construction,
            },
            Self::Config(_)
            | Self::Credentials(_)
            | Self::ProjectNotSpecified => ErrorKind::Configuration,
            Self::Auth(_) => ErrorKind::Construction,
            Self::Cancelled { .. } | Self::DeadlineExceeded { .. } => ErrorKind::Cancellation,
            Self::Api { .. } => ErrorKind::Api,
            Self::CacheTypeMismatch { .. }
            | Self::Network(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is a cancellation or deadline error.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }

    /// Check if this error stems from configuration.
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// The cache key of the API this error concerns, if known.
    pub fn service(&self) -> Option<&'static str> {
        match self {
            Self::ServiceInit { service, .. }
            | Self::Cancelled { service }
            | Self::DeadlineExceeded { service }
            | Self::Api { service, .. } => Some(service),
            _ => None,
        }
    }

    /// HTTP status code of an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            Self::ServiceInit { source, .. } => source.status_code(),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Google status string of an API error.
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::Api { status, .. } if !status.is_empty() => Some(status),
            Self::ServiceInit { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<gcp_auth::Error> for GcpError {
    fn from(e: gcp_auth::Error) -> Self {
        Self::Auth(e.to_string())
    }
}

impl From<skyquery_config::ConfigError> for GcpError {
    fn from(e: skyquery_config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_init_names_service() {
        let err = GcpError::service_init("ComputeService", GcpError::Auth("no ADC".into()));
        assert_eq!(err.service(), Some("ComputeService"));
        assert_eq!(err.kind(), ErrorKind::Construction);
        assert!(err.to_string().contains("ComputeService"));
        assert!(err.to_string().contains("no ADC"));
    }

    #[test]
    fn test_service_init_keeps_configuration_kind() {
        let err = GcpError::service_init("IAMService", GcpError::Credentials("bad json".into()));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_cancellation_passes_through() {
        let err = GcpError::service_init(
            "LoggingService",
            GcpError::Cancelled {
                service: "LoggingService",
            },
        );
        assert!(matches!(err, GcpError::Cancelled { .. }));
        assert!(err.is_cancellation());

        let err = GcpError::service_init(
            "LoggingService",
            GcpError::DeadlineExceeded {
                service: "LoggingService",
            },
        );
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_api_error_accessors() {
        let err = GcpError::Api {
            service: "StorageService",
            code: 403,
            status: "PERMISSION_DENIED".into(),
            message: "denied".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Api);
        assert_eq!(err.status_code(), Some(403));
        assert_eq!(err.status(), Some("PERMISSION_DENIED"));
    }
}
