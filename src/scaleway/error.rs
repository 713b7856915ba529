//! Error types for the Scaleway backend.

use crate::backend::{BackendError, TransientError};
use crate::command::CommandError;
use crate::config::ConfigError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

const TOO_MANY_REQUESTS: u16 = 429;

/// Errors raised by the Scaleway backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request is missing a required field or asks for
    /// something the provider cannot do.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not available in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when a named resource does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of resource looked up.
        kind: &'static str,
        /// Name or identifier used for the lookup.
        name: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("API request failed with status {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },
    /// Raised when the request never produced a response.
    #[error("API transport error: {message}")]
    Transport {
        /// Error reported by the HTTP client.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode API response: {message}")]
    Decode {
        /// Parser error.
        message: String,
    },
    /// Raised when a key pair cannot be generated locally.
    #[error("key generation failed: {message}")]
    KeyGeneration {
        /// Description of the failure.
        message: String,
    },
    /// Wrapper for provider SDK failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

impl TransientError for ScalewayBackendError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == TOO_MANY_REQUESTS || *status >= 500,
            Self::Transport { .. } => true,
            _ => false,
        }
    }
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<reqwest::Error> for ScalewayBackendError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}

impl From<BackendError> for ScalewayBackendError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Validation(field) => Self::Validation(field),
        }
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<CommandError> for ScalewayBackendError {
    fn from(value: CommandError) -> Self {
        Self::KeyGeneration {
            message: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn http(status: u16) -> ScalewayBackendError {
        ScalewayBackendError::Http {
            status,
            message: String::from("boom"),
        }
    }

    #[rstest]
    #[case::throttled(429, true)]
    #[case::server_error(500, true)]
    #[case::unavailable(503, true)]
    #[case::bad_request(400, false)]
    #[case::forbidden(403, false)]
    #[case::not_found(404, false)]
    fn http_status_decides_transience(#[case] status: u16, #[case] transient: bool) {
        assert_eq!(http(status).is_transient(), transient);
    }

    #[test]
    fn transport_errors_are_transient() {
        let err = ScalewayBackendError::Transport {
            message: String::from("connection reset"),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn validation_errors_are_permanent() {
        let err = ScalewayBackendError::from(BackendError::Validation(String::from("name")));
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "invalid request: name");
    }
}
