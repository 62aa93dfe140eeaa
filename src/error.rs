//! Error types for trapmetrics
//!
//! Construction-time errors (configuration, check resolution) are returned to the
//! caller. Errors raised inside the periodic flush loop are logged and never
//! terminate the loop.

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("{matched} check bundles match search criteria ({active} active); refusing to guess")]
    AmbiguousCheck { matched: usize, active: usize },

    #[error("Check not found: {0}")]
    CheckNotFound(String),

    #[error("Broker {cid} is not usable: {reason}")]
    InvalidBroker { cid: String, reason: String },

    #[error("No viable broker found (eliminated by {constraint})")]
    NoViableBroker { constraint: String },

    #[error("Unable to match submission URL host '{host}' to any broker detail")]
    BrokerCnMismatch { host: String },

    #[error("API request to {endpoint} failed: {source}")]
    ApiRequest {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API request to {endpoint} returned {status}: {body}")]
    ApiStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Malformed API response from {endpoint}: {reason}")]
    ApiDecode { endpoint: String, reason: String },

    #[error("Submission to {url} failed: {reason}")]
    Submit { url: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether the error came from a remote call and may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ApiRequest { .. } | Self::ApiStatus { .. } | Self::Submit { .. }
        )
    }
}

/// Convenience type alias for Results
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_creates() {
        let err = ClientError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_ambiguous_check_names_count() {
        let err = ClientError::AmbiguousCheck {
            matched: 3,
            active: 2,
        };
        assert!(err.to_string().contains("(2 active)"));
    }

    #[test]
    fn test_no_viable_broker_names_constraint() {
        let err = ClientError::NoViableBroker {
            constraint: "reachability".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No viable broker found (eliminated by reachability)"
        );
    }

    #[test]
    fn test_invalid_broker_names_cid_and_reason() {
        let err = ClientError::InvalidBroker {
            cid: "/broker/1".to_string(),
            reason: "no active detail".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/broker/1"));
        assert!(msg.contains("no active detail"));
    }

    #[test]
    fn test_transient_classification() {
        let status = ClientError::ApiStatus {
            endpoint: "/check/1".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(status.is_transient());
        assert!(
            !ClientError::AmbiguousCheck {
                matched: 3,
                active: 3
            }
            .is_transient()
        );
        assert!(!ClientError::Config("x".to_string()).is_transient());
    }
}
