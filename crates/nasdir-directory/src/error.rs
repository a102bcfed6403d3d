//! Directory error types
//!
//! Errors raised by the connection, cache and discovery layers. The public
//! lookup API converts almost all of them into empty results at the call
//! site; only [`DirectoryError::MissingIdentifier`] is meant to reach callers.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Error that can occur while talking to a directory or using the caches.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Connection errors
    /// The TCP/TLS session to the directory server could not be established.
    #[error("connection to {uri} failed: {message}")]
    ConnectionFailed {
        uri: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// StartTLS negotiation or TLS context setup failed.
    #[error("TLS negotiation failed: {message}")]
    TlsFailed { message: String },

    /// Simple bind was rejected by the server.
    #[error("bind as '{dn}' failed with code {rc}: {message}")]
    BindFailed { dn: String, rc: u32, message: String },

    // Search errors
    /// The server returned a non-success result for a search.
    #[error("search failed with code {rc}: {message}")]
    SearchFailed { rc: u32, message: String },

    /// Protocol-level failure reported by the LDAP client library.
    #[error("LDAP protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Discovery errors
    /// SRV lookup failed or returned nothing usable.
    #[error("DNS lookup for {name} failed: {message}")]
    Dns { name: String, message: String },

    // Cache errors
    /// A cache entry or sentinel could not be written or read.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration errors
    /// Directory configuration is incomplete or inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A user or group operation was invoked without an identifier.
    #[error("{kind} identifier is required")]
    MissingIdentifier { kind: &'static str },
}

impl DirectoryError {
    /// Whether this error came from the network or the directory server
    /// rather than from local state or caller misuse.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DirectoryError::ConnectionFailed { .. }
                | DirectoryError::TlsFailed { .. }
                | DirectoryError::BindFailed { .. }
                | DirectoryError::SearchFailed { .. }
                | DirectoryError::Protocol { .. }
                | DirectoryError::Dns { .. }
        )
    }

    /// Whether this error reports a mistake made by the caller.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DirectoryError::MissingIdentifier { .. } | DirectoryError::InvalidConfiguration { .. }
        )
    }

    /// Result code reported by the server, when there is one.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            DirectoryError::BindFailed { rc, .. } | DirectoryError::SearchFailed { rc, .. } => {
                Some(*rc)
            }
            _ => None,
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(uri: impl Into<String>, message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            uri: uri.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        uri: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            uri: uri.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error with source.
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        DirectoryError::Cache {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        DirectoryError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_classified() {
        assert!(DirectoryError::connection_failed("ldap://dc1:389", "refused").is_connection_error());
        assert!(DirectoryError::BindFailed {
            dn: "cn=admin".to_string(),
            rc: 49,
            message: "invalid credentials".to_string(),
        }
        .is_connection_error());
        assert!(!DirectoryError::cache("disk full").is_connection_error());
    }

    #[test]
    fn test_missing_identifier_is_caller_error() {
        let err = DirectoryError::MissingIdentifier { kind: "user" };
        assert!(err.is_caller_error());
        assert!(!err.is_connection_error());
        assert_eq!(err.to_string(), "user identifier is required");
    }

    #[test]
    fn test_result_code() {
        let err = DirectoryError::SearchFailed {
            rc: 32,
            message: "no such object".to_string(),
        };
        assert_eq!(err.result_code(), Some(32));
        assert_eq!(DirectoryError::cache("disk full").result_code(), None);
    }

    #[test]
    fn test_connection_failed_display_includes_uri() {
        let err = DirectoryError::connection_failed("ldaps://dc1.example.com:636", "timed out");
        assert_eq!(
            err.to_string(),
            "connection to ldaps://dc1.example.com:636 failed: timed out"
        );
    }
}
