//! Error taxonomy for the discovery engine and its collaborators.

use thiserror::Error;

/// Errors raised by collaborators and the polling controller.
///
/// Only [`DiscoveryError::Authentication`] and [`DiscoveryError::Cancelled`]
/// abort a scan; everything else is scoped to the entry being processed.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{service} rejected the session credentials")]
    Authentication { service: &'static str },

    #[error("discovery cancelled")]
    Cancelled,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("{0}")]
    Unavailable(String),
}

impl DiscoveryError {
    /// Whether the error must abort the remaining entries of a scan.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Authentication { .. } | DiscoveryError::Cancelled
        )
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DiscoveryError::Status { status, .. } => {
                *status == 429 || *status == 408 || (500..600).contains(status)
            }
            DiscoveryError::Unavailable(_) => true,
            _ => false,
        }
    }

    pub fn decode(service: &'static str, message: impl Into<String>) -> Self {
        DiscoveryError::Decode {
            service,
            message: message.into(),
        }
    }
}

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DiscoveryError::Cancelled.is_fatal());
        assert!(DiscoveryError::Authentication { service: "qbittorrent" }.is_fatal());
        assert!(!DiscoveryError::Status { service: "nyaa", status: 503 }.is_fatal());
        assert!(!DiscoveryError::decode("myanimelist", "bad json").is_fatal());
        assert!(!DiscoveryError::Unavailable("offline".to_string()).is_fatal());
    }

    #[test]
    fn test_transient_classification() {
        assert!(DiscoveryError::Status { service: "nyaa", status: 503 }.is_transient());
        assert!(DiscoveryError::Status { service: "nyaa", status: 429 }.is_transient());
        assert!(!DiscoveryError::Status { service: "nyaa", status: 404 }.is_transient());
        assert!(!DiscoveryError::Cancelled.is_transient());
        assert!(!DiscoveryError::decode("nyaa", "truncated").is_transient());
    }

    #[test]
    fn test_display() {
        let err = DiscoveryError::Status {
            service: "nyaa",
            status: 502,
        };
        assert_eq!(err.to_string(), "nyaa returned status 502");
    }
}
