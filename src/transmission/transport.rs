//! Blocking POST primitive used by the transmitter.

use crate::transmission::payload::TransmissionPayload;
use thiserror::Error;

/// Collector endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub api_key: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

/// A failed POST. Always retryable from the transmitter's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("collector returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("HTTP client unavailable: {0}")]
    Client(String),
}

/// Sends one payload. Implementations block until the request finishes.
pub trait Transport: Send + Sync {
    fn post(&self, endpoint: &Endpoint, payload: &TransmissionPayload)
        -> Result<(), TransportError>;
}

/// `User-Agent` header value.
pub fn user_agent() -> String {
    format!("usage-agent/{}", crate::VERSION)
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use std::time::Duration;

    /// reqwest-based transport driven on its own current-thread runtime.
    pub struct HttpTransport {
        client: reqwest::Client,
        runtime: tokio::runtime::Runtime,
    }

    impl HttpTransport {
        pub fn new(timeout: Duration) -> Result<Self, TransportError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TransportError::Client(format!("Failed to create runtime: {e}")))?;
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(user_agent())
                .build()
                .map_err(|e| TransportError::Client(e.to_string()))?;

            Ok(Self { client, runtime })
        }

        async fn post_async(
            &self,
            endpoint: &Endpoint,
            payload: &TransmissionPayload,
        ) -> Result<(), TransportError> {
            let response = self
                .client
                .post(&endpoint.url)
                .header("X-API-Key", &endpoint.api_key)
                .json(payload)
                .send()
                .await
                .map_err(|e| {
                    // the body is encoded while the request is built
                    if e.is_builder() {
                        TransportError::Serialization(e.to_string())
                    } else {
                        TransportError::Network(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(())
        }
    }

    impl Transport for HttpTransport {
        fn post(
            &self,
            endpoint: &Endpoint,
            payload: &TransmissionPayload,
        ) -> Result<(), TransportError> {
            self.runtime.block_on(self.post_async(endpoint, payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent() {
        assert!(user_agent().starts_with("usage-agent/"));
    }

    #[test]
    fn test_status_error_display() {
        let err = TransportError::Status {
            status: 503,
            message: "maintenance".into(),
        };
        assert_eq!(err.to_string(), "collector returned 503: maintenance");
    }
}
