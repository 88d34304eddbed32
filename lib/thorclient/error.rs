use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum ThorClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build http client: {0}")]
    Builder(#[source] reqwest::Error),
    #[error("failed to GET from thorchain {url}: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },
    #[error("status code: {status} returned from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("{context}: {source}")]
    Decode {
        context: &'static str,
        source: serde_json::Error,
    },
    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        source: Box<ThorClientError>,
    },
    #[error("node account is not whitelisted after {0:?}")]
    NotWhitelisted(Duration),
    #[error("node account status {0}, will not be able to forward transaction to thorchain")]
    InactiveNode(String),
    #[error("signer address is empty")]
    EmptySignerAddress,
    #[error("failed to find pubkey for this node account")]
    MissingNodePubKey,
    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl ThorClientError {
    /// Prefixes the error with a stable operator-facing message.
    pub fn context(self, context: &'static str) -> Self {
        Self::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Connection failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { source, .. } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.is_request()
                    || source.is_body()
            }
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Context { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Numeric HTTP status carried by the innermost transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Request { source, .. } => source.status().map(|status| status.as_u16()),
            Self::Context { source, .. } => source.status(),
            _ => None,
        }
    }
}
