//! Error types for the Slack provider.
//!
//! [`ClientError`] is what the remote directory returns. [`ProviderError`] is
//! what every resource, data source and provider operation returns; remote
//! failures are wrapped with the action that was being attempted so partial
//! progress can be diagnosed.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Result type alias using [`ClientError`].
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by a [`DirectoryClient`](crate::client::DirectoryClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The Slack API answered `ok: false` with an error code.
    #[error("{code}")]
    Api {
        /// The Slack error code (e.g. `channel_not_found`).
        code: String,
    },

    /// The API rejected the call because of rate limiting.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait as announced by the `Retry-After` header.
        retry_after_secs: u64,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API answered with something that is not a Slack envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Create an API error from a Slack error code.
    pub fn api(code: impl Into<String>) -> Self {
        Self::Api { code: code.into() }
    }

    /// The Slack error code, if this is an API error.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code } => Some(code),
            _ => None,
        }
    }

    /// Whether this is an API error with the given code.
    pub fn is(&self, code: &str) -> bool {
        self.code() == Some(code)
    }
}

/// Errors that can occur in provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A natural-key lookup matched more than one record.
    #[error("Ambiguous match: {0}")]
    AmbiguousMatch(String),

    /// A remote call failed.
    #[error("Unable to {action}: {source}")]
    Client {
        /// What was being attempted.
        action: String,
        /// The underlying remote error.
        #[source]
        source: ClientError,
    },

    /// The remote object exists but was not fully configured.
    #[error("{id} was created but not fully configured: {source}")]
    PartiallyApplied {
        /// ID of the remote object that now exists.
        id: String,
        /// The failure that stopped configuration.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Wrap a remote error with the action that was being attempted.
    pub fn client(action: impl Into<String>, source: ClientError) -> Self {
        Self::Client {
            action: action.into(),
            source,
        }
    }

    /// Mark `source` as having happened after `id` was created remotely.
    pub fn partially_applied(id: impl Into<String>, source: ProviderError) -> Self {
        Self::PartiallyApplied {
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::InvalidRequest(msg)
            | Self::AmbiguousMatch(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Client { source, .. } => source.to_string(),
            Self::PartiallyApplied { source, .. } => source.message(),
        }
    }

    /// The Slack error code behind this error, if any.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::Client { source, .. } => source.code(),
            Self::PartiallyApplied { source, .. } => source.remote_code(),
            _ => None,
        }
    }
}

impl From<&ProviderError> for Diagnostic {
    fn from(err: &ProviderError) -> Self {
        let summary = match err {
            ProviderError::Validation(_) | ProviderError::InvalidRequest(_) => {
                "Invalid configuration"
            },
            ProviderError::Configuration(_) => "Provider configuration error",
            ProviderError::NotFound(_) => "Not Found",
            _ => "Client Error",
        };
        Diagnostic::error(summary).with_detail(err.to_string())
    }
}
