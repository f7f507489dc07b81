//! Error taxonomy shared by every pipeline stage, plus the caller-facing
//! [`ErrorEnvelope`].
//!
//! Internal errors keep the upstream detail for logging. Envelopes only carry
//! a stable kind, a generic message and a small details map.
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::retry::Transient;

/// Failure talking to one of the remote collaborators (embedding provider,
/// vector store, reranking provider).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider} did not answer within {timeout:?}")]
    Timeout {
        provider: &'static str,
        timeout: Duration,
    },

    #[error("{provider} transient failure (status {status:?}): {message}")]
    Transient {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} rejected the request (status {status:?}): {message}")]
    Permanent {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },
}

impl ProviderError {
    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            provider,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Permanent {
            provider,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP status: 408, 429 and 5xx are worth retrying.
    pub fn from_status(provider: &'static str, status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        if status == 408 || status == 429 || status >= 500 {
            Self::Transient {
                provider,
                status: Some(status),
                message,
            }
        } else {
            Self::Permanent {
                provider,
                status: Some(status),
                message,
            }
        }
    }

    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Permanent { provider, .. } => provider,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Timeout { .. } => None,
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }

    /// Timeouts are transient: the provider may answer on a later request.
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } | Self::Transient { .. } => ErrorKind::TransientProviderError,
            Self::Permanent { .. } => ErrorKind::PermanentProviderError,
        }
    }
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        !matches!(self, Self::Permanent { .. })
    }
}

/// Errors surfaced by [`SearchOrchestrator::search`](crate::search::SearchOrchestrator::search).
///
/// Reranking failures never appear here; they degrade to similarity ordering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    Validation(String),

    #[error("embedding stage failed: {0}")]
    Embedding(ProviderError),

    #[error("retrieval stage failed: {0}")]
    Retrieval(ProviderError),

    #[error("{stage} stage exceeded the pipeline budget of {budget:?}")]
    DeadlineExceeded { stage: &'static str, budget: Duration },
}

impl SearchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Embedding(e) | Self::Retrieval(e) => e.kind(),
            Self::DeadlineExceeded { .. } => ErrorKind::TransientProviderError,
        }
    }

    /// Build the caller-facing envelope. Upstream messages are left out.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Validation(msg) => ErrorEnvelope::new(self.kind(), msg.clone()),
            Self::Embedding(e) => provider_envelope("embed", "embedding provider", e),
            Self::Retrieval(e) => provider_envelope("retrieve", "document store", e),
            Self::DeadlineExceeded { stage, budget } => ErrorEnvelope::new(
                self.kind(),
                format!("Search did not complete within {} ms", budget.as_millis()),
            )
            .with_detail("stage", json!(stage))
            .with_detail("budget_ms", json!(budget.as_millis() as u64)),
        }
    }
}

fn provider_envelope(stage: &str, what: &str, err: &ProviderError) -> ErrorEnvelope {
    let message = match err {
        ProviderError::Timeout { .. } => format!("The {what} timed out"),
        ProviderError::Transient { .. } => format!("The {what} is temporarily unavailable"),
        ProviderError::Permanent { .. } => format!("The {what} rejected the request"),
    };
    let mut envelope = ErrorEnvelope::new(err.kind(), message)
        .with_detail("stage", json!(stage))
        .with_detail("provider", json!(err.provider()));
    if let Some(status) = err.status() {
        envelope = envelope.with_detail("status", json!(status));
    }
    envelope
}

/// Errors from the browse / get / list catalog operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("invalid catalog request: {0}")]
    Validation(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document store failed: {0}")]
    Store(ProviderError),
}

impl CatalogError {
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Validation(msg) => ErrorEnvelope::new(ErrorKind::ValidationError, msg.clone()),
            Self::NotFound(id) => ErrorEnvelope::new(
                ErrorKind::NotFound,
                format!("Document not found with ID: {id}"),
            )
            .with_detail(
                "suggestion",
                json!("Use list_all_legal_documents to browse available documents"),
            ),
            Self::Store(e) => provider_envelope("catalog", "document store", e),
        }
    }
}

/// Stable error categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    TransientProviderError,
    PermanentProviderError,
    NotFound,
}

/// Structured error returned in place of a response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    pub error_type: ErrorKind,
    pub message: String,
    pub details: Map<String, Value>,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: true,
            error_type: kind,
            message: message.into(),
            details: Map::new(),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

impl From<SearchError> for ErrorEnvelope {
    fn from(err: SearchError) -> Self {
        err.to_envelope()
    }
}

impl From<CatalogError> for ErrorEnvelope {
    fn from(err: CatalogError) -> Self {
        err.to_envelope()
    }
}
