//! Query embedding: the [`Embedder`] trait used by the search pipeline and
//! [`EmbeddingClient`], which drives a raw [`EmbeddingProvider`] with retries,
//! a per-attempt timeout and one scoped session per attempt.
pub mod mock;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProviderError;
use crate::retry::{RetryPolicy, TokioSleep};

/// Fixed-length vector for one query.
pub type EmbeddingVector = Vec<f32>;

/// Trait for query embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// One round-trip to an embedding service.
///
/// The session is opened by the caller and dropped right after the request,
/// whatever the outcome.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    type Session: Send + Sync;

    fn name(&self) -> &'static str;

    fn open_session(&self) -> Result<Self::Session, ProviderError>;

    async fn request(
        &self,
        session: &Self::Session,
        text: &str,
    ) -> Result<EmbeddingVector, ProviderError>;
}

pub struct EmbeddingClient<P> {
    provider: P,
    retry: RetryPolicy,
    timeout: Duration,
    dimensions: usize,
}

impl<P: EmbeddingProvider> EmbeddingClient<P> {
    pub fn new(provider: P, retry: RetryPolicy, timeout: Duration, dimensions: usize) -> Self {
        Self {
            provider,
            retry,
            timeout,
            dimensions,
        }
    }

    async fn attempt(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        let session = self.provider.open_session()?;
        let outcome = tokio::time::timeout(self.timeout, self.provider.request(&session, text)).await;
        drop(session);

        let vector = outcome.unwrap_or(Err(ProviderError::Timeout {
            provider: self.provider.name(),
            timeout: self.timeout,
        }))?;

        if vector.len() != self.dimensions {
            return Err(ProviderError::permanent(
                self.provider.name(),
                format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    vector.len()
                ),
            ));
        }
        Ok(vector)
    }
}

#[async_trait]
impl<P: EmbeddingProvider> Embedder for EmbeddingClient<P> {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        let vector = self
            .retry
            .run("embedding request", &TokioSleep, |_| self.attempt(text))
            .await?;
        debug!("Embedding generated, length: {}", vector.len());
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
