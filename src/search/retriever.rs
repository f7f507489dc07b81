use std::time::Duration;

use tracing::debug;

use crate::db::{self, Candidate, MatchRequest, StoreHandle, VectorStore};
use crate::error::ProviderError;
use crate::retry::{RetryPolicy, TokioSleep};

/// Candidate count requested from the store: `min(top_k * factor, cap)`.
#[must_use]
pub fn oversample_limit(top_k: usize, factor: usize, cap: usize) -> usize {
    top_k.saturating_mul(factor).min(cap)
}

/// Nearest-neighbour lookup against whichever store is configured.
///
/// Suspend-capable stores are awaited in place with a per-attempt timeout.
/// Blocking stores run on the worker pool, retrying there with thread sleeps.
pub struct CandidateRetriever {
    store: StoreHandle,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CandidateRetriever {
    pub fn new(store: StoreHandle, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            retry,
            timeout,
        }
    }

    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Up to `limit` candidates with `similarity >= threshold`, best first.
    pub async fn retrieve(
        &self,
        vector: &[f32],
        threshold: f64,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<Candidate>, ProviderError> {
        let request = MatchRequest {
            embedding: vector.to_vec(),
            threshold,
            limit,
            category: category.map(str::to_string),
        };

        let rows = match &self.store {
            StoreHandle::Async(store) => {
                let store = store.as_ref();
                let request = &request;
                self.retry
                    .run("vector search", &TokioSleep, move |_| {
                        self.attempt(store, request)
                    })
                    .await?
            }
            StoreHandle::Blocking(store) => {
                let retry = self.retry;
                db::offload(store.clone(), move |store| {
                    retry.run_blocking("vector search", |_| store.match_documents(&request))
                })
                .await?
            }
        };

        let candidates = rank(rows, threshold, limit);
        debug!(
            "{} returned {} candidates (limit {limit})",
            self.store.name(),
            candidates.len()
        );
        Ok(candidates)
    }

    async fn attempt(
        &self,
        store: &dyn VectorStore,
        request: &MatchRequest,
    ) -> Result<Vec<Candidate>, ProviderError> {
        tokio::time::timeout(self.timeout, store.match_documents(request))
            .await
            .unwrap_or(Err(ProviderError::Timeout {
                provider: store.name(),
                timeout: self.timeout,
            }))
    }
}

/// Enforce descending similarity, the threshold and the limit regardless of
/// what the store returned. Ties keep store order; NaN scores are dropped.
fn rank(mut rows: Vec<Candidate>, threshold: f64, limit: usize) -> Vec<Candidate> {
    rows.retain(|c| c.similarity >= threshold);
    rows.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    rows.truncate(limit);
    rows
}
