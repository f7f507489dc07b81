//! Second-stage relevance scoring.
//!
//! [`RerankClient`] drives a raw [`RerankProvider`] the same way
//! [`EmbeddingClient`](crate::embedder::EmbeddingClient) drives an embedding
//! provider. [`rerank_with_fallback`] is the pipeline boundary: it never
//! fails, it reports either a reranked list or a degraded similarity ordering.
pub mod cohere;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::db::Candidate;
use crate::error::ProviderError;
use crate::retry::{RetryPolicy, TokioSleep};
use crate::search::RankedResult;

/// One scored position in the submitted document list.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f64,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score `documents` against `query`; at most `top_n` hits, best first.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderError>;
}

/// One round-trip to a reranking service, inside a caller-owned session.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    type Session: Send + Sync;

    fn name(&self) -> &'static str;

    fn open_session(&self) -> Result<Self::Session, ProviderError>;

    async fn request(
        &self,
        session: &Self::Session,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderError>;
}

pub struct RerankClient<P> {
    provider: P,
    retry: RetryPolicy,
    timeout: Duration,
    max_documents: usize,
}

impl<P: RerankProvider> RerankClient<P> {
    pub fn new(provider: P, retry: RetryPolicy, timeout: Duration, max_documents: usize) -> Self {
        Self {
            provider,
            retry,
            timeout,
            max_documents,
        }
    }

    async fn attempt(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderError> {
        let session = self.provider.open_session()?;
        let outcome = tokio::time::timeout(
            self.timeout,
            self.provider.request(&session, query, documents, top_n),
        )
        .await;
        drop(session);

        let hits = outcome.unwrap_or(Err(ProviderError::Timeout {
            provider: self.provider.name(),
            timeout: self.timeout,
        }))?;
        check_hits(self.provider.name(), hits, documents.len())
    }
}

#[async_trait]
impl<P: RerankProvider> Reranker for RerankClient<P> {
    fn name(&self) -> &'static str {
        self.provider.name()
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderError> {
        let documents = &documents[..documents.len().min(self.max_documents)];
        let top_n = top_n.min(documents.len());
        self.retry
            .run("rerank request", &TokioSleep, |_| {
                self.attempt(query, documents, top_n)
            })
            .await
    }
}

/// Reject out-of-range indices and non-finite scores; clamp the rest to [0, 1].
fn check_hits(
    provider: &'static str,
    hits: Vec<RerankHit>,
    submitted: usize,
) -> Result<Vec<RerankHit>, ProviderError> {
    hits.into_iter()
        .map(|hit| {
            if hit.index >= submitted {
                return Err(ProviderError::permanent(
                    provider,
                    format!("result index {} out of range for {submitted} documents", hit.index),
                ));
            }
            if !hit.relevance_score.is_finite() {
                return Err(ProviderError::permanent(provider, "non-finite relevance score"));
            }
            Ok(RerankHit {
                relevance_score: hit.relevance_score.clamp(0.0, 1.0),
                ..hit
            })
        })
        .collect()
}

// ── Fallback boundary ────────────────────────────────────────────────

/// Why a request was answered without reranker scores.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradedReason {
    /// No reranker is configured.
    Disabled,
    /// The reranker failed after its retries.
    Failed(ProviderError),
    /// The pipeline deadline passed while the reranker was still working.
    DeadlineExceeded,
    /// The reranker answered without scoring any submitted candidate.
    NoHits,
}

/// Internal record of one fallback. Never shown to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedModeEvent {
    pub reranker: &'static str,
    pub reason: DegradedReason,
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RerankOutcome {
    Reranked(Vec<RankedResult>),
    Degraded {
        results: Vec<RankedResult>,
        event: DegradedModeEvent,
    },
}

impl RerankOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    #[must_use]
    pub fn into_results(self) -> Vec<RankedResult> {
        match self {
            Self::Reranked(results) | Self::Degraded { results, .. } => results,
        }
    }
}

/// Candidates by similarity, best first, `relevance_score := similarity`.
#[must_use]
pub fn fallback_by_similarity(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<RankedResult> {
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    candidates.truncate(top_n);
    candidates.into_iter().map(RankedResult::by_similarity).collect()
}

/// Rerank `candidates`, degrading to similarity order on any failure or
/// when `deadline` passes first.
pub async fn rerank_with_fallback(
    reranker: Option<&Arc<dyn Reranker>>,
    query: &str,
    candidates: Vec<Candidate>,
    top_n: usize,
    deadline: Instant,
) -> RerankOutcome {
    let count = candidates.len();
    let Some(reranker) = reranker else {
        return degrade("disabled", DegradedReason::Disabled, candidates, top_n);
    };

    let documents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
    let outcome =
        tokio::time::timeout_at(deadline, reranker.rerank(query, &documents, top_n)).await;

    match outcome {
        Ok(Ok(hits)) if top_n > 0 && !hits.iter().any(|h| h.index < count) => {
            degrade(reranker.name(), DegradedReason::NoHits, candidates, top_n)
        }
        Ok(Ok(hits)) => {
            debug!("{} reranked {count} candidates into {} hits", reranker.name(), hits.len());
            RerankOutcome::Reranked(apply_hits(candidates, hits, top_n))
        }
        Ok(Err(e)) => degrade(reranker.name(), DegradedReason::Failed(e), candidates, top_n),
        Err(_) => degrade(
            reranker.name(),
            DegradedReason::DeadlineExceeded,
            candidates,
            top_n,
        ),
    }
}

fn degrade(
    reranker: &'static str,
    reason: DegradedReason,
    candidates: Vec<Candidate>,
    top_n: usize,
) -> RerankOutcome {
    let event = DegradedModeEvent {
        reranker,
        reason,
        candidates: candidates.len(),
    };
    match &event.reason {
        DegradedReason::Disabled => debug!("Reranker disabled, ordering by similarity"),
        _ => warn!("Reranking failed, falling back to vector similarity: {event:?}"),
    }
    RerankOutcome::Degraded {
        results: fallback_by_similarity(candidates, top_n),
        event,
    }
}

/// Map hits back onto candidates, best score first. Duplicate indices keep
/// their first occurrence.
fn apply_hits(candidates: Vec<Candidate>, hits: Vec<RerankHit>, top_n: usize) -> Vec<RankedResult> {
    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let mut results: Vec<RankedResult> = hits
        .into_iter()
        .filter_map(|hit| {
            slots
                .get_mut(hit.index)
                .and_then(Option::take)
                .map(|c| RankedResult::scored(c, hit.relevance_score))
        })
        .collect();
    results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    results.truncate(top_n);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(id: &str, similarity: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            content: format!("text {id}"),
            metadata: serde_json::Map::new(),
            similarity,
        }
    }

    struct CountingSession {
        released: Arc<AtomicUsize>,
    }

    impl Drop for CountingSession {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        calls: AtomicUsize,
        released: Arc<AtomicUsize>,
        hang: bool,
        hits: Vec<RerankHit>,
        seen_top_n: AtomicUsize,
    }

    #[async_trait]
    impl RerankProvider for FakeProvider {
        type Session = CountingSession;

        fn name(&self) -> &'static str {
            "fake-rerank"
        }

        fn open_session(&self) -> Result<CountingSession, ProviderError> {
            Ok(CountingSession {
                released: self.released.clone(),
            })
        }

        async fn request(
            &self,
            _session: &CountingSession,
            _query: &str,
            _documents: &[String],
            top_n: usize,
        ) -> Result<Vec<RerankHit>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_top_n.store(top_n, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.hits.clone())
        }
    }

    fn docs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("doc {i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_every_attempt() {
        let provider = FakeProvider {
            hang: true,
            ..FakeProvider::default()
        };
        let released = provider.released.clone();
        let client = RerankClient::new(
            provider,
            RetryPolicy::new(3, Duration::from_millis(10)),
            Duration::from_millis(100),
            1000,
        );

        let err = client.rerank("q", &docs(3), 3).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert_eq!(client.provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_permanent() {
        let provider = FakeProvider {
            hits: vec![RerankHit {
                index: 7,
                relevance_score: 0.9,
            }],
            ..FakeProvider::default()
        };
        let client = RerankClient::new(provider, RetryPolicy::default(), Duration::from_secs(1), 1000);
        let err = client.rerank("q", &docs(2), 2).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { .. }));
        assert_eq!(client.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_bound_limits_documents_and_top_n() {
        let provider = FakeProvider {
            hits: vec![RerankHit {
                index: 1,
                relevance_score: 1.4,
            }],
            ..FakeProvider::default()
        };
        let client = RerankClient::new(provider, RetryPolicy::default(), Duration::from_secs(1), 2);
        let hits = client.rerank("q", &docs(5), 5).await.unwrap();
        assert_eq!(client.provider.seen_top_n.load(Ordering::SeqCst), 2);
        assert_eq!(hits[0].relevance_score, 1.0);
    }

    #[test]
    fn test_fallback_sorts_truncates_and_copies_similarity() {
        let results = fallback_by_similarity(
            vec![candidate("a", 0.6), candidate("b", 0.9), candidate("c", 0.75)],
            2,
        );
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(results.iter().all(|r| r.relevance_score == r.similarity));
    }

    #[test]
    fn test_apply_hits_orders_by_score() {
        let results = apply_hits(
            vec![candidate("a", 0.9), candidate("b", 0.8), candidate("c", 0.7)],
            vec![
                RerankHit { index: 2, relevance_score: 0.95 },
                RerankHit { index: 0, relevance_score: 0.5 },
                RerankHit { index: 2, relevance_score: 0.1 },
            ],
            5,
        );
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(results[0].relevance_score, 0.95);
        assert_eq!(results[0].similarity, 0.7);
    }

    #[tokio::test]
    async fn test_disabled_reranker_degrades() {
        let outcome = rerank_with_fallback(
            None,
            "q",
            vec![candidate("a", 0.6), candidate("b", 0.8)],
            5,
            Instant::now() + Duration::from_secs(10),
        )
        .await;
        match outcome {
            RerankOutcome::Degraded { results, event } => {
                assert_eq!(event.reason, DegradedReason::Disabled);
                assert_eq!(results[0].id, "b");
            }
            RerankOutcome::Reranked(_) => panic!("expected degraded outcome"),
        }
    }

    #[tokio::test]
    async fn test_empty_answer_degrades() {
        let reranker: Arc<dyn Reranker> = Arc::new(RerankClient::new(
            FakeProvider::default(),
            RetryPolicy::default(),
            Duration::from_secs(1),
            1000,
        ));
        let outcome = rerank_with_fallback(
            Some(&reranker),
            "q",
            vec![candidate("a", 0.6), candidate("b", 0.8)],
            2,
            Instant::now() + Duration::from_secs(10),
        )
        .await;
        match outcome {
            RerankOutcome::Degraded { results, event } => {
                assert_eq!(event.reason, DegradedReason::NoHits);
                let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
                assert_eq!(ids, vec!["b", "a"]);
                assert!(results.iter().all(|r| r.relevance_score == r.similarity));
            }
            RerankOutcome::Reranked(_) => panic!("expected degraded outcome"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_degrades() {
        let provider = FakeProvider {
            hang: true,
            ..FakeProvider::default()
        };
        let reranker: Arc<dyn Reranker> = Arc::new(RerankClient::new(
            provider,
            RetryPolicy::default(),
            Duration::from_secs(8),
            1000,
        ));
        let outcome = rerank_with_fallback(
            Some(&reranker),
            "q",
            vec![candidate("a", 0.6)],
            1,
            Instant::now() + Duration::from_secs(2),
        )
        .await;
        match outcome {
            RerankOutcome::Degraded { event, .. } => {
                assert_eq!(event.reason, DegradedReason::DeadlineExceeded);
                assert_eq!(event.reranker, "fake-rerank");
            }
            RerankOutcome::Reranked(_) => panic!("expected degraded outcome"),
        }
    }
}
