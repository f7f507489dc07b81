//! The search pipeline:
//! `Validate → Embed → Retrieve → Filter → Rerank (or fallback) → Truncate → Shape`.
//!
//! Stages run strictly in order within one request. All remote stages share
//! one deadline; embed and retrieve fail when it passes, rerank degrades.
pub mod filter;
pub mod models;
pub mod retriever;

pub use filter::TypeFilter;
pub use models::{EmptyReason, Query, QueryLimits, RankedResult, SearchResponse};
pub use retriever::{CandidateRetriever, oversample_limit};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::embedder::Embedder;
use crate::error::SearchError;
use crate::rerank::{self, RerankOutcome, Reranker};

/// Pipeline tuning, usually built from the `search` config section.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub limits: QueryLimits,
    pub match_threshold: f64,
    pub oversample_factor: usize,
    pub oversample_cap: usize,
    /// Also send the type filter to the store, not just apply it locally.
    pub push_down_type_filter: bool,
    pub pipeline_budget: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limits: QueryLimits {
                max_top_k: 100,
                max_query_chars: 1000,
                document_types: Vec::new(),
            },
            match_threshold: 0.5,
            oversample_factor: 2,
            oversample_cap: 100,
            push_down_type_filter: false,
            pipeline_budget: Duration::from_secs(10),
        }
    }
}

pub struct SearchOrchestrator {
    embedder: Arc<dyn Embedder>,
    retriever: CandidateRetriever,
    reranker: Option<Arc<dyn Reranker>>,
    settings: SearchSettings,
    degraded: AtomicU64,
}

impl SearchOrchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: CandidateRetriever,
        reranker: Option<Arc<dyn Reranker>>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            embedder,
            retriever,
            reranker,
            settings,
            degraded: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Number of requests answered in degraded mode since startup.
    #[must_use]
    pub fn degraded_count(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    pub async fn search(
        &self,
        text: &str,
        top_k: usize,
        type_filter: Option<&str>,
    ) -> Result<SearchResponse, SearchError> {
        self.execute(&Query::new(text, top_k, type_filter)).await
    }

    pub async fn execute(&self, query: &Query) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        query.validate(&self.settings.limits)?;

        let budget = self.settings.pipeline_budget;
        let deadline = started + budget;
        let type_filter = TypeFilter::new(query.type_filter.as_deref());

        debug!("Embedding query: {:.50}", query.text);
        let vector = tokio::time::timeout_at(deadline, self.embedder.embed(&query.text))
            .await
            .map_err(|_| SearchError::DeadlineExceeded {
                stage: "embed",
                budget,
            })?
            .map_err(SearchError::Embedding)?;

        let limit = oversample_limit(
            query.top_k,
            self.settings.oversample_factor,
            self.settings.oversample_cap,
        );
        let push_down = if self.settings.push_down_type_filter {
            query.type_filter.as_deref()
        } else {
            None
        };
        debug!("Retrieving up to {limit} candidates");
        let candidates = tokio::time::timeout_at(
            deadline,
            self.retriever
                .retrieve(&vector, self.settings.match_threshold, limit, push_down),
        )
        .await
        .map_err(|_| SearchError::DeadlineExceeded {
            stage: "retrieve",
            budget,
        })?
        .map_err(SearchError::Retrieval)?;
        drop(vector);

        if candidates.is_empty() {
            info!("No candidates for query ({:?})", started.elapsed());
            return Ok(SearchResponse::empty(query, EmptyReason::NoMatches));
        }

        let candidates = type_filter.apply(candidates);
        if candidates.is_empty() {
            info!(
                "No {} candidates for query ({:?})",
                query.type_filter.as_deref().unwrap_or_default(),
                started.elapsed()
            );
            return Ok(SearchResponse::empty(query, EmptyReason::FilteredOut));
        }

        let top_n = query.top_k.min(candidates.len());
        debug!("Reranking {} candidates, top_n={top_n}", candidates.len());
        let outcome = rerank::rerank_with_fallback(
            self.reranker.as_ref(),
            &query.text,
            candidates,
            top_n,
            deadline,
        )
        .await;
        if let RerankOutcome::Degraded { .. } = &outcome {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }

        let mut results = outcome.into_results();
        results.truncate(query.top_k);

        info!(
            "Search returned {} results in {:?}",
            results.len(),
            started.elapsed()
        );
        Ok(SearchResponse::new(query, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        BlockingVectorStore, Candidate, DocumentPage, DocumentRow, MatchRequest, StoreHandle,
        VectorStore,
    };
    use crate::embedder::{EmbeddingClient, EmbeddingProvider, EmbeddingVector};
    use crate::error::{ErrorKind, ProviderError};
    use crate::rerank::RerankHit;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn candidate(id: &str, doc_type: &str, similarity: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            content: format!("content of {id}"),
            metadata: json!({ "type": doc_type }).as_object().cloned().unwrap(),
            similarity,
        }
    }

    #[derive(Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
        fail: Option<ProviderError>,
        hang: bool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<EmbeddingVector, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            match &self.fail {
                Some(e) => Err(e.clone()),
                None => Ok(vec![0.1, 0.2, 0.3]),
            }
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[derive(Default)]
    struct FakeStore {
        rows: Vec<Candidate>,
        limits: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        fn name(&self) -> &'static str {
            "fake-store"
        }

        async fn match_documents(&self, request: &MatchRequest) -> Result<Vec<Candidate>, ProviderError> {
            self.limits.lock().unwrap().push(request.limit);
            Ok(self.rows.clone())
        }

        async fn browse_by_type(&self, _: &str, _: usize, _: usize) -> Result<Vec<DocumentRow>, ProviderError> {
            Ok(Vec::new())
        }

        async fn get_document(&self, _: &str) -> Result<Option<DocumentRow>, ProviderError> {
            Ok(None)
        }

        async fn list_documents(&self, _: usize, _: usize, _: bool) -> Result<DocumentPage, ProviderError> {
            Ok(DocumentPage::default())
        }
    }

    enum Mode {
        /// Scores for submitted positions, best first.
        Scores(Vec<f64>),
        /// Always fail with a timeout.
        Timeout,
        /// Return more hits than asked for.
        Overflow,
    }

    struct FakeReranker {
        mode: Mode,
        calls: AtomicUsize,
        seen: Mutex<Vec<(usize, usize)>>,
    }

    impl FakeReranker {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Reranker for FakeReranker {
        fn name(&self) -> &'static str {
            "fake-rerank"
        }

        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
            top_n: usize,
        ) -> Result<Vec<RerankHit>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((documents.len(), top_n));
            match &self.mode {
                Mode::Scores(scores) => Ok(scores
                    .iter()
                    .enumerate()
                    .take(top_n)
                    .map(|(index, &relevance_score)| RerankHit {
                        index,
                        relevance_score,
                    })
                    .collect()),
                Mode::Timeout => Err(ProviderError::Timeout {
                    provider: "fake-rerank",
                    timeout: Duration::from_secs(8),
                }),
                Mode::Overflow => Ok((0..documents.len())
                    .map(|index| RerankHit {
                        index,
                        relevance_score: 0.5,
                    })
                    .collect()),
            }
        }
    }

    struct Harness {
        embedder: Arc<FakeEmbedder>,
        store: Arc<FakeStore>,
        reranker: Arc<FakeReranker>,
        orchestrator: SearchOrchestrator,
    }

    fn harness(embedder: FakeEmbedder, rows: Vec<Candidate>, reranker: FakeReranker) -> Harness {
        let embedder = Arc::new(embedder);
        let store = Arc::new(FakeStore {
            rows,
            ..FakeStore::default()
        });
        let reranker = Arc::new(reranker);
        let retriever = CandidateRetriever::new(
            StoreHandle::Async(store.clone()),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(5),
        );
        let mut settings = SearchSettings::default();
        settings.limits.document_types = vec![
            "practice_guide".to_string(),
            "agreement".to_string(),
            "clause".to_string(),
        ];
        let orchestrator = SearchOrchestrator::new(
            embedder.clone(),
            retriever,
            Some(reranker.clone() as Arc<dyn Reranker>),
            settings,
        );
        Harness {
            embedder,
            store,
            reranker,
            orchestrator,
        }
    }

    fn ten_candidates() -> Vec<Candidate> {
        (0..10)
            .map(|i| candidate(&format!("doc-{i}"), "agreement", 0.9 - 0.04 * i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_reranked_results_sorted_by_relevance() {
        let scores = vec![0.71, 0.99, 0.85, 0.93, 0.7];
        let h = harness(
            FakeEmbedder::default(),
            ten_candidates(),
            FakeReranker::new(Mode::Scores(scores)),
        );

        let response = h.orchestrator.search("SAFE agreement", 5, None).await.unwrap();
        assert_eq!(response.total_results, 5);
        assert_eq!(response.results.len(), 5);
        let relevance: Vec<f64> = response.results.iter().map(|r| r.relevance_score).collect();
        assert_eq!(relevance, vec![0.99, 0.93, 0.85, 0.71, 0.7]);
        assert_eq!(response.results[0].id, "doc-1");
        assert_eq!(response.query, "SAFE agreement");
        assert_eq!(h.store.limits.lock().unwrap().as_slice(), &[10]);
        assert_eq!(h.orchestrator.degraded_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_narrows_what_the_reranker_sees() {
        let rows = vec![
            candidate("p1", "practice_guide", 0.9),
            candidate("a1", "agreement", 0.85),
            candidate("c1", "clause", 0.8),
            candidate("a2", "agreement", 0.75),
            candidate("p2", "practice_guide", 0.7),
            candidate("c2", "clause", 0.65),
            candidate("a3", "agreement", 0.6),
            candidate("c3", "clause", 0.55),
        ];
        let h = harness(
            FakeEmbedder::default(),
            rows,
            FakeReranker::new(Mode::Scores(vec![0.9, 0.8, 0.7])),
        );

        let response = h
            .orchestrator
            .search("SAFE agreement", 5, Some("agreement"))
            .await
            .unwrap();
        assert_eq!(h.reranker.seen.lock().unwrap().as_slice(), &[(3, 3)]);
        assert_eq!(response.total_results, 3);
        assert_eq!(response.type_filter.as_deref(), Some("agreement"));
        assert!(response.results.iter().all(|r| r.metadata["type"] == "agreement"));
    }

    #[tokio::test]
    async fn test_reranker_failure_falls_back_to_similarity() {
        let rows = vec![
            candidate("a1", "agreement", 0.62),
            candidate("c1", "clause", 0.95),
            candidate("a2", "agreement", 0.88),
            candidate("a3", "agreement", 0.71),
        ];
        let h = harness(
            FakeEmbedder::default(),
            rows,
            FakeReranker::new(Mode::Timeout),
        );

        let response = h
            .orchestrator
            .search("SAFE agreement", 2, Some("agreement"))
            .await
            .unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a3"]);
        assert!(response.results.iter().all(|r| r.relevance_score == r.similarity));
        assert!(response.message.is_none());
        assert_eq!(h.orchestrator.degraded_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_retrieval_short_circuits() {
        let h = harness(
            FakeEmbedder::default(),
            Vec::new(),
            FakeReranker::new(Mode::Scores(vec![])),
        );
        let response = h.orchestrator.search("anything", 10, None).await.unwrap();
        assert_eq!(response.total_results, 0);
        assert_eq!(
            response.message.as_deref(),
            Some("No documents found matching your query")
        );
        assert_eq!(h.reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filter_removing_everything_short_circuits() {
        let h = harness(
            FakeEmbedder::default(),
            vec![candidate("c1", "clause", 0.9)],
            FakeReranker::new(Mode::Scores(vec![0.9])),
        );
        let response = h
            .orchestrator
            .search("vesting", 10, Some("practice_guide"))
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(
            response.message.as_deref(),
            Some("No practice_guide documents found matching your query")
        );
        assert_eq!(h.reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_truncates_overlong_reranker_output() {
        let h = harness(
            FakeEmbedder::default(),
            ten_candidates(),
            FakeReranker::new(Mode::Overflow),
        );
        let response = h.orchestrator.search("q", 3, None).await.unwrap();
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.total_results, 3);
    }

    #[tokio::test]
    async fn test_results_never_exceed_top_k() {
        for top_k in [1, 2, 7, 10, 50, 100] {
            let h = harness(
                FakeEmbedder::default(),
                ten_candidates(),
                FakeReranker::new(Mode::Overflow),
            );
            let response = h.orchestrator.search("q", top_k, None).await.unwrap();
            assert!(response.results.len() <= top_k);
            assert_eq!(
                h.store.limits.lock().unwrap().as_slice(),
                &[(top_k * 2).min(100)]
            );
        }
    }

    #[tokio::test]
    async fn test_validation_makes_no_remote_calls() {
        let h = harness(
            FakeEmbedder::default(),
            ten_candidates(),
            FakeReranker::new(Mode::Scores(vec![])),
        );
        for (text, top_k) in [("q", 0), ("q", 101), ("", 5)] {
            let err = h.orchestrator.search(text, top_k, None).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
        }
        let long = "x".repeat(1001);
        assert!(h.orchestrator.search(&long, 5, None).await.is_err());
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.limits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let h = harness(
            FakeEmbedder {
                fail: Some(ProviderError::from_status("openai", 503, "overloaded")),
                ..FakeEmbedder::default()
            },
            ten_candidates(),
            FakeReranker::new(Mode::Scores(vec![])),
        );
        let err = h.orchestrator.search("q", 5, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Embedding(_)));
        assert_eq!(err.kind(), ErrorKind::TransientProviderError);
        assert!(h.store.limits.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_deadline() {
        let h = harness(
            FakeEmbedder {
                hang: true,
                ..FakeEmbedder::default()
            },
            ten_candidates(),
            FakeReranker::new(Mode::Scores(vec![])),
        );
        let err = h.orchestrator.search("q", 5, None).await.unwrap_err();
        assert_eq!(
            err,
            SearchError::DeadlineExceeded {
                stage: "embed",
                budget: Duration::from_secs(10),
            }
        );
        assert_eq!(err.kind(), ErrorKind::TransientProviderError);
    }

    #[tokio::test]
    async fn test_empty_store_with_filter_uses_generic_message() {
        let h = harness(
            FakeEmbedder::default(),
            Vec::new(),
            FakeReranker::new(Mode::Scores(vec![])),
        );
        let response = h
            .orchestrator
            .search("vesting", 10, Some("clause"))
            .await
            .unwrap();
        assert_eq!(
            response.message.as_deref(),
            Some("No documents found matching your query")
        );
        assert_eq!(response.type_filter.as_deref(), Some("clause"));
    }

    #[tokio::test]
    async fn test_reranker_with_no_hits_falls_back() {
        let h = harness(
            FakeEmbedder::default(),
            ten_candidates(),
            FakeReranker::new(Mode::Scores(vec![])),
        );
        let response = h.orchestrator.search("q", 3, None).await.unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["doc-0", "doc-1", "doc-2"]);
        assert!(response.results.iter().all(|r| r.relevance_score == r.similarity));
        assert_eq!(h.orchestrator.degraded_count(), 1);
    }

    // ── Stalled collaborators ────────────────────────────────────────

    /// An embedding service that accepts the request and never answers.
    struct SilentEmbeddingService;

    #[async_trait]
    impl EmbeddingProvider for SilentEmbeddingService {
        type Session = ();

        fn name(&self) -> &'static str {
            "openai"
        }

        fn open_session(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn request(&self, _session: &(), _text: &str) -> Result<EmbeddingVector, ProviderError> {
            std::future::pending().await
        }
    }

    /// A store that never answers (async) or answers after `delay` (blocking).
    struct StalledStore {
        delay: Duration,
    }

    #[async_trait]
    impl VectorStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn match_documents(&self, _: &MatchRequest) -> Result<Vec<Candidate>, ProviderError> {
            std::future::pending().await
        }

        async fn browse_by_type(&self, _: &str, _: usize, _: usize) -> Result<Vec<DocumentRow>, ProviderError> {
            Ok(Vec::new())
        }

        async fn get_document(&self, _: &str) -> Result<Option<DocumentRow>, ProviderError> {
            Ok(None)
        }

        async fn list_documents(&self, _: usize, _: usize, _: bool) -> Result<DocumentPage, ProviderError> {
            Ok(DocumentPage::default())
        }
    }

    impl BlockingVectorStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        fn match_documents(&self, _: &MatchRequest) -> Result<Vec<Candidate>, ProviderError> {
            std::thread::sleep(self.delay);
            Ok(ten_candidates())
        }

        fn browse_by_type(&self, _: &str, _: usize, _: usize) -> Result<Vec<DocumentRow>, ProviderError> {
            Ok(Vec::new())
        }

        fn get_document(&self, _: &str) -> Result<Option<DocumentRow>, ProviderError> {
            Ok(None)
        }

        fn list_documents(&self, _: usize, _: usize, _: bool) -> Result<DocumentPage, ProviderError> {
            Ok(DocumentPage::default())
        }
    }

    fn pipeline(embedder: Arc<dyn Embedder>, store: StoreHandle, budget: Duration) -> SearchOrchestrator {
        let retriever = CandidateRetriever::new(
            store,
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(5),
        );
        let settings = SearchSettings {
            pipeline_budget: budget,
            ..SearchSettings::default()
        };
        SearchOrchestrator::new(embedder, retriever, None, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeouts_surface_as_transient() {
        let embedder = EmbeddingClient::new(
            SilentEmbeddingService,
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_millis(100),
            3,
        );
        let search = pipeline(
            Arc::new(embedder),
            StoreHandle::Async(Arc::new(FakeStore::default())),
            Duration::from_secs(10),
        );

        let err = search.search("q", 5, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Embedding(ProviderError::Timeout { .. })));
        assert_eq!(err.kind(), ErrorKind::TransientProviderError);
        let envelope = err.to_envelope();
        assert_eq!(envelope.error_type, ErrorKind::TransientProviderError);
        assert_eq!(envelope.details["stage"], json!("embed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_past_deadline() {
        let search = pipeline(
            Arc::new(FakeEmbedder::default()),
            StoreHandle::Async(Arc::new(StalledStore {
                delay: Duration::ZERO,
            })),
            Duration::from_secs(10),
        );

        let err = search.search("q", 5, None).await.unwrap_err();
        assert_eq!(
            err,
            SearchError::DeadlineExceeded {
                stage: "retrieve",
                budget: Duration::from_secs(10),
            }
        );
        assert_eq!(err.kind(), ErrorKind::TransientProviderError);
    }

    #[tokio::test]
    async fn test_blocking_retrieve_past_deadline() {
        // Real clock: a blocking call holds the paused clock still.
        let search = pipeline(
            Arc::new(FakeEmbedder::default()),
            StoreHandle::Blocking(Arc::new(StalledStore {
                delay: Duration::from_millis(300),
            })),
            Duration::from_millis(50),
        );

        let err = search.search("q", 5, None).await.unwrap_err();
        assert_eq!(
            err,
            SearchError::DeadlineExceeded {
                stage: "retrieve",
                budget: Duration::from_millis(50),
            }
        );
    }
}
