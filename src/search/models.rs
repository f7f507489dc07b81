use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::Candidate;
use crate::error::SearchError;

/// One search request, normalized but not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    pub type_filter: Option<String>,
}

/// Bounds a [`Query`] is checked against before any remote call.
#[derive(Debug, Clone)]
pub struct QueryLimits {
    pub max_top_k: usize,
    pub max_query_chars: usize,
    /// Accepted `type_filter` values; empty accepts anything.
    pub document_types: Vec<String>,
}

impl Query {
    /// A blank `type_filter` is treated as no filter.
    pub fn new(text: impl Into<String>, top_k: usize, type_filter: Option<&str>) -> Self {
        Self {
            text: text.into(),
            top_k,
            type_filter: type_filter
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }

    pub fn validate(&self, limits: &QueryLimits) -> Result<(), SearchError> {
        if self.text.trim().is_empty() {
            return Err(SearchError::Validation("Query cannot be empty".to_string()));
        }

        let chars = self.text.chars().count();
        if chars > limits.max_query_chars {
            return Err(SearchError::Validation(format!(
                "Query too long (max {} characters, got {chars})",
                limits.max_query_chars
            )));
        }

        if self.top_k < 1 || self.top_k > limits.max_top_k {
            return Err(SearchError::Validation(format!(
                "top_k must be between 1 and {}",
                limits.max_top_k
            )));
        }

        if let Some(filter) = &self.type_filter {
            if !limits.document_types.is_empty() && !limits.document_types.contains(filter) {
                return Err(SearchError::Validation(format!(
                    "Invalid document type '{filter}'. Must be one of: {}",
                    limits.document_types.join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// A returned document. `relevance_score` comes from the reranker, or is a
/// copy of `similarity` when the reranker was skipped or failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub similarity: f64,
    pub relevance_score: f64,
}

impl RankedResult {
    #[must_use]
    pub fn scored(candidate: Candidate, relevance_score: f64) -> Self {
        Self {
            id: candidate.id,
            content: candidate.content,
            metadata: candidate.metadata,
            similarity: candidate.similarity,
            relevance_score,
        }
    }

    #[must_use]
    pub fn by_similarity(candidate: Candidate) -> Self {
        let score = candidate.similarity;
        Self::scored(candidate, score)
    }
}

/// Which stage left the pipeline with nothing to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The store had no candidates above the threshold.
    NoMatches,
    /// Candidates existed but none had the requested type.
    FilteredOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(rename = "document_type")]
    pub type_filter: Option<String>,
    pub total_results: usize,
    pub results: Vec<RankedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SearchResponse {
    pub(crate) fn new(query: &Query, results: Vec<RankedResult>) -> Self {
        Self {
            query: query.text.clone(),
            type_filter: query.type_filter.clone(),
            total_results: results.len(),
            results,
            message: None,
        }
    }

    /// The explicit "nothing matched" response.
    pub(crate) fn empty(query: &Query, reason: EmptyReason) -> Self {
        let message = match (reason, &query.type_filter) {
            (EmptyReason::FilteredOut, Some(t)) => {
                format!("No {t} documents found matching your query")
            }
            _ => "No documents found matching your query".to_string(),
        };
        Self {
            message: Some(message),
            ..Self::new(query, Vec::new())
        }
    }
}
