//! Cohere `/v2/rerank` provider.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RerankHit, RerankProvider};
use crate::error::ProviderError;
use crate::http::{self, ScopedSession};

const PROVIDER: &str = "cohere";

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

pub struct CohereProvider {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl CohereProvider {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl RerankProvider for CohereProvider {
    type Session = ScopedSession;

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn open_session(&self) -> Result<ScopedSession, ProviderError> {
        ScopedSession::open(PROVIDER, self.timeout)
    }

    async fn request(
        &self,
        session: &ScopedSession,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderError> {
        let request = session
            .client()
            .post(http::join_url(&self.base_url, "v2/rerank"))
            .bearer_auth(&self.api_key)
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n,
            });
        let response = http::send(PROVIDER, request, self.timeout).await?;
        let body: RerankResponse = http::decode_json(PROVIDER, response, self.timeout).await?;
        Ok(body.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let documents = vec!["SAFE".to_string(), "Note".to_string()];
        let body = serde_json::to_value(RerankRequest {
            model: "rerank-v3.5",
            query: "SAFE agreement",
            documents: &documents,
            top_n: 2,
        })
        .unwrap();
        assert_eq!(body["model"], "rerank-v3.5");
        assert_eq!(body["top_n"], 2);
        assert_eq!(body["documents"][1], "Note");
    }

    #[test]
    fn test_response_parsing_ignores_extra_fields() {
        let json = r#"{
            "id": "abc",
            "results": [
                {"index": 2, "relevance_score": 0.97},
                {"index": 0, "relevance_score": 0.41}
            ],
            "meta": {"billed_units": {"search_units": 1}}
        }"#;
        let body: RerankResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.results.len(), 2);
        assert_eq!(body.results[0].index, 2);
        assert_eq!(body.results[1].relevance_score, 0.41);
    }
}
