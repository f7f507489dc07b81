//! OpenAI-compatible `/embeddings` provider.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, EmbeddingVector};
use crate::error::ProviderError;
use crate::http::{self, ScopedSession};

const PROVIDER: &str = "openai";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url,
            model,
            timeout,
        }
    }
}

fn first_embedding(response: EmbeddingResponse) -> Result<EmbeddingVector, ProviderError> {
    response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| ProviderError::permanent(PROVIDER, "response contained no embeddings"))
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
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
        text: &str,
    ) -> Result<EmbeddingVector, ProviderError> {
        let request = session
            .client()
            .post(http::join_url(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: text,
                model: &self.model,
            });
        let response = http::send(PROVIDER, request, self.timeout).await?;
        let body: EmbeddingResponse = http::decode_json(PROVIDER, response, self.timeout).await?;
        first_embedding(body)
    }
}
