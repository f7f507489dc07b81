//! Supabase (PostgREST) document store.
//!
//! Vector search goes through a SQL match function exposed as an RPC
//! endpoint; catalog reads hit the table directly. The HTTP client is async,
//! so this backend implements [`VectorStore`] and runs on the scheduler.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::json;

use super::VectorStore;
use super::models::{Candidate, DocumentPage, DocumentRow, MatchRequest};
use crate::error::ProviderError;
use crate::http;
use crate::provider::{CachedClientProvider, Connector};

const PROVIDER: &str = "supabase";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SupabaseParams {
    pub url: String,
    pub key: String,
}

/// Long-lived PostgREST client, shared by every request.
pub struct SupabaseClient {
    http: reqwest::Client,
    rest_url: String,
}

pub struct SupabaseConnector {
    pub timeout: Duration,
}

impl Connector for SupabaseConnector {
    type Params = SupabaseParams;
    type Client = SupabaseClient;
    type Error = ProviderError;

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn connect(&self, params: &SupabaseParams) -> Result<SupabaseClient, ProviderError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&params.key)
            .map_err(|_| ProviderError::permanent(PROVIDER, "service key is not a valid header value"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", params.key))
            .map_err(|_| ProviderError::permanent(PROVIDER, "service key is not a valid header value"))?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::permanent(PROVIDER, format!("HTTP client build failed: {e}")))?;

        Ok(SupabaseClient {
            http,
            rest_url: http::join_url(&params.url, "rest/v1"),
        })
    }
}

#[derive(Serialize)]
struct MatchBody<'a> {
    query_embedding: &'a [f32],
    match_threshold: f64,
    match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

impl<'a> MatchBody<'a> {
    fn from_request(request: &'a MatchRequest) -> Self {
        Self {
            query_embedding: &request.embedding,
            match_threshold: request.threshold,
            match_count: request.limit,
            filter: request.category.as_ref().map(|c| json!({ "type": c })),
        }
    }
}

/// Total row count from a PostgREST `Content-Range` header (`0-49/123`, `*/0`).
fn parse_content_range(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.parse().ok()
}

pub struct SupabaseStore {
    clients: Arc<CachedClientProvider<SupabaseConnector>>,
    params: SupabaseParams,
    table_name: String,
    match_function: String,
    timeout: Duration,
}

impl SupabaseStore {
    pub fn new(
        clients: Arc<CachedClientProvider<SupabaseConnector>>,
        params: SupabaseParams,
        table_name: String,
        match_function: String,
        timeout: Duration,
    ) -> Self {
        Self {
            clients,
            params,
            table_name,
            match_function,
            timeout,
        }
    }

    fn client(&self) -> Result<Arc<SupabaseClient>, ProviderError> {
        self.clients.get_or_create(&self.params)
    }

    fn table_url(&self, client: &SupabaseClient) -> String {
        http::join_url(&client.rest_url, &self.table_name)
    }
}

#[async_trait]
impl VectorStore for SupabaseStore {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn match_documents(&self, request: &MatchRequest) -> Result<Vec<Candidate>, ProviderError> {
        let client = self.client()?;
        let url = http::join_url(&client.rest_url, &format!("rpc/{}", self.match_function));
        let req = client.http.post(url).json(&MatchBody::from_request(request));
        let response = http::send(PROVIDER, req, self.timeout).await?;
        http::decode_json(PROVIDER, response, self.timeout).await
    }

    async fn browse_by_type(
        &self,
        doc_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentRow>, ProviderError> {
        let client = self.client()?;
        let req = client.http.get(self.table_url(&client)).query(&[
            ("select", "id,content,metadata".to_string()),
            ("metadata->>type", format!("eq.{doc_type}")),
            ("order", "metadata->>created_at.desc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        let response = http::send(PROVIDER, req, self.timeout).await?;
        http::decode_json(PROVIDER, response, self.timeout).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRow>, ProviderError> {
        let client = self.client()?;
        let req = client.http.get(self.table_url(&client)).query(&[
            ("select", "*".to_string()),
            ("id", format!("eq.{id}")),
            ("limit", "1".to_string()),
        ]);
        let response = http::send(PROVIDER, req, self.timeout).await?;
        let rows: Vec<DocumentRow> = http::decode_json(PROVIDER, response, self.timeout).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_documents(
        &self,
        limit: usize,
        offset: usize,
        include_content: bool,
    ) -> Result<DocumentPage, ProviderError> {
        let client = self.client()?;
        let fields = if include_content {
            "id,content,metadata"
        } else {
            "id,metadata"
        };
        let req = client
            .http
            .get(self.table_url(&client))
            .header("Prefer", "count=exact")
            .query(&[
                ("select", fields.to_string()),
                ("order", "metadata->>created_at.desc".to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ]);
        let response = http::send(PROVIDER, req, self.timeout).await?;
        let total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let rows: Vec<DocumentRow> = http::decode_json(PROVIDER, response, self.timeout).await?;
        Ok(DocumentPage {
            total: total.unwrap_or(offset + rows.len()),
            rows,
        })
    }
}
