//! Wiring: turns a validated [`Config`] into the long-lived services shared
//! by the MCP server and the CLI.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::{Config, EmbeddingProviderKind, RerankProviderKind, StoreBackend};
use crate::db::StoreHandle;
use crate::db::sqlite::{SqliteConnector, SqliteParams, SqliteStore};
use crate::db::supabase::{SupabaseConnector, SupabaseParams, SupabaseStore};
use crate::embedder::mock::MockEmbedder;
use crate::embedder::openai::OpenAiProvider;
use crate::embedder::{Embedder, EmbeddingClient};
use crate::provider::CachedClientProvider;
use crate::rerank::cohere::CohereProvider;
use crate::rerank::{RerankClient, Reranker};
use crate::search::{CandidateRetriever, SearchOrchestrator};

pub struct App {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<SearchOrchestrator>,
    pub catalog: Arc<Catalog>,
    /// Set when the SQLite backend is selected; used for ingestion.
    pub sqlite: Option<Arc<SqliteStore>>,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let retry = config.retry;

        let embedding = &config.embedding;
        let embedder: Arc<dyn Embedder> = match embedding.provider {
            EmbeddingProviderKind::Openai => {
                let timeout = Duration::from_millis(embedding.timeout_ms);
                let api_key = embedding
                    .api_key
                    .clone()
                    .context("OPENAI_API_KEY is not set")?;
                let provider = OpenAiProvider::new(
                    api_key,
                    embedding.base_url.clone(),
                    embedding.model.clone(),
                    timeout,
                );
                Arc::new(EmbeddingClient::new(
                    provider,
                    retry,
                    timeout,
                    embedding.dimensions,
                ))
            }
            EmbeddingProviderKind::Mock => Arc::new(MockEmbedder::new(embedding.dimensions)),
        };

        let retrieve_timeout = Duration::from_millis(config.search.retrieve_timeout_ms);
        let (store, sqlite) = match config.store.backend {
            StoreBackend::Sqlite => {
                let sqlite = Arc::new(SqliteStore::new(
                    Arc::new(CachedClientProvider::new(SqliteConnector)),
                    SqliteParams {
                        path: config.store.db_path.clone(),
                        dimensions: embedding.dimensions,
                        busy_timeout: Duration::from_millis(config.store.busy_timeout_ms),
                    },
                ));
                (StoreHandle::Blocking(sqlite.clone()), Some(sqlite))
            }
            StoreBackend::Supabase => {
                let params = SupabaseParams {
                    url: config
                        .store
                        .supabase_url
                        .clone()
                        .context("SUPABASE_URL is not set")?,
                    key: config
                        .store
                        .supabase_key
                        .clone()
                        .context("SUPABASE_SERVICE_ROLE_KEY is not set")?,
                };
                let clients = Arc::new(CachedClientProvider::new(SupabaseConnector {
                    timeout: retrieve_timeout,
                }));
                let store = SupabaseStore::new(
                    clients,
                    params,
                    config.store.table_name.clone(),
                    config.store.match_function.clone(),
                    retrieve_timeout,
                );
                (StoreHandle::Async(Arc::new(store)), None)
            }
        };

        let rerank = &config.rerank;
        let reranker: Option<Arc<dyn Reranker>> = match rerank.provider {
            RerankProviderKind::Cohere => {
                let timeout = Duration::from_millis(rerank.timeout_ms);
                let api_key = rerank.api_key.clone().context("COHERE_API_KEY is not set")?;
                let provider = CohereProvider::new(
                    api_key,
                    rerank.base_url.clone(),
                    rerank.model.clone(),
                    timeout,
                );
                Some(Arc::new(RerankClient::new(
                    provider,
                    retry,
                    timeout,
                    rerank.max_documents,
                )))
            }
            RerankProviderKind::Disabled => None,
        };

        info!(
            "Store: {}, embedder: {:?}, reranker: {:?}",
            store.name(),
            embedding.provider,
            rerank.provider
        );

        let retriever = CandidateRetriever::new(store.clone(), retry, retrieve_timeout);
        let search = SearchOrchestrator::new(
            embedder.clone(),
            retriever,
            reranker,
            config.search_settings(),
        );
        let catalog = Catalog::new(store, config.search.document_types.clone());

        Ok(Self {
            config: Arc::new(config),
            embedder,
            search: Arc::new(search),
            catalog: Arc::new(catalog),
            sqlite,
        })
    }
}
