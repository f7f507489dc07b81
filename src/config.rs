//! Configuration module for legal-rag.
//!
//! Loads a JSON file with per-field defaults, applies environment overrides,
//! and validates the result before anything is constructed from it.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use crate::search::{QueryLimits, SearchSettings};

pub const DEFAULT_CONFIG_PATH: &str = "legal-rag.json";

// ── Default value functions ──────────────────────────────────────────

fn default_table_name() -> String {
    "n8n_law_startuplaw".to_string()
}

fn default_match_function() -> String {
    "match_n8n_law_startuplaw".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./legal-rag.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_embedding_timeout_ms() -> u64 {
    5000
}

fn default_cohere_base_url() -> String {
    "https://api.cohere.com".to_string()
}

fn default_rerank_model() -> String {
    "rerank-v3.5".to_string()
}

fn default_rerank_timeout_ms() -> u64 {
    8000
}

fn default_max_documents() -> usize {
    1000
}

fn default_top_k() -> usize {
    10
}

fn default_max_top_k() -> usize {
    100
}

fn default_max_query_chars() -> usize {
    1000
}

fn default_match_threshold() -> f64 {
    0.5
}

fn default_oversample_factor() -> usize {
    2
}

fn default_oversample_cap() -> usize {
    100
}

fn default_retrieve_timeout_ms() -> u64 {
    5000
}

fn default_pipeline_budget_ms() -> u64 {
    10_000
}

fn default_document_types() -> Vec<String> {
    vec![
        "practice_guide".to_string(),
        "agreement".to_string(),
        "clause".to_string(),
    ]
}

fn default_blocking_threads() -> usize {
    8
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Supabase,
    #[default]
    Sqlite,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,

    #[serde(default, skip_serializing)]
    pub supabase_key: Option<String>,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default = "default_match_function")]
    pub match_function: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Openai,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankProviderKind {
    #[default]
    Cohere,
    Disabled,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub provider: RerankProviderKind,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_cohere_base_url")]
    pub base_url: String,

    #[serde(default = "default_rerank_model")]
    pub model: String,

    #[serde(default = "default_rerank_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest batch sent to the provider in one request.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,

    #[serde(default = "default_oversample_cap")]
    pub oversample_cap: usize,

    #[serde(default = "default_retrieve_timeout_ms")]
    pub retrieve_timeout_ms: u64,

    #[serde(default = "default_pipeline_budget_ms")]
    pub pipeline_budget_ms: u64,

    #[serde(default)]
    pub push_down_type_filter: bool,

    #[serde(default = "default_document_types")]
    pub document_types: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on worker threads used for blocking store calls.
    #[serde(default = "default_blocking_threads")]
    pub blocking_threads: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            supabase_url: None,
            supabase_key: None,
            table_name: default_table_name(),
            match_function: default_match_function(),
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: RerankProviderKind::default(),
            api_key: None,
            base_url: default_cohere_base_url(),
            model: default_rerank_model(),
            timeout_ms: default_rerank_timeout_ms(),
            max_documents: default_max_documents(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_query_chars: default_max_query_chars(),
            match_threshold: default_match_threshold(),
            oversample_factor: default_oversample_factor(),
            oversample_cap: default_oversample_cap(),
            retrieve_timeout_ms: default_retrieve_timeout_ms(),
            pipeline_budget_ms: default_pipeline_budget_ms(),
            push_down_type_filter: false,
            document_types: default_document_types(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            blocking_threads: default_blocking_threads(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut cfg = if config_path.exists() {
            let data = std::fs::read_to_string(config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            let cfg: Config = serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON in {}", config_path.display()))?;
            info!("Loaded configuration from {}", config_path.display());
            cfg
        } else {
            info!("{} not found, using defaults", config_path.display());
            Self::default()
        };

        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production). Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("SUPABASE_URL") {
            self.store.supabase_url = Some(url);
        }
        if let Some(key) = var("SUPABASE_SERVICE_ROLE_KEY") {
            self.store.supabase_key = Some(key);
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(key) = var("COHERE_API_KEY") {
            self.rerank.api_key = Some(key);
        }
        if let Some(table) = var("LEGAL_RAG_TABLE_NAME") {
            self.store.table_name = table;
        }
        if let Some(function) = var("LEGAL_RAG_MATCH_FUNCTION") {
            self.store.match_function = function;
        }
        if let Some(path) = var("LEGAL_RAG_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(top_k) = var("LEGAL_RAG_TOP_K") {
            self.search.default_top_k = top_k
                .trim()
                .parse()
                .with_context(|| format!("LEGAL_RAG_TOP_K is not an integer: {top_k}"))?;
        }
        if let Some(threshold) = var("LEGAL_RAG_MATCH_THRESHOLD") {
            self.search.match_threshold = threshold
                .trim()
                .parse()
                .with_context(|| format!("LEGAL_RAG_MATCH_THRESHOLD is not a number: {threshold}"))?;
        }
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Supabase {
            let url = self.store.supabase_url.as_deref().unwrap_or_default();
            anyhow::ensure!(
                url.starts_with("https://") || url.starts_with("http://"),
                "store.supabase_url must be an http(s) URL (set SUPABASE_URL)"
            );
            anyhow::ensure!(
                self.store.supabase_key.is_some(),
                "SUPABASE_SERVICE_ROLE_KEY is required for the supabase backend"
            );
        }
        if self.embedding.provider == EmbeddingProviderKind::Openai {
            anyhow::ensure!(
                self.embedding.api_key.is_some(),
                "OPENAI_API_KEY is required for the openai embedding provider"
            );
        }
        if self.rerank.provider == RerankProviderKind::Cohere {
            anyhow::ensure!(
                self.rerank.api_key.is_some(),
                "COHERE_API_KEY is required for the cohere reranker"
            );
        }

        let search = &self.search;
        anyhow::ensure!(
            (0.0..=1.0).contains(&search.match_threshold),
            "search.match_threshold must be between 0 and 1"
        );
        anyhow::ensure!(search.max_top_k > 0, "search.max_top_k must be positive");
        anyhow::ensure!(
            (1..=search.max_top_k).contains(&search.default_top_k),
            "search.default_top_k must be between 1 and {}",
            search.max_top_k
        );
        anyhow::ensure!(search.max_query_chars > 0, "search.max_query_chars must be positive");
        anyhow::ensure!(
            search.oversample_factor > 0,
            "search.oversample_factor must be positive"
        );
        anyhow::ensure!(search.oversample_cap > 0, "search.oversample_cap must be positive");
        anyhow::ensure!(
            search.pipeline_budget_ms > 0,
            "search.pipeline_budget_ms must be positive"
        );
        anyhow::ensure!(self.retry.max_retries > 0, "retry.max_retries must be positive");
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.rerank.max_documents > 0,
            "rerank.max_documents must be positive"
        );
        anyhow::ensure!(
            self.runtime.blocking_threads > 0,
            "runtime.blocking_threads must be positive"
        );

        if search.oversample_cap < search.max_top_k {
            warn!(
                "search.oversample_cap ({}) is below search.max_top_k ({}); large requests get fewer candidates than asked for",
                search.oversample_cap, search.max_top_k
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            limits: QueryLimits {
                max_top_k: self.search.max_top_k,
                max_query_chars: self.search.max_query_chars,
                document_types: self.search.document_types.clone(),
            },
            match_threshold: self.search.match_threshold,
            oversample_factor: self.search.oversample_factor,
            oversample_cap: self.search.oversample_cap,
            push_down_type_filter: self.search.push_down_type_filter,
            pipeline_budget: Duration::from_millis(self.search.pipeline_budget_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
