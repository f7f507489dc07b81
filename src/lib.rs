//! # legal-rag — Legal document retrieval MCP server
//!
//! Semantic search over a startup-law corpus (practice guides, agreements,
//! clauses): query embedding, vector recall, type filtering and reranking
//! with a similarity fallback, served to AI assistants via the Model Context
//! Protocol (MCP).
//!
//! ## Architecture
//!
//! - **[`search`]** — The search pipeline (`SearchOrchestrator`, `CandidateRetriever`, `TypeFilter`)
//! - **[`embedder`]** — Query embedding (OpenAI-compatible, or offline mock)
//! - **[`rerank`]** — Reranking (Cohere) and the degraded-mode fallback
//! - **[`db`]** — Document stores: SQLite + sqlite-vec, or Supabase over PostgREST
//! - **[`catalog`]** — Browse, fetch and list operations
//! - **[`retry`]** / **[`provider`]** / **[`http`]** — Retries, cached clients, scoped HTTP sessions
//! - **[`config`]** — Configuration loading, environment overrides, validation
//! - **[`mcp`]** — MCP server with 4 tool handlers (stdio transport via rmcp)

pub mod app;
pub mod catalog;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod http;
pub mod ingest;
pub mod mcp;
pub mod provider;
pub mod rerank;
pub mod retry;
pub mod search;
