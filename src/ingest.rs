//! Bulk loading of JSON Lines documents into the local SQLite store.
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::sqlite::SqliteStore;
use crate::embedder::Embedder;

/// One input line: `{"id"?: uuid, "content": "...", "metadata"?: {...}}`.
#[derive(Debug, Deserialize)]
struct IngestRecord {
    #[serde(default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestResult {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Ingester<'a, E: Embedder + ?Sized> {
    pub store: Arc<SqliteStore>,
    pub embedder: &'a E,
}

impl<'a, E: Embedder + ?Sized> Ingester<'a, E> {
    pub fn new(store: Arc<SqliteStore>, embedder: &'a E) -> Self {
        Self { store, embedder }
    }

    /// Embed and store every line of `path`. Blank lines are skipped; a bad
    /// line is logged and counted, it does not stop the run.
    pub async fn ingest_file<P: AsRef<Path>>(&self, path: P) -> Result<IngestResult> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut result = IngestResult::default();
        for (number, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                result.skipped += 1;
                continue;
            }
            match self.ingest_line(line).await {
                Ok(id) => {
                    result.indexed += 1;
                    info!("Indexed document {id}");
                }
                Err(e) => {
                    result.failed += 1;
                    warn!("{}:{}: {e:#}", path.display(), number + 1);
                }
            }
        }
        Ok(result)
    }

    async fn ingest_line(&self, line: &str) -> Result<String> {
        let record: IngestRecord = serde_json::from_str(line).context("invalid JSON record")?;
        anyhow::ensure!(!record.content.trim().is_empty(), "content is empty");

        let id = match record.id {
            Some(id) => Uuid::parse_str(&id)
                .with_context(|| format!("id is not a UUID: {id}"))?
                .to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let mut metadata = record.metadata;
        metadata
            .entry("created_at")
            .or_insert_with(|| Value::String(Local::now().to_rfc3339()));

        let embedding = self
            .embedder
            .embed(&record.content)
            .await
            .context("embedding failed")?;

        let store = self.store.clone();
        let doc_id = id.clone();
        tokio::task::spawn_blocking(move || {
            store.insert_document(&doc_id, &record.content, &metadata, &embedding)
        })
        .await
        .context("insert task failed")?
        .context("insert failed")?;

        Ok(id)
    }
}
