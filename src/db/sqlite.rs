//! Local document store on SQLite + sqlite-vec.
//!
//! `rusqlite` is a blocking client, so this backend implements
//! [`BlockingVectorStore`] and is only ever called from the worker pool.
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::ErrorCode;
use serde_json::{Map, Value};

use super::models::{Candidate, DocumentPage, DocumentRow, MatchRequest};
use super::{BlockingVectorStore, Db};
use crate::error::ProviderError;
use crate::provider::{CachedClientProvider, Connector};

const PROVIDER: &str = "sqlite";

/// Connection parameters; one connection is cached per distinct set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqliteParams {
    pub path: PathBuf,
    pub dimensions: usize,
    pub busy_timeout: Duration,
}

pub struct SqliteConnector;

impl Connector for SqliteConnector {
    type Params = SqliteParams;
    type Client = Mutex<Db>;
    type Error = ProviderError;

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn connect(&self, params: &SqliteParams) -> Result<Mutex<Db>, ProviderError> {
        Db::open(&params.path, params.dimensions, params.busy_timeout)
            .map(Mutex::new)
            .map_err(map_sqlite_error)
    }
}

/// BUSY and LOCKED clear up on their own; everything else will not.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> ProviderError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            ProviderError::transient(PROVIDER, err.to_string())
        }
        _ => ProviderError::permanent(PROVIDER, err.to_string()),
    }
}

pub struct SqliteStore {
    clients: Arc<CachedClientProvider<SqliteConnector>>,
    params: SqliteParams,
}

impl SqliteStore {
    pub fn new(clients: Arc<CachedClientProvider<SqliteConnector>>, params: SqliteParams) -> Self {
        Self { clients, params }
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut Db) -> rusqlite::Result<T>) -> Result<T, ProviderError> {
        let db = self.clients.get_or_create(&self.params)?;
        let mut guard: MutexGuard<'_, Db> = db.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *guard).map_err(map_sqlite_error)
    }

    /// Insert or replace one document with its embedding.
    pub fn insert_document(
        &self,
        id: &str,
        content: &str,
        metadata: &Map<String, Value>,
        embedding: &[f32],
    ) -> Result<(), ProviderError> {
        if embedding.len() != self.params.dimensions {
            return Err(ProviderError::permanent(
                PROVIDER,
                format!(
                    "embedding has {} dimensions, store expects {}",
                    embedding.len(),
                    self.params.dimensions
                ),
            ));
        }
        self.with_db(|db| db.insert_document(id, content, metadata, embedding))
    }
}

impl BlockingVectorStore for SqliteStore {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn match_documents(&self, request: &MatchRequest) -> Result<Vec<Candidate>, ProviderError> {
        self.with_db(|db| db.match_documents(request))
    }

    fn browse_by_type(
        &self,
        doc_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentRow>, ProviderError> {
        self.with_db(|db| db.browse_by_type(doc_type, limit, offset))
    }

    fn get_document(&self, id: &str) -> Result<Option<DocumentRow>, ProviderError> {
        self.with_db(|db| db.get_document(id))
    }

    fn list_documents(
        &self,
        limit: usize,
        offset: usize,
        include_content: bool,
    ) -> Result<DocumentPage, ProviderError> {
        self.with_db(|db| db.list_documents(limit, offset, include_content))
    }
}
