//! Document stores: the store traits, the [`StoreHandle`] dispatcher, and the
//! SQLite + sqlite-vec and Supabase backends.
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use tracing::info;

use crate::error::ProviderError;

pub mod documents;
pub mod models;
pub mod search;
pub mod sqlite;
pub mod supabase;

pub use models::{Candidate, DocumentPage, DocumentRow, MatchRequest};

// ── Store traits ─────────────────────────────────────────────────────

/// A store whose client suspends natively (async I/O).
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Nearest documents with `similarity >= threshold`, best first.
    async fn match_documents(&self, request: &MatchRequest) -> Result<Vec<Candidate>, ProviderError>;

    async fn browse_by_type(
        &self,
        doc_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentRow>, ProviderError>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRow>, ProviderError>;

    async fn list_documents(
        &self,
        limit: usize,
        offset: usize,
        include_content: bool,
    ) -> Result<DocumentPage, ProviderError>;
}

/// A store whose client blocks the calling thread. Calls are dispatched to
/// the blocking worker pool.
pub trait BlockingVectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn match_documents(&self, request: &MatchRequest) -> Result<Vec<Candidate>, ProviderError>;

    fn browse_by_type(
        &self,
        doc_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentRow>, ProviderError>;

    fn get_document(&self, id: &str) -> Result<Option<DocumentRow>, ProviderError>;

    fn list_documents(
        &self,
        limit: usize,
        offset: usize,
        include_content: bool,
    ) -> Result<DocumentPage, ProviderError>;
}

/// Either kind of store, with calls routed so a blocking client never runs
/// on a scheduler thread.
#[derive(Clone)]
pub enum StoreHandle {
    Async(Arc<dyn VectorStore>),
    Blocking(Arc<dyn BlockingVectorStore>),
}

impl StoreHandle {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Async(s) => s.name(),
            Self::Blocking(s) => s.name(),
        }
    }

    pub async fn browse_by_type(
        &self,
        doc_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentRow>, ProviderError> {
        match self {
            Self::Async(s) => s.browse_by_type(doc_type, limit, offset).await,
            Self::Blocking(s) => {
                let doc_type = doc_type.to_string();
                offload(s.clone(), move |s| s.browse_by_type(&doc_type, limit, offset)).await
            }
        }
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRow>, ProviderError> {
        match self {
            Self::Async(s) => s.get_document(id).await,
            Self::Blocking(s) => {
                let id = id.to_string();
                offload(s.clone(), move |s| s.get_document(&id)).await
            }
        }
    }

    pub async fn list_documents(
        &self,
        limit: usize,
        offset: usize,
        include_content: bool,
    ) -> Result<DocumentPage, ProviderError> {
        match self {
            Self::Async(s) => s.list_documents(limit, offset, include_content).await,
            Self::Blocking(s) => {
                offload(s.clone(), move |s| s.list_documents(limit, offset, include_content)).await
            }
        }
    }
}

/// Run `f` against a blocking store on the worker pool and await the result.
pub(crate) async fn offload<T, F>(
    store: Arc<dyn BlockingVectorStore>,
    f: F,
) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce(&dyn BlockingVectorStore) -> Result<T, ProviderError> + Send + 'static,
{
    let name = store.name();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ProviderError::transient(name, format!("worker task failed: {e}")))?
}

// ── SQLite + sqlite-vec ──────────────────────────────────────────────

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{{}}',
    indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_doc_type ON documents(json_extract(metadata, '$.type'));
CREATE INDEX IF NOT EXISTS idx_doc_created ON documents(json_extract(metadata, '$.created_at'));

CREATE VIRTUAL TABLE IF NOT EXISTS vec_documents USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A wrapper around a SQLite connection initialized with sqlite-vec and the document schema.
pub struct Db {
    pub(crate) conn: Connection,
    dimensions: usize,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize, busy_timeout: Duration) -> rusqlite::Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        // Register sqlite-vec extension globally
        init_sqlite_vec();

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::init(conn, dimensions)
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> rusqlite::Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> rusqlite::Result<Self> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);
        conn.execute_batch(&schema_sql(dimensions))?;
        Ok(Self { conn, dimensions })
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
