//! Non-semantic document access: browse by type, fetch by id, list all.
use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::db::{DocumentRow, StoreHandle};
use crate::error::CatalogError;

const MAX_PAGE_SIZE: i64 = 100;
const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct BrowseEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub title: String,
    pub summary: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowsePage {
    pub document_type: String,
    pub page_size: usize,
    pub offset: usize,
    pub count: usize,
    pub has_more: bool,
    pub documents: Vec<BrowseEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub retrieved_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentListing {
    pub total_documents: usize,
    pub page_size: usize,
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub has_more: bool,
    pub documents: Vec<ListEntry>,
}

/// Clamp caller-supplied paging to `1..=100` rows from offset `>= 0`.
#[must_use]
pub fn clamp_page(limit: i64, offset: i64) -> (usize, usize) {
    (limit.clamp(1, MAX_PAGE_SIZE) as usize, offset.max(0) as usize)
}

/// First 200 characters, with `...` appended when cut.
fn summarize(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn meta_str<'a>(metadata: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

pub struct Catalog {
    store: StoreHandle,
    document_types: Vec<String>,
}

impl Catalog {
    pub fn new(store: StoreHandle, document_types: Vec<String>) -> Self {
        Self {
            store,
            document_types,
        }
    }

    pub async fn browse_by_type(
        &self,
        document_type: &str,
        limit: i64,
        offset: i64,
    ) -> Result<BrowsePage, CatalogError> {
        if !self.document_types.iter().any(|t| t == document_type) {
            return Err(CatalogError::Validation(format!(
                "Invalid document type. Must be one of: {}",
                self.document_types.join(", ")
            )));
        }
        let (limit, offset) = clamp_page(limit, offset);

        let rows = self
            .store
            .browse_by_type(document_type, limit, offset)
            .await
            .map_err(CatalogError::Store)?;
        debug!("Browsed {} {document_type} documents", rows.len());

        let documents: Vec<BrowseEntry> = rows.into_iter().map(browse_entry).collect();
        Ok(BrowsePage {
            document_type: document_type.to_string(),
            page_size: limit,
            offset,
            count: documents.len(),
            has_more: documents.len() == limit,
            documents,
        })
    }

    pub async fn get_document(&self, id: &str) -> Result<DocumentDetail, CatalogError> {
        if Uuid::parse_str(id).is_err() {
            return Err(CatalogError::Validation(
                "Invalid document ID format. Must be a valid UUID.".to_string(),
            ));
        }

        let row = self
            .store
            .get_document(id)
            .await
            .map_err(CatalogError::Store)?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        Ok(DocumentDetail {
            id: row.id,
            content: row.content.unwrap_or_default(),
            metadata: row.metadata,
            retrieved_at: Local::now().to_rfc3339(),
        })
    }

    pub async fn list_documents(
        &self,
        limit: i64,
        offset: i64,
        include_content: bool,
    ) -> Result<DocumentListing, CatalogError> {
        let (limit, offset) = clamp_page(limit, offset);
        let page = self
            .store
            .list_documents(limit, offset, include_content)
            .await
            .map_err(CatalogError::Store)?;

        let total = page.total;
        let documents = page
            .rows
            .into_iter()
            .map(|row| list_entry(row, include_content))
            .collect();

        Ok(DocumentListing {
            total_documents: total,
            page_size: limit,
            offset,
            current_page: offset / limit + 1,
            total_pages: total.div_ceil(limit),
            has_more: offset + limit < total,
            documents,
        })
    }
}

fn browse_entry(row: DocumentRow) -> BrowseEntry {
    BrowseEntry {
        doc_type: meta_str(&row.metadata, "type").map(str::to_string),
        title: meta_str(&row.metadata, "title").unwrap_or("Untitled").to_string(),
        summary: summarize(row.content.as_deref().unwrap_or_default()),
        id: row.id,
        metadata: row.metadata,
    }
}

fn list_entry(row: DocumentRow, include_content: bool) -> ListEntry {
    let (content, summary) = if include_content {
        (Some(row.content.unwrap_or_default()), None)
    } else {
        let summary = match meta_str(&row.metadata, "summary") {
            Some(s) if !s.is_empty() => summarize(s),
            _ => "[No summary available]".to_string(),
        };
        (None, Some(summary))
    };

    ListEntry {
        title: meta_str(&row.metadata, "title").unwrap_or("Untitled").to_string(),
        doc_type: meta_str(&row.metadata, "type").unwrap_or("unknown").to_string(),
        id: row.id,
        metadata: row.metadata,
        content,
        summary,
    }
}
