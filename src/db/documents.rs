use super::models::{DocumentPage, DocumentRow, parse_metadata};
use super::{Db, serialize_vector};
use rusqlite::{OptionalExtension, Result, params};
use serde_json::{Map, Value};

fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    let metadata: String = row.get(2)?;
    Ok(DocumentRow {
        id: row.get(0)?,
        content: row.get(1)?,
        metadata: parse_metadata(&metadata),
    })
}

impl Db {
    /// Inserts or replaces a document together with its embedding
    pub fn insert_document(
        &mut self,
        id: &str,
        content: &str,
        metadata: &Map<String, Value>,
        embedding: &[f32],
    ) -> Result<()> {
        if embedding.len() != self.dimensions() {
            return Err(rusqlite::Error::ToSqlConversionFailure(
                format!(
                    "embedding has {} dimensions, vector table expects {}",
                    embedding.len(),
                    self.dimensions()
                )
                .into(),
            ));
        }

        let metadata_json = Value::Object(metadata.clone()).to_string();
        let tx = self.conn.transaction()?;

        let rowid: i64 = tx.query_row(
            r#"
            INSERT INTO documents (id, content, metadata, indexed_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                metadata = excluded.metadata,
                indexed_at = CURRENT_TIMESTAMP
            RETURNING rowid
            "#,
            params![id, content, metadata_json],
            |row| row.get(0),
        )?;

        // vec0 has no upsert
        tx.execute("DELETE FROM vec_documents WHERE rowid = ?", params![rowid])?;
        tx.execute(
            "INSERT INTO vec_documents (rowid, embedding) VALUES (?, ?)",
            params![rowid, serialize_vector(embedding)],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Documents of one type, newest `metadata.created_at` first
    pub fn browse_by_type(&self, doc_type: &str, limit: usize, offset: usize) -> Result<Vec<DocumentRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, content, metadata
            FROM documents
            WHERE json_extract(metadata, '$.type') = ?
            ORDER BY json_extract(metadata, '$.created_at') DESC
            LIMIT ? OFFSET ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![doc_type, limit as i64, offset as i64],
            map_document_row,
        )?;
        rows.collect()
    }

    /// Fetch one document by id
    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        self.conn
            .query_row(
                "SELECT id, content, metadata FROM documents WHERE id = ?",
                params![id],
                map_document_row,
            )
            .optional()
    }

    /// One page of all documents plus the total count
    pub fn list_documents(&self, limit: usize, offset: usize, include_content: bool) -> Result<DocumentPage> {
        let total: i64 = self
            .conn
            .query_row("SELECT count(*) FROM documents", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, CASE WHEN ? THEN content ELSE NULL END, metadata
            FROM documents
            ORDER BY json_extract(metadata, '$.created_at') DESC
            LIMIT ? OFFSET ?
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![include_content, limit as i64, offset as i64],
                map_document_row,
            )?
            .collect::<Result<Vec<_>>>()?;

        Ok(DocumentPage {
            rows,
            total: total as usize,
        })
    }
}
