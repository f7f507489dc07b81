use super::models::{Candidate, MatchRequest, parse_metadata};
use super::{Db, serialize_vector};
use rusqlite::Result;
use rusqlite::types::Value;

/// Cosine distance (0..=2) to a similarity in 0..=1.
fn distance_to_similarity(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

fn map_match_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    let metadata: String = row.get(2)?;
    let distance: f64 = row.get(3)?;
    Ok(Candidate {
        id: row.get(0)?,
        content: row.get(1)?,
        metadata: parse_metadata(&metadata),
        similarity: distance_to_similarity(distance),
    })
}

impl Db {
    /// Nearest documents by cosine distance, best first, at most `limit`
    /// rows and none below `threshold`.
    pub fn match_documents(&self, request: &MatchRequest) -> Result<Vec<Candidate>> {
        let mut query = String::from(
            r#"
            SELECT
                d.id,
                d.content,
                d.metadata,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_documents v
            JOIN documents d ON v.rowid = d.rowid
            "#,
        );

        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(&request.embedding))];

        if let Some(category) = &request.category {
            query.push_str(" WHERE json_extract(d.metadata, '$.type') = ?");
            params.push(Value::Text(category.clone()));
        }

        query.push_str(" ORDER BY distance ASC LIMIT ?");
        params.push(Value::Integer(request.limit as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_match_row)?;

        // Rows arrive nearest first, so everything after the first miss is below the threshold too
        let mut results = Vec::new();
        for row in rows {
            let candidate = row?;
            if candidate.similarity < request.threshold {
                break;
            }
            results.push(candidate);
        }

        Ok(results)
    }
}
