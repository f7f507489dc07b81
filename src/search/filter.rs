use crate::db::Candidate;

/// Keeps candidates whose `metadata.type` equals the requested category.
#[derive(Debug, Clone, Copy)]
pub struct TypeFilter<'a> {
    category: Option<&'a str>,
}

impl<'a> TypeFilter<'a> {
    #[must_use]
    pub fn new(category: Option<&'a str>) -> Self {
        Self { category }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.category.is_some()
    }

    /// Order-preserving subsequence; no category means no change.
    #[must_use]
    pub fn apply(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        if let Some(category) = self.category {
            candidates.retain(|c| c.category() == Some(category));
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(id: &str, doc_type: Option<&str>) -> Candidate {
        let metadata = match doc_type {
            Some(t) => json!({ "type": t }).as_object().cloned().unwrap(),
            None => serde_json::Map::new(),
        };
        Candidate {
            id: id.to_string(),
            content: String::new(),
            metadata,
            similarity: 0.7,
        }
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_no_category_is_identity() {
        let input = vec![candidate("a", Some("clause")), candidate("b", None)];
        let output = TypeFilter::new(None).apply(input.clone());
        assert_eq!(output, input);
    }

    #[test]
    fn test_keeps_relative_order() {
        let input = vec![
            candidate("a", Some("agreement")),
            candidate("b", Some("clause")),
            candidate("c", Some("agreement")),
            candidate("d", None),
            candidate("e", Some("agreement")),
        ];
        let output = TypeFilter::new(Some("agreement")).apply(input);
        assert_eq!(ids(&output), vec!["a", "c", "e"]);
    }

    #[test]
    fn test_can_remove_everything() {
        let input = vec![candidate("a", Some("clause"))];
        assert!(TypeFilter::new(Some("agreement")).apply(input).is_empty());
    }
}
