//! Embedding-based near-duplicate detection.

use dropwatch_core::defaults::{DUPLICATE_MATCH_LIMIT, DUPLICATE_THRESHOLD};
use dropwatch_core::{SimilaritySearch, Vector};
use tracing::{debug, warn};

/// Flags a new row when an existing row is at least `threshold` similar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateDetector {
    pub threshold: f64,
    pub limit: i64,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            threshold: DUPLICATE_THRESHOLD,
            limit: DUPLICATE_MATCH_LIMIT,
        }
    }
}

impl DuplicateDetector {
    pub fn new(threshold: f64, limit: i64) -> Self {
        Self {
            threshold,
            limit: limit.max(1),
        }
    }

    /// Whether any stored row is a near-duplicate of `embedding`.
    ///
    /// Search failures are logged and treated as "not a duplicate".
    pub async fn is_duplicate(
        &self,
        search: &dyn SimilaritySearch,
        embedding: &Vector,
        source_link: &str,
    ) -> bool {
        // Cosine similarity never exceeds 1.0.
        if self.threshold > 1.0 {
            return false;
        }

        match search
            .find_similar(embedding, self.threshold, self.limit, None)
            .await
        {
            Ok(matches) => {
                let duplicate = !matches.is_empty();
                if let Some(best) = matches.first() {
                    debug!(
                        subsystem = "pipeline",
                        component = "dedup",
                        op = "find_similar",
                        source_link,
                        threshold = self.threshold,
                        match_count = matches.len(),
                        similarity = best.similarity,
                        matched_link = %best.source_message_link,
                        "Near-duplicate found"
                    );
                }
                duplicate
            }
            Err(e) => {
                warn!(
                    subsystem = "pipeline",
                    component = "dedup",
                    op = "find_similar",
                    source_link,
                    error = %e,
                    "Similarity search failed; treating row as unique"
                );
                false
            }
        }
    }
}
