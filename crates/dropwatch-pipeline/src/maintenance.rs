//! Maintenance tasks over stored updates: embedding backfill and the
//! related-updates report.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dropwatch_core::defaults;
use dropwatch_core::{
    Error, Result, ShutdownSignal, SimilarUpdate, SimilaritySearch, StoredUpdate, UpdateRepository,
};
use dropwatch_inference::EmbeddingGenerator;

use crate::config::PipelineConfig;

/// Totals for one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub embedded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Attach embeddings to rows stored without one.
///
/// Pages through missing rows by id so rows that keep failing never block
/// progress. Per-row failures are counted and skipped.
pub async fn backfill_embeddings(
    repository: &dyn UpdateRepository,
    embedder: &EmbeddingGenerator,
    project_name: Option<&str>,
    batch_size: i64,
    shutdown: &ShutdownSignal,
) -> Result<BackfillReport> {
    let batch_size = batch_size.max(1);
    let mut report = BackfillReport::default();
    let mut after: Option<Uuid> = None;

    info!(
        subsystem = "pipeline",
        component = "backfill",
        project = project_name.unwrap_or("(all)"),
        batch_size,
        "Embedding backfill started"
    );

    'pages: loop {
        let page = repository
            .list_missing_embeddings(project_name, after, batch_size)
            .await?;
        let page_len = page.len();
        if page_len == 0 {
            break;
        }

        for row in page {
            after = Some(row.id);
            report.scanned += 1;

            let vector = match embedder.embed_text(&row.embedding_text(), shutdown).await {
                Ok(vector) => vector,
                Err(Error::Cancelled) => {
                    report.cancelled = true;
                    break 'pages;
                }
                Err(e) => {
                    warn!(
                        subsystem = "pipeline",
                        component = "backfill",
                        update_id = %row.id,
                        error = %e,
                        "Embedding failed; row left without one"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            match repository.set_embedding(row.id, &vector).await {
                Ok(()) => report.embedded += 1,
                Err(e) => {
                    warn!(
                        subsystem = "pipeline",
                        component = "backfill",
                        update_id = %row.id,
                        error = %e,
                        "Failed to store embedding"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            subsystem = "pipeline",
            component = "backfill",
            scanned = report.scanned,
            embedded = report.embedded,
            failed = report.failed,
            "Backfill page done"
        );
        if (page_len as i64) < batch_size || shutdown.is_triggered() {
            report.cancelled |= shutdown.is_triggered();
            break;
        }
    }

    info!(
        subsystem = "pipeline",
        component = "backfill",
        scanned = report.scanned,
        embedded = report.embedded,
        failed = report.failed,
        cancelled = report.cancelled,
        "Embedding backfill finished"
    );
    Ok(report)
}

/// Settings for [`related_updates`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelatedOptions {
    pub threshold: f64,
    pub limit: i64,
    /// Only rows processed within this many days; `None` checks all rows.
    pub lookback_days: Option<i64>,
    pub fetch_batch: i64,
}

impl Default for RelatedOptions {
    fn default() -> Self {
        Self {
            threshold: defaults::RELATED_THRESHOLD,
            limit: defaults::RELATED_MATCH_LIMIT,
            lookback_days: Some(defaults::RELATED_LOOKBACK_DAYS),
            fetch_batch: defaults::RELATED_FETCH_BATCH,
        }
    }
}

impl From<&PipelineConfig> for RelatedOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.related_threshold,
            limit: config.related_match_limit,
            lookback_days: config.related_lookback_days,
            fetch_batch: defaults::RELATED_FETCH_BATCH,
        }
    }
}

/// A stored row and the rows most similar to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedGroup {
    pub source: StoredUpdate,
    pub matches: Vec<SimilarUpdate>,
}

/// Group recent rows with their near neighbours.
///
/// Rows already reported, as a source or as a match, are not checked again.
pub async fn related_updates(
    repository: &dyn UpdateRepository,
    search: &dyn SimilaritySearch,
    options: RelatedOptions,
    now: DateTime<Utc>,
) -> Result<Vec<RelatedGroup>> {
    let since = options.lookback_days.map(|days| now - Duration::days(days));
    let fetch_batch = options.fetch_batch.max(1);
    let mut reported: HashSet<Uuid> = HashSet::new();
    let mut groups = Vec::new();
    let mut offset = 0i64;

    loop {
        let page = repository
            .list_with_embeddings(since, fetch_batch, offset)
            .await?;
        let page_len = page.len();

        for row in page {
            if reported.contains(&row.id) {
                continue;
            }
            let Some(embedding) = row.embedding.as_ref() else {
                continue;
            };

            let matches = match search
                .find_similar(embedding, options.threshold, options.limit, Some(row.id))
                .await
            {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(
                        subsystem = "pipeline",
                        component = "related",
                        update_id = %row.id,
                        error = %e,
                        "Similarity search failed; skipping row"
                    );
                    continue;
                }
            };

            if matches.is_empty() {
                continue;
            }
            reported.insert(row.id);
            reported.extend(matches.iter().map(|m| m.id));
            groups.push(RelatedGroup {
                source: row,
                matches,
            });
        }

        if (page_len as i64) < fetch_batch {
            break;
        }
        offset += page_len as i64;
    }

    info!(
        subsystem = "pipeline",
        component = "related",
        threshold = options.threshold,
        group_count = groups.len(),
        "Related-update report built"
    );
    Ok(groups)
}
