//! Project update repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use dropwatch_core::{
    defaults, Error, NewUpdate, Result, SaveOutcome, SimilarUpdate, SimilaritySearch,
    StoredUpdate, UpdateRepository,
};

/// Table holding extracted project updates.
pub const UPDATES_TABLE: &str = "telegram_project_updates";

const STORED_COLUMNS: &str = "id, project_name, activity_type, summary, key_links, \
     source_message_link, message_timestamp, processed_at, embedding";

/// PostgreSQL implementation of the update repository and similarity search.
#[derive(Clone)]
pub struct PgUpdateRepository {
    pool: Pool<Postgres>,
}

impl PgUpdateRepository {
    /// Create a new PgUpdateRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn stored_from_row(row: &PgRow) -> StoredUpdate {
        StoredUpdate {
            id: row.get("id"),
            project_name: row.get("project_name"),
            activity_type: row.get("activity_type"),
            summary: row.get("summary"),
            key_links: row.get("key_links"),
            source_message_link: row.get("source_message_link"),
            message_timestamp: row.get("message_timestamp"),
            processed_at: row.get("processed_at"),
            embedding: row.get("embedding"),
        }
    }
}

#[async_trait]
impl UpdateRepository for PgUpdateRepository {
    async fn save(&self, update: &NewUpdate) -> Result<SaveOutcome> {
        let id = Uuid::now_v7();
        let result = sqlx::query(
            r#"
            INSERT INTO telegram_project_updates (
                id, update_key, project_name, activity_type, summary,
                key_links, referral_links, deadline, deadline_original_text,
                required_actions_summary, is_node_opportunity, is_uncertain, is_guide,
                needs_review, is_duplicate, source_channel, source_message_link,
                message_timestamp, message_timestamp_raw, full_message_text,
                raw_llm_output, embedding, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(id)
        .bind(&update.update_key)
        .bind(&update.project_name)
        .bind(&update.activity_type)
        .bind(&update.summary)
        .bind(&update.key_links)
        .bind(&update.referral_links)
        .bind(update.deadline)
        .bind(&update.deadline_original_text)
        .bind(&update.required_actions_summary)
        .bind(update.is_node_opportunity)
        .bind(update.is_uncertain)
        .bind(update.is_guide)
        .bind(update.needs_review)
        .bind(update.is_duplicate)
        .bind(&update.source_channel)
        .bind(&update.source_message_link)
        .bind(update.message_timestamp)
        .bind(&update.message_timestamp_raw)
        .bind(&update.full_message_text)
        .bind(&update.raw_llm_output)
        .bind(update.embedding.clone())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(
                    subsystem = "database",
                    component = "updates",
                    op = "save",
                    update_id = %id,
                    source_link = %update.source_message_link,
                    "Update row inserted"
                );
                Ok(SaveOutcome::Saved(id))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                info!(
                    subsystem = "database",
                    component = "updates",
                    op = "save",
                    source_link = %update.source_message_link,
                    update_key = %update.update_key,
                    constraint = db_err.constraint().unwrap_or(""),
                    "Message already processed; skipping insert"
                );
                Ok(SaveOutcome::AlreadyExists)
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn count_for_link(&self, link: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*)::bigint AS count FROM telegram_project_updates \
             WHERE source_message_link = $1",
        )
        .bind(link)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }

    async fn list_missing_embeddings(
        &self,
        project_name: Option<&str>,
        after_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<StoredUpdate>> {
        let query = format!(
            "SELECT {} FROM {} \
             WHERE embedding IS NULL \
               AND ($1::text IS NULL OR project_name = $1) \
               AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id \
             LIMIT $3",
            STORED_COLUMNS, UPDATES_TABLE
        );
        let rows = sqlx::query(&query)
            .bind(project_name)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(Self::stored_from_row).collect())
    }

    async fn set_embedding(&self, id: Uuid, embedding: &Vector) -> Result<()> {
        let result =
            sqlx::query("UPDATE telegram_project_updates SET embedding = $2 WHERE id = $1")
                .bind(id)
                .bind(embedding)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("update {}", id)));
        }
        Ok(())
    }

    async fn list_with_embeddings(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredUpdate>> {
        let query = format!(
            "SELECT {} FROM {} \
             WHERE embedding IS NOT NULL \
               AND ($1::timestamptz IS NULL OR processed_at >= $1) \
             ORDER BY processed_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
            STORED_COLUMNS, UPDATES_TABLE
        );
        let rows = sqlx::query(&query)
            .bind(since)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(Self::stored_from_row).collect())
    }
}

#[async_trait]
impl SimilaritySearch for PgUpdateRepository {
    async fn find_similar(
        &self,
        query: &Vector,
        threshold: f64,
        limit: i64,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<SimilarUpdate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, similarity, project_name, activity_type, summary, source_message_link
            FROM (
                SELECT id, project_name, activity_type, summary, source_message_link,
                       1.0 - (embedding <=> $1::vector) AS similarity
                FROM telegram_project_updates
                WHERE embedding IS NOT NULL
                  AND ($4::uuid IS NULL OR id <> $4)
            ) scored
            WHERE similarity >= $2
            ORDER BY similarity DESC
            LIMIT $3
            "#,
        )
        .bind(query)
        .bind(threshold - defaults::SIMILARITY_EPSILON)
        .bind(limit)
        .bind(exclude_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let matches: Vec<SimilarUpdate> = rows
            .into_iter()
            .map(|row| SimilarUpdate {
                id: row.get("id"),
                similarity: row.get::<f64, _>("similarity"),
                project_name: row.get("project_name"),
                activity_type: row.get("activity_type"),
                summary: row.get("summary"),
                source_message_link: row.get("source_message_link"),
            })
            .collect();

        debug!(
            subsystem = "database",
            component = "updates",
            op = "find_similar",
            threshold,
            match_count = matches.len(),
            "Similarity search complete"
        );
        Ok(matches)
    }
}
