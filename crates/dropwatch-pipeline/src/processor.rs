//! Per-message processing: normalize, extract, parse, aggregate, embed,
//! deduplicate and persist.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use dropwatch_core::{
    EmbeddingBackend, Error, GenerationBackend, NewUpdate, Result, SaveOutcome, ShutdownSignal,
    SimilaritySearch, SourceMessage, UpdateRepository,
};
use dropwatch_inference::{EmbeddingGenerator, ExtractionClient, PromptBuilder};

use crate::aggregate::aggregate;
use crate::config::PipelineConfig;
use crate::dedup::DuplicateDetector;
use crate::normalize::{normalize, Normalization, Normalized, SkipReason};
use crate::parser::ResponseParser;

/// Everything a message needs on its way through the pipeline.
///
/// Built once at startup and shared by every component.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub extractor: ExtractionClient,
    pub embedder: EmbeddingGenerator,
    pub repository: Arc<dyn UpdateRepository>,
    pub search: Arc<dyn SimilaritySearch>,
    pub prompts: PromptBuilder,
    pub parser: ResponseParser,
    pub detector: DuplicateDetector,
    pub shutdown: ShutdownSignal,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        generation: Arc<dyn GenerationBackend>,
        embedding: Arc<dyn EmbeddingBackend>,
        repository: Arc<dyn UpdateRepository>,
        search: Arc<dyn SimilaritySearch>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let policy = config.retry_policy();
        Ok(Self {
            extractor: ExtractionClient::new(generation, policy.clone()),
            embedder: EmbeddingGenerator::new(embedding, policy),
            prompts: PromptBuilder::new(config.mode),
            parser: ResponseParser::new()?,
            detector: config.duplicate_detector(),
            repository,
            search,
            shutdown,
            config,
        })
    }
}

/// Row-level counts for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub saved: usize,
    pub already_existing: usize,
    pub failed: usize,
    pub duplicates: usize,
}

/// What happened to one message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Rejected by the normalizer; nothing was called.
    Skipped(SkipReason),
    /// Rows already exist for the link; nothing was called.
    AlreadyProcessed,
    /// The extractor found nothing to store.
    NoUpdates,
    /// Rows were written (or already present).
    Persisted(PersistReport),
    /// Terminal failure for this message.
    Failed(Error),
    /// A stop request interrupted the message; it will be reprocessed later.
    Cancelled,
}

impl MessageOutcome {
    /// Short label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            MessageOutcome::Skipped(_) => "skipped",
            MessageOutcome::AlreadyProcessed => "already_processed",
            MessageOutcome::NoUpdates => "no_updates",
            MessageOutcome::Persisted(_) => "persisted",
            MessageOutcome::Failed(_) => "failed",
            MessageOutcome::Cancelled => "cancelled",
        }
    }
}

/// Runs single messages through the pipeline.
pub struct MessageProcessor {
    ctx: PipelineContext,
}

impl MessageProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Process one message end to end. Never panics and never returns an
    /// error; failures are reported through the outcome.
    pub async fn process(&self, message: &SourceMessage) -> MessageOutcome {
        let start = Instant::now();
        let outcome = self.process_inner(message).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            MessageOutcome::Failed(e) => error!(
                subsystem = "pipeline",
                component = "processor",
                source_link = %message.link,
                channel = %message.channel,
                outcome = outcome.label(),
                error = %e,
                duration_ms,
                "Message failed"
            ),
            MessageOutcome::Persisted(report) => info!(
                subsystem = "pipeline",
                component = "processor",
                source_link = %message.link,
                channel = %message.channel,
                outcome = outcome.label(),
                saved = report.saved,
                already_existing = report.already_existing,
                failed = report.failed,
                duplicates = report.duplicates,
                duration_ms,
                "Message processed"
            ),
            other => info!(
                subsystem = "pipeline",
                component = "processor",
                source_link = %message.link,
                channel = %message.channel,
                outcome = other.label(),
                duration_ms,
                "Message processed"
            ),
        }
        outcome
    }

    async fn process_inner(&self, message: &SourceMessage) -> MessageOutcome {
        let normalized = match normalize(message) {
            Normalization::Ready(n) => n,
            Normalization::Skipped(reason) => return MessageOutcome::Skipped(reason),
        };

        if self.ctx.config.link_precheck() && self.already_processed(&normalized.link).await {
            return MessageOutcome::AlreadyProcessed;
        }

        let prompt = self.ctx.prompts.build(&normalized.text, &normalized.channel);
        let raw = match self
            .ctx
            .extractor
            .extract(&prompt, &normalized.link, &self.ctx.shutdown)
            .await
        {
            Ok(raw) => raw,
            Err(Error::Cancelled) => return MessageOutcome::Cancelled,
            Err(e) => return MessageOutcome::Failed(e),
        };

        let parsed = match self.ctx.parser.parse(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    subsystem = "pipeline",
                    component = "parser",
                    source_link = %normalized.link,
                    error = %e,
                    raw = %e.raw(),
                    "Extraction response rejected"
                );
                return MessageOutcome::Failed(Error::Parse(e));
            }
        };

        let rows = aggregate(self.ctx.config.mode, &parsed, &normalized);
        debug!(
            subsystem = "pipeline",
            component = "aggregator",
            source_link = %normalized.link,
            mode = %self.ctx.config.mode,
            candidate_count = parsed.candidates.len(),
            row_count = rows.len(),
            "Candidates aggregated"
        );
        if rows.is_empty() {
            return MessageOutcome::NoUpdates;
        }

        self.persist_rows(rows, &normalized).await
    }

    /// Link pre-check. A failing store lets the message through; the
    /// unique key still prevents a second row.
    async fn already_processed(&self, link: &str) -> bool {
        match self.ctx.repository.count_for_link(link).await {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(
                    subsystem = "pipeline",
                    component = "processor",
                    source_link = link,
                    error = %e,
                    "Processed-link check failed; continuing"
                );
                false
            }
        }
    }

    async fn persist_rows(&self, rows: Vec<NewUpdate>, message: &Normalized) -> MessageOutcome {
        let mut report = PersistReport::default();

        for mut row in rows {
            let embedding = match self
                .ctx
                .embedder
                .embed_or_none(&row.embedding_text(), &message.link, &self.ctx.shutdown)
                .await
            {
                Ok(embedding) => embedding,
                Err(_) => return MessageOutcome::Cancelled,
            };

            if let Some(vector) = &embedding {
                row.is_duplicate = self
                    .ctx
                    .detector
                    .is_duplicate(self.ctx.search.as_ref(), vector, &message.link)
                    .await;
            }
            row.embedding = embedding;

            match self.ctx.repository.save(&row).await {
                Ok(SaveOutcome::Saved(id)) => {
                    report.saved += 1;
                    if row.is_duplicate {
                        report.duplicates += 1;
                    }
                    debug!(
                        subsystem = "pipeline",
                        component = "processor",
                        source_link = %message.link,
                        update_id = %id,
                        update_key = %row.update_key,
                        is_duplicate = row.is_duplicate,
                        needs_review = row.needs_review,
                        "Row saved"
                    );
                }
                Ok(SaveOutcome::AlreadyExists) => report.already_existing += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        subsystem = "pipeline",
                        component = "processor",
                        source_link = %message.link,
                        update_key = %row.update_key,
                        error = %e,
                        "Failed to save row"
                    );
                }
            }
        }

        MessageOutcome::Persisted(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropwatch_core::shutdown_channel;
    use dropwatch_db::MemoryUpdateStore;
    use dropwatch_inference::mock::{MockEmbeddingBackend, MockGenerationBackend, MockReply};
    use std::time::Duration;

    const ONE_PROJECT: &str = r#"{"identified_projects": [{"project_name": "Alpha", "activity_type": "Testnet", "summary": "Testnet is live.", "key_links": ["https://alpha.example"]}]}"#;

    fn message(text: &str) -> SourceMessage {
        SourceMessage::new(text, "alpha_calls", 45678.5, "https://t.me/c/1/100")
    }

    fn processor(
        generation: MockGenerationBackend,
        embedding: MockEmbeddingBackend,
        store: Arc<MemoryUpdateStore>,
        config: PipelineConfig,
    ) -> MessageProcessor {
        let ctx = PipelineContext::new(
            config,
            Arc::new(generation),
            Arc::new(embedding),
            store.clone(),
            store,
            ShutdownSignal::never(),
        )
        .unwrap();
        MessageProcessor::new(ctx)
    }

    #[tokio::test]
    async fn test_single_project_persisted_with_embedding() {
        let generation = MockGenerationBackend::new().with_reply(MockReply::Text(ONE_PROJECT.into()));
        let embedding = MockEmbeddingBackend::new();
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            generation.clone(),
            embedding.clone(),
            store.clone(),
            PipelineConfig::default(),
        );

        let outcome = p.process(&message("Alpha testnet is live")).await;
        match outcome {
            MessageOutcome::Persisted(report) => {
                assert_eq!(report.saved, 1);
                assert_eq!(report.duplicates, 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        let row = &rows[0].update;
        assert!(row.embedding.is_some());
        assert_eq!(
            embedding.texts(),
            vec!["Project: Alpha, Activity: Testnet, Summary: [Alpha]: Testnet is live. Links: https://alpha.example".to_string()]
        );
        assert_eq!(
            row.message_timestamp.map(|t| t.to_rfc3339()),
            Some("2025-01-21T12:00:00+00:00".to_string())
        );
        assert_eq!(generation.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_skipped_without_calls() {
        let generation = MockGenerationBackend::new();
        let embedding = MockEmbeddingBackend::new();
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            generation.clone(),
            embedding.clone(),
            store.clone(),
            PipelineConfig::default(),
        );

        let outcome = p.process(&message("   ")).await;
        assert!(matches!(outcome, MessageOutcome::Skipped(SkipReason::Empty)));
        assert_eq!(generation.call_count(), 0);
        assert_eq!(embedding.call_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_is_terminal_for_message() {
        let generation = MockGenerationBackend::new()
            .with_reply(MockReply::Text("{\"projects\": []}".into()));
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            generation,
            MockEmbeddingBackend::new(),
            store.clone(),
            PipelineConfig::default(),
        );

        let outcome = p.process(&message("Alpha testnet")).await;
        assert!(matches!(outcome, MessageOutcome::Failed(Error::Parse(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_is_no_updates() {
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            MockGenerationBackend::new(),
            MockEmbeddingBackend::new(),
            store.clone(),
            PipelineConfig::default(),
        );
        let outcome = p.process(&message("gm")).await;
        assert!(matches!(outcome, MessageOutcome::NoUpdates));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_prompt_fails_message() {
        let generation =
            MockGenerationBackend::new().with_reply(MockReply::Blocked("SAFETY".into()));
        let p = processor(
            generation,
            MockEmbeddingBackend::new(),
            Arc::new(MemoryUpdateStore::new()),
            PipelineConfig::default(),
        );
        let outcome = p.process(&message("something")).await;
        assert!(matches!(
            outcome,
            MessageOutcome::Failed(Error::ContentBlocked(ref r)) if r == "SAFETY"
        ));
    }

    #[tokio::test]
    async fn test_embedding_failure_stores_row_without_vector() {
        let generation = MockGenerationBackend::new().with_reply(MockReply::Text(ONE_PROJECT.into()));
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            generation,
            MockEmbeddingBackend::new().failing(),
            store.clone(),
            PipelineConfig::default(),
        );
        let outcome = p.process(&message("Alpha testnet")).await;
        assert!(matches!(outcome, MessageOutcome::Persisted(r) if r.saved == 1));
        let row = &store.rows()[0].update;
        assert!(row.embedding.is_none());
        assert!(!row.is_duplicate);
    }

    #[tokio::test]
    async fn test_save_failure_counted_not_fatal() {
        let generation = MockGenerationBackend::new().with_reply(MockReply::Text(ONE_PROJECT.into()));
        let store = Arc::new(MemoryUpdateStore::new());
        store.set_fail_saves(true);
        let p = processor(
            generation,
            MockEmbeddingBackend::new(),
            store.clone(),
            PipelineConfig::default(),
        );
        let outcome = p.process(&message("Alpha testnet")).await;
        assert!(matches!(outcome, MessageOutcome::Persisted(r) if r.failed == 1 && r.saved == 0));
    }

    #[tokio::test]
    async fn test_processed_link_short_circuits() {
        let generation = MockGenerationBackend::new().always(MockReply::Text(ONE_PROJECT.into()));
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            generation.clone(),
            MockEmbeddingBackend::new(),
            store.clone(),
            PipelineConfig::default(),
        );

        p.process(&message("Alpha testnet")).await;
        let second = p.process(&message("Alpha testnet")).await;
        assert!(matches!(second, MessageOutcome::AlreadyProcessed));
        assert_eq!(generation.call_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reprocessing_without_precheck_reports_already_exists() {
        let generation = MockGenerationBackend::new().always(MockReply::Text(ONE_PROJECT.into()));
        let store = Arc::new(MemoryUpdateStore::new());
        let p = processor(
            generation.clone(),
            MockEmbeddingBackend::new(),
            store.clone(),
            PipelineConfig::default().with_skip_processed(false),
        );

        p.process(&message("Alpha testnet")).await;
        let second = p.process(&message("Alpha testnet")).await;
        assert!(matches!(second, MessageOutcome::Persisted(r) if r.already_existing == 1 && r.saved == 0));
        assert_eq!(generation.call_count(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_cancels_message() {
        let generation = MockGenerationBackend::new().always(MockReply::RateLimited(None));
        let store = Arc::new(MemoryUpdateStore::new());
        let (trigger, signal) = shutdown_channel();
        let ctx = PipelineContext::new(
            PipelineConfig::default(),
            Arc::new(generation.clone()),
            Arc::new(MockEmbeddingBackend::new()),
            store.clone(),
            store.clone(),
            signal,
        )
        .unwrap();
        let p = Arc::new(MessageProcessor::new(ctx));

        let task = {
            let p = p.clone();
            tokio::spawn(async move { p.process(&message("Alpha testnet")).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Cancelled));
        assert_eq!(generation.call_count(), 1);
        assert!(store.is_empty());
    }
}
