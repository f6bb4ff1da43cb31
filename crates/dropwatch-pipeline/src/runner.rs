//! Sequential batch runner.
//!
//! Drives a [`MessageSource`] one message at a time, pausing after every
//! message and stopping between messages (or during a wait) when shutdown
//! is requested.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use dropwatch_core::defaults::EVENT_BUS_CAPACITY;
use dropwatch_core::{Error, Result, ShutdownSignal, ShutdownTrigger};

use crate::processor::{MessageOutcome, MessageProcessor};
use crate::source::MessageSource;

/// Event emitted by the batch runner.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// Runner started.
    RunStarted,
    /// A message entered the pipeline.
    MessageStarted { link: String },
    /// A message left the pipeline.
    MessageFinished {
        link: String,
        outcome: &'static str,
        error: Option<String>,
    },
    /// Runner stopped, either exhausted or on request.
    RunStopped { summary: RunSummary },
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Messages taken from the source.
    pub messages: usize,
    pub skipped: usize,
    pub already_processed: usize,
    pub no_updates: usize,
    pub persisted: usize,
    pub failed: usize,
    pub rows_saved: usize,
    pub rows_already_existing: usize,
    pub rows_failed: usize,
    pub duplicates: usize,
    /// Whether the run ended on a stop request.
    pub cancelled: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: &MessageOutcome) {
        self.messages += 1;
        match outcome {
            MessageOutcome::Skipped(_) => self.skipped += 1,
            MessageOutcome::AlreadyProcessed => self.already_processed += 1,
            MessageOutcome::NoUpdates => self.no_updates += 1,
            MessageOutcome::Persisted(report) => {
                self.persisted += 1;
                self.rows_saved += report.saved;
                self.rows_already_existing += report.already_existing;
                self.rows_failed += report.failed;
                self.duplicates += report.duplicates;
            }
            MessageOutcome::Failed(_) => self.failed += 1,
            MessageOutcome::Cancelled => self.cancelled = true,
        }
    }
}

/// Handle for controlling a running batch.
pub struct RunnerHandle {
    trigger: Arc<ShutdownTrigger>,
    event_rx: broadcast::Receiver<RunnerEvent>,
    join: JoinHandle<RunSummary>,
}

impl RunnerHandle {
    /// Ask the runner to stop after the current message or wait.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// Shared trigger, for stopping the run from another task.
    pub fn shutdown_trigger(&self) -> Arc<ShutdownTrigger> {
        self.trigger.clone()
    }

    /// Get a receiver for runner events.
    pub fn events(&self) -> broadcast::Receiver<RunnerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<RunSummary> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("runner task failed: {}", e)))
    }
}

/// Processes a message source sequentially.
pub struct BatchRunner {
    processor: Arc<MessageProcessor>,
    trigger: Arc<ShutdownTrigger>,
    shutdown: ShutdownSignal,
    message_delay: Duration,
    event_tx: broadcast::Sender<RunnerEvent>,
}

impl BatchRunner {
    /// `trigger` must drive the signal held by the processor's context.
    pub fn new(processor: MessageProcessor, trigger: ShutdownTrigger) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let shutdown = processor.context().shutdown.clone();
        let message_delay = processor.context().config.message_delay;
        Self {
            processor: Arc::new(processor),
            trigger: Arc::new(trigger),
            shutdown,
            message_delay,
            event_tx,
        }
    }

    /// Get a receiver for runner events.
    pub fn events(&self) -> broadcast::Receiver<RunnerEvent> {
        self.event_tx.subscribe()
    }

    /// Request a stop.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// Spawn the run and return a handle for control.
    pub fn start<S: MessageSource + 'static>(self, mut source: S) -> RunnerHandle {
        let event_rx = self.event_tx.subscribe();
        let trigger = self.trigger.clone();
        let join = tokio::spawn(async move { self.run(&mut source).await });
        RunnerHandle {
            trigger,
            event_rx,
            join,
        }
    }

    /// Drive `source` to exhaustion or until shutdown.
    #[instrument(skip_all)]
    pub async fn run(&self, source: &mut dyn MessageSource) -> RunSummary {
        info!(
            subsystem = "pipeline",
            component = "runner",
            message_delay_ms = self.message_delay.as_millis() as u64,
            mode = %self.processor.context().config.mode,
            "Batch runner started"
        );
        let _ = self.event_tx.send(RunnerEvent::RunStarted);

        let mut summary = RunSummary::default();
        loop {
            if self.shutdown.is_triggered() {
                summary.cancelled = true;
                break;
            }

            let next = tokio::select! {
                _ = self.shutdown.triggered() => {
                    summary.cancelled = true;
                    break;
                }
                next = source.next_message() => next,
            };
            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!(
                        subsystem = "pipeline",
                        component = "runner",
                        error = %e,
                        "Message source failed; stopping run"
                    );
                    break;
                }
            };

            let _ = self.event_tx.send(RunnerEvent::MessageStarted {
                link: message.link.clone(),
            });
            let outcome = self.processor.process(&message).await;
            summary.record(&outcome);
            let _ = self.event_tx.send(RunnerEvent::MessageFinished {
                link: message.link.clone(),
                outcome: outcome.label(),
                error: match &outcome {
                    MessageOutcome::Failed(e) => Some(e.to_string()),
                    _ => None,
                },
            });

            if matches!(outcome, MessageOutcome::Cancelled) {
                break;
            }

            if self.shutdown.sleep(self.message_delay).await.is_err() {
                summary.cancelled = true;
                break;
            }
        }

        info!(
            subsystem = "pipeline",
            component = "runner",
            messages = summary.messages,
            persisted = summary.persisted,
            failed = summary.failed,
            rows_saved = summary.rows_saved,
            duplicates = summary.duplicates,
            cancelled = summary.cancelled,
            "Batch runner stopped"
        );
        let _ = self.event_tx.send(RunnerEvent::RunStopped {
            summary: summary.clone(),
        });
        summary
    }
}
