//! Message sources feeding the batch runner.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use dropwatch_core::{normalize_timestamp, Result, SourceMessage};

/// An ordered sequence of source messages.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` when the source is exhausted.
    async fn next_message(&mut self) -> Result<Option<SourceMessage>>;
}

/// A batch of messages held in memory.
#[derive(Debug, Default)]
pub struct VecMessageSource {
    messages: VecDeque<SourceMessage>,
}

impl VecMessageSource {
    /// Historical batch, replayed in ascending timestamp order.
    ///
    /// Messages whose timestamp cannot be parsed go last, in input order.
    pub fn historical(mut messages: Vec<SourceMessage>) -> Self {
        messages.sort_by_cached_key(|m| {
            let ts = normalize_timestamp(&m.timestamp).as_utc();
            (ts.is_none(), ts)
        });
        Self {
            messages: messages.into(),
        }
    }

    /// Messages replayed exactly as given.
    pub fn in_order(messages: Vec<SourceMessage>) -> Self {
        Self {
            messages: messages.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        (**self).next_message().await
    }
}

#[async_trait]
impl MessageSource for VecMessageSource {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        Ok(self.messages.pop_front())
    }
}

/// Streams messages from a JSON-lines file in file order.
///
/// Each non-blank line is one [`SourceMessage`] object. Malformed lines are
/// logged and skipped. Invalid UTF-8 is decoded lossily; the replacement
/// characters are dropped later by the normalizer.
pub struct JsonlMessageSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_no: usize,
}

impl JsonlMessageSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_no: 0,
        })
    }

    /// Read the whole file into a historical batch.
    pub async fn load_historical(path: impl AsRef<Path>) -> Result<VecMessageSource> {
        let mut source = Self::open(path).await?;
        let mut messages = Vec::new();
        while let Some(message) = source.next_message().await? {
            messages.push(message);
        }
        debug!(
            subsystem = "pipeline",
            component = "source",
            path = %source.path.display(),
            count = messages.len(),
            "Loaded historical batch"
        );
        Ok(VecMessageSource::historical(messages))
    }
}

#[async_trait]
impl MessageSource for JsonlMessageSource {
    async fn next_message(&mut self) -> Result<Option<SourceMessage>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let decoded = String::from_utf8_lossy(&self.buf);
            if let Cow::Owned(_) = decoded {
                debug!(
                    subsystem = "pipeline",
                    component = "source",
                    path = %self.path.display(),
                    line = self.line_no,
                    "Line is not valid UTF-8; decoded lossily"
                );
            }
            let line = decoded.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SourceMessage>(line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!(
                    subsystem = "pipeline",
                    component = "source",
                    path = %self.path.display(),
                    line = self.line_no,
                    error = %e,
                    "Skipping malformed message line"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn msg(ts: &str, link: &str) -> SourceMessage {
        SourceMessage::new("text", "c", ts, link)
    }

    async fn drain(source: &mut dyn MessageSource) -> Vec<String> {
        let mut links = Vec::new();
        while let Some(m) = source.next_message().await.unwrap() {
            links.push(m.link);
        }
        links
    }

    #[tokio::test]
    async fn test_historical_sorted_by_timestamp() {
        let mut source = VecMessageSource::historical(vec![
            msg("2025-04-17T16:00:00Z", "b"),
            msg("not a date", "z"),
            msg("2025-04-16T09:00:00Z", "a"),
            SourceMessage::new("text", "c", 45800.0, "c"),
        ]);
        assert_eq!(source.len(), 4);
        assert_eq!(drain(&mut source).await, vec!["a", "b", "c", "z"]);
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_in_order_preserves_delivery_order() {
        let mut source = VecMessageSource::in_order(vec![
            msg("2025-04-17T16:00:00Z", "b"),
            msg("2025-04-16T09:00:00Z", "a"),
        ]);
        assert_eq!(drain(&mut source).await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_jsonl_skips_blank_and_malformed_lines() {
        let path = std::env::temp_dir().join(format!(
            "dropwatch-source-{}.jsonl",
            uuid::Uuid::new_v4().simple()
        ));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(
                file,
                r#"{{"text": "one", "channel": "c", "timestamp": "2025-04-17T16:00:00Z", "link": "https://t.me/c/1/2"}}"#
            )
            .unwrap();
            writeln!(file).unwrap();
            writeln!(file, "not json").unwrap();
            writeln!(
                file,
                r#"{{"text": "two", "channel": "c", "timestamp": 45678.5, "link": "https://t.me/c/1/1"}}"#
            )
            .unwrap();
        }

        let mut source = JsonlMessageSource::open(&path).await.unwrap();
        assert_eq!(
            drain(&mut source).await,
            vec!["https://t.me/c/1/2", "https://t.me/c/1/1"]
        );

        let mut historical = JsonlMessageSource::load_historical(&path).await.unwrap();
        assert_eq!(
            drain(&mut historical).await,
            vec!["https://t.me/c/1/1", "https://t.me/c/1/2"]
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_jsonl_invalid_utf8_does_not_end_the_stream() {
        let path = std::env::temp_dir().join(format!(
            "dropwatch-source-{}.jsonl",
            uuid::Uuid::new_v4().simple()
        ));
        let mut bytes = Vec::new();
        bytes.extend_from_slice(
            br#"{"text": "one", "channel": "c", "timestamp": "2025-04-17T16:00:00Z", "link": "https://t.me/c/1/1"}"#,
        );
        bytes.push(b'\n');
        bytes.extend_from_slice(b"{\"text\": \"caf\xff\", \"channel\": \"c\", ");
        bytes.extend_from_slice(
            br#""timestamp": "2025-04-17T16:01:00Z", "link": "https://t.me/c/1/2"}"#,
        );
        bytes.push(b'\n');
        bytes.extend_from_slice(b"\xff\xfe not json\n");
        bytes.extend_from_slice(
            br#"{"text": "three", "channel": "c", "timestamp": "2025-04-17T16:02:00Z", "link": "https://t.me/c/1/3"}"#,
        );
        std::fs::write(&path, &bytes).unwrap();

        let mut source = JsonlMessageSource::open(&path).await.unwrap();
        let mut messages = Vec::new();
        while let Some(m) = source.next_message().await.unwrap() {
            messages.push(m);
        }
        std::fs::remove_file(&path).unwrap();

        let links: Vec<&str> = messages.iter().map(|m| m.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://t.me/c/1/1", "https://t.me/c/1/2", "https://t.me/c/1/3"]
        );
        assert_eq!(messages[1].text, "caf\u{FFFD}");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = JsonlMessageSource::open("/nonexistent/dropwatch/messages.jsonl").await;
        assert!(matches!(result, Err(dropwatch_core::Error::Io(_))));
    }
}
