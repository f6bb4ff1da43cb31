//! Core data models for dropwatch.
//!
//! These types are shared across all dropwatch crates and describe a message
//! as it moves from the source through extraction to a stored update row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;
use crate::timestamp::RawTimestamp;

/// Re-export the pgvector type so downstream crates share one definition.
pub use pgvector::Vector;

// =============================================================================
// SOURCE MESSAGES
// =============================================================================

/// A message handed over by the message source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    /// Message text. May be empty or the media placeholder.
    #[serde(default)]
    pub text: String,
    /// Channel the message was posted in.
    pub channel: String,
    /// Post time in whatever shape the source holds it.
    pub timestamp: RawTimestamp,
    /// Stable unique link, `https://t.me/c/<chat-id>/<message-id>`.
    pub link: String,
}

impl SourceMessage {
    pub fn new(
        text: impl Into<String>,
        channel: impl Into<String>,
        timestamp: impl Into<RawTimestamp>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            channel: channel.into(),
            timestamp: timestamp.into(),
            link: link.into(),
        }
    }
}

// =============================================================================
// ACTIVITY TAXONOMY
// =============================================================================

/// Closed taxonomy of update activity types.
///
/// Labels the extractor returns outside the taxonomy are kept as
/// [`ActivityType::Unrecognized`] and routed to review.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Testnet,
    AirdropCheck,
    AirdropClaim,
    QuestTask,
    WaitlistForm,
    Partnership,
    ProtocolUpdate,
    TokenSaleIdo,
    Vote,
    NewProjectAnnouncement,
    GuideTutorial,
    CommunitySocial,
    Funding,
    TokenomicsSale,
    GeneralUpdate,
    MarketCommentary,
    NoiseOther,
    Unrecognized(String),
}

impl ActivityType {
    /// Every recognized activity type, in prompt order.
    pub const KNOWN: [ActivityType; 17] = [
        ActivityType::Testnet,
        ActivityType::AirdropCheck,
        ActivityType::AirdropClaim,
        ActivityType::QuestTask,
        ActivityType::WaitlistForm,
        ActivityType::Partnership,
        ActivityType::ProtocolUpdate,
        ActivityType::TokenSaleIdo,
        ActivityType::Vote,
        ActivityType::NewProjectAnnouncement,
        ActivityType::GuideTutorial,
        ActivityType::CommunitySocial,
        ActivityType::Funding,
        ActivityType::TokenomicsSale,
        ActivityType::GeneralUpdate,
        ActivityType::MarketCommentary,
        ActivityType::NoiseOther,
    ];

    /// The label used in prompts and stored rows.
    pub fn label(&self) -> &str {
        match self {
            ActivityType::Testnet => "Testnet",
            ActivityType::AirdropCheck => "Airdrop Check",
            ActivityType::AirdropClaim => "Airdrop Claim",
            ActivityType::QuestTask => "Quest/Task",
            ActivityType::WaitlistForm => "Waitlist/Form",
            ActivityType::Partnership => "Partnership",
            ActivityType::ProtocolUpdate => "Protocol Update",
            ActivityType::TokenSaleIdo => "Token Sale/IDO",
            ActivityType::Vote => "Vote",
            ActivityType::NewProjectAnnouncement => "New Project Announcement",
            ActivityType::GuideTutorial => "Guide/Tutorial",
            ActivityType::CommunitySocial => "Community/Social",
            ActivityType::Funding => "Funding",
            ActivityType::TokenomicsSale => "Tokenomics/Sale",
            ActivityType::GeneralUpdate => "General Update",
            ActivityType::MarketCommentary => "Market Commentary",
            ActivityType::NoiseOther => "Noise/Other",
            ActivityType::Unrecognized(label) => label,
        }
    }

    /// Resolve a label, falling back to `Unrecognized` for unknown text.
    ///
    /// Matching ignores case and surrounding whitespace.
    pub fn from_label(label: &str) -> Self {
        let trimmed = label.trim();
        Self::KNOWN
            .iter()
            .find(|known| known.label().eq_ignore_ascii_case(trimmed))
            .cloned()
            .unwrap_or_else(|| ActivityType::Unrecognized(trimmed.to_string()))
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ActivityType::Unrecognized(_))
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ActivityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_label(s))
    }
}

impl Serialize for ActivityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::from_label(&label))
    }
}

// =============================================================================
// EXTRACTION RESULTS
// =============================================================================

/// One project update identified in a message by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateUpdate {
    pub project_name: Option<String>,
    pub activity_type: ActivityType,
    pub summary: String,
    pub is_node_opportunity: bool,
    pub is_uncertain: bool,
    pub key_links: Vec<String>,
    pub referral_links: Vec<String>,
    /// Deadline exactly as the extractor phrased it.
    pub deadline_text: Option<String>,
    /// Deadline when the text is a recognizable date.
    pub deadline_parsed: Option<DateTime<Utc>>,
    pub required_actions_summary: Option<String>,
}

impl CandidateUpdate {
    /// Minimal candidate; remaining fields start empty.
    pub fn new(
        project_name: Option<&str>,
        activity_type: ActivityType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            project_name: project_name.map(str::to_string),
            activity_type,
            summary: summary.into(),
            is_node_opportunity: false,
            is_uncertain: false,
            key_links: Vec::new(),
            referral_links: Vec::new(),
            deadline_text: None,
            deadline_parsed: None,
            required_actions_summary: None,
        }
    }

    /// Whether a reviewer should look at this candidate.
    pub fn is_ambiguous(&self) -> bool {
        self.is_uncertain
            || self
                .project_name
                .as_deref()
                .map_or(true, |name| name.trim().is_empty())
            || !self.activity_type.is_recognized()
    }
}

/// Guide metadata reported alongside the candidate list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuideInfo {
    pub summary: Option<String>,
    pub subject: Option<String>,
}

/// A validated extraction response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub candidates: Vec<CandidateUpdate>,
    /// Present when the extractor flagged the message as a guide.
    pub guide: Option<GuideInfo>,
    /// The decoded JSON object, stored for audit.
    pub raw_json: JsonValue,
}

impl ParsedResponse {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.guide.is_none()
    }
}

// =============================================================================
// AGGREGATION
// =============================================================================

/// How the candidates of one message become stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// All candidates merge into one row per message.
    #[default]
    WholeMessage,
    /// One row per distinct (project, activity) candidate.
    PerUpdate,
}

impl AggregationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMode::WholeMessage => "whole_message",
            AggregationMode::PerUpdate => "per_update",
        }
    }
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "whole_message" | "whole" => Ok(AggregationMode::WholeMessage),
            "per_update" | "per" => Ok(AggregationMode::PerUpdate),
            other => Err(Error::Config(format!(
                "unknown aggregation mode '{}' (expected whole_message or per_update)",
                other
            ))),
        }
    }
}

// =============================================================================
// STORED UPDATES
// =============================================================================

/// A persistence-ready update row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUpdate {
    /// Empty in whole-message mode; `project|activity` (lowercased) per update.
    pub update_key: String,
    pub project_name: Option<String>,
    pub activity_type: Option<String>,
    pub summary: Option<String>,
    pub key_links: Vec<String>,
    pub referral_links: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub deadline_original_text: Option<String>,
    pub required_actions_summary: Option<String>,
    pub is_node_opportunity: bool,
    pub is_uncertain: bool,
    pub is_guide: bool,
    pub needs_review: bool,
    pub is_duplicate: bool,
    pub source_channel: String,
    pub source_message_link: String,
    pub message_timestamp: Option<DateTime<Utc>>,
    /// Original timestamp text when it could not be normalized.
    pub message_timestamp_raw: Option<String>,
    pub full_message_text: String,
    pub raw_llm_output: Option<JsonValue>,
    #[serde(skip)]
    pub embedding: Option<Vector>,
}

impl NewUpdate {
    /// Text fed to the embedding service for this row.
    pub fn embedding_text(&self) -> String {
        embedding_text(
            self.project_name.as_deref(),
            self.activity_type.as_deref(),
            self.summary.as_deref(),
            &self.key_links,
        )
    }
}

/// Build the embedding input text for an update.
///
/// Missing fields render as `Unknown`; links are appended only when present.
pub fn embedding_text(
    project_name: Option<&str>,
    activity_type: Option<&str>,
    summary: Option<&str>,
    key_links: &[String],
) -> String {
    let mut text = format!(
        "Project: {}, Activity: {}, Summary: {}",
        project_name.unwrap_or("Unknown"),
        activity_type.unwrap_or("Unknown"),
        summary.unwrap_or("Unknown"),
    );
    if !key_links.is_empty() {
        text.push_str(" Links: ");
        text.push_str(&key_links.join(" "));
    }
    text
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new row was written.
    Saved(Uuid),
    /// A row with the same identity already exists.
    AlreadyExists,
}

/// An update row read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredUpdate {
    pub id: Uuid,
    pub project_name: Option<String>,
    pub activity_type: Option<String>,
    pub summary: Option<String>,
    pub key_links: Vec<String>,
    pub source_message_link: String,
    pub message_timestamp: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    #[serde(skip)]
    pub embedding: Option<Vector>,
}

impl StoredUpdate {
    pub fn embedding_text(&self) -> String {
        embedding_text(
            self.project_name.as_deref(),
            self.activity_type.as_deref(),
            self.summary.as_deref(),
            &self.key_links,
        )
    }
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarUpdate {
    pub id: Uuid,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub similarity: f64,
    pub project_name: Option<String>,
    pub activity_type: Option<String>,
    pub summary: Option<String>,
    pub source_message_link: String,
}
