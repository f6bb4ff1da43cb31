//! Extraction response parsing and validation.
//!
//! The model is asked for a bare JSON object but often wraps it in a code
//! fence or surrounding prose. The parser locates the object, decodes it and
//! validates every field of every record, failing with a [`ParseError`] that
//! names the record index and field. A response is never coerced into an
//! empty list.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use dropwatch_core::{
    ActivityType, CandidateUpdate, Error, GuideInfo, ParseError, ParsedResponse, Result,
};

/// Top-level key holding the candidate list.
pub const PROJECTS_KEY: &str = "identified_projects";

const FENCE_PATTERN: &str = r"(?is)```(?:json)?\s*(\{.*?\})\s*```";

/// Date formats accepted for deadline text, tried in order.
const DEADLINE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parser for raw extraction responses.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    fence: Regex,
}

impl ResponseParser {
    pub fn new() -> Result<Self> {
        let fence = Regex::new(FENCE_PATTERN)
            .map_err(|e| Error::Internal(format!("invalid fence pattern: {}", e)))?;
        Ok(Self { fence })
    }

    /// Parse and validate a raw response.
    pub fn parse(&self, raw: &str) -> std::result::Result<ParsedResponse, ParseError> {
        let json_text = self.locate_json(raw).ok_or_else(|| ParseError::NoJsonFound {
            raw: raw.to_string(),
        })?;
        trace!(
            subsystem = "pipeline",
            component = "parser",
            json_len = json_text.len(),
            "Located JSON payload"
        );

        let value: Value =
            serde_json::from_str(json_text).map_err(|e| ParseError::InvalidJson {
                reason: e.to_string(),
                raw: raw.to_string(),
            })?;

        let object = value.as_object().ok_or_else(|| ParseError::NotAnObject {
            raw: raw.to_string(),
        })?;

        let ctx = FieldContext { raw };
        let projects = object
            .get(PROJECTS_KEY)
            .ok_or_else(|| ParseError::MissingField {
                field: PROJECTS_KEY.to_string(),
                raw: raw.to_string(),
            })?
            .as_array()
            .ok_or_else(|| ctx.invalid(None, PROJECTS_KEY, "a list"))?;

        let candidates = projects
            .iter()
            .enumerate()
            .map(|(i, item)| ctx.candidate(i, item))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let guide = ctx.guide(object)?;

        debug!(
            subsystem = "pipeline",
            component = "parser",
            candidate_count = candidates.len(),
            is_guide = guide.is_some(),
            "Response parsed"
        );

        Ok(ParsedResponse {
            candidates,
            guide,
            raw_json: value,
        })
    }

    /// Fenced block first, then the span from the first `{` to the last `}`.
    fn locate_json<'a>(&self, raw: &'a str) -> Option<&'a str> {
        if let Some(m) = self.fence.captures(raw).and_then(|c| c.get(1)) {
            return Some(m.as_str());
        }
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        (end > start).then(|| &raw[start..=end])
    }
}

struct FieldContext<'a> {
    raw: &'a str,
}

impl FieldContext<'_> {
    fn invalid(&self, index: Option<usize>, field: &str, expected: &str) -> ParseError {
        ParseError::InvalidField {
            index,
            field: field.to_string(),
            expected: expected.to_string(),
            raw: self.raw.to_string(),
        }
    }

    fn candidate(
        &self,
        index: usize,
        item: &Value,
    ) -> std::result::Result<CandidateUpdate, ParseError> {
        let obj = item
            .as_object()
            .ok_or_else(|| self.invalid(Some(index), "record", "an object"))?;
        let at = Some(index);

        let project_name = self.opt_string(obj, at, "project_name")?;
        let activity_type = self
            .opt_string(obj, at, "activity_type")?
            .map(|label| ActivityType::from_label(&label))
            .unwrap_or_else(|| ActivityType::Unrecognized(String::new()));
        let summary = self.opt_string(obj, at, "summary")?.unwrap_or_default();
        let deadline_text = self.opt_string(obj, at, "deadline")?;
        let deadline_parsed = deadline_text.as_deref().and_then(parse_deadline);

        Ok(CandidateUpdate {
            project_name,
            activity_type,
            summary,
            is_node_opportunity: self.opt_bool(obj, at, "is_node_opportunity")?,
            is_uncertain: self.opt_bool(obj, at, "is_uncertain")?,
            key_links: self.links(obj, at, "key_links")?,
            referral_links: self.links(obj, at, "referral_links")?,
            deadline_text,
            deadline_parsed,
            required_actions_summary: self.opt_string(obj, at, "required_actions_summary")?,
        })
    }

    fn guide(
        &self,
        obj: &Map<String, Value>,
    ) -> std::result::Result<Option<GuideInfo>, ParseError> {
        if !self.opt_bool(obj, None, "is_guide")? {
            return Ok(None);
        }
        Ok(Some(GuideInfo {
            summary: self.opt_string(obj, None, "guide_summary")?,
            subject: self.opt_string(obj, None, "guide_subject")?,
        }))
    }

    /// String or null. Blank strings become `None`.
    fn opt_string(
        &self,
        obj: &Map<String, Value>,
        index: Option<usize>,
        field: &str,
    ) -> std::result::Result<Option<String>, ParseError> {
        match obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                let s = s.trim();
                Ok((!s.is_empty()).then(|| s.to_string()))
            }
            Some(_) => Err(self.invalid(index, field, "a string or null")),
        }
    }

    /// Boolean; absent or null is `false`.
    fn opt_bool(
        &self,
        obj: &Map<String, Value>,
        index: Option<usize>,
        field: &str,
    ) -> std::result::Result<bool, ParseError> {
        match obj.get(field) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(self.invalid(index, field, "a boolean")),
        }
    }

    /// List of URL strings; blanks and repeats are dropped, order kept.
    fn links(
        &self,
        obj: &Map<String, Value>,
        index: Option<usize>,
        field: &str,
    ) -> std::result::Result<Vec<String>, ParseError> {
        let items = match obj.get(field) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(self.invalid(index, field, "a list of strings")),
        };

        let mut links: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let link = item
                .as_str()
                .ok_or_else(|| self.invalid(index, field, "a list of strings"))?
                .trim();
            if !link.is_empty() && !links.iter().any(|l| l == link) {
                links.push(link.to_string());
            }
        }
        Ok(links)
    }
}

/// Interpret deadline text as a UTC date when it has a recognizable form.
pub fn parse_deadline(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    DEADLINE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parser() -> ResponseParser {
        ResponseParser::new().unwrap()
    }

    #[test]
    fn test_fenced_empty_list() {
        let raw = "here you go:\n```json\n{\"identified_projects\": []}\n```";
        let parsed = parser().parse(raw).unwrap();
        assert!(parsed.candidates.is_empty());
        assert!(parsed.guide.is_none());
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_fence_without_language_tag() {
        let raw = "```\n{\"identified_projects\": [{\"project_name\": \"Alpha\", \"activity_type\": \"Testnet\", \"summary\": \"s\"}]}\n```";
        let parsed = parser().parse(raw).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.candidates[0].project_name.as_deref(), Some("Alpha"));
    }

    #[test]
    fn test_brace_span_fallback_with_prose() {
        let raw = "Sure! {\"identified_projects\": []} Hope that helps.";
        let parsed = parser().parse(raw).unwrap();
        assert!(parsed.candidates.is_empty());
    }

    #[test]
    fn test_full_record() {
        let raw = r#"{
          "identified_projects": [{
            "project_name": "Babylon",
            "activity_type": "testnet",
            "is_node_opportunity": true,
            "summary": "Phase 2 testnet opens.",
            "key_links": ["https://babylon.example", " ", "https://babylon.example"],
            "referral_links": ["https://ref.example/abc"],
            "deadline": "2025-05-01",
            "required_actions_summary": "Register a node."
          }]
        }"#;
        let parsed = parser().parse(raw).unwrap();
        let c = &parsed.candidates[0];
        assert_eq!(c.activity_type, ActivityType::Testnet);
        assert!(c.is_node_opportunity);
        assert!(!c.is_uncertain);
        assert_eq!(c.key_links, vec!["https://babylon.example".to_string()]);
        assert_eq!(c.referral_links.len(), 1);
        assert_eq!(c.deadline_text.as_deref(), Some("2025-05-01"));
        assert_eq!(
            c.deadline_parsed,
            Some(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(c.required_actions_summary.as_deref(), Some("Register a node."));
        assert!(parsed.raw_json.get(PROJECTS_KEY).is_some());
    }

    #[test]
    fn test_free_text_deadline_kept_unparsed() {
        let raw = r#"{"identified_projects": [{"project_name": "A", "activity_type": "Vote", "summary": "s", "deadline": "end of next week"}]}"#;
        let c = &parser().parse(raw).unwrap().candidates[0];
        assert_eq!(c.deadline_text.as_deref(), Some("end of next week"));
        assert!(c.deadline_parsed.is_none());
    }

    #[test]
    fn test_unknown_activity_is_unrecognized() {
        let raw = r#"{"identified_projects": [{"project_name": "A", "activity_type": "Meme Contest", "summary": "s"}]}"#;
        let c = &parser().parse(raw).unwrap().candidates[0];
        assert_eq!(
            c.activity_type,
            ActivityType::Unrecognized("Meme Contest".to_string())
        );
        assert!(c.is_ambiguous());
    }

    #[test]
    fn test_guide_fields_with_empty_list() {
        let raw = r#"{"identified_projects": [], "is_guide": true, "guide_summary": "How to bridge.", "guide_subject": "Bridging"}"#;
        let parsed = parser().parse(raw).unwrap();
        assert!(parsed.candidates.is_empty());
        let guide = parsed.guide.unwrap();
        assert_eq!(guide.summary.as_deref(), Some("How to bridge."));
        assert_eq!(guide.subject.as_deref(), Some("Bridging"));
    }

    #[test]
    fn test_guide_false_ignores_guide_fields() {
        let raw = r#"{"identified_projects": [], "is_guide": false, "guide_summary": "x"}"#;
        assert!(parser().parse(raw).unwrap().guide.is_none());
    }

    #[test]
    fn test_no_json_found() {
        let err = parser().parse("I could not find any projects.").unwrap_err();
        assert!(matches!(err, ParseError::NoJsonFound { .. }));
        assert_eq!(err.raw(), "I could not find any projects.");
    }

    #[test]
    fn test_invalid_json() {
        let err = parser().parse("{\"identified_projects\": [}").unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson { .. }));
    }

    #[test]
    fn test_missing_projects_key_is_not_empty_list() {
        let err = parser().parse("{\"projects\": []}").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                field: PROJECTS_KEY.to_string(),
                raw: "{\"projects\": []}".to_string(),
            }
        );
    }

    #[test]
    fn test_projects_not_a_list() {
        let err = parser().parse("{\"identified_projects\": {}}").unwrap_err();
        match err {
            ParseError::InvalidField { index, field, .. } => {
                assert_eq!(index, None);
                assert_eq!(field, PROJECTS_KEY);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_field_error_names_index_and_field() {
        let raw = r#"{"identified_projects": [
            {"project_name": "A", "activity_type": "Vote", "summary": "ok"},
            {"project_name": "B", "activity_type": "Vote", "summary": "ok", "key_links": "https://x"}
        ]}"#;
        let err = parser().parse(raw).unwrap_err();
        match &err {
            ParseError::InvalidField { index, field, .. } => {
                assert_eq!(*index, Some(1));
                assert_eq!(field, "key_links");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.to_string(), "record 1: field 'key_links' must be a list of strings");
    }

    #[test]
    fn test_non_object_record() {
        let err = parser().parse(r#"{"identified_projects": ["Alpha"]}"#).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidField { index: Some(0), .. }
        ));
    }

    #[test]
    fn test_non_boolean_flag_rejected() {
        let raw = r#"{"identified_projects": [{"project_name": "A", "activity_type": "Vote", "summary": "s", "is_node_opportunity": "yes"}]}"#;
        let err = parser().parse(raw).unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { ref field, .. } if field == "is_node_opportunity"));
    }

    #[test]
    fn test_fenced_object_without_projects_key() {
        let err = parser().parse("```json\n{\"a\": 1}\n```").unwrap_err();
        assert!(matches!(err, ParseError::MissingField { .. }));
    }

    #[test]
    fn test_blank_project_name_is_none() {
        let raw = r#"{"identified_projects": [{"project_name": "  ", "activity_type": "Vote", "summary": "s"}]}"#;
        let c = &parser().parse(raw).unwrap().candidates[0];
        assert!(c.project_name.is_none());
    }

    #[test]
    fn test_parse_deadline_formats() {
        let may1 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_deadline("2025-05-01"), Some(may1));
        assert_eq!(parse_deadline("01.05.2025"), Some(may1));
        assert_eq!(parse_deadline("May 1, 2025"), Some(may1));
        assert_eq!(parse_deadline("1 May 2025"), Some(may1));
        assert_eq!(parse_deadline("soon"), None);
    }
}
