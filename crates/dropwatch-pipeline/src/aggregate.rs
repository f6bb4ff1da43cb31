//! Aggregation of parsed candidates into persistence-ready rows.
//!
//! Whole-message mode folds every candidate of a message into a single row.
//! Per-update mode keeps one row per distinct (project, activity) pair and
//! adds a guide row when the extractor flagged the message as a guide.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use dropwatch_core::{
    ActivityType, AggregationMode, CandidateUpdate, GuideInfo, NewUpdate, ParsedResponse,
};

use crate::normalize::Normalized;

/// Project label used in summary lines when the name is missing.
pub const UNKNOWN_PROJECT: &str = "Unknown Project";

/// Build the rows to persist for one message.
///
/// Returns an empty list when there is nothing to store.
pub fn aggregate(
    mode: AggregationMode,
    parsed: &ParsedResponse,
    message: &Normalized,
) -> Vec<NewUpdate> {
    match mode {
        AggregationMode::WholeMessage => whole_message(parsed, message).into_iter().collect(),
        AggregationMode::PerUpdate => per_update(parsed, message),
    }
}

/// Idempotency key of a per-update row.
pub fn update_key(project_name: Option<&str>, activity_type: &str) -> String {
    format!(
        "{}|{}",
        project_name.unwrap_or("").trim().to_lowercase(),
        activity_type.trim().to_lowercase()
    )
}

fn whole_message(parsed: &ParsedResponse, message: &Normalized) -> Option<NewUpdate> {
    let candidates = &parsed.candidates;
    if candidates.is_empty() {
        return None;
    }

    let project_names = sorted_join(candidates.iter().filter_map(|c| c.project_name.as_deref()));
    let activity_types = sorted_join(candidates.iter().map(|c| c.activity_type.label()));
    let deadlines = sorted_join(candidates.iter().filter_map(|c| c.deadline_text.as_deref()));
    let actions = sorted_join(
        candidates
            .iter()
            .filter_map(|c| c.required_actions_summary.as_deref()),
    );

    let summary_lines: Vec<String> = candidates
        .iter()
        .filter(|c| !c.summary.trim().is_empty())
        .map(|c| {
            format!(
                "[{}]: {}",
                c.project_name.as_deref().unwrap_or(UNKNOWN_PROJECT),
                c.summary.trim()
            )
        })
        .collect();

    let key_links: BTreeSet<&str> = candidates
        .iter()
        .flat_map(|c| c.key_links.iter().map(String::as_str))
        .collect();
    let referral_links: BTreeSet<&str> = candidates
        .iter()
        .flat_map(|c| c.referral_links.iter().map(String::as_str))
        .collect();

    let mut row = base_row(parsed, message, String::new());
    row.project_name = project_names;
    row.activity_type = activity_types;
    row.summary = (!summary_lines.is_empty()).then(|| summary_lines.join("\n"));
    row.key_links = key_links.into_iter().map(str::to_string).collect();
    row.referral_links = referral_links.into_iter().map(str::to_string).collect();
    row.deadline = earliest(candidates.iter().filter_map(|c| c.deadline_parsed));
    row.deadline_original_text = deadlines;
    row.required_actions_summary = actions;
    row.is_node_opportunity = candidates.iter().any(|c| c.is_node_opportunity);
    row.is_uncertain = candidates.iter().any(|c| c.is_uncertain);
    row.is_guide = parsed.guide.is_some();
    row.needs_review = candidates.iter().any(CandidateUpdate::is_ambiguous);
    Some(row)
}

fn per_update(parsed: &ParsedResponse, message: &Normalized) -> Vec<NewUpdate> {
    let mut groups: Vec<(String, CandidateUpdate)> = Vec::new();
    for candidate in &parsed.candidates {
        let key = update_key(
            candidate.project_name.as_deref(),
            candidate.activity_type.label(),
        );
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => merge_into(existing, candidate),
            None => groups.push((key, candidate.clone())),
        }
    }

    let guide_key = parsed.guide.as_ref().map(|g| {
        update_key(g.subject.as_deref(), ActivityType::GuideTutorial.label())
    });

    let mut rows: Vec<NewUpdate> = groups
        .into_iter()
        .map(|(key, candidate)| {
            let is_guide = guide_key.as_deref() == Some(key.as_str());
            let mut row = candidate_row(parsed, message, key, &candidate);
            row.is_guide = is_guide;
            row
        })
        .collect();

    if let (Some(guide), Some(key)) = (&parsed.guide, guide_key) {
        if !rows.iter().any(|r| r.update_key == key) {
            rows.push(guide_row(parsed, message, key, guide));
        }
    }
    rows
}

/// Fold `other` into `target`: links unioned, flags OR-ed, first non-empty values kept.
fn merge_into(target: &mut CandidateUpdate, other: &CandidateUpdate) {
    if target.summary.trim().is_empty() {
        target.summary = other.summary.clone();
    }
    union_into(&mut target.key_links, &other.key_links);
    union_into(&mut target.referral_links, &other.referral_links);
    target.is_node_opportunity |= other.is_node_opportunity;
    target.is_uncertain |= other.is_uncertain;
    if target.deadline_text.is_none() {
        target.deadline_text = other.deadline_text.clone();
    }
    target.deadline_parsed = earliest(
        target
            .deadline_parsed
            .into_iter()
            .chain(other.deadline_parsed),
    );
    if target.required_actions_summary.is_none() {
        target.required_actions_summary = other.required_actions_summary.clone();
    }
}

fn union_into(target: &mut Vec<String>, other: &[String]) {
    for link in other {
        if !target.contains(link) {
            target.push(link.clone());
        }
    }
}

fn candidate_row(
    parsed: &ParsedResponse,
    message: &Normalized,
    key: String,
    candidate: &CandidateUpdate,
) -> NewUpdate {
    let mut row = base_row(parsed, message, key);
    let label = candidate.activity_type.label();
    row.project_name = candidate.project_name.clone();
    row.activity_type = (!label.is_empty()).then(|| label.to_string());
    row.summary = (!candidate.summary.trim().is_empty()).then(|| candidate.summary.clone());
    row.key_links = candidate.key_links.clone();
    row.referral_links = candidate.referral_links.clone();
    row.deadline = candidate.deadline_parsed;
    row.deadline_original_text = candidate.deadline_text.clone();
    row.required_actions_summary = candidate.required_actions_summary.clone();
    row.is_node_opportunity = candidate.is_node_opportunity;
    row.is_uncertain = candidate.is_uncertain;
    row.needs_review = candidate.is_ambiguous();
    row
}

fn guide_row(
    parsed: &ParsedResponse,
    message: &Normalized,
    key: String,
    guide: &GuideInfo,
) -> NewUpdate {
    let mut row = base_row(parsed, message, key);
    row.project_name = guide.subject.clone();
    row.activity_type = Some(ActivityType::GuideTutorial.label().to_string());
    row.summary = guide.summary.clone();
    row.is_guide = true;
    row.needs_review = guide.subject.is_none();
    row
}

fn base_row(parsed: &ParsedResponse, message: &Normalized, update_key: String) -> NewUpdate {
    NewUpdate {
        update_key,
        project_name: None,
        activity_type: None,
        summary: None,
        key_links: Vec::new(),
        referral_links: Vec::new(),
        deadline: None,
        deadline_original_text: None,
        required_actions_summary: None,
        is_node_opportunity: false,
        is_uncertain: false,
        is_guide: false,
        needs_review: false,
        is_duplicate: false,
        source_channel: message.channel.clone(),
        source_message_link: message.link.clone(),
        message_timestamp: message.timestamp.as_utc(),
        message_timestamp_raw: message.timestamp.unparsed().map(str::to_string),
        full_message_text: message.text.clone(),
        raw_llm_output: Some(parsed.raw_json.clone()),
        embedding: None,
    }
}

/// Sorted `", "` join of distinct non-blank values, or `None` when there are none.
fn sorted_join<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let set: BTreeSet<&str> = values.map(str::trim).filter(|v| !v.is_empty()).collect();
    (!set.is_empty()).then(|| set.into_iter().collect::<Vec<_>>().join(", "))
}

fn earliest(dates: impl Iterator<Item = DateTime<Utc>>) -> Option<DateTime<Utc>> {
    dates.min()
}
