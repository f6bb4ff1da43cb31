//! Message timestamp normalization.
//!
//! Message sources hand over timestamps in whatever shape they hold them:
//! native datetimes (with or without an offset), ISO-8601 strings, or
//! spreadsheet serial numbers. Everything is collapsed into a single UTC
//! instant; values that match none of the shapes are kept verbatim.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// Offset-aware formats tried after RFC 3339.
const AWARE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Offset-less formats, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// A timestamp exactly as the message source supplied it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// Datetime carrying its own offset.
    Aware(DateTime<FixedOffset>),
    /// Datetime without an offset; treated as UTC.
    Naive(NaiveDateTime),
    /// Spreadsheet serial date: days since 1899-12-30 00:00 UTC.
    Serial(f64),
    /// Free-form text, usually ISO-8601.
    Text(String),
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        RawTimestamp::Aware(dt.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for RawTimestamp {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        RawTimestamp::Aware(dt)
    }
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(dt: NaiveDateTime) -> Self {
        RawTimestamp::Naive(dt)
    }
}

impl From<f64> for RawTimestamp {
    fn from(serial: f64) -> Self {
        RawTimestamp::Serial(serial)
    }
}

impl From<&str> for RawTimestamp {
    fn from(s: &str) -> Self {
        RawTimestamp::Text(s.to_string())
    }
}

impl From<String> for RawTimestamp {
    fn from(s: String) -> Self {
        RawTimestamp::Text(s)
    }
}

impl<'de> Deserialize<'de> for RawTimestamp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Serial(f64),
            Text(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Serial(v) => RawTimestamp::Serial(v),
            Wire::Text(s) => RawTimestamp::Text(s),
        })
    }
}

impl Serialize for RawTimestamp {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RawTimestamp::Aware(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            RawTimestamp::Naive(dt) => {
                serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            RawTimestamp::Serial(v) => serializer.serialize_f64(*v),
            RawTimestamp::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// A normalized message timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTimestamp {
    /// Absolute UTC instant.
    Utc(DateTime<Utc>),
    /// Input no parser accepted, preserved verbatim.
    Unparsed(String),
}

impl MessageTimestamp {
    /// The UTC instant, if the input could be parsed.
    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            MessageTimestamp::Utc(dt) => Some(*dt),
            MessageTimestamp::Unparsed(_) => None,
        }
    }

    /// The original text when normalization failed.
    pub fn unparsed(&self) -> Option<&str> {
        match self {
            MessageTimestamp::Utc(_) => None,
            MessageTimestamp::Unparsed(raw) => Some(raw),
        }
    }
}

/// Normalize any supported timestamp shape to UTC.
///
/// Unparseable input is logged and returned as [`MessageTimestamp::Unparsed`].
pub fn normalize_timestamp(raw: &RawTimestamp) -> MessageTimestamp {
    let parsed = match raw {
        RawTimestamp::Aware(dt) => Some(dt.with_timezone(&Utc)),
        RawTimestamp::Naive(dt) => Some(dt.and_utc()),
        RawTimestamp::Serial(serial) => from_serial(*serial),
        RawTimestamp::Text(text) => parse_text(text),
    };

    match parsed {
        Some(dt) => MessageTimestamp::Utc(dt),
        None => {
            let original = match raw {
                RawTimestamp::Serial(v) => v.to_string(),
                RawTimestamp::Text(s) => s.clone(),
                // Datetime variants always parse.
                RawTimestamp::Aware(dt) => dt.to_rfc3339(),
                RawTimestamp::Naive(dt) => dt.to_string(),
            };
            warn!(
                subsystem = "pipeline",
                component = "timestamp",
                raw = %original,
                "Could not convert timestamp (tried ISO and serial); keeping original"
            );
            MessageTimestamp::Unparsed(original)
        }
    }
}

/// Convert a spreadsheet serial date to UTC.
pub fn from_serial(serial: f64) -> Option<DateTime<Utc>> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?
        .and_hms_opt(0, 0, 0)?
        .and_utc();
    let millis = (serial * MILLIS_PER_DAY).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    let delta = Duration::try_milliseconds(millis as i64)?;
    epoch.checked_add_signed(delta)
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in AWARE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    text.parse::<f64>().ok().and_then(from_serial)
}
