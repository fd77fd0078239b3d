//! Canonical records produced by the engine, and the engine's error types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a record as the site exposes it.
///
/// Digit-only identifiers are coerced to numbers; opaque tokens stay text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Numeric(u64),
    Text(String),
}

impl RecordId {
    /// Build an identifier from an extracted value. Empty values yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(RecordId::Numeric),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else if let Some(n) = digits_only(s) {
                    Some(RecordId::Numeric(n))
                } else {
                    Some(RecordId::Text(s.to_string()))
                }
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Numeric(n) => write!(f, "{n}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// A promotion or classification tag attached to a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>, color: Option<&str>) -> Self {
        Self {
            name: name.into(),
            color: color.map(str::to_string),
        }
    }
}

/// Closed set of per-torrent client states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    #[default]
    Unknown,
    Downloading,
    Seeding,
    Completed,
    Inactive,
}

/// One search result row in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentRecord {
    pub site: String,
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Absolute address of the detail page.
    pub url: String,
    /// Absolute download address, or a magnet URI.
    pub link: String,
    /// Upload time, epoch seconds.
    pub time: Option<i64>,
    /// Size in bytes.
    pub size: Option<u64>,
    pub seeders: Option<u64>,
    pub leechers: Option<u64>,
    pub completed: Option<u64>,
    pub comments: Option<u64>,
    pub category: Option<String>,
    pub tags: Vec<Tag>,
    pub progress: Option<f64>,
    pub status: TorrentStatus,
}

impl TorrentRecord {
    /// Assemble a record from post-processed field values.
    pub(crate) fn from_fields(site: &str, fields: &Map<String, Value>) -> Self {
        let text = |key: &str| fields.get(key).and_then(as_text);
        let count = |key: &str| fields.get(key).and_then(as_u64);

        Self {
            site: site.to_string(),
            id: fields.get("id").and_then(RecordId::from_value),
            title: text("title").unwrap_or_default(),
            subtitle: text("subtitle"),
            url: text("url").unwrap_or_default(),
            link: text("link").unwrap_or_default(),
            time: fields.get("time").and_then(as_i64),
            size: count("size"),
            seeders: count("seeders"),
            leechers: count("leechers"),
            completed: count("completed"),
            comments: count("comments"),
            category: text("category"),
            tags: Vec::new(),
            progress: None,
            status: TorrentStatus::Unknown,
        }
    }
}

/// Account metrics assembled from one or more pages of a site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub site: String,
    pub id: Option<RecordId>,
    pub name: Option<String>,
    pub level_name: Option<String>,
    /// Uploaded bytes.
    pub uploaded: Option<u64>,
    /// Downloaded bytes.
    pub downloaded: Option<u64>,
    pub ratio: Option<f64>,
    pub seeding: Option<u64>,
    /// Total size of seeding torrents, bytes.
    pub seeding_size: Option<u64>,
    pub bonus: Option<f64>,
    /// Join time, epoch seconds.
    pub join_time: Option<i64>,
    pub message_count: Option<u64>,
    /// When the profile was assembled, epoch seconds.
    pub updated_at: i64,
    /// Site-specific fields outside the canonical set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Profile fields with a fixed meaning; anything else lands in `extra`.
pub const PROFILE_FIELDS: &[&str] = &[
    "id",
    "name",
    "level_name",
    "uploaded",
    "downloaded",
    "ratio",
    "seeding",
    "seeding_size",
    "bonus",
    "join_time",
    "message_count",
];

impl UserProfile {
    /// Assemble a profile from collected field values.
    ///
    /// Numeric fields that are still text at this point are parsed with the
    /// matching filter; anything that does not parse becomes `None`.
    pub(crate) fn from_fields(site: &str, fields: &Map<String, Value>, updated_at: i64) -> Self {
        use crate::filters::{parse_number, parse_size, parse_time};

        let text = |key: &str| fields.get(key).and_then(as_text);
        let bytes = |key: &str| {
            fields
                .get(key)
                .and_then(|v| coerce_with(v, parse_size))
                .and_then(|v| as_u64(&v))
        };
        let number = |key: &str| {
            fields
                .get(key)
                .and_then(|v| coerce_with(v, parse_number))
                .and_then(|v| as_f64(&v))
        };

        let uploaded = bytes("uploaded");
        let downloaded = bytes("downloaded");
        let ratio = number("ratio").or_else(|| match (uploaded, downloaded) {
            (Some(up), Some(down)) if down > 0 => Some(up as f64 / down as f64),
            _ => None,
        });

        let extra = fields
            .iter()
            .filter(|(k, v)| !PROFILE_FIELDS.contains(&k.as_str()) && !is_empty_value(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            site: site.to_string(),
            id: fields.get("id").and_then(RecordId::from_value),
            name: text("name"),
            level_name: text("level_name"),
            uploaded,
            downloaded,
            ratio,
            seeding: number("seeding").and_then(non_negative_u64),
            seeding_size: bytes("seeding_size"),
            bonus: number("bonus"),
            join_time: fields
                .get("join_time")
                .and_then(|v| coerce_with(v, |v| parse_time(v, None, None)))
                .and_then(|v| as_i64(&v)),
            message_count: number("message_count").and_then(non_negative_u64),
            updated_at,
            extra,
        }
    }
}

// ── Value helpers ────────────────────────────────────────────────────────────

/// True for `null`, blank strings and empty arrays/objects.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Parse a digit-only string.
pub(crate) fn digits_only(s: &str) -> Option<u64> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

pub(crate) fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(non_negative_u64)),
        Value::String(s) => digits_only(s.trim()),
        _ => None,
    }
}

pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_negative_u64(n: f64) -> Option<u64> {
    (n.is_finite() && n >= 0.0).then(|| n.round() as u64)
}

/// Run `parse` over text values; numbers pass through untouched.
fn coerce_with<F>(value: &Value, parse: F) -> Option<Value>
where
    F: Fn(&Value) -> Result<Value, String>,
{
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(_) => parse(value).ok().filter(|v| !v.is_null()),
        _ => None,
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Request-level errors surfaced to the caller.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Not authenticated on site {site}")]
    NotAuthenticated { site: String },

    #[error("Blocked by anti-bot challenge: {url}")]
    Blocked { url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bypass token error: {0}")]
    Bypass(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Field-level errors; never abort sibling fields.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("filter '{filter}' failed: {reason}")]
    Filter { filter: String, reason: String },

    #[error("location '{0}' cannot be queried on this document")]
    Unqueryable(String),
}

/// Convenience result type.
pub type EngineResult<T> = Result<T, EngineError>;
