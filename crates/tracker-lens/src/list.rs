//! List extractor: rows of a search result page into torrent records.
//!
//! Every row runs the site's field rules, then the same post-steps for all
//! sites: links become absolute, numeric fields become numbers, size and
//! time strings are parsed, tags collapse onto a shared vocabulary, and
//! status and progress are derived.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::document::{Location, Node};
use crate::extractor::{extract_all, extract_field};
use crate::filters::{parse_number, parse_size, parse_time, parse_ttl};
use crate::rule::ExtractionRule;
use crate::state::{derive_status, StatusRule};
use crate::types::{
    as_f64, digits_only, is_empty_value, EngineError, EngineResult, Tag, TorrentRecord,
    TorrentStatus,
};

/// Fields resolved to absolute addresses.
const LINK_FIELDS: &[&str] = &["url", "link"];
/// Counters coerced to numbers.
const COUNT_FIELDS: &[&str] = &["seeders", "leechers", "completed", "comments"];

/// A presence tag: `name` applies when `selector` matches inside the row.
#[derive(Debug, Clone, Deserialize)]
pub struct TagRule {
    pub name: String,
    pub selector: Location,
    #[serde(default)]
    pub color: Option<String>,
}

/// How to find rows and read a record out of each one.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRule {
    pub rows: Location,
    /// Leading rows to drop, such as table headers.
    #[serde(default)]
    pub skip_rows: usize,
    pub fields: BTreeMap<String, ExtractionRule>,
    #[serde(default)]
    pub status: Option<StatusRule>,
    #[serde(default)]
    pub progress: Option<ExtractionRule>,
    #[serde(default)]
    pub tags: Vec<TagRule>,
}

/// Extract every record under `root`.
///
/// Rows whose title resolves empty are dropped.
pub fn extract_list(
    root: Node<'_>,
    base: &Url,
    site: &str,
    rule: &ListRule,
) -> EngineResult<Vec<TorrentRecord>> {
    let rows = root
        .find_all(&rule.rows)
        .map_err(|e| EngineError::Config(format!("site '{site}': {e}")))?;

    let records: Vec<TorrentRecord> = rows
        .into_iter()
        .skip(rule.skip_rows)
        .filter_map(|row| extract_row(row, base, site, rule))
        .collect();

    tracing::debug!(site, count = records.len(), "extracted search rows");
    Ok(records)
}

fn extract_row(row: Node<'_>, base: &Url, site: &str, rule: &ListRule) -> Option<TorrentRecord> {
    let mut fields: Map<String, Value> = rule
        .fields
        .iter()
        .filter(|(name, _)| name.as_str() != "tags")
        .map(|(name, field)| (name.clone(), extract_field(row, name, field)))
        .collect();

    if let Some(tags) = rule.fields.get("tags") {
        let values = extract_all(row, tags).unwrap_or_else(|e| {
            tracing::warn!(field = "tags", "extraction failed: {e}");
            Vec::new()
        });
        fields.insert("tags".into(), Value::Array(values));
    }

    resolve_links(&mut fields, base);
    coerce_numbers(&mut fields);

    let mut record = TorrentRecord::from_fields(site, &fields);
    if record.title.is_empty() {
        return None;
    }

    record.tags = collect_tags(row, rule, fields.get("tags"));
    record.status = derive_status(row, rule.status.as_ref());
    record.progress = rule
        .progress
        .as_ref()
        .map(|p| extract_field(row, "progress", p))
        .and_then(|v| parse_number(&v).ok())
        .and_then(|v| as_f64(&v))
        .map(|p| p.clamp(0.0, 100.0))
        .or(match record.status {
            TorrentStatus::Seeding | TorrentStatus::Completed => Some(100.0),
            _ => None,
        });

    Some(record)
}

/// Make `url` and `link` absolute against `base`; magnet URIs pass through.
pub fn resolve_link(base: &Url, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    if link.starts_with("magnet:") {
        return Some(link.to_string());
    }
    base.join(link).ok().map(String::from)
}

fn resolve_links(fields: &mut Map<String, Value>, base: &Url) {
    for name in LINK_FIELDS {
        let Some(Value::String(link)) = fields.get(*name) else {
            continue;
        };
        match resolve_link(base, link) {
            Some(resolved) => {
                fields.insert(name.to_string(), Value::String(resolved));
            }
            None => {
                tracing::debug!(field = name, link = %link, "unresolvable link dropped");
                fields.insert(name.to_string(), Value::Null);
            }
        }
    }
}

fn coerce_numbers(fields: &mut Map<String, Value>) {
    if let Some(Value::String(id)) = fields.get("id") {
        if let Some(n) = digits_only(id.trim()) {
            fields.insert("id".into(), Value::from(n));
        }
    }

    if let Some(size @ Value::String(_)) = fields.get("size") {
        let parsed = parse_size(size).unwrap_or(Value::Null);
        fields.insert("size".into(), parsed);
    }

    for name in COUNT_FIELDS {
        if let Some(count @ Value::String(text)) = fields.get(*name) {
            let parsed = match digits_only(text.trim()) {
                Some(n) => Value::from(n),
                None => parse_number(count).unwrap_or(Value::Null),
            };
            fields.insert(name.to_string(), parsed);
        }
    }

    if let Some(time @ Value::String(_)) = fields.get("time") {
        let parsed = parse_time(time, None, None)
            .or_else(|_| parse_ttl(time, Utc::now().timestamp()))
            .unwrap_or(Value::Null);
        fields.insert("time".into(), parsed);
    }
}

fn collect_tags(row: Node<'_>, rule: &ListRule, extracted: Option<&Value>) -> Vec<Tag> {
    let mut tags = Vec::new();

    for tag_rule in &rule.tags {
        match row.exists(&tag_rule.selector) {
            Ok(true) => tags.push(Tag::new(tag_rule.name.as_str(), tag_rule.color.as_deref())),
            Ok(false) => {}
            Err(e) => tracing::warn!(tag = %tag_rule.name, "tag rule not applicable: {e}"),
        }
    }

    match extracted {
        Some(Value::Array(items)) => tags.extend(items.iter().filter_map(tag_from_value)),
        Some(value) => tags.extend(tag_from_value(value)),
        None => {}
    }

    let mut seen = Vec::new();
    tags.into_iter()
        .map(normalize_tag)
        .filter(|tag| {
            if seen.contains(&tag.name) {
                false
            } else {
                seen.push(tag.name.clone());
                true
            }
        })
        .collect()
}

fn tag_from_value(value: &Value) -> Option<Tag> {
    if is_empty_value(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(Tag::new(s.trim(), None)),
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

struct TagAlias {
    pattern: Regex,
    name: &'static str,
    color: &'static str,
}

fn aliases() -> &'static [TagAlias] {
    static TABLE: OnceLock<Vec<TagAlias>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)^(?:2x\s*free|twoupfree|2x免费|免费2x)$", "2xFree", "green"),
            (r"(?i)^(?:2x\s*50%|2x50|twouphalfdown|2x\s*half)$", "2x50%", "yellow"),
            (r"(?i)^(?:free|free\s*leech|freeleech|免费|free download)$", "Free", "blue"),
            (r"(?i)^(?:2x\s*up|twoup|2x上传|double upload)$", "2xUp", "lime"),
            (r"(?i)^(?:50%|half\s*down|halfdown|50%下载|50% download)$", "50%", "orange"),
            (r"(?i)^(?:30%|thirtypercent|thirtypercentdown|30%下载)$", "30%", "indigo"),
            (r"(?i)^(?:h&r|h\s*&\s*r|hit\s*and\s*run|hr)$", "H&R", "red"),
        ]
        .into_iter()
        .map(|(pattern, name, color)| TagAlias {
            pattern: Regex::new(pattern).expect("tag alias regex is valid"),
            name,
            color,
        })
        .collect()
    })
}

/// Collapse equivalent promotion tags onto one canonical name and color.
/// Unknown tags are returned unchanged.
pub fn normalize_tag(tag: Tag) -> Tag {
    let name = tag.name.trim();
    match aliases().iter().find(|alias| alias.pattern.is_match(name)) {
        Some(alias) => Tag::new(alias.name, Some(alias.color)),
        None => tag,
    }
}
