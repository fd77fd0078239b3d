//! Filter pipeline: named transforms applied to an extracted value.
//!
//! Filters are declared in site definitions either as a bare name
//! (`"parseSize"`) or as `{ "name": "querystring", "args": ["id"] }`. The
//! name is resolved into a [`Filter`] variant when the definition is
//! loaded, so an unknown name or a bad regex is rejected up front instead of
//! surfacing during extraction.
//!
//! Numeric filters treat blank input and the usual "unavailable" markers
//! (`N/A`, `-`, `∞`, ...) as an absent value, never as zero.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{Number, Value};

use crate::types::ExtractError;

/// Pure function used by [`Filter::Inline`].
pub type InlineFn = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// One step of a filter pipeline.
#[derive(Clone, Deserialize)]
#[serde(try_from = "FilterSpec")]
pub enum Filter {
    Trim,
    LowerCase,
    UpperCase,
    ParseNumber,
    ParseSize,
    ParseTime {
        format: Option<String>,
        offset: Option<FixedOffset>,
    },
    ParseTtl,
    Querystring {
        key: String,
    },
    Split {
        separator: String,
        index: usize,
    },
    Replace {
        pattern: Regex,
        replacement: String,
    },
    Regex {
        pattern: Regex,
        group: usize,
    },
    Prepend(String),
    Append(String),
    ExtImdbId,
    ExtDoubanId,
    /// In-code transform; cannot be declared in JSON.
    Inline(Arc<InlineFn>),
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Filter {
    /// Wrap a closure as an inline filter.
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Filter::Inline(Arc::new(f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::Trim => "trim",
            Filter::LowerCase => "lowerCase",
            Filter::UpperCase => "upperCase",
            Filter::ParseNumber => "parseNumber",
            Filter::ParseSize => "parseSize",
            Filter::ParseTime { .. } => "parseTime",
            Filter::ParseTtl => "parseTtl",
            Filter::Querystring { .. } => "querystring",
            Filter::Split { .. } => "split",
            Filter::Replace { .. } => "replace",
            Filter::Regex { .. } => "regex",
            Filter::Prepend(_) => "prepend",
            Filter::Append(_) => "append",
            Filter::ExtImdbId => "extImdbId",
            Filter::ExtDoubanId => "extDoubanId",
            Filter::Inline(_) => "inline",
        }
    }

    /// Apply this filter to `value`.
    pub fn apply(&self, value: Value) -> Result<Value, ExtractError> {
        let result = match self {
            Filter::Trim => Ok(map_text(value, |s| s.trim().to_string())),
            Filter::LowerCase => Ok(map_text(value, |s| s.to_lowercase())),
            Filter::UpperCase => Ok(map_text(value, |s| s.to_uppercase())),
            Filter::ParseNumber => parse_number(&value),
            Filter::ParseSize => parse_size(&value),
            Filter::ParseTime { format, offset } => parse_time(&value, format.as_deref(), *offset),
            Filter::ParseTtl => parse_ttl(&value, Utc::now().timestamp()),
            Filter::Querystring { key } => Ok(querystring(&value, key)),
            Filter::Split { separator, index } => Ok(text_of(&value)
                .split(separator.as_str())
                .nth(*index)
                .map(|part| Value::String(part.trim().to_string()))
                .unwrap_or(Value::Null)),
            Filter::Replace {
                pattern,
                replacement,
            } => Ok(Value::String(
                pattern
                    .replace_all(&text_of(&value), replacement.as_str())
                    .into_owned(),
            )),
            Filter::Regex { pattern, group } => Ok(pattern
                .captures(&text_of(&value))
                .and_then(|caps| caps.get(*group))
                .map(|m| Value::String(m.as_str().to_string()))
                .unwrap_or(Value::Null)),
            Filter::Prepend(text) => Ok(Value::String(format!("{text}{}", text_of(&value)))),
            Filter::Append(text) => Ok(Value::String(format!("{}{text}", text_of(&value)))),
            Filter::ExtImdbId => Ok(first_match(imdb_regex(), &text_of(&value), 0)),
            Filter::ExtDoubanId => Ok(first_match(douban_regex(), &text_of(&value), 1)),
            Filter::Inline(f) => f(value),
        };

        result.map_err(|reason| ExtractError::Filter {
            filter: self.name().to_string(),
            reason,
        })
    }
}

/// Run `filters` left to right; the first failure aborts the pipeline.
pub fn apply_all(filters: &[Filter], value: Value) -> Result<Value, ExtractError> {
    filters.iter().try_fold(value, |v, f| f.apply(v))
}

// ── Declaration format ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum FilterSpec {
    Name(String),
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl TryFrom<FilterSpec> for Filter {
    type Error = String;

    fn try_from(spec: FilterSpec) -> Result<Self, Self::Error> {
        let (name, args) = match spec {
            FilterSpec::Name(name) => (name, Vec::new()),
            FilterSpec::Call { name, args } => (name, args),
        };
        let args = Args {
            name: &name,
            values: &args,
        };

        let filter = match name.as_str() {
            "trim" => Filter::Trim,
            "lowerCase" => Filter::LowerCase,
            "upperCase" => Filter::UpperCase,
            "parseNumber" => Filter::ParseNumber,
            "parseSize" => Filter::ParseSize,
            "parseTime" => Filter::ParseTime {
                format: args.optional_str(0)?,
                offset: args
                    .optional_str(1)?
                    .map(|s| parse_offset(&s))
                    .transpose()?,
            },
            "parseTtl" => Filter::ParseTtl,
            "querystring" => Filter::Querystring {
                key: args.str(0)?,
            },
            "split" => Filter::Split {
                separator: args.str(0)?,
                index: args.optional_index(1)?.unwrap_or(0),
            },
            "replace" => Filter::Replace {
                pattern: compile(&args.str(0)?)?,
                replacement: args.optional_str(1)?.unwrap_or_default(),
            },
            "regex" => {
                let pattern = compile(&args.str(0)?)?;
                let default_group = usize::from(pattern.captures_len() > 1);
                Filter::Regex {
                    group: args.optional_index(1)?.unwrap_or(default_group),
                    pattern,
                }
            }
            "prepend" => Filter::Prepend(args.str(0)?),
            "append" => Filter::Append(args.str(0)?),
            "extImdbId" => Filter::ExtImdbId,
            "extDoubanId" => Filter::ExtDoubanId,
            other => return Err(format!("unknown filter '{other}'")),
        };
        Ok(filter)
    }
}

struct Args<'a> {
    name: &'a str,
    values: &'a [Value],
}

impl Args<'_> {
    fn optional_str(&self, index: usize) -> Result<Option<String>, String> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(format!(
                "filter '{}': argument {index} must be a string, got {other}",
                self.name
            )),
        }
    }

    fn str(&self, index: usize) -> Result<String, String> {
        self.optional_str(index)?
            .ok_or_else(|| format!("filter '{}': missing argument {index}", self.name))
    }

    fn optional_index(&self, index: usize) -> Result<Option<usize>, String> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| format!("filter '{}': argument {index} must be an index", self.name)),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("invalid regex '{pattern}': {e}"))
}

/// Parse `+08:00`, `-0530` or `Z` into a fixed offset.
pub(crate) fn parse_offset(s: &str) -> Result<FixedOffset, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(format!("invalid UTC offset '{s}'")),
    };
    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 4 {
        return Err(format!("invalid UTC offset '{s}'"));
    }
    let hours: i32 = digits[..2].parse().map_err(|_| format!("invalid UTC offset '{s}'"))?;
    let minutes: i32 = digits[2..].parse().map_err(|_| format!("invalid UTC offset '{s}'"))?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("UTC offset out of range '{s}'"))
}

// ── Filter implementations ───────────────────────────────────────────────────

/// Markers sites print when a value is intentionally unavailable.
const UNAVAILABLE: &[&str] = &["n/a", "na", "-", "--", "---", "∞", "inf", "inf.", "none"];

fn is_unavailable(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || UNAVAILABLE.iter().any(|m| s.eq_ignore_ascii_case(m))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn map_text<F: Fn(&str) -> String>(value: Value, f: F) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?|-?\.\d+").expect("number regex is valid"))
}

fn size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?|\.\d+)\s*([KMGTPE]?)(I?B)?\b")
            .expect("size regex is valid")
    })
}

fn imdb_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"tt\d{7,8}").expect("imdb regex is valid"))
}

fn douban_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"subject/(\d+)").expect("douban regex is valid"))
}

fn ttl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\d+(?:\.\d+)?)\s*(years?|yrs?|months?|mo|weeks?|wks?|w|days?|d|hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s|年|个月|月|周|天|日|小时|时|分钟|分|秒)",
        )
        .expect("ttl regex is valid")
    })
}

fn first_match(re: &Regex, text: &str, group: usize) -> Value {
    re.captures(text)
        .and_then(|caps| caps.get(group))
        .map(|m| Value::String(m.as_str().to_string()))
        .unwrap_or(Value::Null)
}

/// Pull the first number out of a value, dropping thousands separators.
pub(crate) fn parse_number(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Null => Ok(Value::Null),
        Value::String(s) if is_unavailable(s) => Ok(Value::Null),
        other => {
            let text = text_of(other);
            let m = number_regex()
                .find(&text)
                .ok_or_else(|| format!("no number in '{text}'"))?;
            let n: f64 = m
                .as_str()
                .replace(',', "")
                .parse()
                .map_err(|e| format!("bad number '{}': {e}", m.as_str()))?;
            Ok(number_value(n))
        }
    }
}

/// Parse a human size such as `1.5 GiB` or `700 MB` into bytes.
///
/// All units are binary (1 KB = 1024 B), matching how trackers report sizes.
pub(crate) fn parse_size(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Null => Ok(Value::Null),
        Value::String(s) if is_unavailable(s) => Ok(Value::Null),
        other => {
            let text = text_of(other);
            let has_unit = |c: &Captures<'_>| {
                c.get(2).is_some_and(|m| !m.as_str().is_empty()) || c.get(3).is_some()
            };
            let caps = size_regex()
                .captures_iter(&text)
                .find(has_unit)
                .or_else(|| size_regex().captures(&text))
                .ok_or_else(|| format!("no size in '{text}'"))?;
            let amount: f64 = caps[1]
                .replace(',', "")
                .parse()
                .map_err(|e| format!("bad size '{}': {e}", &caps[1]))?;
            let power = match caps
                .get(2)
                .map(|m| m.as_str().to_ascii_uppercase())
                .as_deref()
            {
                Some("K") => 1,
                Some("M") => 2,
                Some("G") => 3,
                Some("T") => 4,
                Some("P") => 5,
                Some("E") => 6,
                _ => 0,
            };
            let bytes = amount * 1024f64.powi(power);
            Ok(Value::Number(Number::from(bytes.round() as u64)))
        }
    }
}

/// Parse an absolute time into epoch seconds.
///
/// Accepts epoch numbers (milliseconds are detected and scaled), RFC 3339,
/// an explicit chrono `format`, and a handful of common layouts. Naive times
/// are read in `offset`, or UTC when none is given.
pub(crate) fn parse_time(
    value: &Value,
    format: Option<&str>,
    offset: Option<FixedOffset>,
) -> Result<Value, String> {
    const LAYOUTS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%d/%m/%Y %H:%M:%S",
    ];

    let epoch = |n: f64| {
        let secs = if n.abs() > 1.0e11 { n / 1000.0 } else { n };
        Value::Number(Number::from(secs as i64))
    };

    let text = match value {
        Value::Null => return Ok(Value::Null),
        Value::Number(n) => return n.as_f64().map(epoch).ok_or_else(|| "bad epoch".to_string()),
        Value::String(s) if is_unavailable(s) => return Ok(Value::Null),
        other => text_of(other).trim().to_string(),
    };

    if let Ok(n) = text.parse::<f64>() {
        return Ok(epoch(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Ok(Value::Number(Number::from(dt.timestamp())));
    }

    let offset = offset.unwrap_or_else(|| Utc.fix());
    let naive = format
        .into_iter()
        .chain(LAYOUTS.iter().copied())
        .find_map(|layout| {
            NaiveDateTime::parse_from_str(&text, layout)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(&text, layout)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        })
        .or_else(|| {
            NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("unrecognized time '{text}'"))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| Value::Number(Number::from(dt.timestamp())))
        .ok_or_else(|| format!("ambiguous time '{text}'"))
}

/// Parse a relative age ("3 days ago", "2天5小时") into epoch seconds
/// measured back from `now`.
pub(crate) fn parse_ttl(value: &Value, now: i64) -> Result<Value, String> {
    let text = match value {
        Value::Null => return Ok(Value::Null),
        Value::String(s) if is_unavailable(s) => return Ok(Value::Null),
        other => text_of(other),
    };

    let mut seconds = 0f64;
    let mut matched = false;
    for caps in ttl_regex().captures_iter(&text) {
        matched = true;
        let amount: f64 = caps[1].parse().map_err(|e| format!("bad amount: {e}"))?;
        let unit = caps[2].to_lowercase();
        let scale = match unit.as_str() {
            "year" | "years" | "yr" | "yrs" | "年" => 365.0 * 86400.0,
            "month" | "months" | "mo" | "个月" | "月" => 30.0 * 86400.0,
            "week" | "weeks" | "wk" | "wks" | "w" | "周" => 7.0 * 86400.0,
            "day" | "days" | "d" | "天" | "日" => 86400.0,
            "hour" | "hours" | "hr" | "hrs" | "h" | "小时" | "时" => 3600.0,
            "minute" | "minutes" | "min" | "mins" | "m" | "分钟" | "分" => 60.0,
            _ => 1.0,
        };
        seconds += amount * scale;
    }

    if !matched {
        return Err(format!("no relative time in '{text}'"));
    }
    Ok(Value::Number(Number::from(now - seconds.round() as i64)))
}

/// Read one query-string parameter out of a (possibly relative) link.
fn querystring(value: &Value, key: &str) -> Value {
    let text = text_of(value);
    let base = match url::Url::parse("http://localhost/") {
        Ok(base) => base,
        Err(_) => return Value::Null,
    };
    base.join(text.trim())
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| Value::String(v.into_owned()))
        })
        .unwrap_or(Value::Null)
}
