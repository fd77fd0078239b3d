//! Request templates and the request composer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::category::{self, Selection, TargetOverride};
use crate::document::DocumentKind;
use crate::list::ListRule;
use crate::site::Site;
use crate::transport::{HttpMethod, HttpRequest, RequestBody};
use crate::types::{EngineError, EngineResult};

/// How `data` is sent on POST requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Form,
    Json,
}

/// A request template as declared by a site definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute, or relative to the site's base address.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_type: DocumentKind,
    #[serde(default)]
    pub encoding: BodyEncoding,
}

impl RequestConfig {
    /// Set a value at `url`, `params.<key>`, `data.<key>` or `headers.<name>`.
    ///
    /// Further dots address nested objects, which are created as needed.
    pub fn set(&mut self, path: &str, value: Value) -> EngineResult<()> {
        check_path(path)?;
        match path.split_once('.') {
            Some(("params", rest)) => set_nested(&mut self.params, rest, value),
            Some(("data", rest)) => set_nested(&mut self.data, rest, value),
            Some((_, name)) => {
                self.headers.insert(name.to_string(), text(&value));
            }
            None => self.url = text(&value),
        }
        Ok(())
    }

    /// Fold parameters into `params` for GET requests and `data` for POST.
    pub fn merge_params(&mut self, params: Map<String, Value>) {
        let target = match self.method {
            HttpMethod::Get => &mut self.params,
            HttpMethod::Post => &mut self.data,
        };
        target.extend(params);
    }

    /// Replace `{name}` placeholders with values from `fields`.
    ///
    /// A string that is exactly one placeholder takes the field's value as is;
    /// embedded placeholders are replaced by the value's text.
    pub fn substitute(&mut self, fields: &Map<String, Value>) {
        self.url = substitute_text(&self.url, fields);
        substitute_map(&mut self.params, fields);
        substitute_map(&mut self.data, fields);
        for value in self.headers.values_mut() {
            *value = substitute_text(value, fields);
        }
    }

    /// Resolve against `base` into a transport request.
    pub fn to_http(&self, base: &Url) -> EngineResult<HttpRequest> {
        let url = if self.url.is_empty() {
            base.clone()
        } else {
            base.join(&self.url)?
        };

        let mut query = Vec::new();
        flatten_map(&self.params, &mut query);

        let body = match (self.method, self.encoding) {
            (HttpMethod::Get, _) => RequestBody::None,
            (HttpMethod::Post, BodyEncoding::Json) => RequestBody::Json(Value::Object(self.data.clone())),
            (HttpMethod::Post, BodyEncoding::Form) => {
                let mut fields = Vec::new();
                flatten_map(&self.data, &mut fields);
                RequestBody::Form(fields)
            }
        };

        Ok(HttpRequest {
            method: self.method,
            url,
            query,
            body,
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

fn default_keywords_path() -> Option<String> {
    Some("params.keywords".to_string())
}

/// Search endpoint of a site.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub request: RequestConfig,
    /// Where keywords go; `null` for sites that ignore them.
    #[serde(default = "default_keywords_path")]
    pub keywords_path: Option<String>,
    pub list: ListRule,
}

/// What the caller asks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keywords: String,
    /// Facet key to selected value(s).
    #[serde(default)]
    pub categories: BTreeMap<String, Selection>,
}

impl SearchQuery {
    pub fn keywords(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            categories: BTreeMap::new(),
        }
    }

    pub fn with_category(mut self, key: &str, selection: impl Into<Selection>) -> Self {
        self.categories.insert(key.to_string(), selection.into());
        self
    }
}

/// A composed request, still in template form so hooks can rewrite it.
#[derive(Debug, Clone)]
pub struct ComposedRequest {
    pub base_url: Url,
    pub config: RequestConfig,
}

impl ComposedRequest {
    pub fn to_http(&self) -> EngineResult<HttpRequest> {
        self.config.to_http(&self.base_url)
    }
}

/// Build the search request for `query` on `site`.
///
/// Keywords are injected first, then every selected facet is folded in, and
/// the site's `transform_request` hook, when present, runs last.
pub fn compose(site: &Site, query: &SearchQuery) -> EngineResult<ComposedRequest> {
    let definition = &site.definition;
    let search = definition.search.as_ref().ok_or_else(|| {
        EngineError::Config(format!("site '{}' does not support search", definition.id))
    })?;

    let mut composed = ComposedRequest {
        base_url: definition.url.clone(),
        config: search.request.clone(),
    };

    if let Some(path) = &search.keywords_path {
        composed
            .config
            .set(path, Value::String(query.keywords.clone()))?;
    }

    for (key, selection) in &query.categories {
        let facet = definition
            .categories
            .iter()
            .find(|f| &f.key == key)
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "site '{}' has no category '{key}'",
                    definition.id
                ))
            })?;
        let encoded = category::encode(facet, selection)?;
        match encoded.target {
            Some(TargetOverride::BaseUrl(url)) => composed.base_url = url,
            Some(TargetOverride::Path(path)) => composed.config.url = path,
            None => {}
        }
        composed.config.merge_params(encoded.params);
    }

    if let Some(hook) = &site.hooks.transform_request {
        composed = hook(composed, query)?;
    }

    tracing::debug!(site = %definition.id, url = %composed.base_url, path = %composed.config.url, "composed search request");
    Ok(composed)
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reject paths [`RequestConfig::set`] cannot write.
pub fn check_path(path: &str) -> EngineResult<()> {
    match path.split_once('.') {
        None if path == "url" => Ok(()),
        Some(("params" | "data" | "headers", rest)) if !rest.is_empty() => Ok(()),
        _ => Err(EngineError::Config(format!(
            "cannot set request path '{path}'"
        ))),
    }
}

fn set_nested(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set_nested(inner, rest, value);
            }
        }
    }
}

fn placeholder(s: &str) -> Option<&str> {
    s.strip_prefix('{')?.strip_suffix('}').filter(|name| !name.contains(['{', '}']))
}

fn substitute_text(s: &str, fields: &Map<String, Value>) -> String {
    if !s.contains('{') {
        return s.to_string();
    }
    fields.iter().fold(s.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), &text(value))
    })
}

fn substitute_value(value: &mut Value, fields: &Map<String, Value>) {
    match value {
        Value::String(s) => {
            if let Some(found) = placeholder(s).and_then(|name| fields.get(name)) {
                *value = found.clone();
            } else {
                *s = substitute_text(s, fields);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_value(v, fields)),
        Value::Object(map) => substitute_map(map, fields),
        _ => {}
    }
}

fn substitute_map(map: &mut Map<String, Value>, fields: &Map<String, Value>) {
    for value in map.values_mut() {
        substitute_value(value, fields);
    }
}

/// Flatten nested values the way query-string encoders do: arrays become
/// `key[]`, objects `key[member]`; nulls are dropped.
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            let key = format!("{prefix}[]");
            for item in items {
                flatten(&key, item, out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                flatten(&format!("{prefix}[{k}]"), v, out);
            }
        }
        other => out.push((prefix.to_string(), text(other))),
    }
}

fn flatten_map(map: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (k, v) in map {
        flatten(k, v, out);
    }
}
