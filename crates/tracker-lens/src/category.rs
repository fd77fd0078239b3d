//! Category encoder: turn a facet selection into request parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::types::{EngineError, EngineResult};

/// Reserved facet key whose selection replaces the request's base address.
pub const CHANGE_DOMAIN: &str = "#changeDomain";
/// Reserved facet key whose selection replaces the request's path.
pub const CHANGE_PATH: &str = "#changePath";

const RESERVED_MARKER: char = '#';

/// One selectable search dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFacet {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub options: Vec<CategoryOption>,
    /// Present when several options may be selected at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross: Option<CrossSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryOption {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossSpec {
    #[serde(default)]
    pub mode: CrossMode,
    /// Wire key, when it differs from the facet key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// How several selected values are combined on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrossMode {
    /// One flag parameter `key + value = 1` per selection.
    Append,
    /// One nested parameter `key = {value: 1, ...}`.
    AppendQuote,
    /// One parameter `key = "a,b"`.
    Comma,
    /// One array parameter `key = [a, b]`.
    #[default]
    Brackets,
}

/// User-selected value(s) for one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    Many(Vec<Value>),
    One(Value),
}

impl Selection {
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Selection::One(v) => vec![v],
            Selection::Many(vs) => vs.iter().collect(),
        }
    }
}

impl From<&str> for Selection {
    fn from(s: &str) -> Self {
        Selection::One(Value::String(s.to_string()))
    }
}

/// Replacement for the request target requested by a reserved facet.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOverride {
    BaseUrl(Url),
    Path(String),
}

/// What one facet contributes to a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedFacet {
    pub params: Map<String, Value>,
    pub target: Option<TargetOverride>,
}

/// True for keys that alter the request target instead of its parameters.
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_MARKER)
}

/// Encode `selection` for `facet`.
pub fn encode(facet: &CategoryFacet, selection: &Selection) -> EngineResult<EncodedFacet> {
    if is_reserved(&facet.key) {
        return Ok(EncodedFacet {
            params: Map::new(),
            target: Some(encode_target(&facet.key, selection)?),
        });
    }

    let values = selection.values();
    let mut params = Map::new();
    if values.is_empty() {
        return Ok(EncodedFacet::default());
    }

    let Some(cross) = &facet.cross else {
        let value = match selection {
            Selection::One(v) => v.clone(),
            Selection::Many(vs) => Value::Array(vs.clone()),
        };
        params.insert(facet.key.clone(), value);
        return Ok(EncodedFacet {
            params,
            target: None,
        });
    };

    let key = cross.key.as_deref().unwrap_or(&facet.key);
    match cross.mode {
        CrossMode::Append => {
            for v in values {
                params.insert(format!("{key}{}", text(v)), Value::from(1));
            }
        }
        CrossMode::AppendQuote => {
            let nested: Map<String, Value> =
                values.iter().map(|v| (text(v), Value::from(1))).collect();
            params.insert(key.to_string(), Value::Object(nested));
        }
        CrossMode::Comma => {
            let joined = values.iter().map(|v| text(v)).collect::<Vec<_>>().join(",");
            params.insert(key.to_string(), Value::String(joined));
        }
        CrossMode::Brackets => {
            params.insert(
                key.to_string(),
                Value::Array(values.into_iter().cloned().collect()),
            );
        }
    }

    Ok(EncodedFacet {
        params,
        target: None,
    })
}

fn encode_target(key: &str, selection: &Selection) -> EngineResult<TargetOverride> {
    let value = match selection.values().as_slice() {
        [one] => text(one),
        _ => {
            return Err(EngineError::Config(format!(
                "facet '{key}' takes exactly one value"
            )))
        }
    };
    match key {
        CHANGE_DOMAIN => Ok(TargetOverride::BaseUrl(Url::parse(&value)?)),
        CHANGE_PATH => Ok(TargetOverride::Path(value)),
        other => Err(EngineError::Config(format!(
            "unknown reserved facet key '{other}'"
        ))),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facet(key: &str, cross: Value) -> CategoryFacet {
        serde_json::from_value(json!({
            "name": "Category",
            "key": key,
            "options": [{"name": "A", "value": "a"}, {"name": "B", "value": "b"}],
            "cross": cross
        }))
        .unwrap()
    }

    fn many() -> Selection {
        Selection::Many(vec![json!("a"), json!("b")])
    }

    #[test]
    fn test_append_produces_one_flag_per_value() {
        let out = encode(&facet("cat", json!({"mode": "append"})), &many()).unwrap();
        assert_eq!(Value::Object(out.params), json!({"cata": 1, "catb": 1}));
    }

    #[test]
    fn test_append_quote_produces_nested_object() {
        let out = encode(&facet("cat", json!({"mode": "appendQuote"})), &many()).unwrap();
        assert_eq!(Value::Object(out.params), json!({"cat": {"a": 1, "b": 1}}));
    }

    #[test]
    fn test_comma_joins_values() {
        let out = encode(&facet("cat", json!({"mode": "comma"})), &many()).unwrap();
        assert_eq!(Value::Object(out.params), json!({"cat": "a,b"}));
    }

    #[test]
    fn test_brackets_is_default_and_passes_array_through() {
        let out = encode(&facet("cat", json!({})), &many()).unwrap();
        assert_eq!(Value::Object(out.params), json!({"cat": ["a", "b"]}));

        let out = encode(&facet("cat", Value::Null), &many()).unwrap();
        assert_eq!(Value::Object(out.params), json!({"cat": ["a", "b"]}));
    }

    #[test]
    fn test_key_override() {
        let out = encode(
            &facet("category", json!({"mode": "comma", "key": "cats"})),
            &many(),
        )
        .unwrap();
        assert_eq!(Value::Object(out.params), json!({"cats": "a,b"}));
    }

    #[test]
    fn test_single_value_without_cross() {
        let out = encode(&facet("cat", Value::Null), &Selection::from("a")).unwrap();
        assert_eq!(Value::Object(out.params), json!({"cat": "a"}));
    }

    #[test]
    fn test_reserved_keys_change_target() {
        let out = encode(
            &facet(CHANGE_DOMAIN, Value::Null),
            &Selection::from("https://mirror.example.org/"),
        )
        .unwrap();
        assert!(out.params.is_empty());
        assert_eq!(
            out.target,
            Some(TargetOverride::BaseUrl(
                Url::parse("https://mirror.example.org/").unwrap()
            ))
        );

        let out = encode(&facet(CHANGE_PATH, Value::Null), &Selection::from("/adult.php")).unwrap();
        assert_eq!(out.target, Some(TargetOverride::Path("/adult.php".into())));

        assert!(encode(&facet("#nope", Value::Null), &Selection::from("x")).is_err());
    }

    #[test]
    fn test_empty_selection_contributes_nothing() {
        let out = encode(&facet("cat", json!({"mode": "append"})), &Selection::Many(vec![])).unwrap();
        assert_eq!(out, EncodedFacet::default());
    }
}
