//! Field extractor: resolve one value from one scope using an [`ExtractionRule`].

use serde_json::Value;

use crate::document::Node;
use crate::filters::apply_all;
use crate::rule::ExtractionRule;
use crate::types::{is_empty_value, ExtractError};

/// Resolve `rule` inside `scope`.
///
/// Locations are tried in order and the first non-empty (trimmed) value is
/// kept. When none yields a value the rule's default, or an empty string,
/// is used instead; filters run in both cases. Rules carrying a case table
/// return the outcome of the first arm that hits, else the default, else
/// `null`.
pub fn extract(scope: Node<'_>, rule: &ExtractionRule) -> Result<Value, ExtractError> {
    if let Some(cases) = &rule.cases {
        return Ok(match cases.resolve(scope)? {
            Some(outcome) => outcome.clone(),
            None => rule.default.clone().unwrap_or(Value::Null),
        });
    }

    let mut found = None;
    for location in &rule.selectors {
        let Some(node) = scope.find(location)? else {
            continue;
        };
        let value = read(node, rule);
        if !is_empty_value(&value) {
            found = Some(value);
            break;
        }
    }

    let raw = found
        .or_else(|| rule.default.clone())
        .unwrap_or_else(|| Value::String(String::new()));
    apply_all(&rule.filters, raw)
}

/// Every value the first productive location yields, each run through the
/// filters. Used for multi-valued fields such as tags.
pub fn extract_all(scope: Node<'_>, rule: &ExtractionRule) -> Result<Vec<Value>, ExtractError> {
    if rule.cases.is_some() {
        let value = extract(scope, rule)?;
        return Ok(if is_empty_value(&value) { Vec::new() } else { vec![value] });
    }

    for location in &rule.selectors {
        let values: Vec<Value> = scope
            .find_all(location)?
            .into_iter()
            .map(|node| read(node, rule))
            .filter(|v| !is_empty_value(v))
            .collect();
        if !values.is_empty() {
            return values
                .into_iter()
                .map(|v| apply_all(&rule.filters, v))
                .collect();
        }
    }
    Ok(Vec::new())
}

/// Like [`extract`], but a failure is logged and resolves to an empty string.
pub fn extract_field(scope: Node<'_>, name: &str, rule: &ExtractionRule) -> Value {
    match extract(scope, rule) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(field = name, "extraction failed: {e}");
            Value::String(String::new())
        }
    }
}

fn read(node: Node<'_>, rule: &ExtractionRule) -> Value {
    let attr = match (&rule.attr, &rule.data, node) {
        (Some(attr), _, _) => Some(attr.clone()),
        (None, Some(data), Node::Json(_)) => Some(data.clone()),
        (None, Some(data), _) => Some(format!("data-{data}")),
        (None, None, _) => None,
    };

    match (attr, node) {
        (Some(name), Node::Json(Value::Object(map))) => {
            map.get(&name).map(normalize).unwrap_or(Value::Null)
        }
        (Some(name), _) => node
            .attr(&name)
            .map(|s| Value::String(s.trim().to_string()))
            .unwrap_or(Value::Null),
        (None, _) => normalize(&node.value()),
    }
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}
