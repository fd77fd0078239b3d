//! Case tables and per-record state derivation.
//!
//! A case table is an ordered list of arms; each arm names a location, an
//! optional text pattern, and the outcome produced when the arm hits. Arms
//! are tried top to bottom and the first hit wins. Site definitions may also
//! declare the positional form, where `outcomes[i]` belongs to
//! `selectors[i]`; it is turned into the ordered form when loaded.

use regex::Regex;
use serde::Deserialize;

use crate::document::{Location, Node};
use crate::types::{ExtractError, TorrentStatus};

/// A regex compiled when the definition is loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Pattern::new(&s).map_err(|e| format!("invalid regex '{s}': {e}"))
    }
}

/// One arm of a case table.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseArm<T> {
    pub selector: Location,
    /// Attribute whose value `matches` is tested against; text otherwise.
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub matches: Option<Pattern>,
    pub then: T,
}

impl<T> CaseArm<T> {
    pub fn new(selector: Location, then: T) -> Self {
        Self {
            selector,
            attr: None,
            matches: None,
            then,
        }
    }

    fn hits(&self, scope: Node<'_>) -> Result<bool, ExtractError> {
        let Some(node) = scope.find(&self.selector)? else {
            return Ok(false);
        };
        Ok(match &self.matches {
            None => true,
            Some(pattern) => {
                let text = match &self.attr {
                    Some(attr) => node.attr(attr).unwrap_or_default(),
                    None => node.text(),
                };
                pattern.is_match(&text)
            }
        })
    }
}

/// Ordered (predicate, outcome) list; first hit wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(
    try_from = "CaseSpec<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct CaseTable<T> {
    arms: Vec<CaseArm<T>>,
}

impl<T> CaseTable<T> {
    pub fn new(arms: Vec<CaseArm<T>>) -> Self {
        Self { arms }
    }

    /// Build the ordered form from locations and index-aligned outcomes.
    pub fn positional(selectors: Vec<Location>, outcomes: Vec<T>) -> Result<Self, String> {
        if selectors.len() != outcomes.len() {
            return Err(format!(
                "{} selectors but {} outcomes",
                selectors.len(),
                outcomes.len()
            ));
        }
        Ok(Self::new(
            selectors
                .into_iter()
                .zip(outcomes)
                .map(|(selector, then)| CaseArm::new(selector, then))
                .collect(),
        ))
    }

    pub fn arms(&self) -> &[CaseArm<T>] {
        &self.arms
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Outcome of the first arm that hits inside `scope`.
    pub fn resolve(&self, scope: Node<'_>) -> Result<Option<&T>, ExtractError> {
        for arm in &self.arms {
            if arm.hits(scope)? {
                return Ok(Some(&arm.then));
            }
        }
        Ok(None)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseSpec<T> {
    Arms(Vec<CaseArm<T>>),
    Positional {
        selectors: Vec<Location>,
        outcomes: Vec<T>,
    },
}

impl<T> TryFrom<CaseSpec<T>> for CaseTable<T> {
    type Error = String;

    fn try_from(spec: CaseSpec<T>) -> Result<Self, Self::Error> {
        match spec {
            CaseSpec::Arms(arms) => Ok(Self::new(arms)),
            CaseSpec::Positional {
                selectors,
                outcomes,
            } => Self::positional(selectors, outcomes),
        }
    }
}

/// Case table restricted to the torrent status enumeration.
pub type StatusRule = CaseTable<TorrentStatus>;

/// Derive exactly one status for `scope`; `Unknown` when nothing hits.
pub fn derive_status(scope: Node<'_>, rule: Option<&StatusRule>) -> TorrentStatus {
    let Some(rule) = rule else {
        return TorrentStatus::Unknown;
    };
    match rule.resolve(scope) {
        Ok(status) => status.copied().unwrap_or_default(),
        Err(e) => {
            tracing::warn!("status rule not applicable: {e}");
            TorrentStatus::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use serde_json::json;

    const ROW: &str = r#"
        <table><tr id="r">
          <td><div class="progress" title="seeding 100%"></div></td>
          <td><img class="leeching" src="x.png"></td>
        </tr></table>
    "#;

    fn rule(spec: serde_json::Value) -> StatusRule {
        serde_json::from_value(spec).unwrap()
    }

    #[test]
    fn test_first_hit_wins() {
        let doc = Document::parse_html(ROW);
        let rule = rule(json!([
            {"selector": "img.leeching", "then": "downloading"},
            {"selector": "div.progress", "then": "seeding"}
        ]));
        assert_eq!(derive_status(doc.root(), Some(&rule)), TorrentStatus::Downloading);
    }

    #[test]
    fn test_pattern_on_attribute() {
        let doc = Document::parse_html(ROW);
        let rule = rule(json!([
            {"selector": "div.progress", "attr": "title", "matches": "^completed", "then": "completed"},
            {"selector": "div.progress", "attr": "title", "matches": "^seeding", "then": "seeding"}
        ]));
        assert_eq!(derive_status(doc.root(), Some(&rule)), TorrentStatus::Seeding);
    }

    #[test]
    fn test_positional_form() {
        let doc = Document::parse_html(ROW);
        let rule = rule(json!({
            "selectors": ["img.inactive", "div.progress"],
            "outcomes": ["inactive", "completed"]
        }));
        assert_eq!(rule.arms().len(), 2);
        assert_eq!(derive_status(doc.root(), Some(&rule)), TorrentStatus::Completed);
    }

    #[test]
    fn test_positional_length_mismatch_rejected() {
        let result = serde_json::from_value::<StatusRule>(json!({
            "selectors": ["a", "b"],
            "outcomes": ["seeding"]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_no_match_is_unknown() {
        let doc = Document::parse_html(ROW);
        let rule = rule(json!([{"selector": "span.none", "then": "seeding"}]));
        assert_eq!(derive_status(doc.root(), Some(&rule)), TorrentStatus::Unknown);
        assert_eq!(derive_status(doc.root(), None), TorrentStatus::Unknown);
    }

    #[test]
    fn test_unknown_status_name_rejected() {
        assert!(serde_json::from_value::<StatusRule>(json!([
            {"selector": "a", "then": "paused"}
        ]))
        .is_err());
    }

    #[test]
    fn test_unqueryable_location_yields_unknown() {
        let doc = Document::parse_html(ROW);
        let rule = rule(json!([{"selector": "data.list[0]", "then": "seeding"}]));
        assert_eq!(derive_status(doc.root(), Some(&rule)), TorrentStatus::Unknown);
    }
}
