//! Extraction rules: where and how to read one field.
//!
//! In a site definition a rule is either a bare selector (`"a.title"`), a
//! list of fallback selectors, or an object:
//!
//! ```json
//! {
//!   "selector": ["td.size", "td:eq(4)"],
//!   "attr": "title",
//!   "filters": ["parseSize"],
//!   "default": "0"
//! }
//! ```
//!
//! A rule may carry a case table instead of filters, either as
//! `"case": [{ "selector": "img.free", "then": "Free" }]` or positionally as
//! `"outcomes"` aligned with `"selector"`.

use serde::Deserialize;
use serde_json::Value;

use crate::document::{DocumentKind, Location};
use crate::filters::Filter;
use crate::state::{CaseArm, CaseTable};
use crate::types::EngineResult;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RuleSpec")]
pub struct ExtractionRule {
    /// Tried in order; the first non-empty hit wins.
    pub selectors: Vec<Location>,
    /// Read this attribute instead of the rendered text.
    pub attr: Option<String>,
    /// Read `data-<name>` (or member `<name>` of a JSON object).
    pub data: Option<String>,
    pub filters: Vec<Filter>,
    /// Used, and still filtered, when no selector yields a value.
    pub default: Option<Value>,
    pub cases: Option<CaseTable<Value>>,
}

impl ExtractionRule {
    /// Rule reading the text of the first node matching one of `selectors`.
    pub fn selectors<I, S>(selectors: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selectors = selectors
            .into_iter()
            .map(|s| Location::parse(s.as_ref()))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            selectors,
            ..Self::default()
        })
    }

    /// Rule that always yields `value` (after filters).
    pub fn constant(value: Value) -> Self {
        Self {
            default: Some(value),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, attr: &str) -> Self {
        self.attr = Some(attr.to_string());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Every location in this rule must be usable on `kind` documents.
    pub fn check(&self, kind: DocumentKind) -> EngineResult<()> {
        for location in &self.selectors {
            location.check(kind)?;
        }
        if let Some(cases) = &self.cases {
            for arm in cases.arms() {
                arm.selector.check(kind)?;
            }
        }
        Ok(())
    }
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
    #[default]
    None,
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
            OneOrMany::None => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleBody {
    #[serde(default)]
    selector: OneOrMany<Location>,
    #[serde(default)]
    attr: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    filters: Vec<Filter>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    case: Option<Vec<CaseArm<Value>>>,
    #[serde(default)]
    outcomes: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleSpec {
    One(Location),
    Many(Vec<Location>),
    Body(RuleBody),
}

impl TryFrom<RuleSpec> for ExtractionRule {
    type Error = String;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        let body = match spec {
            RuleSpec::One(location) => {
                return Ok(Self {
                    selectors: vec![location],
                    ..Self::default()
                })
            }
            RuleSpec::Many(selectors) => {
                return Ok(Self {
                    selectors,
                    ..Self::default()
                })
            }
            RuleSpec::Body(body) => body,
        };

        let selectors = body.selector.into_vec();
        let (selectors, cases) = match (body.case, body.outcomes) {
            (Some(_), Some(_)) => {
                return Err("use either 'case' or 'outcomes', not both".to_string())
            }
            (Some(arms), None) => (selectors, Some(CaseTable::new(arms))),
            (None, Some(outcomes)) => {
                (Vec::new(), Some(CaseTable::positional(selectors, outcomes)?))
            }
            (None, None) => (selectors, None),
        };

        if cases.is_some() && !body.filters.is_empty() {
            return Err("a case table cannot be combined with filters".to_string());
        }

        Ok(Self {
            selectors,
            attr: body.attr,
            data: body.data,
            filters: body.filters,
            default: body.default,
            cases,
        })
    }
}
