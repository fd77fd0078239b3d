//! Site definitions, strategy hooks, and load-time validation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::aggregator::{PageCursor, UserInfoConfig};
use crate::category::{self, CategoryFacet, CHANGE_DOMAIN, CHANGE_PATH};
use crate::document::{Document, DocumentKind};
use crate::request::{self, ComposedRequest, SearchQuery};
use crate::resilience::LoginCheck;
use crate::rule::ExtractionRule;
use crate::types::{EngineError, EngineResult};

/// Declarative description of one tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteDefinition {
    pub id: String,
    pub name: String,
    /// Base address every relative request and link resolves against.
    pub url: Url,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<CategoryFacet>,
    #[serde(default)]
    pub search: Option<crate::request::SearchConfig>,
    #[serde(default)]
    pub user_info: Option<UserInfoConfig>,
    #[serde(default)]
    pub login: LoginCheck,
}

impl SiteDefinition {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        let definition: Self = serde_json::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Reject definitions that cannot work against the documents they declare.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() || self.id.chars().any(char::is_whitespace) {
            return Err(self.invalid(format!("bad site id '{}'", self.id)));
        }

        let mut keys = HashSet::new();
        for facet in &self.categories {
            if !keys.insert(facet.key.as_str()) {
                return Err(self.invalid(format!("duplicate category key '{}'", facet.key)));
            }
            if category::is_reserved(&facet.key)
                && facet.key != CHANGE_DOMAIN
                && facet.key != CHANGE_PATH
            {
                return Err(self.invalid(format!("unknown reserved key '{}'", facet.key)));
            }
        }

        if let Some(search) = &self.search {
            let kind = search.request.response_type;
            if let Some(path) = &search.keywords_path {
                self.check_request_path("keywords_path", path)?;
            }
            let list = &search.list;
            list.rows.check(kind)?;
            if !list.fields.contains_key("title") {
                return Err(self.invalid("search list has no 'title' field".to_string()));
            }
            for rule in list.fields.values().chain(list.progress.iter()) {
                rule.check(kind)?;
            }
            for tag in &list.tags {
                tag.selector.check(kind)?;
            }
            if let Some(status) = &list.status {
                for arm in status.arms() {
                    arm.selector.check(kind)?;
                }
            }
        }

        if let Some(user_info) = &self.user_info {
            self.validate_user_info(user_info)?;
        }
        Ok(())
    }

    fn validate_user_info(&self, config: &UserInfoConfig) -> EngineResult<()> {
        let mut owned: HashSet<&str> = HashSet::new();
        for (index, step) in config.steps.iter().enumerate() {
            let kind = step.request.response_type;

            for field in step.assertion.keys() {
                if !owned.contains(field.as_str()) {
                    return Err(self.invalid(format!(
                        "step {index} asserts on '{field}', which no earlier step collects"
                    )));
                }
            }

            let totals: Vec<&str> = step
                .pagination
                .iter()
                .flat_map(|p| [p.count_field.as_str(), p.size_field.as_str()])
                .collect();
            for field in &step.fields {
                match config.rule_for(step, field) {
                    Some(rule) => rule.check(kind)?,
                    None if totals.contains(&field.as_str()) => {}
                    None => {
                        return Err(self.invalid(format!(
                            "step {index} owns '{field}' but no rule reads it"
                        )))
                    }
                }
                owned.insert(field.as_str());
            }

            if let Some(pagination) = &step.pagination {
                pagination.rows.check(kind)?;
                let rules: [Option<&ExtractionRule>; 2] =
                    [pagination.last_page.as_ref(), pagination.size.as_ref()];
                for rule in rules.into_iter().flatten() {
                    rule.check(kind)?;
                }
                self.check_request_path("page_key", &pagination.page_key)?;
            }
        }
        Ok(())
    }

    fn check_request_path(&self, what: &str, path: &str) -> EngineResult<()> {
        request::check_path(path).map_err(|e| self.invalid(format!("{what}: {e}")))
    }

    fn invalid(&self, message: String) -> EngineError {
        EngineError::Config(format!("site '{}': {message}", self.id))
    }
}

/// Rewrites a composed search request; runs after keywords and facets.
pub type TransformRequestFn =
    dyn Fn(ComposedRequest, &SearchQuery) -> EngineResult<ComposedRequest> + Send + Sync;
/// Reshapes a parsed response before any extraction runs.
pub type PreprocessFn = dyn Fn(Document) -> EngineResult<Document> + Send + Sync;
/// Decides whether pagination fetches another page.
pub type ContinuePaginationFn = dyn Fn(&PageCursor) -> bool + Send + Sync;

/// Optional per-site code at fixed extension points.
#[derive(Clone, Default)]
pub struct SiteHooks {
    pub transform_request: Option<Arc<TransformRequestFn>>,
    pub preprocess_response: Option<Arc<PreprocessFn>>,
    pub continue_pagination: Option<Arc<ContinuePaginationFn>>,
}

impl SiteHooks {
    pub fn transform_request<F>(mut self, f: F) -> Self
    where
        F: Fn(ComposedRequest, &SearchQuery) -> EngineResult<ComposedRequest>
            + Send
            + Sync
            + 'static,
    {
        self.transform_request = Some(Arc::new(f));
        self
    }

    pub fn preprocess_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Document) -> EngineResult<Document> + Send + Sync + 'static,
    {
        self.preprocess_response = Some(Arc::new(f));
        self
    }

    pub fn continue_pagination<F>(mut self, f: F) -> Self
    where
        F: Fn(&PageCursor) -> bool + Send + Sync + 'static,
    {
        self.continue_pagination = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SiteHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteHooks")
            .field("transform_request", &self.transform_request.is_some())
            .field("preprocess_response", &self.preprocess_response.is_some())
            .field("continue_pagination", &self.continue_pagination.is_some())
            .finish()
    }
}

/// A definition plus its hooks, as held by the registry.
#[derive(Debug, Clone)]
pub struct Site {
    pub definition: SiteDefinition,
    pub hooks: SiteHooks,
}

impl Site {
    pub fn new(definition: SiteDefinition) -> Self {
        Self {
            definition,
            hooks: SiteHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: SiteHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Parse a response body and run the preprocessing hook over it.
    pub fn parse_response(&self, body: &str, kind: DocumentKind) -> EngineResult<Document> {
        let document = Document::parse(body, kind)?;
        match &self.hooks.preprocess_response {
            Some(hook) => hook(document),
            None => Ok(document),
        }
    }
}
