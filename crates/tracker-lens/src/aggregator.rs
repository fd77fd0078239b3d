//! Account aggregator: ordered, dependent requests that assemble a profile.
//!
//! Steps run strictly in declaration order. A step may assert on fields an
//! earlier step collected (`{"id": "uid"}` substitutes the collected `id`
//! for every `{uid}` in the step's request); when an asserted field is
//! missing the step is skipped. A step only ever writes the fields it owns.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::document::{Location, Node};
use crate::extractor::extract_field;
use crate::filters::{parse_number, parse_size};
use crate::request::RequestConfig;
use crate::resilience::ResilientFetcher;
use crate::rule::ExtractionRule;
use crate::site::Site;
use crate::types::{as_u64, is_empty_value, EngineError, EngineResult, UserProfile};

/// Hard ceiling on pages fetched by one paginated step.
pub const MAX_PAGES: u64 = 100;

/// Account data endpoint(s) of a site.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoConfig {
    pub steps: Vec<FetchStep>,
    /// Field rules shared by all steps.
    #[serde(default)]
    pub selectors: BTreeMap<String, ExtractionRule>,
}

impl UserInfoConfig {
    /// Rule for `field` as seen by `step`; step-local rules win.
    pub fn rule_for<'a>(&'a self, step: &'a FetchStep, field: &str) -> Option<&'a ExtractionRule> {
        step.selectors.get(field).or_else(|| self.selectors.get(field))
    }
}

/// One request in the chain.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchStep {
    #[serde(default)]
    pub request: RequestConfig,
    /// Collected field name to placeholder name.
    #[serde(default)]
    pub assertion: BTreeMap<String, String>,
    /// Profile fields this step populates.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub selectors: BTreeMap<String, ExtractionRule>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

fn default_page_key() -> String {
    "params.page".to_string()
}

fn default_count_field() -> String {
    "seeding".to_string()
}

fn default_size_field() -> String {
    "seeding_size".to_string()
}

/// Totals seeding rows over a paged listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    /// Request path receiving the page index.
    #[serde(default = "default_page_key")]
    pub page_key: String,
    #[serde(default)]
    pub start: u64,
    /// Read from the first page only.
    #[serde(default)]
    pub last_page: Option<ExtractionRule>,
    pub rows: Location,
    #[serde(default)]
    pub skip_rows: usize,
    /// Per-row size, summed into `size_field`.
    #[serde(default)]
    pub size: Option<ExtractionRule>,
    #[serde(default = "default_count_field")]
    pub count_field: String,
    #[serde(default = "default_size_field")]
    pub size_field: String,
}

/// Pagination state handed to a site's continuation hook.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    pub page: u64,
    pub last_page: Option<u64>,
    pub rows_on_page: usize,
    pub pages_fetched: u64,
    pub total_rows: u64,
}

/// Run every step of `site`'s user-info chain and assemble the profile.
pub async fn aggregate(site: &Site, fetcher: &ResilientFetcher<'_>) -> EngineResult<UserProfile> {
    let definition = &site.definition;
    let config = definition.user_info.as_ref().ok_or_else(|| {
        EngineError::Config(format!("site '{}' does not support user info", definition.id))
    })?;

    let mut collected = Map::new();
    for (index, step) in config.steps.iter().enumerate() {
        let Some(placeholders) = assertion_values(step, &collected) else {
            tracing::debug!(site = %definition.id, step = index, "assertion unmet, step skipped");
            continue;
        };

        let mut request = step.request.clone();
        request.substitute(&placeholders);

        let values = match &step.pagination {
            Some(pagination) => run_pages(site, config, step, request, pagination, fetcher).await?,
            None => {
                let response = fetcher
                    .fetch(request.to_http(&definition.url)?, request.response_type)
                    .await?;
                let document = site.parse_response(&response.body, request.response_type)?;
                extract_owned(document.root(), config, step)
            }
        };

        merge_owned(&mut collected, values);
    }

    Ok(UserProfile::from_fields(
        &definition.id,
        &collected,
        Utc::now().timestamp(),
    ))
}

/// Placeholder values for `step`, or `None` when an asserted field is missing.
pub fn assertion_values(step: &FetchStep, collected: &Map<String, Value>) -> Option<Map<String, Value>> {
    step.assertion
        .iter()
        .map(|(field, placeholder)| {
            collected
                .get(field)
                .filter(|v| !is_empty_value(v))
                .map(|v| (placeholder.clone(), v.clone()))
        })
        .collect()
}

/// Overwrite earlier values only with non-empty ones.
fn merge_owned(collected: &mut Map<String, Value>, values: Map<String, Value>) {
    for (name, value) in values {
        if !is_empty_value(&value) {
            collected.insert(name, value);
        }
    }
}

fn extract_owned(scope: Node<'_>, config: &UserInfoConfig, step: &FetchStep) -> Map<String, Value> {
    let mut values = Map::new();
    for field in &step.fields {
        match config.rule_for(step, field) {
            Some(rule) => {
                values.insert(field.clone(), extract_field(scope, field, rule));
            }
            None => {
                if !is_pagination_total(step, field) {
                    tracing::warn!(field = %field, "no rule for owned field");
                }
            }
        }
    }
    values
}

fn is_pagination_total(step: &FetchStep, field: &str) -> bool {
    step.pagination
        .as_ref()
        .is_some_and(|p| p.count_field == field || p.size_field == field)
}

/// What one page contributes.
#[derive(Debug, Default)]
struct PageTally {
    rows: usize,
    size: u64,
    last_page: Option<u64>,
    fields: Map<String, Value>,
}

async fn run_pages(
    site: &Site,
    config: &UserInfoConfig,
    step: &FetchStep,
    request: RequestConfig,
    pagination: &Pagination,
    fetcher: &ResilientFetcher<'_>,
) -> EngineResult<Map<String, Value>> {
    let mut page = pagination.start;
    let mut pages_fetched = 0u64;
    let mut last_page = None;
    let mut total_rows = 0u64;
    let mut total_size = 0u64;
    let mut values = Map::new();

    loop {
        let mut paged = request.clone();
        paged.set(&pagination.page_key, Value::from(page))?;
        let response = fetcher
            .fetch(paged.to_http(&site.definition.url)?, paged.response_type)
            .await?;

        let first = pages_fetched == 0;
        let tally = {
            let document = site.parse_response(&response.body, paged.response_type)?;
            tally_page(document.root(), config, step, pagination, first)?
        };

        if first {
            last_page = tally.last_page;
            values = tally.fields;
        }
        pages_fetched += 1;
        total_rows += tally.rows as u64;
        total_size += tally.size;

        let cursor = PageCursor {
            page,
            last_page,
            rows_on_page: tally.rows,
            pages_fetched,
            total_rows,
        };
        let more = match &site.hooks.continue_pagination {
            Some(hook) => hook(&cursor),
            None => last_page.is_some_and(|last| page < last),
        };

        if tally.rows == 0 || !more {
            break;
        }
        if pages_fetched >= MAX_PAGES {
            tracing::warn!(site = %site.definition.id, pages = pages_fetched, "page limit reached");
            break;
        }
        page += 1;
    }

    tracing::debug!(
        site = %site.definition.id,
        pages = pages_fetched,
        rows = total_rows,
        "pagination finished"
    );
    insert_totals(&mut values, step, pagination, total_rows, total_size);
    Ok(values)
}

/// Write the pagination totals `step` owns.
fn insert_totals(
    values: &mut Map<String, Value>,
    step: &FetchStep,
    pagination: &Pagination,
    rows: u64,
    size: u64,
) {
    for (field, total) in [(&pagination.count_field, rows), (&pagination.size_field, size)] {
        if step.fields.contains(field) {
            values.insert(field.clone(), Value::from(total));
        }
    }
}

fn tally_page(
    root: Node<'_>,
    config: &UserInfoConfig,
    step: &FetchStep,
    pagination: &Pagination,
    first: bool,
) -> EngineResult<PageTally> {
    let rows = root
        .find_all(&pagination.rows)
        .map_err(|e| EngineError::Config(e.to_string()))?;
    let rows: Vec<_> = rows.into_iter().skip(pagination.skip_rows).collect();

    let size = match &pagination.size {
        Some(rule) => rows
            .iter()
            .map(|row| extract_field(*row, "size", rule))
            .filter_map(|v| parse_size(&v).ok())
            .filter_map(|v| as_u64(&v))
            .sum(),
        None => 0,
    };

    let mut tally = PageTally {
        rows: rows.len(),
        size,
        ..PageTally::default()
    };

    if first {
        tally.last_page = pagination
            .last_page
            .as_ref()
            .map(|rule| extract_field(root, "last_page", rule))
            .and_then(|v| parse_number(&v).ok())
            .and_then(|v| as_u64(&v));
        tally.fields = extract_owned(root, config, step);
    }
    Ok(tally)
}
