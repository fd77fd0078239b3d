//! JSON shapes printed on stdout.

use serde::Serialize;
use serde_json::{json, Value};
use tracker_lens::{SiteRegistry, SiteResult, TorrentRecord};

#[derive(Debug, Serialize)]
pub struct SearchReport<'a> {
    pub keywords: &'a str,
    pub total: usize,
    pub sites: Vec<SiteReport<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SiteReport<'a> {
    pub site: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<&'a [TorrentRecord]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-site records or error, plus a grand total.
pub fn search_report<'a>(keywords: &'a str, results: &'a [SiteResult]) -> SearchReport<'a> {
    let sites: Vec<SiteReport<'a>> = results
        .iter()
        .map(|r| match &r.result {
            Ok(records) => SiteReport {
                site: &r.site,
                records: Some(records.as_slice()),
                error: None,
            },
            Err(e) => SiteReport {
                site: &r.site,
                records: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let total = sites
        .iter()
        .filter_map(|s| s.records.map(<[TorrentRecord]>::len))
        .sum();

    SearchReport {
        keywords,
        total,
        sites,
    }
}

/// One line per site: id, name, address, supported operations.
pub fn site_listing(registry: &SiteRegistry) -> Value {
    Value::Array(
        registry
            .sites()
            .map(|site| {
                let d = &site.definition;
                json!({
                    "id": d.id,
                    "name": d.name,
                    "url": d.url.as_str(),
                    "search": d.search.is_some(),
                    "user_info": d.user_info.is_some(),
                    "categories": d.categories.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}
