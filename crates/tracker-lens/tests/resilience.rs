//! Anti-bot replay bound and login detection through the engine.

mod common;

use std::sync::Arc;

use serde_json::json;
use tracker_lens::request::SearchQuery;
use tracker_lens::{Engine, EngineError, HttpResponse, RecordId};

use common::{challenge, ok, padding, site, CountingBypass, ScriptedTransport};

fn search_site() -> tracker_lens::Site {
    site(json!({
        "id": "guarded",
        "name": "Guarded",
        "url": "https://guarded.example.org/",
        "search": {
            "request": {"url": "/torrents.php"},
            "list": {"rows": "tr.t", "fields": {"title": "a"}}
        }
    }))
}

fn results() -> HttpResponse {
    ok(&format!(
        r#"<table>{}<tr class="t"><td><a href="/d?id=1">One</a></td></tr></table>"#,
        padding()
    ))
}

#[tokio::test]
async fn test_replays_once_with_bypass_token() {
    let transport = Arc::new(ScriptedTransport::new(vec![challenge(), results()]));
    let bypass = Arc::new(CountingBypass::default());

    let records = Engine::new(transport.clone())
        .with_bypass(bypass.clone())
        .with_cookie("guarded", "uid=1")
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(bypass.acquired(), 1);
    assert_eq!(bypass.cleared(), 0);

    let sent = transport.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].header("cookie"), Some("uid=1"));
    assert_eq!(sent[1].header("cookie"), Some("uid=1; cf_clearance=token"));
    assert_eq!(sent[1].header("user-agent"), Some("TestAgent/1.0"));
}

#[tokio::test]
async fn test_second_block_is_surfaced_without_further_retries() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        challenge(),
        challenge(),
        challenge(),
        results(),
    ]));
    let bypass = Arc::new(CountingBypass::default());

    let result = Engine::new(transport.clone())
        .with_bypass(bypass.clone())
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await;

    assert!(matches!(result, Err(EngineError::Blocked { .. })));
    assert_eq!(transport.sent(), 2);
    assert_eq!(bypass.acquired(), 1);
    assert_eq!(bypass.cleared(), 1);
}

#[tokio::test]
async fn test_block_without_provider_fails_immediately() {
    let transport = Arc::new(ScriptedTransport::new(vec![challenge(), results()]));

    let result = Engine::new(transport.clone())
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await;

    assert!(matches!(result, Err(EngineError::Blocked { .. })));
    assert_eq!(transport.sent(), 1);
}

#[tokio::test]
async fn test_short_login_body_is_not_authenticated() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok(
        "<html><body>Please log in to continue.</body></html>",
    )]));

    let result = Engine::new(transport)
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await;

    assert!(matches!(result, Err(EngineError::NotAuthenticated { .. })));
}

#[tokio::test]
async fn test_refresh_header_to_login_is_not_authenticated() {
    let mut response = results();
    response
        .headers
        .push(("refresh".into(), "0; url=https://guarded.example.org/login.php".into()));
    let transport = Arc::new(ScriptedTransport::new(vec![response]));

    let result = Engine::new(transport)
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await;

    assert!(matches!(result, Err(EngineError::NotAuthenticated { .. })));
}

fn jsd_page() -> HttpResponse {
    let mut page = ok(r#"<html><body><table><tr class="t"><td><a href="/d?id=1">One</a></td></tr></table>
        <script src="/cdn-cgi/challenge-platform/scripts/jsd/main.js"></script></body></html>"#);
    page.headers.push(("server".into(), "cloudflare".into()));
    page
}

#[tokio::test]
async fn test_proxy_fronted_page_extracts_without_provider() {
    let transport = Arc::new(ScriptedTransport::new(vec![jsd_page()]));

    let records = Engine::new(transport.clone())
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "One");
    assert_eq!(transport.sent(), 1);
}

#[tokio::test]
async fn test_proxy_fronted_page_keeps_bypass_token() {
    let transport = Arc::new(ScriptedTransport::new(vec![jsd_page()]));
    let bypass = Arc::new(CountingBypass::default());

    let records = Engine::new(transport)
        .with_bypass(bypass.clone())
        .search(&search_site(), &SearchQuery::keywords("one"))
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(bypass.acquired(), 0);
    assert_eq!(bypass.cleared(), 0);
}

#[tokio::test]
async fn test_short_json_profile_with_login_keys() {
    let site = site(json!({
        "id": "api",
        "name": "Api",
        "url": "https://api.example.org/",
        "user_info": {
            "selectors": {
                "id": "data.id",
                "name": "data.username",
                "uploaded": "data.uploaded"
            },
            "steps": [{
                "request": {"url": "/api/user", "response_type": "json"},
                "fields": ["id", "name", "uploaded"]
            }]
        }
    }));
    let transport = Arc::new(ScriptedTransport::new(vec![ok(
        r#"{"data":{"id":42,"username":"neo","uploaded":1073741824,"last_login":"2024-01-02 03:04:05"}}"#,
    )]));

    let profile = Engine::new(transport).user_info(&site).await.unwrap();

    assert_eq!(profile.id, Some(RecordId::Numeric(42)));
    assert_eq!(profile.name.as_deref(), Some("neo"));
    assert_eq!(profile.uploaded, Some(1073741824));
}
