//! Account aggregation: ordered steps, assertions, pagination.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use tracker_lens::{Engine, RecordId, SiteHooks};

use common::{ok, padding, site, ScriptedTransport};

fn index_page(with_user: bool) -> String {
    let user = if with_user {
        r#"<a class="user" href="userdetails.php?id=42">neo</a>"#
    } else {
        r#"<span class="guest">guest</span>"#
    };
    format!(
        r#"<html><body>{}<div id="info">{user}
           <span class="bonus">1,234.5</span></div></body></html>"#,
        padding()
    )
}

fn details_page() -> String {
    format!(
        r#"<html><body>{}<table>
             <tr><td class="rowhead">Uploaded</td><td>10 GiB</td></tr>
             <tr><td class="rowhead">Downloaded</td><td>5 GiB</td></tr>
             <tr><td class="rowhead">Join date</td><td>2020-05-01 12:00:00</td></tr>
             <tr><td class="rowhead">Class</td><td><b>Power User</b></td></tr>
           </table></body></html>"#,
        padding()
    )
}

fn seeding_page(rows: &[&str], last: Option<u32>) -> String {
    let rows: String = rows
        .iter()
        .map(|size| format!("<tr><td>t</td><td>{size}</td></tr>"))
        .collect();
    let pager = last
        .map(|n| format!(r#"<p class="pager"><a class="last">{n}</a></p>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body>{}<table id="seeding"><tr><th>Name</th><th>Size</th></tr>{rows}</table>{pager}</body></html>"#,
        padding()
    )
}

fn user_site(pagination: Value) -> Value {
    json!({
        "id": "demo",
        "name": "Demo",
        "url": "https://demo.example.org/",
        "user_info": {
            "selectors": {
                "id": {"selector": "a.user", "attr": "href",
                       "filters": [{"name": "querystring", "args": ["id"]}]},
                "name": "a.user",
                "bonus": "span.bonus",
                "uploaded": "td.rowhead:contains('Uploaded') + td",
                "downloaded": "td.rowhead:contains('Downloaded') + td",
                "join_time": "td.rowhead:contains('Join') + td",
                "level_name": "td.rowhead:contains('Class') + td"
            },
            "steps": [
                {"request": {"url": "/index.php"}, "fields": ["id", "name", "bonus"]},
                {
                    "request": {"url": "/userdetails.php", "params": {"id": "{uid}"}},
                    "assertion": {"id": "uid"},
                    "fields": ["uploaded", "downloaded", "join_time", "level_name"]
                },
                {
                    "request": {"url": "/getusertorrentlist.php",
                                "params": {"userid": "{uid}", "type": "seeding"}},
                    "assertion": {"id": "uid"},
                    "fields": ["seeding", "seeding_size"],
                    "pagination": pagination
                }
            ]
        }
    })
}

fn single_page_pagination() -> Value {
    json!({"rows": "#seeding tr", "skip_rows": 1, "size": "td:eq(1)"})
}

#[tokio::test]
async fn test_profile_assembled_across_steps() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ok(&index_page(true)),
        ok(&details_page()),
        ok(&seeding_page(&["1 GiB", "1 GiB"], None)),
    ]));
    let site = site(user_site(single_page_pagination()));

    let profile = Engine::new(transport.clone()).user_info(&site).await.unwrap();

    assert_eq!(profile.site, "demo");
    assert_eq!(profile.id, Some(RecordId::Numeric(42)));
    assert_eq!(profile.name.as_deref(), Some("neo"));
    assert_eq!(profile.bonus, Some(1234.5));
    assert_eq!(profile.uploaded, Some(10 * 1024 * 1024 * 1024));
    assert_eq!(profile.downloaded, Some(5 * 1024 * 1024 * 1024));
    assert_eq!(profile.ratio, Some(2.0));
    assert_eq!(profile.level_name.as_deref(), Some("Power User"));
    assert_eq!(profile.join_time, Some(1588334400));
    assert_eq!(profile.seeding, Some(2));
    assert_eq!(profile.seeding_size, Some(2 * 1024 * 1024 * 1024));
    assert!(profile.updated_at > 0);

    let sent = transport.requests();
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[1].full_url().as_str(),
        "https://demo.example.org/userdetails.php?id=42"
    );
    assert_eq!(
        sent[2].full_url().as_str(),
        "https://demo.example.org/getusertorrentlist.php?userid=42&type=seeding&page=0"
    );
}

#[tokio::test]
async fn test_unmet_assertion_skips_dependent_steps() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok(&index_page(false))]));
    let site = site(user_site(single_page_pagination()));

    let profile = Engine::new(transport.clone()).user_info(&site).await.unwrap();

    assert_eq!(transport.sent(), 1);
    assert_eq!(profile.id, None);
    assert_eq!(profile.uploaded, None);
    assert_eq!(profile.seeding, None);
    assert_eq!(profile.bonus, Some(1234.5));
}

#[tokio::test]
async fn test_pagination_without_marker_reads_one_page() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ok(&index_page(true)),
        ok(&details_page()),
        ok(&seeding_page(&["2 GiB"], None)),
        ok(&seeding_page(&["2 GiB"], None)),
    ]));
    let site = site(user_site(single_page_pagination()));

    let profile = Engine::new(transport.clone()).user_info(&site).await.unwrap();

    assert_eq!(transport.sent(), 3);
    assert_eq!(profile.seeding, Some(1));
    assert_eq!(profile.seeding_size, Some(2 * 1024 * 1024 * 1024));
}

#[tokio::test]
async fn test_pagination_follows_last_page_marker() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ok(&index_page(true)),
        ok(&details_page()),
        ok(&seeding_page(&["1 GiB", "1 GiB"], Some(2))),
        ok(&seeding_page(&["1 GiB"], Some(99))),
        ok(&seeding_page(&["512 MiB"], None)),
        ok(&seeding_page(&["1 GiB"], None)),
    ]));
    let site = site(user_site(json!({
        "rows": "#seeding tr",
        "skip_rows": 1,
        "size": "td:eq(1)",
        "last_page": "p.pager a.last"
    })));

    let profile = Engine::new(transport.clone()).user_info(&site).await.unwrap();

    let sent = transport.requests();
    assert_eq!(sent.len(), 5);
    assert!(sent[4].full_url().as_str().ends_with("page=2"));
    assert_eq!(profile.seeding, Some(4));
    assert_eq!(
        profile.seeding_size,
        Some(3 * 1024 * 1024 * 1024 + 512 * 1024 * 1024)
    );
}

#[tokio::test]
async fn test_pagination_stops_on_empty_page() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ok(&index_page(true)),
        ok(&details_page()),
        ok(&seeding_page(&["1 GiB"], Some(5))),
        ok(&seeding_page(&[], Some(5))),
    ]));
    let site = site(user_site(json!({
        "rows": "#seeding tr",
        "skip_rows": 1,
        "size": "td:eq(1)",
        "last_page": "p.pager a.last"
    })));

    let profile = Engine::new(transport.clone()).user_info(&site).await.unwrap();

    assert_eq!(transport.sent(), 4);
    assert_eq!(profile.seeding, Some(1));
}

#[tokio::test]
async fn test_continue_pagination_hook() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ok(&index_page(true)),
        ok(&details_page()),
        ok(&seeding_page(&["1 GiB", "1 GiB"], None)),
        ok(&seeding_page(&["1 GiB", "1 GiB"], None)),
        ok(&seeding_page(&["1 GiB"], None)),
    ]));
    let site = site(user_site(single_page_pagination())).with_hooks(
        SiteHooks::default().continue_pagination(|cursor| cursor.rows_on_page >= 2),
    );

    let profile = Engine::new(transport.clone()).user_info(&site).await.unwrap();

    assert_eq!(transport.sent(), 5);
    assert_eq!(profile.seeding, Some(5));
}
