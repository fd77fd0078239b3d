//! Path resolution, cookie loading and category arguments.

use std::fs;
use std::path::PathBuf;

use serde_json::json;
use tracker_lens::Selection;
use tracker_lens_cli::config::{
    load_cookies, parse_category, resolve_cookies_path_from, resolve_sites_dir_from, ConfigError,
};

#[test]
fn test_sites_dir_explicit_wins() {
    let dir = resolve_sites_dir_from(
        Some("/srv/sites"),
        Some("/env/sites".to_string()),
        "/home/u".to_string(),
    );
    assert_eq!(dir, PathBuf::from("/srv/sites"));
}

#[test]
fn test_sites_dir_env_before_home() {
    let dir = resolve_sites_dir_from(None, Some("/env/sites".to_string()), "/home/u".to_string());
    assert_eq!(dir, PathBuf::from("/env/sites"));
}

#[test]
fn test_cookies_path_fallbacks() {
    assert_eq!(
        resolve_cookies_path_from(None, Some(String::new()), "/home/u".to_string()),
        PathBuf::from("/home/u/.tracker-lens/cookies.json")
    );
    assert_eq!(
        resolve_cookies_path_from(None, Some("/tmp/c.json".to_string()), "/home/u".to_string()),
        PathBuf::from("/tmp/c.json")
    );
}

#[test]
fn test_load_cookies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cookies.json");
    fs::write(&path, json!({"alpha": "uid=1; pass=x", "beta": "sid=2"}).to_string()).unwrap();

    let cookies = load_cookies(&path).unwrap();
    assert_eq!(cookies.len(), 2);
    assert_eq!(cookies["alpha"], "uid=1; pass=x");
}

#[test]
fn test_missing_cookies_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cookies = load_cookies(&dir.path().join("absent.json")).unwrap();
    assert!(cookies.is_empty());
}

#[test]
fn test_non_string_cookie_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cookies.json");
    fs::write(&path, r#"{"alpha": 42}"#).unwrap();

    match load_cookies(&path) {
        Err(ConfigError::Cookies { reason, .. }) => assert!(reason.contains("alpha")),
        other => panic!("expected cookies error, got {other:?}"),
    }
}

#[test]
fn test_parse_category_single_and_many() {
    let (key, selection) = parse_category("cat=401").unwrap();
    assert_eq!(key, "cat");
    assert_eq!(selection, Selection::One(json!("401")));

    let (key, selection) = parse_category(" medium = 1, 3 ,").unwrap();
    assert_eq!(key, "medium");
    assert_eq!(selection, Selection::Many(vec![json!("1"), json!("3")]));
}

#[test]
fn test_parse_category_rejects_malformed() {
    for arg in ["cat", "=1", "cat=", " = "] {
        assert!(
            matches!(parse_category(arg), Err(ConfigError::Category(_))),
            "{arg}"
        );
    }
}
