//! Loading site definitions from a directory.

use std::fs;

use serde_json::json;
use tracker_lens::{EngineError, SiteRegistry};

fn write(dir: &tempfile::TempDir, name: &str, body: &str) {
    fs::write(dir.path().join(name), body).unwrap();
}

fn definition(id: &str) -> String {
    json!({
        "id": id,
        "name": id.to_uppercase(),
        "url": format!("https://{id}.example.org/"),
        "search": {
            "request": {"url": "/torrents.php"},
            "list": {"rows": "table.torrents tr", "fields": {"title": "a.title"}}
        }
    })
    .to_string()
}

#[test]
fn test_loads_json_definitions_only() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "beta.json", &definition("beta"));
    write(&dir, "alpha.json", &definition("alpha"));
    write(&dir, "notes.txt", "not a site");

    let registry = SiteRegistry::from_dir(dir.path()).unwrap();
    assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["alpha", "beta"]);
    assert_eq!(registry.get("beta").unwrap().definition.name, "BETA");
}

#[test]
fn test_malformed_definition_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "broken.json", r#"{"id": "broken"}"#);

    match SiteRegistry::from_dir(dir.path()) {
        Err(EngineError::Config(message)) => assert!(message.contains("broken.json")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_duplicate_ids_across_files_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "a.json", &definition("same"));
    write(&dir, "b.json", &definition("same"));

    assert!(matches!(
        SiteRegistry::from_dir(dir.path()),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_missing_directory_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(matches!(
        SiteRegistry::from_dir(&missing),
        Err(EngineError::Io(_))
    ));
}

#[test]
fn test_bundled_sites_are_valid() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../sites");
    let registry = SiteRegistry::from_dir(&dir).unwrap();
    let site = registry.get("nexus-demo").unwrap();
    assert!(site.definition.search.is_some());
    assert_eq!(site.definition.user_info.as_ref().unwrap().steps.len(), 3);
}
