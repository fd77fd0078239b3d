//! Configuration loading and resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracker_lens::Selection;

pub const SITES_ENV: &str = "TRACKER_LENS_SITES";
pub const COOKIES_ENV: &str = "TRACKER_LENS_COOKIES";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid cookies file {path}: {reason}")]
    Cookies { path: String, reason: String },

    #[error("invalid category '{0}', expected key=value[,value]")]
    Category(String),
}

/// Resolve the site definitions directory.
///
/// `--sites` flag, then `TRACKER_LENS_SITES`, then `./sites`, then
/// `~/.tracker-lens/sites`.
pub fn resolve_sites_dir(explicit: Option<&str>) -> PathBuf {
    resolve_sites_dir_from(explicit, std::env::var(SITES_ENV).ok(), home_dir())
}

pub fn resolve_sites_dir_from(
    explicit: Option<&str>,
    env_path: Option<String>,
    home: String,
) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = env_path.filter(|p| !p.is_empty()) {
        return PathBuf::from(env_path);
    }

    let cwd_sites = PathBuf::from("sites");
    if cwd_sites.is_dir() {
        return cwd_sites;
    }

    PathBuf::from(format!("{home}/.tracker-lens/sites"))
}

/// Resolve the cookies file: `--cookies`, `TRACKER_LENS_COOKIES`, then
/// `~/.tracker-lens/cookies.json`.
pub fn resolve_cookies_path(explicit: Option<&str>) -> PathBuf {
    resolve_cookies_path_from(explicit, std::env::var(COOKIES_ENV).ok(), home_dir())
}

pub fn resolve_cookies_path_from(
    explicit: Option<&str>,
    env_path: Option<String>,
    home: String,
) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = env_path.filter(|p| !p.is_empty()) {
        return PathBuf::from(env_path);
    }

    PathBuf::from(format!("{home}/.tracker-lens/cookies.json"))
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Load `{site_id: cookie}` pairs. A missing file means no cookies.
pub fn load_cookies(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no cookies file");
        return Ok(HashMap::new());
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let invalid = |reason: String| ConfigError::Cookies {
        path: path.display().to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(invalid("expected an object of site id to cookie".to_string()));
    };

    map.into_iter()
        .map(|(site, cookie)| match cookie {
            Value::String(cookie) => Ok((site, cookie)),
            other => Err(invalid(format!("cookie for '{site}' is not a string: {other}"))),
        })
        .collect()
}

/// Parse `key=value[,value]` into a facet selection.
pub fn parse_category(arg: &str) -> Result<(String, Selection), ConfigError> {
    let (key, values) = arg
        .split_once('=')
        .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Category(arg.to_string()))?;

    let values: Vec<Value> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| Value::String(v.to_string()))
        .collect();

    let selection = match <[Value; 1]>::try_from(values) {
        Ok([one]) => Selection::One(one),
        Err(many) => Selection::Many(many),
    };
    Ok((key.trim().to_string(), selection))
}
