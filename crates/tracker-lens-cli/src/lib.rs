//! Tracker Lens CLI — search trackers and fetch account metrics from the shell.

pub mod config;
pub mod output;

pub use config::{load_cookies, parse_category, resolve_cookies_path, resolve_sites_dir};
pub use output::{search_report, site_listing};
