//! Tracker Lens CLI — entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use tracker_lens::request::SearchQuery;
use tracker_lens::{Engine, ReqwestTransport, Selection, SiteDefinition, SiteRegistry, TransportConfig};
use tracker_lens_cli::config::{load_cookies, parse_category, resolve_cookies_path, resolve_sites_dir};
use tracker_lens_cli::output::{search_report, site_listing};

#[derive(Parser)]
#[command(
    name = "tracker-lens",
    about = "Search trackers and fetch account metrics from declarative site definitions",
    version
)]
struct Cli {
    /// Directory of site definition files (*.json).
    #[arg(long, global = true)]
    sites: Option<String>,

    /// JSON file mapping site ids to cookies.
    #[arg(long, global = true)]
    cookies: Option<String>,

    /// Request timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search one or more sites and print the records as JSON.
    Search {
        /// Search keywords.
        #[arg(default_value = "")]
        keywords: String,

        /// Site id to search; repeat for several. Defaults to every site.
        #[arg(short, long = "site")]
        sites: Vec<String>,

        /// Facet selection as key=value[,value]; repeatable.
        #[arg(short, long = "category", value_parser = parse_category_arg)]
        categories: Vec<(String, Selection)>,

        /// Sites searched at once.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Fetch account metrics for one site.
    UserInfo {
        /// Site id.
        site: String,
    },

    /// Validate site definitions: a single file, or the whole directory.
    Validate {
        /// Definition file; validates the sites directory when omitted.
        file: Option<PathBuf>,
    },

    /// List known sites as JSON.
    Sites,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   tracker-lens completions bash > ~/.local/share/bash-completion/completions/tracker-lens
    ///   tracker-lens completions zsh > ~/.zfunc/_tracker-lens
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn parse_category_arg(arg: &str) -> Result<(String, Selection), String> {
    parse_category(arg).map_err(|e| e.to_string())
}

fn load_registry(explicit: Option<&str>) -> anyhow::Result<SiteRegistry> {
    let dir = resolve_sites_dir(explicit);
    tracing::info!("Sites: {}", dir.display());
    SiteRegistry::from_dir(&dir).with_context(|| format!("loading sites from {}", dir.display()))
}

fn build_engine(cli: &Cli) -> anyhow::Result<Engine> {
    let transport = ReqwestTransport::new(&TransportConfig {
        timeout_ms: cli.timeout_ms,
        ..TransportConfig::default()
    })?;
    let cookies_path = resolve_cookies_path(cli.cookies.as_deref());
    let cookies = load_cookies(&cookies_path)?;
    tracing::debug!(count = cookies.len(), "loaded cookies");
    Ok(Engine::new(Arc::new(transport)).with_cookies(cookies))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Search {
            keywords,
            sites,
            categories,
            concurrency,
        } => {
            let registry = load_registry(cli.sites.as_deref())?;
            let engine = build_engine(&cli)?;

            let ids: Vec<String> = if sites.is_empty() {
                registry
                    .sites()
                    .filter(|s| s.definition.search.is_some())
                    .map(|s| s.id().to_string())
                    .collect()
            } else {
                sites.clone()
            };

            let query = SearchQuery {
                keywords: keywords.clone(),
                categories: categories.iter().cloned().collect(),
            };
            let results = engine
                .search_many(&registry, &ids, &query, *concurrency)
                .await;
            let report = search_report(keywords, &results);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::UserInfo { site } => {
            let registry = load_registry(cli.sites.as_deref())?;
            let engine = build_engine(&cli)?;
            let site = registry.get(site)?;
            let profile = engine.user_info(site).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        Commands::Validate { file } => match file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                match SiteDefinition::from_json(&text) {
                    Ok(definition) => {
                        println!("Valid site definition: {}", path.display());
                        println!("  Id: {}", definition.id);
                        println!("  Search: {}", definition.search.is_some());
                        println!("  User info: {}", definition.user_info.is_some());
                    }
                    Err(e) => {
                        eprintln!("Invalid site definition: {e}");
                        std::process::exit(1);
                    }
                }
            }
            None => match load_registry(cli.sites.as_deref()) {
                Ok(registry) => {
                    println!("Valid sites directory: {} site(s)", registry.len());
                    for id in registry.ids() {
                        println!("  {id}");
                    }
                }
                Err(e) => {
                    eprintln!("Invalid sites directory: {e:#}");
                    std::process::exit(1);
                }
            },
        },

        Commands::Sites => {
            let registry = load_registry(cli.sites.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&site_listing(&registry))?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "tracker-lens", &mut std::io::stdout());
        }
    }

    Ok(())
}
