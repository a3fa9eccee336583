use clap::{ArgAction, Parser, Subcommand};
use dialoguer::Confirm;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use holofind::config::{default_config_path, load_config, save_config, FinderConfig};
use holofind::errors::{FinderError, Result};
use holofind::finder::Finder;
use holofind::types::*;

/// Find Star Wars API entities by approximate name.
#[derive(Parser)]
#[command(
    name = "holofind",
    version,
    about = "Find Star Wars API entities by approximate name"
)]
struct Cli {
    /// Configuration file (default: <config dir>/holofind/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the catalog base URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Log more (-v: info, -vv: debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search entities by (approximate) name
    Search {
        /// Search query; several words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Only search this category
        #[arg(short, long)]
        category: Option<String>,
        /// Maximum results
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Show every attribute of one entity
    Show {
        /// Category of the entity (people, planets, ...)
        category: String,
        /// Entity id
        id: String,
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// List every entity of a category
    List {
        category: String,
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Print the categories searched by default
    Categories,
    /// Search as you type: every input line replaces the previous query
    Interactive {
        /// Only search this category
        #[arg(short, long)]
        category: Option<String>,
        /// Maximum results per query
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file without asking
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the configuration file location
    Path,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("holofind=info"),
        _ => EnvFilter::new("holofind=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config)?;

    if let Commands::Config { action } = &cli.command {
        return run_config(action, &config_path);
    }

    let mut config = load_config(&config_path)?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    let finder = Finder::new(config)?;

    match cli.command {
        Commands::Search {
            query,
            category,
            limit,
            json,
        } => {
            let query = query.join(" ");
            let resolution = finder.resolve(&query, category.as_deref(), limit)?;
            if json {
                println!("{}", resolution_json(&resolution));
            } else {
                print_resolution(&resolution);
            }
        }
        Commands::Show { category, id, json } => {
            let entity = finder.lookup(&category, &id)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entity).unwrap_or_default()
                );
            } else {
                print_entity(&entity);
            }
        }
        Commands::List { category, json } => {
            let entities = finder.list(&category)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entities).unwrap_or_default()
                );
            } else {
                for entity in &entities {
                    println!("{:>4}  {}", entity.id, entity.name);
                }
                println!("{} {} entities", entities.len(), category);
            }
        }
        Commands::Categories => {
            for category in finder.categories() {
                println!("{}", category);
            }
        }
        Commands::Interactive { category, limit } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| FinderError::Config {
                    message: format!("failed to start async runtime: {e}"),
                })?;
            let finder = Arc::new(finder);
            runtime.block_on(interactive(Arc::clone(&finder), category, limit))?;
            if let Ok(finder) = Arc::try_unwrap(finder) {
                finder.close();
            }
            return Ok(());
        }
        Commands::Config { .. } => {}
    }

    finder.close();
    Ok(())
}

/// Reads queries line by line. Each new line cancels the resolution still
/// running for the previous one; a result is printed only if its query has
/// not been superseded by the time it arrives.
async fn interactive(finder: Arc<Finder>, category: Option<String>, limit: usize) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let (tx, mut rx) =
        tokio::sync::mpsc::unbounded_channel::<(CancellationToken, Result<Resolution>)>();
    let mut current: Option<CancellationToken> = None;

    eprintln!("Type a name to search (Ctrl-D to quit).");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = next_query(line) else {
                    break;
                };
                if let Some(previous) = current.take() {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                current = Some(token.clone());

                let finder = Arc::clone(&finder);
                let category = category.clone();
                let tx = tx.clone();
                tokio::task::spawn_blocking(move || {
                    let outcome =
                        finder.resolve_cancellable(&line, category.as_deref(), Some(limit), &token);
                    // The receiver is gone only when the loop has already exited.
                    let _ = tx.send((token, outcome));
                });
            }
            Some((token, outcome)) = rx.recv() => {
                if token.is_cancelled() {
                    debug!("discarding superseded result");
                    continue;
                }
                match outcome {
                    Ok(resolution) => print_resolution(&resolution),
                    Err(FinderError::Cancelled) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
    }

    if let Some(token) = current {
        token.cancel();
    }
    Ok(())
}

/// Unwraps one stdin read. End of input and read errors both end the
/// session; a read error is reported first.
fn next_query(read: std::io::Result<Option<String>>) -> Option<String> {
    match read {
        Ok(line) => line,
        Err(e) => {
            eprintln!("Error: failed to read input: {}", e);
            None
        }
    }
}

fn run_config(action: &ConfigAction, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                let overwrite = Confirm::new()
                    .with_prompt(format!("{} exists. Overwrite?", config_path.display()))
                    .default(false)
                    .interact()
                    .map_err(|e| FinderError::Config {
                        message: format!("confirmation prompt failed: {e}"),
                    })?;
                if !overwrite {
                    println!("Kept existing configuration");
                    return Ok(());
                }
            }
            save_config(config_path, &FinderConfig::default())?;
            println!("Wrote default configuration to {}", config_path.display());
        }
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let text = toml::to_string_pretty(&config).map_err(|e| FinderError::Config {
                message: format!("failed to serialize config: {e}"),
            })?;
            print!("{}", text);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}

/// Uses the `--config` argument, else the platform default location.
fn resolve_config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => default_config_path().ok_or_else(|| FinderError::Config {
            message: "no configuration directory on this platform; pass --config".to_string(),
        }),
    }
}

fn print_resolution(resolution: &Resolution) {
    if resolution.query.is_empty() {
        return;
    }
    if resolution.matches.is_empty() {
        println!("No results found for '{}'", resolution.query.raw);
    }
    for m in &resolution.matches {
        println!(
            "{:>5.2}  {} ({}/{})",
            m.score, m.entity.name, m.entity.category, m.entity.id
        );
    }
    for failure in &resolution.failures {
        eprintln!(
            "warning: '{}' results unavailable: {}",
            failure.category, failure.error
        );
    }
}

fn resolution_json(resolution: &Resolution) -> String {
    let failures: Vec<_> = resolution
        .failures
        .iter()
        .map(|f| json!({ "category": f.category, "error": f.error.to_string() }))
        .collect();
    let value = json!({
        "query": resolution.query,
        "matches": resolution.matches,
        "failures": failures,
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

fn print_entity(entity: &Entity) {
    println!("{} ({}/{})", entity.name, entity.category, entity.id);
    for (key, value) in &entity.attributes {
        if !value.is_empty() {
            println!("  {}: {}", key, value);
        }
    }
}
