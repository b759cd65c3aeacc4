//! Agent Catalog CLI
//!
//! The `agent-catalog` command indexes agent definitions and answers lookups
//! against them.
//!
//! ## Commands
//!
//! - `rebuild` / `update`: (re)index a directory of agent files
//! - `query`: substring, regex or fuzzy search with filters
//! - `field`: search one field (`name`, `description`, `body`, `tools`, `source`)
//! - `show`: resolve one agent by identifier, falling back to the closest match
//! - `list`, `stats`, `cache`: inspection and maintenance

mod json_source;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_catalog_core::{
    AgentRecord, CacheConfig, CancellationToken, CatalogError, EngineConfig, LogFormat,
    QueryEngine, QueryOptions,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, Level};

use crate::json_source::JsonDirSource;

#[derive(Parser)]
#[command(name = "agent-catalog")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Indexed, cached, fuzzy-searchable agent catalog", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding the index and cache snapshots
    #[arg(long, global = true, env = "AGENT_CATALOG_HOME", default_value = ".agent-catalog")]
    home: PathBuf,

    /// Result cache lifetime in seconds
    #[arg(long, global = true, env = "AGENT_CATALOG_CACHE_TTL_SECS", default_value = "3600")]
    cache_ttl_secs: u64,

    /// Maximum number of cached results
    #[arg(long, global = true, env = "AGENT_CATALOG_CACHE_SIZE", default_value = "100")]
    cache_size: usize,

    /// Minimum similarity for fuzzy matches, between 0 and 1
    #[arg(long, global = true, env = "AGENT_CATALOG_FUZZY_THRESHOLD")]
    fuzzy_threshold: Option<f64>,

    /// Output format for results
    #[arg(long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the whole index with the agents found in a directory
    Rebuild {
        /// Directory of agent JSON files
        dir: PathBuf,
    },

    /// Refresh only the agents that came from a directory
    Update {
        /// Directory of agent JSON files
        dir: PathBuf,
    },

    /// Search name, description and body
    Query {
        /// Search text; empty matches everything
        #[arg(default_value = "")]
        text: String,

        /// Maximum number of results (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// Only agents relying on the default tool set
        #[arg(long, conflicts_with = "explicit_tools")]
        no_tools: bool,

        /// Only agents declaring their own tools
        #[arg(long)]
        explicit_tools: bool,

        /// Treat the text as a regular expression
        #[arg(long, conflicts_with = "fuzzy")]
        regex: bool,

        /// Rank by approximate match instead of substring
        #[arg(long)]
        fuzzy: bool,

        /// Only agents installed from this source
        #[arg(long)]
        source: Option<String>,

        /// Only agents installed after this RFC 3339 timestamp
        #[arg(long)]
        after: Option<DateTime<Utc>>,
    },

    /// Search a single field
    Field {
        /// Field name (name, description, body, tools, source)
        field: String,

        /// Value to look for; for tools, a comma-separated list that must all match
        value: String,
    },

    /// Show one agent by file identifier or closest match
    Show {
        identifier: String,
    },

    /// List every indexed agent
    List,

    /// Show index, cache and query statistics
    Stats,

    /// Result cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Drop every cached result
    Clear,
    /// Show cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; degraded persistence only shows up with --verbose.
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    agent_catalog_core::init_tracing(LogFormat::from_json_flag(cli.json), level);

    let engine = open_engine(&cli)?;
    let result = run(&engine, cli.command, cli.output).await;
    engine.close();

    if let Err(ref err) = result {
        if let Some(hint) = hint_for(err) {
            eprintln!("hint: {hint}");
        }
    }
    result
}

fn engine_config(cli: &Cli) -> EngineConfig {
    EngineConfig::in_dir(&cli.home).with_cache(CacheConfig::new(
        cli.cache_size,
        Duration::from_secs(cli.cache_ttl_secs),
    ))
}

fn open_engine(cli: &Cli) -> Result<QueryEngine> {
    let engine = QueryEngine::open(engine_config(cli), Arc::new(JsonDirSource))
        .context("Failed to open agent catalog")?;
    if let Some(threshold) = cli.fuzzy_threshold {
        engine
            .set_fuzzy_threshold(threshold)
            .context("Invalid fuzzy threshold")?;
    }
    debug!(home = %cli.home.display(), "catalog opened");
    Ok(engine)
}

async fn run(engine: &QueryEngine, command: Commands, output: OutputFormat) -> Result<()> {
    match command {
        Commands::Rebuild { dir } => cmd_rebuild(engine, &dir).await,
        Commands::Update { dir } => cmd_update(engine, &dir).await,
        Commands::Query {
            text,
            limit,
            no_tools,
            explicit_tools,
            regex,
            fuzzy,
            source,
            after,
        } => {
            let mut opts = QueryOptions::default().with_limit(limit);
            opts.inherited_only = no_tools;
            opts.explicit_only = explicit_tools;
            opts.regex = regex;
            opts.source = source;
            opts.installed_after = after;
            cmd_query(engine, &text, &opts, fuzzy, output)
        }
        Commands::Field { field, value } => cmd_field(engine, &field, &value, output),
        Commands::Show { identifier } => cmd_show(engine, &identifier, output),
        Commands::List => print_records(&engine.get_all_agents(), output),
        Commands::Stats => cmd_stats(engine, output),
        Commands::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear(engine),
            CacheAction::Stats => print_json(&engine.get_cache_stats()),
        },
    }
}

async fn cmd_rebuild(engine: &QueryEngine, dir: &Path) -> Result<()> {
    let count = engine
        .rebuild_index(dir)
        .await
        .with_context(|| format!("Failed to rebuild index from {}", dir.display()))?;
    println!("Indexed {} agents from {}", count, dir.display());
    Ok(())
}

async fn cmd_update(engine: &QueryEngine, dir: &Path) -> Result<()> {
    let count = engine
        .update_index(dir)
        .await
        .with_context(|| format!("Failed to update index from {}", dir.display()))?;
    println!("Index now holds {} agents", count);
    Ok(())
}

fn cmd_query(
    engine: &QueryEngine,
    text: &str,
    opts: &QueryOptions,
    fuzzy: bool,
    output: OutputFormat,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let results = if fuzzy {
        engine.query_with_fuzzy(text, opts, &cancel)?
    } else {
        engine.query(text, opts, &cancel)?
    };
    print_records(&results, output)
}

fn cmd_field(engine: &QueryEngine, field: &str, value: &str, output: OutputFormat) -> Result<()> {
    let results = engine.query_by_field(field, value)?;
    print_records(&results, output)
}

fn cmd_show(engine: &QueryEngine, identifier: &str, output: OutputFormat) -> Result<()> {
    let record = engine.show_agent(identifier)?;
    match output {
        OutputFormat::Json => print_json(&record),
        OutputFormat::Text => {
            println!("Name:        {}", record.name);
            println!("File:        {}", record.file_identifier);
            if !record.description.is_empty() {
                println!("Description: {}", record.description);
            }
            println!("Tools:       {}", tools_label(&record));
            if !record.source_name.is_empty() {
                println!("Source:      {}", record.source_name);
            }
            println!("Installed:   {}", record.installed_at.to_rfc3339());
            if !record.body.is_empty() {
                println!();
                println!("{}", record.body);
            }
            Ok(())
        }
    }
}

fn cmd_stats(engine: &QueryEngine, output: OutputFormat) -> Result<()> {
    let stats = engine.get_stats();
    match output {
        OutputFormat::Json => print_json(&stats),
        OutputFormat::Text => {
            println!("Agents:          {}", stats.index.records);
            println!("  explicit tools:  {}", stats.explicit_capabilities);
            println!("  default tools:   {}", stats.inherited_capabilities);
            for (source, count) in &stats.by_source {
                let label = if source.is_empty() { "(none)" } else { source };
                println!("  source {label}: {count}");
            }
            println!(
                "Cache:           {}/{} entries, {} hits, {} misses ({:.0}% hit rate)",
                stats.cache.size,
                stats.cache.max_size,
                stats.cache.hits,
                stats.cache.misses,
                stats.cache.hit_rate * 100.0
            );
            println!("Fuzzy threshold: {}", stats.fuzzy_threshold);
            Ok(())
        }
    }
}

fn cmd_cache_clear(engine: &QueryEngine) -> Result<()> {
    let dropped = engine.get_cache_stats().size;
    engine.clear_cache();
    println!("Cleared {} cached results", dropped);
    Ok(())
}

fn print_records(records: &[AgentRecord], output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => print_json(&records),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No agents found.");
                return Ok(());
            }
            for record in records {
                println!("{}", record_line(record));
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn record_line(record: &AgentRecord) -> String {
    if record.description.is_empty() {
        format!("{:<24} [{}]", record.name, tools_label(record))
    } else {
        format!(
            "{:<24} [{}] {}",
            record.name,
            tools_label(record),
            record.description
        )
    }
}

fn tools_label(record: &AgentRecord) -> String {
    if record.capabilities_inherited {
        "default tools".to_string()
    } else {
        record.capabilities.join(", ")
    }
}

/// Actionable follow-up for errors the user can fix.
fn hint_for(err: &anyhow::Error) -> Option<String> {
    let catalog = err.downcast_ref::<CatalogError>()?;
    match catalog {
        CatalogError::AgentNotFound { identifier } => Some(format!(
            "no agent resembles '{identifier}'; run `agent-catalog list` or lower --fuzzy-threshold"
        )),
        CatalogError::UnknownField(_) => {
            Some("use one of: name, description, body, tools, source".to_string())
        }
        CatalogError::InvalidPattern { .. } => {
            Some("drop --regex to search for the text literally".to_string())
        }
        _ => None,
    }
}
