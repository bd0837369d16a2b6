//! Weaver CLI — URL → knowledge-graph ingestion pipeline.
//!
//! Usage:
//!   weaver run [--config path]
//!   weaver enqueue <url> [--ignore-cache] [--config path]
//!   weaver status <url> [--config path]
//!   weaver entities [--config path]
//!   weaver relations <name> [--config path]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use weaver::config::DEFAULT_CONFIG_PATH;
use weaver::{Config, Enqueue, HttpCrawler, OpenRouterExtractor, Pipeline, SqliteGraph};

#[derive(Parser)]
#[command(name = "weaver", version, about = "URL to knowledge-graph ingestion pipeline")]
struct Cli {
    /// Path to the config file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline workers until interrupted
    Run,
    /// Schedule a URL for crawling
    Enqueue {
        /// URL to ingest
        url: String,
        /// Re-crawl even if the document was already processed
        #[arg(long)]
        ignore_cache: bool,
    },
    /// Show the pipeline state of a URL
    Status {
        /// URL to inspect
        url: String,
    },
    /// List all extracted entities
    Entities,
    /// List relations touching an entity
    Relations {
        /// Entity name
        name: String,
    },
}

fn open_pipeline(config: &Config) -> Result<Pipeline, String> {
    let crawler = HttpCrawler::new().map_err(|e| format!("failed to build crawler: {e}"))?;
    let extractor = OpenRouterExtractor::new(&config.openrouter_api_key, &config.extract_model);
    let graph = SqliteGraph::open(&config.graph_db_path)
        .map_err(|e| format!("failed to open graph database: {e}"))?;
    Pipeline::open(config, Arc::new(crawler), Arc::new(extractor), Arc::new(graph))
        .map_err(|e| format!("failed to open pipeline stores: {e}"))
}

async fn cmd_run(pipeline: Pipeline) -> i32 {
    let (tx, rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = tx.send(true);
        }
    });

    info!("starting workers, press Ctrl+C to stop");
    pipeline.run(rx).await;
    0
}

fn cmd_enqueue(pipeline: &Pipeline, url: &str, ignore_cache: bool) -> i32 {
    match pipeline.enqueue_url(url, ignore_cache) {
        Ok(Enqueue::Scheduled) => {
            println!("Enqueued {url}");
            0
        }
        Ok(Enqueue::AlreadyComplete) => {
            println!("{url} is already fully processed (use --ignore-cache to re-crawl)");
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn cmd_status(pipeline: &Pipeline, url: &str) -> i32 {
    match pipeline.document(url) {
        Ok(Some(doc)) => {
            println!("url:        {}", doc.url);
            println!("status:     {}", doc.status);
            println!(
                "attempts:   crawl={} extract={} graph={}",
                doc.crawl_attempts, doc.extract_attempts, doc.graph_attempts
            );
            println!("entities:   {}", doc.entities.len());
            println!("relations:  {}", doc.relations.len());
            println!(
                "last error: {}",
                doc.last_error.as_deref().unwrap_or("none")
            );
            println!("updated:    {}", doc.updated_at.to_rfc3339());
            0
        }
        Ok(None) => {
            eprintln!("Error: unknown URL '{url}'");
            1
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn cmd_entities(pipeline: &Pipeline) -> i32 {
    let entities = match pipeline.list_entities() {
        Ok(entities) => entities,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };
    if entities.is_empty() {
        println!("No entities extracted yet.");
        return 0;
    }
    println!("{:<40}  {:<20}", "NAME", "LABEL");
    println!("{}", "-".repeat(62));
    for entity in entities {
        println!("{:<40}  {:<20}", entity.name, entity.label);
    }
    0
}

fn cmd_relations(pipeline: &Pipeline, name: &str) -> i32 {
    let relations = match pipeline.list_relations(name) {
        Ok(relations) => relations,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };
    if relations.is_empty() {
        println!("No relations touching '{name}'.");
        return 0;
    }
    for relation in relations {
        println!("{relation}");
    }
    0
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let pipeline = match open_pipeline(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Run => cmd_run(pipeline).await,
        Commands::Enqueue { url, ignore_cache } => cmd_enqueue(&pipeline, &url, ignore_cache),
        Commands::Status { url } => cmd_status(&pipeline, &url),
        Commands::Entities => cmd_entities(&pipeline),
        Commands::Relations { name } => cmd_relations(&pipeline, &name),
    };
    std::process::exit(code);
}
