use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod render;

use hippocrates_core::{load_config, ConsultationHub, ConsultationRuntime, HippocratesConfig, Retriever};
use hippocrates_knowledge::{create_embedding_provider, ingest_knowledge_base, KnowledgeStore, SqliteKnowledgeStore};
use hippocrates_provider::{create_provider, parse_provider_model};
use render::{render_error, render_hits, render_turn};

#[derive(Parser)]
#[command(name = "hippocrates", version, about = "Retrieval-grounded medical consultation assistant (educational)")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Root directory (contains config/ and data/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load the knowledge base file into the knowledge store")]
    Ingest {
        #[arg(long, help = "Knowledge base JSON (defaults to knowledge.knowledge_base)")]
        file: Option<PathBuf>,
        #[arg(long, help = "Keep existing chunks instead of replacing them")]
        append: bool,
    },
    #[command(about = "Interactive consultation in the terminal")]
    Chat {
        #[arg(long, help = "Print each turn as JSON")]
        json: bool,
    },
    #[command(about = "Query the knowledge store directly")]
    Search {
        #[arg(help = "Free-text query, e.g. \"sore throat, fever\"")]
        query: String,
        #[arg(long, short = 'k', help = "Number of hits (defaults to retrieval.top_k)")]
        k: Option<usize>,
    },
    #[command(about = "Validate config files")]
    Validate {
        #[arg(long, help = "Also check that the generation provider is reachable")]
        health: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "hippocrates.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(&cli.config_root.join("config"))?;
    tracing::debug!(root = %cli.config_root.display(), "config loaded");

    match command {
        Commands::Validate { health } => {
            println!(
                "Config valid. {} providers, generation model {}, knowledge store {}.",
                config.providers.len(),
                config.main.generation.model,
                config.main.knowledge.db_path.display()
            );
            if health {
                check_generation_health(&config).await?;
                println!("Generation provider is reachable.");
            }
        }
        Commands::Ingest { file, append } => {
            run_ingest(&cli.config_root, &config, file, append).await?;
        }
        Commands::Search { query, k } => {
            run_search(&cli.config_root, &config, &query, k).await?;
        }
        Commands::Chat { json } => {
            run_repl(&cli.config_root, &config, json).await?;
        }
    }

    Ok(())
}

fn open_store(root: &Path, config: &HippocratesConfig) -> Result<SqliteKnowledgeStore> {
    let embedder = create_embedding_provider(&config.main.embedding)?;
    let db_path = root.join(&config.main.knowledge.db_path);
    SqliteKnowledgeStore::open(&db_path, embedder)
        .with_context(|| format!("failed to open knowledge store: {}", db_path.display()))
}

async fn check_generation_health(config: &HippocratesConfig) -> Result<()> {
    let (provider_id, _) = parse_provider_model(&config.main.generation.model)?;
    let provider_config = config
        .providers
        .iter()
        .find(|p| p.id == provider_id)
        .with_context(|| format!("provider not configured: {provider_id}"))?;
    create_provider(provider_config)?
        .health()
        .await
        .with_context(|| format!("provider {provider_id} is not reachable"))
}

async fn run_ingest(root: &Path, config: &HippocratesConfig, file: Option<PathBuf>, append: bool) -> Result<()> {
    let path = file.unwrap_or_else(|| root.join(&config.main.knowledge.knowledge_base));
    let store = open_store(root, config)?;
    let report = ingest_knowledge_base(&path, &store, !append).await?;
    tracing::info!(
        path = %path.display(),
        inserted = report.inserted,
        rejected = report.rejected.len(),
        "knowledge base ingested"
    );
    println!(
        "Ingested {} of {} entries from {}.",
        report.inserted,
        report.loaded,
        path.display()
    );
    if !report.rejected.is_empty() {
        println!("Rejected (no source): {}", report.rejected.join(", "));
    }
    println!("Knowledge store now holds {} chunks.", store.count().await?);
    Ok(())
}

async fn run_search(root: &Path, config: &HippocratesConfig, query: &str, k: Option<usize>) -> Result<()> {
    let store: Arc<dyn KnowledgeStore> = Arc::new(open_store(root, config)?);
    let mut retrieval_config = config.main.retrieval;
    if let Some(k) = k {
        retrieval_config.top_k = k.max(1);
    }
    let retrieval = Retriever::new(store, retrieval_config).search(query).await;
    if retrieval.unavailable {
        anyhow::bail!("knowledge store search failed; see the log for details");
    }
    print!("{}", render_hits(&retrieval.hits));
    Ok(())
}

async fn run_repl(root: &Path, config: &HippocratesConfig, json: bool) -> Result<()> {
    let runtime = Arc::new(ConsultationRuntime::open(config, root).await?);
    let hub = ConsultationHub::new(runtime, config.main.runtime.max_concurrent);
    let mut consultation = hub.start().await;

    println!("Hippocrates consultation. Describe your symptoms. Type 'new' to start over, 'quit' to exit.");
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input == "new" {
            hub.end(consultation).await;
            consultation = hub.start().await;
            println!("Started a new consultation.");
            continue;
        }
        if input.is_empty() {
            continue;
        }

        match hub.handle_turn(consultation, input).await {
            Ok(output) if json => println!("{}", serde_json::to_string_pretty(&output)?),
            Ok(output) => print!("{}", render_turn(&output)),
            Err(err) => eprint!("{}", render_error(&err)),
        }
    }

    hub.end(consultation).await;
    Ok(())
}
