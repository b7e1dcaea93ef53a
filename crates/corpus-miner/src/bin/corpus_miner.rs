//! corpus-miner binary
//!
//! Run with: cargo run -p corpus-miner -- run --input-dir ./docs

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use corpus_miner::{
    config::ReaderConfig, ingestion::FormatReader, processing, DocumentInput, FileType,
    IncrementalCache, MinerConfig, Orchestrator, RunReport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "corpus-miner",
    version,
    about = "Extract, mine and topic-model a document corpus"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every supported file under a directory
    Run {
        /// Directory to scan recursively
        #[arg(short, long)]
        input_dir: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the worker pool size
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the cache database path
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove documents from the cache so the next run extracts them again
    Evict {
        /// Files to evict
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the cache database path
        #[arg(long)]
        cache: Option<PathBuf>,
    },

    /// Extraction worker process (started by the supervisor)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        worker_id: usize,

        /// Reader configuration as JSON
        #[arg(long)]
        reader_config: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout belongs to the worker protocol, so every process logs to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corpus_miner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Commands::Worker {
            worker_id,
            reader_config,
        } => run_worker(worker_id, &reader_config),
        Commands::Run {
            input_dir,
            config,
            workers,
            cache,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if workers.is_some() {
                config.extraction.workers = workers;
            }
            if let Some(cache) = cache {
                config.cache.path = cache;
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(run(config, &input_dir))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Commands::Evict {
            paths,
            config,
            cache,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(cache) = cache {
                config.cache.path = cache;
            }
            let cache = IncrementalCache::open(&config.cache.path)?;
            let removed = processing::evict_documents(&cache, &paths)?;
            println!("Evicted {} of {} documents", removed, paths.len());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MinerConfig> {
    match path {
        Some(path) => MinerConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(MinerConfig::default()),
    }
}

fn run_worker(worker_id: usize, reader_config: &str) -> anyhow::Result<()> {
    let config: ReaderConfig =
        serde_json::from_str(reader_config).context("parsing worker reader configuration")?;
    let reader = FormatReader::new(config);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let handled = processing::worker::serve(
        worker_id,
        &reader,
        BufReader::new(stdin.lock()),
        stdout.lock(),
    )?;
    tracing::debug!("Worker {} exiting after {} tasks", worker_id, handled);
    Ok(())
}

async fn run(config: MinerConfig, input_dir: &Path) -> anyhow::Result<RunReport> {
    let inputs = collect_inputs(input_dir)?;
    tracing::info!("Found {} supported files under {:?}", inputs.len(), input_dir);

    let orchestrator = Orchestrator::from_config(config)?;
    Ok(orchestrator.run(&inputs).await?)
}

fn collect_inputs(dir: &Path) -> anyhow::Result<Vec<DocumentInput>> {
    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scanning {}", dir.display()))?;
        if !entry.file_type().is_file() || !FileType::from_path(entry.path()).is_supported() {
            continue;
        }
        match DocumentInput::from_file(entry.path()) {
            Ok(input) => inputs.push(input),
            Err(e) => tracing::warn!("Skipping {:?}: {}", entry.path(), e),
        }
    }
    Ok(inputs)
}

fn print_report(report: &RunReport) {
    println!(
        "Run {}: {} documents ({} extracted, {} from cache)",
        report.run_id, report.submitted, report.extracted, report.reused
    );

    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        println!("\nFailed documents:");
        for record in failed {
            println!("  {} - {}", record.file_path.display(), record.error.as_deref().unwrap_or_default());
        }
    }

    println!(
        "\nTopics ({} terms, {} iterations, perplexity {:.2}):",
        report.topics.vocabulary_size, report.topics.iterations, report.topics.perplexity
    );
    for topic in &report.topics.topics {
        let terms: Vec<String> = topic
            .terms
            .iter()
            .map(|(term, weight)| format!("{} ({:.3})", term, weight))
            .collect();
        println!("  #{}: {}", topic.index, terms.join(", "));
    }

    println!("\nDocuments:");
    for doc in &report.topics.documents {
        let weights: Vec<String> = doc
            .weight_rows()
            .map(|row| format!("#{} {:.3}", row.topic_index, row.weight))
            .collect();
        let dominant = doc
            .dominant_topic()
            .map_or_else(|| "-".to_string(), |index| format!("#{}", index));
        println!("  {} -> {} [{}]", doc.identity, dominant, weights.join(", "));
    }
}
