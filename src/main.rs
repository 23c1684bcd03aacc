use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use askmd::answer::{AnswerEngine, Generator, LlamaCliGenerator, Verbosity};
use askmd::chunker::ChunkParams;
use askmd::config::{Backend, Config};
use askmd::embedder::{Embedder, download, onnx::OnnxEmbedder};
use askmd::index::{VectorIndex, qdrant::QdrantIndex, sqlite::SqliteIndex};
use askmd::ingest::Ingestor;

#[derive(Parser)]
#[command(
    name = "askmd",
    version,
    about = "Ask questions against your local Markdown notes"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-scan the corpus and update the vector index
    Ingest {
        /// Corpus directory (defaults to the configured note_dirs)
        path: Option<PathBuf>,

        /// Recreate an empty index before ingesting
        #[arg(long)]
        reset: bool,
    },
    /// Ask a question, get a short answer
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Ask a question, get a comprehensive answer
    Explain {
        #[arg(required = true)]
        question: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Some(Commands::Ingest { path, reset }) => cmd_ingest(&config, path, reset),
        Some(Commands::Ask { question }) => {
            cmd_query(&config, &question.join(" "), Verbosity::Short)
        }
        Some(Commands::Explain { question }) => {
            cmd_query(&config, &question.join(" "), Verbosity::Long)
        }
        None => interactive(&config),
    }
}

/// Open the configured vector index backend.
fn open_index(config: &Config) -> Result<Box<dyn VectorIndex>> {
    match config.index.backend {
        Backend::Sqlite => {
            let index = SqliteIndex::open(&config.index.db_path, config.model.dimensions)
                .with_context(|| format!("failed to open database {}", config.index.db_path))?;
            Ok(Box::new(index))
        }
        Backend::Qdrant => {
            let index = QdrantIndex::connect(
                &config.index.qdrant_url,
                &config.index.collection,
                config.model.dimensions,
            )
            .with_context(|| format!("failed to reach qdrant at {}", config.index.qdrant_url))?;
            Ok(Box::new(index))
        }
    }
}

/// Load the embedding model, downloading its files on first use.
fn load_embedder(config: &Config) -> Result<OnnxEmbedder> {
    let model_dir = download::model_dir_for(&config.model.name);
    download::download_model_files(&model_dir)?;
    let embedder = OnnxEmbedder::new(&model_dir, config.model.dimensions)
        .context("failed to load embedding model")?;
    Ok(embedder)
}

fn cmd_ingest(config: &Config, path: Option<PathBuf>, reset: bool) -> Result<()> {
    let roots = match path {
        Some(p) => {
            vec![std::path::absolute(&p)
                .with_context(|| format!("invalid corpus path {}", p.display()))?]
        }
        None => config.corpus_dirs(),
    };

    let embedder = load_embedder(config)?;
    let mut index = open_index(config)?;

    if reset {
        index.reset().context("failed to reset index")?;
        println!("Index reset.");
    }

    let start = Instant::now();
    let chunk_params = ChunkParams {
        size: config.chunk_size,
        overlap: config.chunk_overlap,
    };
    let mut ingestor = Ingestor::new(
        index.as_mut(),
        &embedder,
        chunk_params,
        config.embed_batch_size,
    );
    let summary = ingestor.ingest(&roots)?;

    println!("Ingestion complete ({:.1}s)", start.elapsed().as_secs_f64());
    println!(
        "  {} scanned, {} skipped, {} updated, {} removed, {} failed, {} chunks inserted",
        summary.scanned,
        summary.skipped,
        summary.updated,
        summary.removed,
        summary.failed,
        summary.chunks_inserted
    );

    if summary.failed > 0 {
        anyhow::bail!("{} file(s) failed to ingest", summary.failed);
    }
    Ok(())
}

fn cmd_query(config: &Config, question: &str, verbosity: Verbosity) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        println!("Empty question.");
        return Ok(());
    }

    let embedder = load_embedder(config)?;
    let index = open_index(config)?;
    let generator = LlamaCliGenerator::new(config.llama.clone());

    run_question(
        config,
        index.as_ref(),
        &embedder,
        &generator,
        question,
        verbosity,
    )
}

fn run_question(
    config: &Config,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    question: &str,
    verbosity: Verbosity,
) -> Result<()> {
    let engine = AnswerEngine {
        index,
        embedder,
        generator,
        top_k: config.top_k,
        max_context: config.max_context,
    };

    match engine.ask(question, verbosity)? {
        Some(answer) => println!("{}", answer.render()),
        None => println!("No results."),
    }
    Ok(())
}

/// Prompt-loop mode: read questions from stdin until EOF or `exit`.
fn interactive(config: &Config) -> Result<()> {
    let embedder = load_embedder(config)?;
    let index = open_index(config)?;
    let generator = LlamaCliGenerator::new(config.llama.clone());

    let stdin = io::stdin();
    loop {
        print!("Ask your question: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let question = line.trim();
        if question.is_empty() {
            println!("Empty question.");
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        if let Err(e) = run_question(
            config,
            index.as_ref(),
            &embedder,
            &generator,
            question,
            Verbosity::Long,
        ) {
            eprintln!("Error: {e:#}");
        }
    }

    Ok(())
}
