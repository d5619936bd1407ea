//! # Docent CLI (`docent`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent build` | Build the passage store from the docs directory |
//! | `docent search "<query>"` | Show the passages retrieval would use |
//! | `docent ask "<question>"` | Stream a grounded answer with its sources |
//! | `docent chat` | Interactive multi-turn session |
//! | `docent provider` | Show the configured completion provider |
//!
//! Logs go to stderr (filter with `RUST_LOG`); answers go to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use docent::config::load_config;
use docent::ingest::build_store;
use docent::{ConversationTurn, Pipeline, RagError, RagResponse, RetrievedPassage};

/// Docent: ask questions of your documentation.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Grounded question answering over a documentation corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Optional: built-in defaults and environment overrides apply when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or rebuild) the passage store from the docs directory.
    Build,

    /// Retrieve passages for a query without calling a language model.
    Search {
        query: String,

        /// Number of passages to return (defaults to `retrieval.k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer one question and exit.
    Ask { question: String },

    /// Start an interactive session. An empty line or `exit` quits.
    Chat,

    /// Print the configured completion provider and model.
    Provider,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docent=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        report(&err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let pipeline = Pipeline::new(config);

    match cli.command {
        Commands::Build => {
            let embedder = pipeline.embedder().await?;
            let report = build_store(pipeline.config(), embedder.as_ref()).await?;
            println!(
                "Built collection '{}' with {} passages from {} documents ({} batches, model {}).",
                report.collection, report.passages, report.documents, report.batches, report.model
            );
        }
        Commands::Search { query, k } => {
            let k = k.unwrap_or(pipeline.config().retrieval.k);
            let passages = pipeline.retrieve(&query, k).await?;
            if passages.is_empty() {
                println!("No passages found.");
            }
            for (i, p) in passages.iter().enumerate() {
                print_passage(i + 1, p);
            }
        }
        Commands::Ask { question } => {
            let response = pipeline.ask(&question, &[]).await?;
            stream_answer(&pipeline, response).await?;
        }
        Commands::Chat => chat(&pipeline).await?,
        Commands::Provider => {
            let info = pipeline.provider_info();
            println!("{} ({})", info.provider, info.model);
        }
    }

    Ok(())
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<RagError>() {
        Some(rag) => {
            eprintln!("{}", rag.category().user_message(&rag.to_string()));
            tracing::debug!(error = %rag, "request failed");
            if !matches!(rag.category(), docent::ErrorCategory::Unknown) {
                eprintln!("  cause: {}", rag);
            }
        }
        None => eprintln!("Error: {:#}", err),
    }
}

fn print_passage(rank: usize, p: &RetrievedPassage) {
    let location = match p.chunk_index {
        Some(idx) => format!("{}#{}", p.source, idx),
        None => p.source.clone(),
    };
    println!("{}. [{:.3}] {} ({})", rank, p.score, p.title, location);
    let snippet: String = p.content.chars().take(200).collect();
    let snippet = snippet.replace('\n', " ");
    if p.content.chars().count() > 200 {
        println!("   {}…", snippet);
    } else {
        println!("   {}", snippet);
    }
}

/// Print the answer as it streams, then its sources. Returns the full text.
async fn stream_answer(pipeline: &Pipeline, response: RagResponse) -> Result<String> {
    let RagResponse {
        mut answer,
        sources,
        elapsed,
    } = response;

    let mut text = String::new();
    let mut stdout = std::io::stdout();
    while let Some(fragment) = answer.next().await {
        let fragment = fragment?;
        print!("{}", fragment);
        stdout.flush()?;
        text.push_str(&fragment);
    }
    println!();

    if !sources.is_empty() {
        println!("\nSources:");
        for (i, p) in sources.iter().enumerate() {
            println!("  [{}] {} ({}) score {:.3}", i + 1, p.title, p.source, p.score);
        }
    }

    let info = pipeline.provider_info();
    println!(
        "\n{:.2}s to first response · {} / {}",
        elapsed.as_secs_f64(),
        info.provider,
        info.model
    );

    Ok(text)
}

async fn chat(pipeline: &Pipeline) -> Result<()> {
    let info = pipeline.provider_info();
    println!(
        "Docent chat using {} ({}). Empty line or 'exit' to quit.",
        info.provider, info.model
    );

    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() || question == "exit" || question == "quit" {
            break;
        }

        let answer = match pipeline.ask(question, &history).await {
            Ok(response) => stream_answer(pipeline, response).await,
            Err(err) => Err(err.into()),
        };

        match answer {
            Ok(text) => {
                history.push(ConversationTurn::user(question));
                history.push(ConversationTurn::assistant(text));
            }
            Err(err) => report(&err),
        }
    }

    Ok(())
}
