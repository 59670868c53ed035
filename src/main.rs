mod config;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use coderag_index::{
    Answer, CodeAssistant, CodeIndexer, CodeRetriever, CodeStore, Dependency, IndexError, Query,
    Reranker, indexer::default_repo_name,
};
use coderag_llm::claude::ClaudeProvider;
use coderag_llm::ollama::OllamaProvider;
use coderag_llm::{AnyProvider, Message};
use coderag_store::QdrantOps;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{Config, ProviderKind};

/// Prior messages kept for follow-up questions in interactive mode.
const MAX_HISTORY_MESSAGES: usize = 20;

/// Index Elixir repositories and ask questions grounded in their code.
#[derive(Parser)]
#[command(name = "coderag", version)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Falls back to `CODERAG_CONFIG`, then `config/coderag.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store one or more repositories.
    Index {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Repository name stored with every chunk. Only valid with a single path;
        /// defaults to the directory name.
        #[arg(long)]
        repo: Option<String>,

        /// Drop the whole collection, every repository included, before indexing.
        #[arg(long)]
        reset: bool,
    },
    /// Answer a question, or start an interactive session when none is given.
    Ask {
        question: Option<String>,

        /// Restrict retrieval to one indexed repository.
        #[arg(long)]
        repo: Option<String>,

        /// Number of chunks to include in the context.
        #[arg(short, long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate()?;

    let store = create_store(&config)?;
    let embedder = Arc::new(create_embedder(&config));
    health_check(&embedder).await?;

    match cli.command {
        Command::Index { paths, repo, reset } => {
            let targets = index_targets(&paths, repo.as_deref())?;
            if reset && store.reset().await.context("resetting the collection")? {
                println!("collection {} dropped", config.store.collection);
            }
            let indexer = CodeIndexer::new(store, embedder, config.indexer_config());
            for (root, repo) in targets {
                let report = indexer
                    .index_repo(&root, &repo)
                    .await
                    .with_context(|| format!("indexing {}", root.display()))?;
                println!(
                    "{}: {} files, {} chunks created, {} unchanged, {} removed ({} ms)",
                    report.repo,
                    report.files_indexed,
                    report.chunks_created,
                    report.chunks_skipped,
                    report.chunks_removed,
                    report.duration_ms
                );
                for error in &report.errors {
                    eprintln!("  skipped {error}");
                }
            }
        }
        Command::Ask { question, repo, k } => {
            let generator = Arc::new(create_generator(&config)?);
            let retriever = CodeRetriever::new(store, embedder, config.retrieval_config());
            let assistant = CodeAssistant::new(
                retriever,
                Reranker::new(config.rerank_config()),
                config.context_config(),
                generator,
                config.generation_timeout(),
            );
            let k = k.unwrap_or(config.retrieval.default_k);
            match question {
                Some(question) => {
                    let answer = assistant.ask(&build_query(question, repo, k), &[]).await?;
                    print_answer(&answer);
                }
                None => interactive(&assistant, repo.as_deref(), k).await?,
            }
        }
    }
    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("CODERAG_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/coderag.toml")
}

fn create_store(config: &Config) -> anyhow::Result<CodeStore> {
    let qdrant = QdrantOps::new(&config.store.qdrant_url)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("connecting to qdrant at {}", config.store.qdrant_url))?;
    Ok(CodeStore::new(Arc::new(qdrant), &config.store.collection))
}

fn create_embedder(config: &Config) -> AnyProvider {
    AnyProvider::Ollama(OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    ))
}

/// Fail fast when the embedding backend cannot be reached.
async fn health_check(provider: &AnyProvider) -> anyhow::Result<()> {
    if let AnyProvider::Ollama(ollama) = provider {
        ollama
            .health_check()
            .await
            .map_err(|e| IndexError::DependencyUnavailable {
                dependency: Dependency::Embedder,
                reason: e.to_string(),
            })?;
        tracing::debug!("ollama health check passed");
    }
    Ok(())
}

fn create_generator(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::Ollama => Ok(create_embedder(config)),
        ProviderKind::Claude => {
            let key = config
                .secrets
                .claude_api_key
                .as_ref()
                .context("CODERAG_CLAUDE_API_KEY or ANTHROPIC_API_KEY required for claude")?;
            Ok(AnyProvider::Claude(ClaudeProvider::new(
                key.expose().to_owned(),
                config.llm.claude_model.clone(),
                config.llm.claude_max_tokens,
            )))
        }
    }
}

/// Pair each root with the repo name its chunks are stored under.
fn index_targets(
    paths: &[PathBuf],
    repo: Option<&str>,
) -> anyhow::Result<Vec<(PathBuf, String)>> {
    if repo.is_some() && paths.len() > 1 {
        bail!("--repo can only be used when indexing a single path");
    }
    paths
        .iter()
        .map(|path| {
            if !path.is_dir() {
                bail!("{} is not a directory", path.display());
            }
            let name = match repo {
                Some(name) => name.to_owned(),
                None => default_repo_name(path),
            };
            Ok((path.clone(), name))
        })
        .collect()
}

fn build_query(text: String, repo: Option<String>, k: usize) -> Query {
    let query = Query::new(text).with_k(k);
    match repo {
        Some(repo) => query.with_repo(repo),
        None => query,
    }
}

fn is_exit_command(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "quit" | "exit")
}

/// Append a completed turn, dropping the oldest messages beyond the cap.
fn push_turn(history: &mut Vec<Message>, question: &str, answer: &str) {
    history.push(Message::user(question));
    history.push(Message::assistant(answer));
    if history.len() > MAX_HISTORY_MESSAGES {
        let excess = history.len() - MAX_HISTORY_MESSAGES;
        history.drain(..excess);
    }
}

async fn interactive(
    assistant: &CodeAssistant<AnyProvider>,
    repo: Option<&str>,
    k: usize,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<Message> = Vec::new();
    println!("Ask about the indexed code. Type 'quit' or 'exit' to leave.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_command(question) {
            break;
        }

        let query = build_query(question.to_owned(), repo.map(str::to_owned), k);
        match assistant.ask(&query, &history).await {
            Ok(answer) => {
                print_answer(&answer);
                push_turn(&mut history, question, &answer.text);
            }
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if !answer.grounded {
        println!("\n(no indexed code matched this question)");
        return;
    }
    println!("\nSources:");
    for ranked in &answer.context.chunks {
        let chunk = &ranked.chunk;
        println!(
            "  [{}] {}:{}-{} ({:.2})",
            chunk.repo, chunk.file_path, chunk.start_line, chunk.end_line, ranked.score
        );
    }
    if answer.context.truncated {
        println!("  (further matches omitted to fit the context budget)");
    }
}
