//! # Colloquy CLI
//!
//! The `colloquy` binary drives the service: database initialization,
//! knowledge-base loading, retrieval inspection, one-off chat turns, and
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! colloquy --config ./config/colloquy.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `colloquy init` | Create the SQLite database and run schema migrations |
//! | `colloquy load <dir>` | Ingest every supported file under a directory |
//! | `colloquy search "<query>"` | Show the chunks retrieval would return |
//! | `colloquy chat "<message>"` | Run one conversation turn |
//! | `colloquy stats` | Print knowledge-base and conversation statistics |
//! | `colloquy clear` | Wipe the index and/or a user's conversations |
//! | `colloquy serve` | Start the HTTP JSON server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use colloquy::chat::{ChatEngine, ChatRequest};
use colloquy::config::{self, Config};
use colloquy::index::VectorIndex;
use colloquy::ingest::Ingestor;
use colloquy::retriever::Retriever;
use colloquy::server::{self, AppState};
use colloquy::{db, embedding, generation, migrate, store};

/// Colloquy — a retrieval-augmented conversational service for CRM
/// workloads.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/colloquy.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "colloquy",
    about = "Colloquy — retrieval-augmented conversations over a CRM knowledge base",
    version,
    long_about = "Colloquy ingests listing CSVs, JSON records, and plain text into a \
    SQLite-backed vector index, and runs multi-turn conversations over it: retrieval, \
    persona routing, profile extraction, and durable conversation history."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/colloquy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent;
    /// running it multiple times is safe.
    Init,

    /// Ingest every supported file under a directory.
    ///
    /// Recognizes `.csv`, `.json`, `.txt`, and `.md` files. Skips the load
    /// when the index is already populated unless `--force` is given.
    /// Per-file failures are reported and do not abort the batch.
    Load {
        /// Directory to scan recursively.
        dir: PathBuf,

        /// Reload even when the index already holds chunks.
        #[arg(long)]
        force: bool,
    },

    /// Show the chunks retrieval would return for a query.
    Search {
        /// The query string.
        query: String,

        /// Number of chunks to return.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Run one conversation turn and print the reply.
    Chat {
        /// The user message.
        message: String,

        /// Stable user id; omitted means an anonymous per-session identity.
        #[arg(long)]
        user: Option<String>,

        /// Session id; reuse one to continue a conversation.
        #[arg(long)]
        session: Option<String>,
    },

    /// Print knowledge-base and conversation statistics.
    Stats,

    /// Wipe parts of the stored state.
    Clear {
        /// Delete every chunk from the vector index.
        #[arg(long)]
        index: bool,

        /// Delete this user's conversations and messages.
        #[arg(long)]
        conversations: Option<String>,
    },

    /// Start the HTTP JSON server.
    ///
    /// Binds to `[server].bind` and serves `/health`, `/chat`, `/documents`,
    /// and `/stats`.
    Serve,
}

/// Wire up the full component graph from config.
async fn build_state(cfg: &Config) -> Result<Arc<AppState>> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let embeddings: Arc<dyn embedding::EmbeddingProvider> =
        embedding::create_provider(&cfg.embedding)?.into();
    let completions: Arc<dyn generation::CompletionProvider> =
        generation::create_provider(&cfg.generation)?.into();

    let index = VectorIndex::new(pool.clone());
    let retriever = Retriever::new(index.clone(), embeddings.clone(), &cfg.retrieval);
    let ingestor = Ingestor::new(
        pool.clone(),
        index.clone(),
        embeddings.clone(),
        cfg.chunking.clone(),
    );
    let engine = ChatEngine::new(
        pool.clone(),
        retriever,
        completions,
        cfg.chat.clone(),
        &cfg.generation,
    );

    Ok(Arc::new(AppState {
        pool,
        engine,
        ingestor,
        index,
        embedding_model: embeddings.model_name().to_string(),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colloquy=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { dir, force } => {
            let state = build_state(&cfg).await?;
            let report = state.ingestor.load_dir(&dir, force).await?;
            println!(
                "Loaded {}/{} files ({} skipped).",
                report.loaded, report.total, report.skipped
            );
            for error in &report.errors {
                eprintln!("  error: {}", error);
            }
        }
        Commands::Search { query, k } => {
            let state = build_state(&cfg).await?;
            let retriever = Retriever::new(
                state.index.clone(),
                embedding::create_provider(&cfg.embedding)?.into(),
                &cfg.retrieval,
            );
            let hits = retriever.retrieve(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {}: {}",
                    i + 1,
                    hit.similarity_score,
                    hit.filename(),
                    snippet(&hit.content, 120)
                );
            }
        }
        Commands::Chat {
            message,
            user,
            session,
        } => {
            let state = build_state(&cfg).await?;
            let outcome = state
                .engine
                .process_message(&ChatRequest {
                    message,
                    user_id: user,
                    session_id: session,
                })
                .await?;
            println!("[{}] {}", outcome.agent, outcome.response);
            if !outcome.sources.is_empty() {
                println!("sources: {}", outcome.sources.join(", "));
            }
            println!(
                "user: {}  session: {}",
                outcome.user_id, outcome.session_id
            );
        }
        Commands::Stats => {
            let state = build_state(&cfg).await?;
            let store_stats = store::stats(&state.pool).await?;
            let chunks = state.index.count().await?;
            let files: Vec<String> = store::active_documents(&state.pool)
                .await?
                .into_iter()
                .map(|d| d.filename)
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "documents": store_stats.active_documents,
                    "files": files,
                    "chunks": chunks,
                    "embedding_model": state.embedding_model,
                    "users": store_stats.users,
                    "conversations": store_stats.conversations,
                    "messages": store_stats.messages,
                    "categories": store_stats.categories,
                }))?
            );
        }
        Commands::Clear {
            index,
            conversations,
        } => {
            if !index && conversations.is_none() {
                anyhow::bail!("Nothing to clear: pass --index and/or --conversations <user>");
            }
            let state = build_state(&cfg).await?;
            if index {
                let removed = state.index.delete_all().await?;
                println!("Removed {} chunks from the index.", removed);
            }
            if let Some(user_id) = conversations {
                let removed = store::clear_user_conversations(&state.pool, &user_id).await?;
                println!("Removed {} conversations for {}.", removed, user_id);
            }
        }
        Commands::Serve => {
            let state = build_state(&cfg).await?;
            server::run_server(state, &cfg.server.bind).await?;
        }
    }

    Ok(())
}

fn snippet(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.len() <= max {
        return flat;
    }
    let mut end = max;
    while !flat.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &flat[..end])
}
