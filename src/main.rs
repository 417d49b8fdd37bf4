use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codequarry::config::load_config;
use codequarry::types::ChunkKind;
use codequarry::Engine;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "codequarry")]
#[command(version)]
#[command(about = "Local code-intelligence engine: hybrid BM25 + vector retrieval over source trees")]
struct Cli {
    /// Repository root (defaults to the current directory).
    #[arg(long, short = 'C', value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build or refresh the index for the repository.
    Index {
        /// Rebuild from nothing, discarding the existing index
        /// (required after changing the embedding dimension).
        #[arg(long)]
        force: bool,
    },

    /// Hybrid search over indexed code chunks.
    Search {
        query: String,

        /// Max results.
        #[arg(long, short = 'n')]
        limit: Option<usize>,

        /// Fusion weight of the semantic list, 0.0 (pure keyword) to 1.0
        /// (pure vector).
        #[arg(long)]
        semantic_weight: Option<f64>,

        /// Reciprocal-rank-fusion constant.
        #[arg(long)]
        rrf_k: Option<u32>,

        /// Glob over repo-relative paths (e.g. "src/*").
        #[arg(long, value_name = "GLOB")]
        path: Option<String>,

        /// Restrict to extensions (repeatable), e.g. --ext rs --ext py.
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Restrict to chunk kinds (repeatable), e.g. --kind function.
        #[arg(long = "kind", value_name = "KIND")]
        kinds: Vec<String>,

        /// Follow symbolic references from the direct matches.
        #[arg(long)]
        multi_hop: bool,

        /// Hop depth (0..=5) when --multi-hop is set.
        #[arg(long, value_name = "N")]
        hop_depth: Option<u32>,

        /// Emit results as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Full-text search over documentation snippets.
    Snippets {
        query: String,

        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,

        /// Glob over repo-relative paths.
        #[arg(long, value_name = "GLOB")]
        path: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Watch the repository and keep the index current until Ctrl-C.
    Watch,

    /// Print index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repo_root = match cli.root {
        Some(r) => r,
        None => std::env::current_dir().context("Failed to get current dir")?,
    };
    let cfg = load_config(&repo_root);

    match cli.cmd {
        Command::Index { force } => {
            let engine = Engine::open(&repo_root, cfg, force)?;

            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap()
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(80));
            bar.set_message("indexing...");

            let progress_bar = bar.clone();
            let report = engine
                .index(
                    force,
                    CancellationToken::new(),
                    Some(Arc::new(move |p| {
                        progress_bar.set_message(format!(
                            "indexing {}/{} files ({} chunks, {} errors)",
                            p.files_processed, p.total_files, p.chunks_indexed, p.errors
                        ));
                    })),
                )
                .await?;

            bar.finish_with_message(format!(
                "indexed {} files (+{} skipped): {} chunks, {} snippets, {} embedded, {} reused, {} errors",
                report.files_processed,
                report.files_skipped,
                report.chunks_indexed,
                report.snippets_indexed,
                report.chunks_embedded,
                report.chunks_reused,
                report.errors
            ));
        }

        Command::Search {
            query,
            limit,
            semantic_weight,
            rrf_k,
            path,
            extensions,
            kinds,
            multi_hop,
            hop_depth,
            json,
        } => {
            let engine = Engine::open(&repo_root, cfg, false)?;
            let mut opts = engine.default_search_options();
            if let Some(n) = limit {
                opts.limit = n;
            }
            if semantic_weight.is_some() {
                opts.semantic_weight = semantic_weight;
            }
            if let Some(k) = rrf_k {
                opts.rrf_k = k;
            }
            opts.path_filter = path;
            if !extensions.is_empty() {
                opts.extension_filter = Some(extensions);
            }
            if !kinds.is_empty() {
                opts.kind_filter = Some(kinds.iter().map(|k| ChunkKind::from_str_tag(k)).collect());
            }
            if multi_hop {
                opts.multi_hop = true;
            }
            if let Some(d) = hop_depth {
                opts.multi_hop_depth = d;
            }

            let results = engine.search(&query, &opts).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("no results");
            } else {
                for r in &results {
                    let hop = if r.is_multi_hop {
                        format!(" [hop {}]", r.hop_depth)
                    } else {
                        String::new()
                    };
                    println!(
                        "{:6.2}%  {}:{}-{}  {}{}",
                        r.relevance_percent,
                        r.chunk.path,
                        r.chunk.start_line,
                        r.chunk.end_line,
                        r.chunk.signature.as_deref().unwrap_or_else(|| {
                            r.chunk.symbols.first().map(String::as_str).unwrap_or("-")
                        }),
                        hop
                    );
                }
            }
        }

        Command::Snippets { query, limit, path, json } => {
            let engine = Engine::open(&repo_root, cfg, false)?;
            let results = engine
                .search_info_snippets(&query, limit, path.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("no results");
            } else {
                for r in &results {
                    println!(
                        "{:6.2}%  {}:{}-{}  {}",
                        r.relevance_percent,
                        r.snippet.path,
                        r.snippet.start_line,
                        r.snippet.end_line,
                        r.snippet.breadcrumb.as_deref().unwrap_or(&r.snippet.title)
                    );
                }
            }
        }

        Command::Watch => {
            let engine = Engine::open(&repo_root, cfg, false)?;

            // Bring the index current before reacting to deltas.
            let report = engine.index(false, CancellationToken::new(), None).await?;
            eprintln!(
                "initial index: {} files processed, {} skipped",
                report.files_processed, report.files_skipped
            );

            let mut watcher = engine.watcher();
            watcher.start()?;
            eprintln!("watching {} (Ctrl-C to stop)", repo_root.display());

            tokio::signal::ctrl_c().await?;
            watcher.stop().await?;

            let stats = watcher.stats();
            eprintln!(
                "watch session: +{} ~{} -{} files, +{} -{} chunks, {} errors",
                stats.files_created,
                stats.files_modified,
                stats.files_deleted,
                stats.chunks_added,
                stats.chunks_removed,
                stats.errors
            );
        }

        Command::Stats { json } => {
            let engine = Engine::open(&repo_root, cfg, false)?;
            let stats = engine.statistics().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "{} chunks, {} snippets, {} files (dimension {})",
                    stats.chunk_count,
                    stats.snippet_count,
                    stats.file_count,
                    engine.dimension()
                );
            }
        }
    }

    Ok(())
}
