use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use dblpify_core::{Config, Enricher, config_file, default_cache_path};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod output;

use output::{ColorMode, ProgressView};

/// Update BibTeX entries with their canonical dblp records
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the .bib file to enrich
    #[arg(default_value = "references.bib")]
    bib_path: PathBuf,

    /// Directory for the enriched .bib and the report (default: ./output)
    #[arg(short, long)]
    out_path: Option<PathBuf>,

    /// Also write the input re-serialized without changes, for diffing
    #[arg(long)]
    save_formatted: bool,

    /// Delete cached dblp responses for this file before running
    #[arg(long)]
    clear_cache: bool,

    /// Number of dblp search hits to consider per entry
    #[arg(long)]
    num_hits: Option<usize>,

    /// Path to log file (default: log to stderr)
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Write the report and response cache after every entry
    #[arg(long)]
    incremental: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_path.as_deref())?;
    run(cli).await
}

/// Install the tracing subscriber. `RUST_LOG` overrides the `info` default.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_logging(log_path: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = log_path else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid log path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Resolve configuration: CLI flags > env vars > config file > defaults
    let file_config = config_file::load_config();
    let mut config = Config::default();
    file_config.apply_to(&mut config);

    if let Some(n) = std::env::var("DBLPIFY_NUM_HITS")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.num_hits = n;
    }
    let cache_dir = std::env::var("DBLPIFY_CACHE_DIR")
        .ok()
        .map(PathBuf::from)
        .or_else(|| file_config.cache_dir());

    if let Some(n) = cli.num_hits {
        config.num_hits = n;
    }
    if let Some(out) = cli.out_path {
        config.output_dir = out;
    }
    config.save_formatted = cli.save_formatted;
    config.clear_cache = cli.clear_cache;
    config.incremental = cli.incremental;

    if config.num_hits == 0 {
        anyhow::bail!("Number of hits must be at least 1");
    }
    if !cli.bib_path.exists() {
        anyhow::bail!("File not found: {}", cli.bib_path.display());
    }
    config.cache_path = default_cache_path(cache_dir.as_deref(), &cli.bib_path);
    if config.cache_path.is_none() {
        tracing::warn!("no cache directory available, responses will not be persisted");
    }
    tracing::debug!(?config, "resolved configuration");

    let color = ColorMode(!cli.no_color && std::io::stdout().is_terminal());

    let mut enricher = Enricher::new(config)?;
    let view = Arc::new(ProgressView::new());
    let progress_view = Arc::clone(&view);
    let result = enricher
        .run(&cli.bib_path, move |event| progress_view.handle(event))
        .await;
    view.finish();
    let summary = result?;

    let mut stdout = std::io::stdout();
    output::print_summary(&mut stdout, &summary, color)?;
    stdout.flush()?;
    Ok(())
}
