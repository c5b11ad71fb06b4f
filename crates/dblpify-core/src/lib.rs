use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod bibtex;
pub mod cache;
pub mod candidate;
pub mod config_file;
pub mod entry;
pub mod matching;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;
pub mod report;
pub mod requester;
pub mod transport;

// Re-export for convenience
pub use bibtex::{BibError, BibRecord};
pub use cache::{CacheError, ResponseCache, default_cache_path};
pub use candidate::{Candidate, PublicationType};
pub use entry::{Entry, EntryCollection, EntryError, EntryStatus};
pub use matching::{DEFAULT_TITLE_THRESHOLD, select_best_match};
pub use normalize::normalize;
pub use pipeline::{Enricher, OutputPaths, RunSummary};
pub use rate_limit::DEFAULT_MIN_INTERVAL;
pub use requester::{DEFAULT_NUM_HITS, DblpRequester, RequestError, RequestStats};
pub use transport::{HttpResponse, HttpTransport, Transport, TransportError};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("bibliography error: {0}")]
    Bib(#[from] BibError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("report error: {0}")]
    Report(#[from] csv::Error),
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Starting work on the entry at `index` (0-based).
    Processing {
        index: usize,
        total: usize,
        key: String,
    },
    Finished {
        index: usize,
        total: usize,
        key: String,
        status: EntryStatus,
    },
    /// Honoring a 429; emitted once per second of the wait.
    RateLimitWait { remaining: Duration, total: Duration },
    /// An output file or the response cache was written.
    Persisted { what: &'static str, path: PathBuf },
}

/// Settings for an enrichment run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hits requested per search query.
    pub num_hits: usize,
    pub title_threshold: f64,
    /// Minimum spacing between network calls; zero disables throttling.
    pub min_interval: Duration,
    pub timeout: Duration,
    pub user_agent: String,
    pub output_dir: PathBuf,
    /// Persistent response cache; `None` keeps responses in memory only.
    pub cache_path: Option<PathBuf>,
    /// Delete the cache file before the run.
    pub clear_cache: bool,
    /// Write report and cache after every entry instead of only at the end.
    pub incremental: bool,
    /// Also write the input re-serialized through the BibTeX writer.
    pub save_formatted: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_hits: DEFAULT_NUM_HITS,
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            min_interval: DEFAULT_MIN_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("dblpify/{}", env!("CARGO_PKG_VERSION")),
            output_dir: PathBuf::from("output"),
            cache_path: None,
            clear_cache: false,
            incremental: false,
            save_formatted: false,
        }
    }
}
