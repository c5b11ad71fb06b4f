//! Enrichment of a whole bibliography, entry by entry.
//!
//! Entries are processed strictly in file order on one task: every request
//! passes through the same throttle gate and cache, so there is nothing to
//! gain from running entries concurrently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bibtex::{parse_bib_file, parse_single_record, write_bib_file};
use crate::cache::ResponseCache;
use crate::entry::{Entry, EntryCollection, EntryStatus};
use crate::matching::select_best_match;
use crate::report::write_report;
use crate::requester::{DblpRequester, RequestStats};
use crate::transport::{HttpTransport, Transport};
use crate::{Config, CoreError, ProgressEvent};

/// Files written by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub enriched: PathBuf,
    pub report: PathBuf,
    pub formatted: PathBuf,
}

impl OutputPaths {
    /// `<dir>/<stem>_dblpified.bib`, `<dir>/<stem>_report.csv` and
    /// `<dir>/<stem>_formatted.bib`.
    pub fn new(output_dir: &Path, bib_path: &Path) -> Self {
        let stem = bib_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bibliography".to_string());
        Self {
            enriched: output_dir.join(format!("{stem}_dblpified.bib")),
            report: output_dir.join(format!("{stem}_report.csv")),
            formatted: output_dir.join(format!("{stem}_formatted.bib")),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub counts: BTreeMap<EntryStatus, usize>,
    pub requests: RequestStats,
    pub outputs: OutputPaths,
    /// Whether `outputs.formatted` was written by this run.
    pub saved_formatted: bool,
}

impl RunSummary {
    pub fn count(&self, status: EntryStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

pub struct Enricher {
    config: Config,
    requester: DblpRequester,
}

impl Enricher {
    /// Enricher talking to dblp over HTTP, with the response cache opened
    /// (or cleared first) per `config`.
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let transport = HttpTransport::new(config.timeout, &config.user_agent)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self, CoreError> {
        let cache = match &config.cache_path {
            Some(path) => {
                if config.clear_cache {
                    ResponseCache::clear_file(path)?;
                }
                ResponseCache::open(path)?
            }
            None => ResponseCache::in_memory(),
        };
        let requester = DblpRequester::new(transport, cache, config.min_interval);
        Ok(Self { config, requester })
    }

    /// Load `bib_path`, enrich every entry and write the outputs.
    pub async fn run(
        &mut self,
        bib_path: &Path,
        progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    ) -> Result<RunSummary, CoreError> {
        let progress = Arc::new(progress);
        self.requester.set_progress(progress.clone());

        let records = parse_bib_file(bib_path)?;
        let mut entries = EntryCollection::from_records(records)?;
        tracing::info!(path = %bib_path.display(), entries = entries.len(), "bibliography loaded");

        let outputs = OutputPaths::new(&self.config.output_dir, bib_path);
        if self.config.save_formatted {
            write_bib_file(&outputs.formatted, entries.records())?;
            progress(ProgressEvent::Persisted {
                what: "formatted bibliography",
                path: outputs.formatted.clone(),
            });
        }

        let keys: Vec<String> = entries.iter().map(|e| e.key().to_string()).collect();
        let total = keys.len();
        for (index, key) in keys.iter().enumerate() {
            progress(ProgressEvent::Processing {
                index,
                total,
                key: key.clone(),
            });
            let Some(entry) = entries.get_mut(key) else {
                continue;
            };
            self.enrich_entry(entry).await?;
            let status = entry.status();
            tracing::info!(key = %key, status = %status, "entry processed");
            progress(ProgressEvent::Finished {
                index,
                total,
                key: key.clone(),
                status,
            });

            if self.config.incremental {
                self.checkpoint(&entries, &outputs, &*progress)?;
            }
        }

        write_bib_file(&outputs.enriched, entries.records())?;
        progress(ProgressEvent::Persisted {
            what: "enriched bibliography",
            path: outputs.enriched.clone(),
        });
        self.checkpoint(&entries, &outputs, &*progress)?;

        let counts = EntryStatus::ALL
            .into_iter()
            .map(|s| (s, entries.count_by_status(s)))
            .filter(|(_, n)| *n > 0)
            .collect();
        Ok(RunSummary {
            counts,
            requests: self.requester.stats(),
            outputs,
            saved_formatted: self.config.save_formatted,
        })
    }

    /// Drive one entry through search, matching and canonical fetch.
    ///
    /// Entries not in `NotYetProcessed` are left alone. A failed canonical
    /// fetch or an unparseable record leaves the entry `Matched`.
    pub async fn enrich_entry(&mut self, entry: &mut Entry) -> Result<(), CoreError> {
        if entry.status() != EntryStatus::NotYetProcessed {
            tracing::debug!(key = entry.key(), status = %entry.status(), "skipping entry");
            return Ok(());
        }

        let Some(candidates) = self
            .requester
            .fetch_candidates(entry, self.config.num_hits)
            .await?
        else {
            entry.mark_no_hit()?;
            return Ok(());
        };

        let Some(best) = select_best_match(entry, &candidates, self.config.title_threshold)
        else {
            entry.mark_no_match()?;
            return Ok(());
        };
        let url = best.url.clone();
        entry.set_match(best.clone())?;

        let Some(body) = self.requester.fetch_canonical_record(&url).await? else {
            tracing::warn!(key = entry.key(), url = %url, "could not fetch dblp record");
            return Ok(());
        };
        match parse_single_record(&body) {
            Ok(record) => entry.set_entry_data(record)?,
            Err(e) => {
                tracing::warn!(key = entry.key(), url = %url, error = %e, "unusable dblp record");
            }
        }
        Ok(())
    }

    /// Write the report and flush the response cache.
    fn checkpoint(
        &mut self,
        entries: &EntryCollection,
        outputs: &OutputPaths,
        progress: &dyn Fn(ProgressEvent),
    ) -> Result<(), CoreError> {
        write_report(&outputs.report, entries)?;
        progress(ProgressEvent::Persisted {
            what: "status report",
            path: outputs.report.clone(),
        });
        if self.requester.persist_cache()? > 0
            && let Some(path) = self.requester.cache().path()
        {
            progress(ProgressEvent::Persisted {
                what: "response cache",
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}
