//! Per-entry status report as CSV.

use std::path::Path;

use serde::Serialize;

use crate::entry::{Entry, EntryCollection};

const HEADER: [&str; 3] = ["Key", "Status", "Match URL"];

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    key: &'a str,
    status: &'static str,
    /// Empty when the entry has no dblp record.
    match_url: &'a str,
}

impl<'a> From<&'a Entry> for ReportRow<'a> {
    fn from(entry: &'a Entry) -> Self {
        Self {
            key: entry.key(),
            status: entry.status().label(),
            match_url: entry.match_url().unwrap_or_default(),
        }
    }
}

/// Write one row per entry, in collection order, creating parent directories.
pub fn write_report(path: &Path, entries: &EntryCollection) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Header written explicitly so an empty collection still gets one.
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(HEADER)?;
    for entry in entries.iter() {
        wtr.serialize(ReportRow::from(entry))?;
    }
    wtr.flush()?;
    Ok(())
}
