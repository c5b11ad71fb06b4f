//! BibTeX reading and writing.
//!
//! Parsing goes through the `biblatex` crate (LaTeX accent decoding,
//! `@string` abbreviations). Each parsed entry becomes a [`BibRecord`]: a key,
//! an entry type and a field map whose values are re-escaped so they can be
//! written back out unchanged in meaning.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BibError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("expected exactly one BibTeX entry, found {0}")]
    RecordCount(usize),
}

/// One bibliography record: key, entry type and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibRecord {
    pub key: String,
    /// Lowercase entry type, e.g. `inproceedings`.
    pub entry_type: String,
    /// Lowercase field name to field value as BibTeX text: escapes such as
    /// `\&` are kept, outer braces are not. The writer emits it unchanged.
    pub fields: BTreeMap<String, String>,
}

impl BibRecord {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter, mostly for tests.
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Fields whose content is written verbatim (no brace protection, no escaping).
const VERBATIM_FIELDS: &[&str] = &["url", "doi", "eprint", "file", "pdf", "biburl"];

/// Read and parse a .bib file.
pub fn parse_bib_file(path: &Path) -> Result<Vec<BibRecord>, BibError> {
    let content = std::fs::read_to_string(path)?;
    parse_bib_str(&content)
}

/// Parse .bib content. Returns records in file order; content without any
/// entry yields an empty list.
pub fn parse_bib_str(content: &str) -> Result<Vec<BibRecord>, BibError> {
    let records = match biblatex::Bibliography::parse(content) {
        Ok(bibliography) => bibliography.iter().map(to_record).collect(),
        Err(e) => {
            // Real-world .bib files carry stray braces and odd separators
            // that fail a whole-file parse; recover entry by entry.
            tracing::debug!(error = %e, "whole-file parse failed, parsing entries individually");
            parse_entries_individually(content)
        }
    };
    Ok(records)
}

/// Parse text that must contain exactly one record (a dblp `.bib` export).
pub fn parse_single_record(content: &str) -> Result<BibRecord, BibError> {
    let mut records = parse_bib_str(content)?;
    if records.len() != 1 {
        return Err(BibError::RecordCount(records.len()));
    }
    Ok(records.remove(0))
}

fn parse_entries_individually(content: &str) -> Vec<BibRecord> {
    static ENTRY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*@[a-zA-Z]").unwrap());

    let positions: Vec<usize> = ENTRY_RE.find_iter(content).map(|m| m.start()).collect();
    let mut records = Vec::new();
    for (i, &start) in positions.iter().enumerate() {
        let end = positions.get(i + 1).copied().unwrap_or(content.len());
        let chunk = &content[start..end];
        match biblatex::Bibliography::parse(chunk) {
            Ok(bib) => records.extend(bib.iter().map(to_record)),
            Err(e) => {
                let head: String = chunk.trim().chars().take(60).collect();
                tracing::warn!(error = %e, entry = %head, "skipping unparseable BibTeX entry");
            }
        }
    }
    records
}

fn to_record(entry: &biblatex::Entry) -> BibRecord {
    let fields = entry
        .fields
        .iter()
        .map(|(name, chunks)| {
            let name = name.to_lowercase();
            let value = chunks_to_bibtex(&name, chunks);
            (name, value)
        })
        .collect();
    BibRecord {
        key: entry.key.clone(),
        entry_type: entry.entry_type.to_string().to_lowercase(),
        fields,
    }
}

/// Convert parsed chunks back to BibTeX field text.
fn chunks_to_bibtex(field: &str, chunks: &[biblatex::Spanned<biblatex::Chunk>]) -> String {
    let verbatim_field = VERBATIM_FIELDS.contains(&field);
    let mut out = String::new();
    for chunk in chunks {
        match &chunk.v {
            biblatex::Chunk::Normal(s) if verbatim_field => out.push_str(s),
            biblatex::Chunk::Verbatim(s) if verbatim_field => out.push_str(s),
            biblatex::Chunk::Normal(s) => out.push_str(&escape_specials(s)),
            biblatex::Chunk::Verbatim(s) => {
                out.push('{');
                out.push_str(s);
                out.push('}');
            }
            biblatex::Chunk::Math(s) => {
                out.push('$');
                out.push_str(s);
                out.push('$');
            }
        }
    }
    out
}

fn escape_specials(s: &str) -> String {
    s.replace('&', r"\&").replace('%', r"\%")
}

/// Serialize records to BibTeX text in the given order.
pub fn write_bib_string<'a>(records: impl IntoIterator<Item = &'a BibRecord>) -> String {
    let mut out = String::new();
    for (i, record) in records.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "@{}{{{},", record.entry_type, record.key);
        for (name, value) in &record.fields {
            let _ = writeln!(out, "  {} = {{{}}},", name, value);
        }
        out.push_str("}\n");
    }
    out
}

/// Serialize records and write them to `path`, creating parent directories.
pub fn write_bib_file<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a BibRecord>,
) -> Result<(), BibError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, write_bib_string(records))?;
    Ok(())
}
