//! Bibliography entries under enrichment and their lifecycle.
//!
//! ```text
//! NotYetProcessed ──┬─> NoHit
//!                   ├─> NoMatch
//!                   └─> Matched ──> Updated
//! AlreadyFromDblp (decided at construction)
//! ```
//!
//! Every transition is a method returning `Result`; an illegal transition is
//! an [`EntryError`] and leaves the entry untouched.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::bibtex::BibRecord;
use crate::candidate::Candidate;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry {key}: bibsource names dblp but biburl {biburl:?} is not a dblp .bib URL")]
    MalformedDblpSource { key: String, biburl: Option<String> },
    #[error("entry {key}: cannot {action} in state \"{status}\"")]
    InvalidTransition {
        key: String,
        action: &'static str,
        status: EntryStatus,
    },
    #[error("entry {key}: query URL already set to {existing}, refusing {attempted}")]
    QueryUrlConflict {
        key: String,
        existing: String,
        attempted: String,
    },
    #[error("duplicate entry key: {0}")]
    DuplicateKey(String),
}

/// Where an entry stands in the enrichment process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryStatus {
    NotYetProcessed,
    AlreadyFromDblp,
    NoHit,
    NoMatch,
    Matched,
    Updated,
}

impl EntryStatus {
    pub const ALL: [EntryStatus; 6] = [
        EntryStatus::NotYetProcessed,
        EntryStatus::AlreadyFromDblp,
        EntryStatus::NoHit,
        EntryStatus::NoMatch,
        EntryStatus::Matched,
        EntryStatus::Updated,
    ];

    /// Text used in the status report.
    pub fn label(self) -> &'static str {
        match self {
            EntryStatus::NotYetProcessed => "Not yet processed (error)",
            EntryStatus::AlreadyFromDblp => "Already from dblp",
            EntryStatus::NoHit => "No hits to query",
            EntryStatus::NoMatch => "No match among hits",
            EntryStatus::Matched => "Matched but not yet updated (error)",
            EntryStatus::Updated => "Updated with dblp entry!",
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EntryStatus::NotYetProcessed | EntryStatus::Matched)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State plus the data that only exists in that state.
#[derive(Debug, Clone, PartialEq)]
enum EntryState {
    NotYetProcessed,
    AlreadyFromDblp { url: String },
    NoHit,
    NoMatch,
    Matched(Candidate),
    Updated(Candidate),
}

impl EntryState {
    fn status(&self) -> EntryStatus {
        match self {
            EntryState::NotYetProcessed => EntryStatus::NotYetProcessed,
            EntryState::AlreadyFromDblp { .. } => EntryStatus::AlreadyFromDblp,
            EntryState::NoHit => EntryStatus::NoHit,
            EntryState::NoMatch => EntryStatus::NoMatch,
            EntryState::Matched(_) => EntryStatus::Matched,
            EntryState::Updated(_) => EntryStatus::Updated,
        }
    }
}

/// One bibliography record being enriched.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    record: BibRecord,
    state: EntryState,
    query_url: Option<String>,
}

impl Entry {
    /// Wrap a parsed record. Records whose `bibsource` mentions dblp start
    /// (and stay) in [`EntryStatus::AlreadyFromDblp`].
    pub fn from_record(record: BibRecord) -> Result<Self, EntryError> {
        let from_dblp = record
            .get("bibsource")
            .is_some_and(|source| source.contains("dblp"));

        let state = if from_dblp {
            let biburl = record.get("biburl");
            match biburl.and_then(|u| u.strip_suffix(".bib")) {
                Some(url) if url.contains("dblp") => EntryState::AlreadyFromDblp {
                    url: url.to_string(),
                },
                _ => {
                    return Err(EntryError::MalformedDblpSource {
                        key: record.key.clone(),
                        biburl: biburl.map(str::to_string),
                    });
                }
            }
        } else {
            EntryState::NotYetProcessed
        };

        Ok(Self {
            record,
            state,
            query_url: None,
        })
    }

    pub fn key(&self) -> &str {
        &self.record.key
    }

    pub fn record(&self) -> &BibRecord {
        &self.record
    }

    pub fn status(&self) -> EntryStatus {
        self.state.status()
    }

    pub fn title(&self) -> Option<&str> {
        self.record.get("title")
    }

    /// Authors in "Given Family" order joined by " and "; empty if the
    /// record has no `author` field.
    pub fn author_text(&self) -> String {
        self.record
            .get("author")
            .map(render_author_list)
            .unwrap_or_default()
    }

    /// The candidate this entry was matched to, if any.
    pub fn matched_candidate(&self) -> Option<&Candidate> {
        match &self.state {
            EntryState::Matched(c) | EntryState::Updated(c) => Some(c),
            _ => None,
        }
    }

    /// dblp record URL for matched, updated and dblp-sourced entries.
    pub fn match_url(&self) -> Option<&str> {
        match &self.state {
            EntryState::AlreadyFromDblp { url } => Some(url),
            EntryState::Matched(c) | EntryState::Updated(c) => Some(&c.url),
            _ => None,
        }
    }

    pub fn query_url(&self) -> Option<&str> {
        self.query_url.as_deref()
    }

    /// Record the search URL used for this entry. Setting the same URL again
    /// is a no-op; a different URL is a conflict.
    pub fn set_query_url(&mut self, url: &str) -> Result<(), EntryError> {
        match &self.query_url {
            Some(existing) if existing == url => Ok(()),
            Some(existing) => Err(EntryError::QueryUrlConflict {
                key: self.key().to_string(),
                existing: existing.clone(),
                attempted: url.to_string(),
            }),
            None => {
                self.query_url = Some(url.to_string());
                Ok(())
            }
        }
    }

    pub fn mark_no_hit(&mut self) -> Result<(), EntryError> {
        self.require(EntryStatus::NotYetProcessed, "mark as having no hits")?;
        self.state = EntryState::NoHit;
        Ok(())
    }

    pub fn mark_no_match(&mut self) -> Result<(), EntryError> {
        self.require(EntryStatus::NotYetProcessed, "mark as having no match")?;
        self.state = EntryState::NoMatch;
        Ok(())
    }

    pub fn set_match(&mut self, candidate: Candidate) -> Result<(), EntryError> {
        self.require(EntryStatus::NotYetProcessed, "set a match")?;
        self.state = EntryState::Matched(candidate);
        Ok(())
    }

    /// Replace entry type and fields with the canonical dblp record. The
    /// local key is kept so citations in documents still resolve.
    pub fn set_entry_data(&mut self, canonical: BibRecord) -> Result<(), EntryError> {
        let candidate = match std::mem::replace(&mut self.state, EntryState::NotYetProcessed) {
            EntryState::Matched(candidate) => candidate,
            other => {
                self.state = other;
                return self.require(EntryStatus::Matched, "apply canonical data");
            }
        };
        self.record.entry_type = canonical.entry_type;
        self.record.fields = canonical.fields;
        self.state = EntryState::Updated(candidate);
        Ok(())
    }

    fn require(&self, expected: EntryStatus, action: &'static str) -> Result<(), EntryError> {
        let status = self.status();
        if status == expected {
            Ok(())
        } else {
            Err(EntryError::InvalidTransition {
                key: self.key().to_string(),
                action,
                status,
            })
        }
    }
}

/// Split a BibTeX name list on top-level `and` and render each name as
/// "Given Family".
fn render_author_list(field: &str) -> String {
    let collapsed = field.split_whitespace().collect::<Vec<_>>().join(" ");
    split_top_level(&collapsed, " and ")
        .into_iter()
        .map(|name| render_name(name.trim()))
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(" and ")
}

/// `Family, Given` → `Given Family`; `von Last, Jr, First` → `First von Last Jr`.
fn render_name(name: &str) -> String {
    let parts: Vec<&str> = split_top_level(name, ",")
        .into_iter()
        .map(str::trim)
        .collect();
    match parts.as_slice() {
        [family, given] => format!("{given} {family}"),
        [family, suffix, given] => format!("{given} {family} {suffix}"),
        _ => name.to_string(),
    }
}

/// Split on `sep` (ASCII case-insensitive) outside of `{...}` groups.
fn split_top_level<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while let Some(c) = text[i..].chars().next() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ if depth == 0
                && text
                    .get(i..i + sep.len())
                    .is_some_and(|s| s.eq_ignore_ascii_case(sep)) =>
            {
                parts.push(&text[start..i]);
                i += sep.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    parts.push(&text[start..]);
    parts
}

/// Entries keyed by citation key, in file order.
#[derive(Debug, Clone, Default)]
pub struct EntryCollection {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl EntryCollection {
    /// Build from parsed records. Fails on the first duplicate key or on a
    /// malformed dblp-sourced record.
    pub fn from_records(records: Vec<BibRecord>) -> Result<Self, EntryError> {
        let mut collection = Self::default();
        for record in records {
            collection.insert(Entry::from_record(record)?)?;
        }
        Ok(collection)
    }

    pub fn insert(&mut self, entry: Entry) -> Result<(), EntryError> {
        if self.index.contains_key(entry.key()) {
            return Err(EntryError::DuplicateKey(entry.key().to_string()));
        }
        self.index.insert(entry.key().to_string(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.index.get(key).map(|&i| &mut self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Current records in file order, for serialization.
    pub fn records(&self) -> impl Iterator<Item = &BibRecord> {
        self.entries.iter().map(Entry::record)
    }

    pub fn count_by_status(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status() == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::PublicationType;

    fn plain(key: &str) -> Entry {
        Entry::from_record(
            BibRecord::new(key, "article")
                .with_field("title", "Some Title")
                .with_field("author", "Doe, Jane"),
        )
        .unwrap()
    }

    fn hit(url: &str) -> Candidate {
        Candidate::new(
            PublicationType::JournalArticles,
            "Some Title",
            vec!["Jane Doe".into()],
            url,
        )
    }

    #[test]
    fn new_entry_is_not_yet_processed() {
        let e = plain("a");
        assert_eq!(e.status(), EntryStatus::NotYetProcessed);
        assert!(e.match_url().is_none());
        assert!(e.matched_candidate().is_none());
    }

    #[test]
    fn dblp_sourced_entry_is_already_from_dblp() {
        let record = BibRecord::new("DBLP:conf/x/Y20", "inproceedings")
            .with_field("bibsource", "dblp computer science bibliography, https://dblp.org")
            .with_field("biburl", "https://dblp.org/rec/conf/x/Y20.bib");
        let e = Entry::from_record(record).unwrap();
        assert_eq!(e.status(), EntryStatus::AlreadyFromDblp);
        assert_eq!(e.match_url(), Some("https://dblp.org/rec/conf/x/Y20"));
    }

    #[test]
    fn dblp_source_without_bib_url_is_rejected() {
        let missing = BibRecord::new("k", "misc").with_field("bibsource", "dblp");
        assert!(matches!(
            Entry::from_record(missing),
            Err(EntryError::MalformedDblpSource { biburl: None, .. })
        ));

        let not_bib = BibRecord::new("k", "misc")
            .with_field("bibsource", "dblp")
            .with_field("biburl", "https://dblp.org/rec/conf/x/Y20");
        assert!(Entry::from_record(not_bib).is_err());

        let other_host = BibRecord::new("k", "misc")
            .with_field("bibsource", "dblp")
            .with_field("biburl", "https://example.org/x.bib");
        assert!(Entry::from_record(other_host).is_err());
    }

    #[test]
    fn match_then_update() {
        let mut e = plain("local");
        e.set_match(hit("https://dblp.org/rec/journals/x/Y")).unwrap();
        assert_eq!(e.status(), EntryStatus::Matched);
        assert_eq!(e.match_url(), Some("https://dblp.org/rec/journals/x/Y"));

        let canonical = BibRecord::new("DBLP:journals/x/Y", "article")
            .with_field("title", "Some Title.")
            .with_field("journal", "J");
        e.set_entry_data(canonical).unwrap();
        assert_eq!(e.status(), EntryStatus::Updated);
        assert_eq!(e.key(), "local");
        assert_eq!(e.record().get("journal"), Some("J"));
        assert!(e.record().get("author").is_none());
        assert_eq!(e.match_url(), Some("https://dblp.org/rec/journals/x/Y"));
    }

    #[test]
    fn set_entry_data_requires_match() {
        let mut e = plain("a");
        let err = e.set_entry_data(BibRecord::new("x", "misc")).unwrap_err();
        assert!(matches!(
            err,
            EntryError::InvalidTransition {
                status: EntryStatus::NotYetProcessed,
                ..
            }
        ));
        assert_eq!(e.status(), EntryStatus::NotYetProcessed);
        assert_eq!(e.title(), Some("Some Title"));
    }

    #[test]
    fn terminal_states_refuse_transitions() {
        let mut e = plain("a");
        e.mark_no_hit().unwrap();
        assert!(e.mark_no_match().is_err());
        assert!(e.set_match(hit("https://dblp.org/rec/x")).is_err());
        assert_eq!(e.status(), EntryStatus::NoHit);

        let mut e = plain("b");
        e.mark_no_match().unwrap();
        assert!(e.mark_no_hit().is_err());

        let mut e = plain("c");
        e.set_match(hit("https://dblp.org/rec/x")).unwrap();
        assert!(e.set_match(hit("https://dblp.org/rec/y")).is_err());
        assert_eq!(e.match_url(), Some("https://dblp.org/rec/x"));
    }

    #[test]
    fn query_url_is_set_once() {
        let mut e = plain("a");
        e.set_query_url("https://dblp.org/search/publ/api?q=x").unwrap();
        e.set_query_url("https://dblp.org/search/publ/api?q=x").unwrap();
        let err = e
            .set_query_url("https://dblp.org/search/publ/api?q=y")
            .unwrap_err();
        assert!(matches!(err, EntryError::QueryUrlConflict { .. }));
        assert_eq!(e.query_url(), Some("https://dblp.org/search/publ/api?q=x"));
    }

    #[test]
    fn author_text_reorders_family_given() {
        let record = BibRecord::new("k", "misc").with_field(
            "author",
            "Vaswani, Ashish and Noam Shazeer and\n   {Barnes and Noble}, Inc",
        );
        let e = Entry::from_record(record).unwrap();
        assert_eq!(
            e.author_text(),
            "Ashish Vaswani and Noam Shazeer and Inc {Barnes and Noble}"
        );
    }

    #[test]
    fn author_text_with_suffix() {
        let record = BibRecord::new("k", "misc").with_field("author", "King, Jr, Martin Luther");
        let e = Entry::from_record(record).unwrap();
        assert_eq!(e.author_text(), "Martin Luther King Jr");
    }

    #[test]
    fn author_text_splits_uppercase_and() {
        let record = BibRecord::new("k", "misc")
            .with_field("author", "Vaswani, Ashish AND Shazeer, Noam And Niki Parmar");
        let e = Entry::from_record(record).unwrap();
        assert_eq!(
            e.author_text(),
            "Ashish Vaswani and Noam Shazeer and Niki Parmar"
        );
    }

    #[test]
    fn author_text_empty_without_field() {
        let e = Entry::from_record(BibRecord::new("k", "misc")).unwrap();
        assert_eq!(e.author_text(), "");
    }

    #[test]
    fn status_labels() {
        assert_eq!(EntryStatus::Updated.to_string(), "Updated with dblp entry!");
        assert_eq!(EntryStatus::NoHit.label(), "No hits to query");
        assert!(EntryStatus::NoMatch.is_terminal());
        assert!(!EntryStatus::Matched.is_terminal());
    }

    #[test]
    fn collection_keeps_order_and_rejects_duplicates() {
        let records = vec![
            BibRecord::new("b", "misc"),
            BibRecord::new("a", "misc"),
            BibRecord::new("c", "misc"),
        ];
        let collection = EntryCollection::from_records(records).unwrap();
        let keys: Vec<_> = collection.iter().map(Entry::key).collect();
        assert_eq!(keys, ["b", "a", "c"]);
        assert!(collection.get("a").is_some());
        assert_eq!(collection.count_by_status(EntryStatus::NotYetProcessed), 3);

        let dup = vec![BibRecord::new("x", "misc"), BibRecord::new("x", "article")];
        assert_eq!(
            EntryCollection::from_records(dup).unwrap_err(),
            EntryError::DuplicateKey("x".into())
        );
    }
}
