//! dblp search hits and their JSON wire shape.
//!
//! The search API nests hits under `result.hits.hit[].info`. A single author
//! comes back as an object, several as an array; both are folded into a
//! `Vec` here so matching never sees the difference.

use std::fmt;

use serde::Deserialize;

/// dblp publication type, ranked by how canonical the record is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublicationType {
    BooksAndTheses,
    PartsInBooksOrCollections,
    JournalArticles,
    ConferenceAndWorkshopPapers,
    InformalAndOtherPublications,
    /// Anything else dblp returns (e.g. "Editorship", "Reference Works").
    Other(String),
}

impl PublicationType {
    /// Accepted types, most preferred first.
    pub const RANKED: [PublicationType; 5] = [
        PublicationType::BooksAndTheses,
        PublicationType::PartsInBooksOrCollections,
        PublicationType::JournalArticles,
        PublicationType::ConferenceAndWorkshopPapers,
        PublicationType::InformalAndOtherPublications,
    ];

    pub fn from_label(label: &str) -> Self {
        match label {
            "Books and Theses" => Self::BooksAndTheses,
            "Parts in Books or Collections" => Self::PartsInBooksOrCollections,
            "Journal Articles" => Self::JournalArticles,
            "Conference and Workshop Papers" => Self::ConferenceAndWorkshopPapers,
            "Informal and Other Publications" => Self::InformalAndOtherPublications,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::BooksAndTheses => "Books and Theses",
            Self::PartsInBooksOrCollections => "Parts in Books or Collections",
            Self::JournalArticles => "Journal Articles",
            Self::ConferenceAndWorkshopPapers => "Conference and Workshop Papers",
            Self::InformalAndOtherPublications => "Informal and Other Publications",
            Self::Other(label) => label,
        }
    }

    /// Position in [`RANKED`](Self::RANKED); `None` for unaccepted types.
    pub fn rank(&self) -> Option<usize> {
        Self::RANKED.iter().position(|t| t == self)
    }
}

impl fmt::Display for PublicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A dblp search hit that may be the same publication as a local entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub publication_type: PublicationType,
    pub title: String,
    /// Author names as listed by dblp (possibly with disambiguation digits).
    pub authors: Vec<String>,
    /// Persistent record URL, e.g. `https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17`.
    pub url: String,
    pub year: Option<String>,
}

impl Candidate {
    pub fn new(
        publication_type: PublicationType,
        title: impl Into<String>,
        authors: Vec<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            publication_type,
            title: title.into(),
            authors,
            url: url.into(),
            year: None,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Option<Hits>,
}

#[derive(Deserialize)]
struct Hits {
    /// Absent when the query matched nothing.
    #[serde(default)]
    hit: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    info: HitInfo,
}

#[derive(Deserialize)]
struct HitInfo {
    #[serde(rename = "type", default)]
    publication_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Option<AuthorList>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    year: Option<String>,
}

#[derive(Deserialize)]
struct AuthorList {
    author: OneOrMany<RawAuthor>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAuthor {
    Named { text: String },
    Plain(String),
}

impl From<RawAuthor> for String {
    fn from(value: RawAuthor) -> Self {
        match value {
            RawAuthor::Named { text } => text,
            RawAuthor::Plain(text) => text,
        }
    }
}

impl HitInfo {
    fn into_candidate(self) -> Option<Candidate> {
        let Some(url) = self.url else {
            tracing::debug!(title = %self.title, "dropping dblp hit without record URL");
            return None;
        };
        let authors = self
            .authors
            .map(|list| list.author.into_vec().into_iter().map(String::from).collect())
            .unwrap_or_default();
        Some(Candidate {
            publication_type: PublicationType::from_label(&self.publication_type),
            title: self.title,
            authors,
            url,
            year: self.year,
        })
    }
}

/// Parse a dblp search API JSON body into candidates, in response order.
///
/// An empty `Vec` means the query matched nothing.
pub fn parse_search_response(body: &str) -> Result<Vec<Candidate>, serde_json::Error> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let hits = response.result.hits.map(|h| h.hit).unwrap_or_default();
    Ok(hits
        .into_iter()
        .filter_map(|hit| hit.info.into_candidate())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_HITS: &str = r#"{
      "result": {
        "query": "attention is all you need",
        "status": {"@code": "200", "text": "OK"},
        "hits": {
          "@total": "2", "@sent": "2", "@first": "0",
          "hit": [
            {"@score": "9", "@id": "1", "info": {
              "authors": {"author": [
                {"@pid": "1", "text": "Ashish Vaswani"},
                {"@pid": "2", "text": "Noam Shazeer"}
              ]},
              "title": "Attention is All you Need.",
              "venue": "NIPS", "year": "2017",
              "type": "Conference and Workshop Papers",
              "key": "conf/nips/VaswaniSPUJGKP17",
              "url": "https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17"
            }},
            {"@score": "5", "@id": "2", "info": {
              "authors": {"author": {"@pid": "1", "text": "Ashish Vaswani"}},
              "title": "Attention is All you Need.",
              "venue": "CoRR", "year": "2017",
              "type": "Informal and Other Publications",
              "url": "https://dblp.org/rec/journals/corr/VaswaniSPUJGKP17"
            }}
          ]
        }
      }
    }"#;

    #[test]
    fn parses_hits_in_order() {
        let candidates = parse_search_response(TWO_HITS).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].publication_type,
            PublicationType::ConferenceAndWorkshopPapers
        );
        assert_eq!(candidates[0].authors, ["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(candidates[0].year.as_deref(), Some("2017"));
        assert_eq!(
            candidates[1].url,
            "https://dblp.org/rec/journals/corr/VaswaniSPUJGKP17"
        );
    }

    #[test]
    fn single_author_object_becomes_list() {
        let candidates = parse_search_response(TWO_HITS).unwrap();
        assert_eq!(candidates[1].authors, ["Ashish Vaswani"]);
    }

    #[test]
    fn missing_hit_array_means_no_candidates() {
        let body = r#"{"result": {"hits": {"@total": "0", "@sent": "0"}}}"#;
        assert!(parse_search_response(body).unwrap().is_empty());
    }

    #[test]
    fn hit_without_url_is_dropped_and_without_authors_kept() {
        let body = r#"{"result": {"hits": {"hit": [
            {"info": {"title": "No URL", "type": "Journal Articles"}},
            {"info": {"title": "Proceedings", "type": "Editorship",
                      "url": "https://dblp.org/rec/conf/x/2020"}}
        ]}}}"#;
        let candidates = parse_search_response(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].authors.is_empty());
        assert_eq!(
            candidates[0].publication_type,
            PublicationType::Other("Editorship".into())
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_search_response("<html>").is_err());
    }

    #[test]
    fn rank_order() {
        assert_eq!(PublicationType::BooksAndTheses.rank(), Some(0));
        assert_eq!(PublicationType::JournalArticles.rank(), Some(2));
        assert_eq!(PublicationType::InformalAndOtherPublications.rank(), Some(4));
        assert_eq!(PublicationType::from_label("Editorship").rank(), None);
        for t in PublicationType::RANKED {
            assert_eq!(PublicationType::from_label(t.label()), t);
        }
    }
}
