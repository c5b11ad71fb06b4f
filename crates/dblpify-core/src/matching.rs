//! Deciding whether a dblp hit is the same publication as a local entry.
//!
//! A candidate survives three filters, in order: its publication type is one
//! of [`PublicationType::RANKED`](crate::candidate::PublicationType::RANKED), every one of its authors appears in the
//! entry's author text, and its title is close enough to the entry's title.
//! Among survivors the best-ranked type wins; ties keep response order.

use crate::candidate::Candidate;
use crate::entry::Entry;
use crate::normalize::normalize;

/// Minimum title similarity for a candidate to count as the same paper.
pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.9;

/// Ratcliff/Obershelp similarity: `2·M / T`, where `M` is the number of
/// characters in the longest common blocks (found recursively left and right
/// of each block) and `T` the combined length of both strings.
///
/// Two empty strings are identical (1.0).
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_characters(&a, &b);
    2.0 * matched as f64 / total as f64
}

/// Sum of the sizes of all matching blocks between `a` and `b`.
fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, size)`.
///
/// Ties go to the block that starts earliest in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let width = bhi - blo;
    // run[j - blo + 1] = length of the common run ending at (i, j)
    let mut prev = vec![0usize; width + 1];
    let mut cur = vec![0usize; width + 1];
    for i in alo..ahi {
        for j in blo..bhi {
            let slot = j - blo + 1;
            if a[i] == b[j] {
                let k = prev[slot - 1] + 1;
                cur[slot] = k;
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            } else {
                cur[slot] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    (best_i, best_j, best_size)
}

/// True if the normalized titles are at least `threshold` similar.
///
/// A title that normalizes to nothing carries no evidence and never matches.
pub fn titles_match(entry_title: &str, candidate_title: &str, threshold: f64) -> bool {
    let (entry_title, candidate_title) = (normalize(entry_title), normalize(candidate_title));
    if entry_title.is_empty() || candidate_title.is_empty() {
        return false;
    }
    similarity_ratio(&entry_title, &candidate_title) >= threshold
}

/// True if every candidate author, normalized, is a substring of the
/// normalized entry author text. The entry may list more authors.
///
/// A candidate without authors cannot be confirmed and never passes, nor
/// does one with an author that normalizes to nothing.
pub fn authors_contained(entry_author_text: &str, candidate_authors: &[String]) -> bool {
    if candidate_authors.is_empty() {
        return false;
    }
    let entry_authors = normalize(entry_author_text);
    candidate_authors.iter().all(|author| {
        let author = normalize(author);
        !author.is_empty() && entry_authors.contains(&author)
    })
}

/// Pick the dblp hit that is the same publication as `entry`, if any.
pub fn select_best_match<'a>(
    entry: &Entry,
    candidates: &'a [Candidate],
    title_threshold: f64,
) -> Option<&'a Candidate> {
    let entry_title = entry.title().unwrap_or_default();
    let entry_authors = entry.author_text();

    candidates
        .iter()
        .filter_map(|c| c.publication_type.rank().map(|rank| (rank, c)))
        .filter(|(_, c)| {
            let ok = authors_contained(&entry_authors, &c.authors);
            if !ok {
                tracing::debug!(key = entry.key(), url = %c.url, "author mismatch");
            }
            ok
        })
        .filter(|(_, c)| {
            let ok = titles_match(entry_title, &c.title, title_threshold);
            if !ok {
                tracing::debug!(key = entry.key(), url = %c.url, "title mismatch");
            }
            ok
        })
        // min_by_key keeps the first of equal minima, preserving response order
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, c)| c)
}
