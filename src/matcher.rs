use crate::corpus::KeywordSnapshot;
use crate::error::MatcherBuildError;
use crate::render::escape_html;
use aho_corasick::{AhoCorasick, Input, MatchKind};
use serde::Serialize;

// Longest entity produced by `escape_html` ("&quot;" and "&#x27;").
const MAX_ENTITY_LEN: usize = 6;

/// One keyword occurrence in scanned text, as a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Match<'m> {
    pub start: usize,
    pub end: usize,
    pub keyword: &'m str,
}

/// Multi-pattern automaton compiled from exactly one corpus snapshot.
///
/// Patterns are the HTML-escaped keyword texts, registered in snapshot
/// order (longest first, then lexicographic), and searched with
/// leftmost-longest semantics.
#[derive(Debug)]
pub struct CompiledMatcher {
    generation: u64,
    automaton: Option<AhoCorasick>,
    keywords: Vec<String>,
}

impl CompiledMatcher {
    pub fn build(snapshot: &KeywordSnapshot) -> Result<Self, MatcherBuildError> {
        let mut patterns = Vec::with_capacity(snapshot.len());
        let mut keywords = Vec::with_capacity(snapshot.len());
        for (index, keyword) in snapshot.keywords().iter().enumerate() {
            if keyword.text().is_empty() {
                return Err(MatcherBuildError::EmptyKeyword { index });
            }
            patterns.push(escape_html(keyword.text()));
            keywords.push(keyword.text().to_string());
        }

        let automaton = if patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&patterns)?,
            )
        };

        Ok(Self {
            generation: snapshot.generation(),
            automaton,
            keywords,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pattern_count(&self) -> usize {
        self.keywords.len()
    }

    /// Reports non-overlapping keyword occurrences in escaped `text`, left to
    /// right, preferring the longest keyword at each start position.
    ///
    /// Matches that would begin inside an HTML entity (the `lt` in `&lt;`)
    /// are skipped, so a span never straddles an escape sequence.
    pub fn scan<'m>(&'m self, text: &str) -> Vec<Match<'m>> {
        let Some(automaton) = &self.automaton else {
            return Vec::new();
        };
        let mut matches = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            let input = Input::new(text).span(pos..text.len());
            let Some(found) = automaton.find(input) else {
                break;
            };
            if inside_entity(text.as_bytes(), found.start()) {
                pos = found.start() + 1;
                continue;
            }
            matches.push(Match {
                start: found.start(),
                end: found.end(),
                keyword: &self.keywords[found.pattern().as_usize()],
            });
            pos = found.end();
        }
        matches
    }
}

fn inside_entity(bytes: &[u8], at: usize) -> bool {
    let window_start = at.saturating_sub(MAX_ENTITY_LEN - 1);
    let window = &bytes[window_start..at];
    match window.iter().rposition(|&b| b == b'&') {
        Some(amp) => !window[amp..].contains(&b';'),
        None => false,
    }
}
