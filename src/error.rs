use thiserror::Error;

/// The keyword set could not be compiled into an automaton.
///
/// This only happens when the corpus invariants were broken upstream, so
/// callers should treat it as fatal for the render in progress.
#[derive(Debug, Error)]
pub enum MatcherBuildError {
    #[error("keyword at position {index} is empty")]
    EmptyKeyword { index: usize },
    #[error("failed to build keyword automaton: {0}")]
    Automaton(#[from] aho_corasick::BuildError),
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("keyword text must not be empty")]
    EmptyKeyword,
}

/// Failures raised by a shared cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("shared cache unavailable: {reason}")]
    Unavailable { reason: String },
}

impl CacheError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        CacheError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by [`crate::Autolinker`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    MatcherBuild(#[from] MatcherBuildError),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("matcher reported keyword {keyword:?} with no link in the corpus snapshot")]
    LinkLookupMissing { keyword: String },
}
