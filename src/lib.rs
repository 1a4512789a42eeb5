mod cache;
mod config;
mod corpus;
mod engine;
mod error;
mod matcher;
mod render;

pub use cache::{CacheLayer, CacheStats, MemoryStore, SharedCacheStore};
pub use config::EngineConfig;
pub use corpus::{
    CorpusListener, Keyword, KeywordIndex, KeywordSnapshot, LinkBuilder, PathLinkBuilder,
};
pub use engine::Autolinker;
pub use error::{CacheError, CorpusError, EngineError, MatcherBuildError};
pub use matcher::{CompiledMatcher, Match};
pub use render::{escape_html, render};
