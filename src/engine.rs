use crate::cache::{CacheLayer, CacheStats, MemoryStore, SharedCacheStore};
use crate::config::EngineConfig;
use crate::corpus::{Keyword, KeywordIndex, KeywordSnapshot, LinkBuilder, PathLinkBuilder};
use crate::error::EngineError;
use crate::matcher::CompiledMatcher;
use crate::render;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Renders keyword descriptions with every known keyword autolinked.
///
/// Owns the keyword index and both cache tiers. Every corpus mutation goes
/// through this type so the index swap and the cache invalidation happen
/// together under the index writer lock.
pub struct Autolinker {
    config: EngineConfig,
    index: KeywordIndex,
    cache: Arc<CacheLayer>,
    links: Arc<dyn LinkBuilder>,
}

impl Autolinker {
    pub fn new(config: EngineConfig, shared: Arc<dyn SharedCacheStore>) -> Self {
        let links = Arc::new(PathLinkBuilder::new(config.link_base_path.clone()));
        Self::with_link_builder(config, shared, links)
    }

    pub fn with_link_builder(
        config: EngineConfig,
        shared: Arc<dyn SharedCacheStore>,
        links: Arc<dyn LinkBuilder>,
    ) -> Self {
        let cache = Arc::new(CacheLayer::new(&config, shared));
        let index = KeywordIndex::new().with_listener(cache.clone());
        Self {
            config,
            index,
            cache,
            links,
        }
    }

    /// Default configuration backed by an in-process shared store.
    pub fn in_memory() -> Self {
        Self::new(EngineConfig::default(), Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<KeywordSnapshot> {
        self.index.snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.index.generation()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Renders the description of `keyword`, serving from cache when the
    /// corpus has not changed since the last render.
    pub fn render_description(
        &self,
        keyword: &str,
        description: &str,
    ) -> Result<String, EngineError> {
        if description.is_empty() {
            return Ok(String::new());
        }
        let snapshot = self.index.snapshot();
        let generation = snapshot.generation();
        if let Some(html) = self.cache.get(keyword, generation) {
            return Ok(html);
        }
        let matcher = self.cache.matcher_for(&snapshot)?;
        let html = render::render(description, &matcher, &self.config.line_break, |kw| {
            snapshot.link_for(kw)
        })?;
        self.cache.put(keyword, generation, &html);
        Ok(html)
    }

    /// Renders a page of entries in parallel, one result per entry.
    pub fn render_many<K, D>(&self, entries: &[(K, D)]) -> Vec<Result<String, EngineError>>
    where
        K: AsRef<str> + Sync,
        D: AsRef<str> + Sync,
    {
        entries
            .par_iter()
            .map(|(keyword, description)| {
                self.render_description(keyword.as_ref(), description.as_ref())
            })
            .collect()
    }

    /// Matcher for the current corpus, shared with the render path.
    pub fn matcher(&self) -> Result<Arc<CompiledMatcher>, EngineError> {
        let snapshot = self.index.snapshot();
        Ok(self.cache.matcher_for(&snapshot)?)
    }

    /// Adds or refreshes a keyword. Returns the new generation.
    pub fn upsert(&self, keyword: &str) -> Result<u64, EngineError> {
        let link = self.links.link_html(keyword);
        let snapshot = self.index.upsert(keyword, link)?;
        Ok(snapshot.generation())
    }

    /// Removes a keyword. Returns the new generation, or `None` when the
    /// keyword was unknown and nothing changed.
    pub fn remove(&self, keyword: &str) -> Option<u64> {
        self.index
            .remove(keyword)
            .map(|snapshot| snapshot.generation())
    }

    /// Replaces the whole corpus and invalidates every cache tier once.
    pub fn reset_corpus<I, S>(&self, keywords: I) -> Result<u64, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|text| {
                let text = text.as_ref();
                Keyword::new(text, self.links.link_html(text))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let snapshot = self.index.replace_all(keywords)?;
        info!(
            generation = snapshot.generation(),
            keywords = snapshot.len(),
            "keyword corpus reset"
        );
        Ok(snapshot.generation())
    }
}
