use crate::error::CorpusError;
use crate::render::escape_html;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

/// A known keyword and the anchor markup that points at its page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keyword {
    text: String,
    link_html: String,
    length: usize,
}

impl Keyword {
    pub fn new(text: impl Into<String>, link_html: impl Into<String>) -> Result<Self, CorpusError> {
        let text = text.into();
        if text.is_empty() {
            return Err(CorpusError::EmptyKeyword);
        }
        let length = text.chars().count();
        Ok(Self {
            text,
            link_html: link_html.into(),
            length,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn link_html(&self) -> &str {
        &self.link_html
    }

    /// Character count of the keyword text.
    pub fn length(&self) -> usize {
        self.length
    }
}

/// Immutable view of the corpus at one generation.
///
/// Keywords are ordered longest first; equal lengths fall back to
/// lexicographic order so the sequence is total and reproducible.
#[derive(Debug, Default)]
pub struct KeywordSnapshot {
    generation: u64,
    keywords: Vec<Keyword>,
    by_text: HashMap<String, usize>,
}

impl KeywordSnapshot {
    fn new(generation: u64, mut keywords: Vec<Keyword>) -> Self {
        keywords.sort_by(|a, b| {
            Reverse(a.length)
                .cmp(&Reverse(b.length))
                .then_with(|| a.text.cmp(&b.text))
        });
        let by_text = keywords
            .iter()
            .enumerate()
            .map(|(idx, keyword)| (keyword.text.clone(), idx))
            .collect();
        Self {
            generation,
            keywords,
            by_text,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn get(&self, text: &str) -> Option<&Keyword> {
        self.by_text.get(text).map(|&idx| &self.keywords[idx])
    }

    /// Pre-rendered anchor for a keyword in this snapshot.
    pub fn link_for(&self, text: &str) -> Option<&str> {
        self.get(text).map(Keyword::link_html)
    }

    fn to_map(&self) -> HashMap<String, Keyword> {
        self.keywords
            .iter()
            .map(|keyword| (keyword.text.clone(), keyword.clone()))
            .collect()
    }
}

/// Notified synchronously, under the writer lock, after every corpus swap.
pub trait CorpusListener: Send + Sync {
    fn corpus_changed(&self, generation: u64);
}

/// Authoritative keyword set.
///
/// Readers load the current snapshot with a single atomic pointer read.
/// Writers are serialized, publish a fresh snapshot, and notify the
/// listener before releasing the lock.
pub struct KeywordIndex {
    current: ArcSwap<KeywordSnapshot>,
    writer: Mutex<()>,
    listener: Option<Arc<dyn CorpusListener>>,
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(KeywordSnapshot::default()),
            writer: Mutex::new(()),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CorpusListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn snapshot(&self) -> Arc<KeywordSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Adds a keyword or replaces the link of an existing one.
    pub fn upsert(
        &self,
        text: &str,
        link_html: impl Into<String>,
    ) -> Result<Arc<KeywordSnapshot>, CorpusError> {
        let keyword = Keyword::new(text, link_html)?;
        let _guard = self.writer.lock();
        let mut keywords = self.current.load().to_map();
        keywords.insert(keyword.text.clone(), keyword);
        Ok(self.publish(keywords.into_values().collect()))
    }

    /// Drops a keyword. Returns `None` when it was not part of the corpus,
    /// in which case no new generation is produced.
    pub fn remove(&self, text: &str) -> Option<Arc<KeywordSnapshot>> {
        let _guard = self.writer.lock();
        let current = self.current.load();
        current.get(text)?;
        let keywords = current
            .keywords
            .iter()
            .filter(|keyword| keyword.text != text)
            .cloned()
            .collect();
        Some(self.publish(keywords))
    }

    /// Replaces the whole corpus in one generation. Later duplicates win.
    pub fn replace_all<I>(&self, keywords: I) -> Result<Arc<KeywordSnapshot>, CorpusError>
    where
        I: IntoIterator<Item = Keyword>,
    {
        let mut unique: HashMap<String, Keyword> = HashMap::new();
        for keyword in keywords {
            if keyword.text.is_empty() {
                return Err(CorpusError::EmptyKeyword);
            }
            unique.insert(keyword.text.clone(), keyword);
        }
        let _guard = self.writer.lock();
        Ok(self.publish(unique.into_values().collect()))
    }

    // Caller must hold the writer lock.
    fn publish(&self, keywords: Vec<Keyword>) -> Arc<KeywordSnapshot> {
        let generation = self.current.load().generation + 1;
        let snapshot = Arc::new(KeywordSnapshot::new(generation, keywords));
        self.current.store(Arc::clone(&snapshot));
        if let Some(listener) = &self.listener {
            listener.corpus_changed(generation);
        }
        snapshot
    }
}

/// Supplies the anchor markup for a keyword's page.
pub trait LinkBuilder: Send + Sync {
    fn link_html(&self, keyword: &str) -> String;
}

/// Links to `{base_path}{percent-encoded keyword}` with escaped visible text.
#[derive(Debug, Clone)]
pub struct PathLinkBuilder {
    base_path: String,
}

impl PathLinkBuilder {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn href(&self, keyword: &str) -> String {
        format!(
            "{}{}",
            self.base_path,
            utf8_percent_encode(keyword, NON_ALPHANUMERIC)
        )
    }
}

impl LinkBuilder for PathLinkBuilder {
    fn link_html(&self, keyword: &str) -> String {
        format!(
            r#"<a href="{}">{}</a>"#,
            escape_html(&self.href(keyword)),
            escape_html(keyword)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn keyword(text: &str) -> Keyword {
        Keyword::new(text, format!("<a>{text}</a>")).unwrap()
    }

    #[derive(Default)]
    struct RecordingListener {
        last: AtomicU64,
        calls: AtomicU64,
    }

    impl CorpusListener for RecordingListener {
        fn corpus_changed(&self, generation: u64) {
            self.last.store(generation, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn snapshot_orders_longest_first_then_lexicographic() {
        let index = KeywordIndex::new();
        let snapshot = index
            .replace_all(["bb", "test", "a", "testing", "aa"].map(keyword))
            .unwrap();
        let order: Vec<_> = snapshot.keywords().iter().map(Keyword::text).collect();
        assert_eq!(order, vec!["testing", "test", "aa", "bb", "a"]);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let kw = Keyword::new("日本語", "<a>x</a>").unwrap();
        assert_eq!(kw.length(), 3);
    }

    #[test]
    fn empty_keyword_is_rejected() {
        let index = KeywordIndex::new();
        assert!(matches!(
            index.upsert("", "<a></a>"),
            Err(CorpusError::EmptyKeyword)
        ));
        assert_eq!(index.generation(), 0);
    }

    #[test]
    fn mutations_bump_generation_and_keep_old_snapshots() {
        let index = KeywordIndex::new();
        let before = index.snapshot();
        index.upsert("foo", "<a>foo</a>").unwrap();
        let after_upsert = index.snapshot();
        assert_eq!(before.generation(), 0);
        assert!(before.is_empty());
        assert_eq!(after_upsert.generation(), 1);
        assert_eq!(after_upsert.link_for("foo"), Some("<a>foo</a>"));

        index.upsert("foo", "<a>FOO</a>").unwrap();
        assert_eq!(index.snapshot().link_for("foo"), Some("<a>FOO</a>"));
        assert_eq!(after_upsert.link_for("foo"), Some("<a>foo</a>"));

        assert!(index.remove("foo").is_some());
        assert_eq!(index.generation(), 3);
        assert!(index.snapshot().get("foo").is_none());
    }

    #[test]
    fn removing_unknown_keyword_is_a_no_op() {
        let listener = Arc::new(RecordingListener::default());
        let index = KeywordIndex::new().with_listener(listener.clone());
        assert!(index.remove("ghost").is_none());
        assert_eq!(index.generation(), 0);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_sees_every_new_generation() {
        let listener = Arc::new(RecordingListener::default());
        let index = KeywordIndex::new().with_listener(listener.clone());
        index.upsert("a", "<a>a</a>").unwrap();
        index.replace_all(["x", "y"].map(keyword)).unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
        assert_eq!(listener.last.load(Ordering::SeqCst), 2);
        assert_eq!(index.snapshot().len(), 2);
    }

    #[test]
    fn replace_all_deduplicates_by_text() {
        let index = KeywordIndex::new();
        let snapshot = index
            .replace_all([
                Keyword::new("dup", "<a>1</a>").unwrap(),
                Keyword::new("dup", "<a>2</a>").unwrap(),
            ])
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.link_for("dup"), Some("<a>2</a>"));
    }

    #[test]
    fn path_links_encode_href_and_escape_text() {
        let links = PathLinkBuilder::new("/keyword/");
        assert_eq!(
            links.link_html("a b"),
            r#"<a href="/keyword/a%20b">a b</a>"#
        );
        assert_eq!(
            links.link_html("<x>"),
            r#"<a href="/keyword/%3Cx%3E">&lt;x&gt;</a>"#
        );
    }
}
