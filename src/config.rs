use std::num::NonZeroUsize;

const DEFAULT_TIER1_CAPACITY: usize = 65_536;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on process-local rendered descriptions.
    pub tier1_capacity: NonZeroUsize,
    /// Namespace prepended to every shared cache key.
    pub shared_key_prefix: String,
    /// Markup substituted for each newline in rendered output.
    pub line_break: String,
    /// Path prefix for keyword pages, used by [`crate::PathLinkBuilder`].
    pub link_base_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tier1_capacity: NonZeroUsize::new(DEFAULT_TIER1_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            shared_key_prefix: "htmlify:".to_string(),
            line_break: "<br />".to_string(),
            link_base_path: "/keyword/".to_string(),
        }
    }
}
