use hashbrown::HashMap;

use crate::document::IndexingMode;

/// The immutable per-index schema (§3). Constructed once, at index
/// creation, and never mutated afterwards — any change requires creating a
/// new index, same as the source system.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,

    /// Whether this is a map-reduce index rather than a plain one.
    pub is_map_reduce: bool,

    /// field name -> analyzer class identifier (resolved by
    /// [`crate::analyzer::AnalyzerFactory`]).
    pub analyzers: HashMap<String, String>,

    /// field name -> indexing mode.
    pub indexing_modes: HashMap<String, IndexingMode>,

    /// Non-persistent, RAM-backed until promoted (§3, §4.1).
    pub is_temp: bool,
}

impl Definition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_map_reduce: false,
            analyzers: HashMap::new(),
            indexing_modes: HashMap::new(),
            is_temp: false,
        }
    }

    pub fn with_analyzer(mut self, field: impl Into<String>, analyzer: impl Into<String>) -> Self {
        self.analyzers.insert(field.into(), analyzer.into());
        self
    }

    pub fn with_indexing_mode(mut self, field: impl Into<String>, mode: IndexingMode) -> Self {
        self.indexing_modes.insert(field.into(), mode);
        self
    }

    pub fn temp(mut self) -> Self {
        self.is_temp = true;
        self
    }

    /// True if `field` (or, for the `_Range` suffix case, its stripped
    /// form) is declared somewhere in this schema — either as an analyzer
    /// entry or an indexing-mode entry.
    pub fn declares_field(&self, field: &str) -> bool {
        if self.analyzers.contains_key(field) || self.indexing_modes.contains_key(field) {
            return true;
        }

        if let Some(stripped) = field.strip_suffix(crate::document::SIDECAR_RANGE) {
            return self.analyzers.contains_key(stripped)
                || self.indexing_modes.contains_key(stripped);
        }

        false
    }
}
