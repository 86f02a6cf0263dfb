//! Per-field composite analyzer construction (§4.2).
//!
//! tantivy has no Lucene-style `Closeable` analyzer: a `TextAnalyzer` owns no
//! external resource and is cheaply `Clone`. The source system's "append
//! every created instance to a release-callback list, release them all on
//! every exit path" therefore has no counterpart here — RAII drop already
//! deterministically releases everything once the [`PerFieldAnalyzer`] (or
//! the last clone of an individual analyzer) goes out of scope. This
//! simplification is recorded in DESIGN.md.

use hashbrown::HashMap;
use tantivy::tokenizer::{LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};

use crate::definition::Definition;
use crate::document::IndexingMode;

/// Resolves analyzer class identifiers (as named in a [`Definition`]) to
/// constructed analyzer instances. A real deployment plugs in a registry
/// covering every analyzer class the host ships; unit tests use
/// [`AnalyzerRegistry::with_builtin`].
pub struct AnalyzerRegistry {
    builders: HashMap<String, Box<dyn Fn() -> TextAnalyzer + Send + Sync>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// A registry pre-populated with the two analyzers the write/query
    /// protocol always needs as fallbacks: `"standard"` and `"keyword"`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("standard", standard_analyzer);
        registry.register("keyword", keyword_analyzer);
        registry
    }

    pub fn register(
        &mut self,
        class_id: impl Into<String>,
        builder: impl Fn() -> TextAnalyzer + Send + Sync + 'static,
    ) {
        self.builders.insert(class_id.into(), Box::new(builder));
    }

    /// Unknown class identifiers resolve to `None` and are skipped silently
    /// by the caller (logged at `warn!` per SPEC_FULL's ambient-logging
    /// addendum).
    pub fn resolve(&self, class_id: &str) -> Option<TextAnalyzer> {
        self.builders.get(class_id).map(|builder| builder())
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

pub fn standard_analyzer() -> TextAnalyzer {
    TextAnalyzer::from(SimpleTokenizer)
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
}

pub fn keyword_analyzer() -> TextAnalyzer {
    TextAnalyzer::from(RawTokenizer)
}

/// A composite per-field analyzer: the default stop-word analyzer as
/// fallback, with per-field overrides layered on top.
pub struct PerFieldAnalyzer {
    default: TextAnalyzer,
    per_field: HashMap<String, TextAnalyzer>,
}

impl PerFieldAnalyzer {
    pub fn get(&self, field: &str) -> TextAnalyzer {
        self.per_field
            .get(field)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Builds a [`PerFieldAnalyzer`] from a default analyzer and a
/// [`Definition`], per the algorithm in §4.2.
pub struct AnalyzerFactory;

impl AnalyzerFactory {
    pub fn build(
        default_analyzer: TextAnalyzer,
        definition: &Definition,
        registry: &AnalyzerRegistry,
    ) -> PerFieldAnalyzer {
        let mut per_field = HashMap::new();

        // Step 1: explicit analyzer entries.
        for (field, class_id) in &definition.analyzers {
            match registry.resolve(class_id) {
                Some(analyzer) => {
                    per_field.insert(field.clone(), analyzer);
                },
                None => {
                    log::warn!(
                        "index '{}': analyzer class '{}' for field '{}' does not resolve, skipping",
                        definition.name,
                        class_id,
                        field
                    );
                },
            }
        }

        // Step 2: indexing-mode driven defaults, lazily shared across
        // every field that needs the same fallback.
        let mut lazy_keyword: Option<TextAnalyzer> = None;
        let mut lazy_standard: Option<TextAnalyzer> = None;

        for (field, mode) in &definition.indexing_modes {
            match mode {
                IndexingMode::NotAnalyzed => {
                    if !per_field.contains_key(field) {
                        let analyzer = lazy_keyword.get_or_insert_with(keyword_analyzer).clone();
                        per_field.insert(field.clone(), analyzer);
                    }
                },
                IndexingMode::Analyzed => {
                    if !per_field.contains_key(field) {
                        let analyzer = lazy_standard.get_or_insert_with(standard_analyzer).clone();
                        per_field.insert(field.clone(), analyzer);
                    }
                },
                IndexingMode::Default => {},
            }
        }

        PerFieldAnalyzer {
            default: default_analyzer,
            per_field,
        }
    }
}

/// External collaborator (§6): given the analyzer currently in effect for a
/// field, may substitute a different one for indexing or for querying.
pub trait AnalyzerGenerator: Send + Sync {
    fn generate_for_indexing(
        &self,
        index_name: &str,
        document: &crate::document::IndexableDocument,
        current: TextAnalyzer,
    ) -> TextAnalyzer;

    fn generate_for_querying(
        &self,
        index_name: &str,
        query_string: &str,
        current: TextAnalyzer,
    ) -> TextAnalyzer;
}

/// Left-folds the ordered list of generators over a starting analyzer. Each
/// generator's output becomes the next generator's `current`; the final
/// result replaces whatever was passed in. There is nothing left to "close"
/// explicitly — see the module doc comment.
pub fn apply_indexing_generators(
    generators: &[Box<dyn AnalyzerGenerator>],
    index_name: &str,
    document: &crate::document::IndexableDocument,
    starting: TextAnalyzer,
) -> TextAnalyzer {
    generators
        .iter()
        .fold(starting, |current, generator| {
            generator.generate_for_indexing(index_name, document, current)
        })
}

pub fn apply_querying_generators(
    generators: &[Box<dyn AnalyzerGenerator>],
    index_name: &str,
    query_string: &str,
    starting: TextAnalyzer,
) -> TextAnalyzer {
    generators.iter().fold(starting, |current, generator| {
        generator.generate_for_querying(index_name, query_string, current)
    })
}
